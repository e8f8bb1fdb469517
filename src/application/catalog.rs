use std::{error::Error, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{
    core::{
        Consultorio, ConsultorioEvent, ConsultorioId, CoreEvent, Currency, MediaId, Money,
        OpeningHours, PaymentStatus, ProfileId, RatingBoard, RatingEvent, Reservation,
        ReservationEvent, ReservationId, ReservationStatus,
    },
    DataAccessError, DomainEvent, Entity,
};

use super::{ServiceError, Store};

/// 検索用の診察室ドキュメント
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsultorioDocument {
    pub id: ConsultorioId,
    pub owner: ProfileId,
    pub title: String,
    pub description: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub currency: Currency,
    /// Minor units.
    pub price_per_hour: Option<i64>,
    pub price_per_day: Option<i64>,
    pub price_per_month: Option<i64>,
    pub amenities: Vec<String>,
    pub images: Vec<MediaId>,
    pub opening_hours: OpeningHours,
    pub active: bool,
    pub approved: bool,
    pub bookable: bool,
    pub rating_average: Option<f64>,
    pub rating_count: usize,
}

impl ConsultorioDocument {
    pub fn new(consultorio: &Consultorio, ratings: Option<&RatingBoard>) -> Self {
        let pricing = consultorio.pricing();
        let address = consultorio.address();
        let currency = [pricing.per_hour, pricing.per_day, pricing.per_month]
            .into_iter()
            .flatten()
            .map(|m| m.currency())
            .next()
            .unwrap_or_default();
        Self {
            id: consultorio.id(),
            owner: consultorio.owner(),
            title: consultorio.title().to_owned(),
            description: consultorio.description().to_owned(),
            street: address.street.clone(),
            city: address.city.clone(),
            state: address.state.clone(),
            postal_code: address.postal_code.clone(),
            currency,
            price_per_hour: pricing.per_hour.map(|m| m.amount()),
            price_per_day: pricing.per_day.map(|m| m.amount()),
            price_per_month: pricing.per_month.map(|m| m.amount()),
            amenities: consultorio.amenities().to_vec(),
            images: consultorio.images().to_vec(),
            opening_hours: consultorio.opening_hours().clone(),
            active: consultorio.is_active(),
            approved: consultorio.is_approved(),
            bookable: consultorio.is_bookable(),
            rating_average: ratings.and_then(|r| r.average()),
            rating_count: ratings.map(|r| r.count()).unwrap_or_default(),
        }
    }
}

/// 予約一覧用ドキュメント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationDocument {
    pub id: ReservationId,
    pub consultorio: ConsultorioId,
    pub consultorio_title: String,
    pub booker: ProfileId,
    pub owner: ProfileId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Unix seconds of `start`, for sorting.
    pub start_ts: i64,
    pub hour: u32,
    pub total: Money,
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
}

impl ReservationDocument {
    pub fn new(reservation: &Reservation, consultorio: &Consultorio) -> Self {
        let time = reservation.time();
        Self {
            id: reservation.id(),
            consultorio: reservation.consultorio(),
            consultorio_title: consultorio.title().to_owned(),
            booker: reservation.booker(),
            owner: reservation.owner(),
            start: time.start,
            end: time.end,
            start_ts: time.start.timestamp(),
            hour: reservation.hour(),
            total: reservation.price().total,
            status: reservation.status(),
            payment_status: reservation.payment_status(),
        }
    }
}

/// Public listing search.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingQuery {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    /// Minor units.
    #[serde(default)]
    pub max_price_per_hour: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl ListingQuery {
    pub const DEFAULT_LIMIT: usize = 20;
    pub const MAX_LIMIT: usize = 100;

    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or_default()
    }

    /// Filter applied to a document outside the search engine.
    pub fn matches(&self, document: &ConsultorioDocument) -> bool {
        if !document.bookable {
            return false;
        }
        if let Some(city) = &self.city {
            if !document.city.eq_ignore_ascii_case(city.trim()) {
                return false;
            }
        }
        if let Some(max) = self.max_price_per_hour {
            match document.price_per_hour {
                Some(price) if price <= max => {}
                _ => return false,
            }
        }
        match self.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                let text = text.to_lowercase();
                document.title.to_lowercase().contains(&text)
                    || document.description.to_lowercase().contains(&text)
                    || document.city.to_lowercase().contains(&text)
                    || document
                        .amenities
                        .iter()
                        .any(|a| a.to_lowercase().contains(&text))
            }
            _ => true,
        }
    }
}

/// Read side of the catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn search_consultorios(
        &self,
        query: &ListingQuery,
    ) -> Result<Vec<ConsultorioDocument>, DataAccessError>;
    async fn consultorios_of_owner(
        &self,
        owner: ProfileId,
    ) -> Result<Vec<ConsultorioDocument>, DataAccessError>;
    /// Newest first.
    async fn reservations_of_booker(
        &self,
        booker: ProfileId,
    ) -> Result<Vec<ReservationDocument>, DataAccessError>;
    async fn reservations_of_consultorio(
        &self,
        consultorio: ConsultorioId,
    ) -> Result<Vec<ReservationDocument>, DataAccessError>;
}

/// Write side of the catalog, driven by the [`Projector`].
#[async_trait]
pub trait CatalogWriter: Send + Sync {
    async fn upsert_consultorio(&self, document: ConsultorioDocument)
        -> Result<(), DataAccessError>;
    async fn remove_consultorio(&self, id: ConsultorioId) -> Result<(), DataAccessError>;
    async fn upsert_reservation(&self, document: ReservationDocument)
        -> Result<(), DataAccessError>;
}

#[async_trait]
pub trait Execute<E> {
    type Error: Error;
    async fn execute(&self, event: E) -> Result<(), Self::Error>;
}

/// Keeps the catalog in step with the event streams.
///
/// Each event triggers a reload of the affected aggregate, so replaying an
/// event twice writes the same document.
#[derive(Clone)]
pub struct Projector {
    store: Store,
    writer: Arc<dyn CatalogWriter>,
}

impl Projector {
    pub fn new(store: Store, writer: Arc<dyn CatalogWriter>) -> Self {
        Self { store, writer }
    }

    async fn refresh_consultorio(&self, id: ConsultorioId) -> Result<(), ServiceError> {
        let consultorio = match self.store.consultorios.find_by_id(id).await? {
            Some(c) if !c.is_deleted() => c,
            _ => {
                debug!("診察室 {} を索引から削除", id);
                return Ok(self.writer.remove_consultorio(id).await?);
            }
        };
        let ratings = self.store.ratings.find_by_id(id).await?;
        let document = ConsultorioDocument::new(&consultorio, ratings.as_ref());
        Ok(self.writer.upsert_consultorio(document).await?)
    }

    async fn refresh_reservation(&self, id: ReservationId) -> Result<(), ServiceError> {
        let reservation = match self.store.reservations.find_by_id(id).await? {
            Some(r) => r,
            None => {
                warn!("予約 {} が見つかりません", id);
                return Ok(());
            }
        };
        let consultorio = match self
            .store
            .consultorios
            .find_by_id(reservation.consultorio())
            .await?
        {
            Some(c) => c,
            None => {
                warn!("予約 {} の診察室が見つかりません", id);
                return Ok(());
            }
        };
        let document = ReservationDocument::new(&reservation, &consultorio);
        Ok(self.writer.upsert_reservation(document).await?)
    }
}

#[async_trait]
impl Execute<DomainEvent> for Projector {
    type Error = ServiceError;
    async fn execute(&self, event: DomainEvent) -> Result<(), Self::Error> {
        match event {
            DomainEvent::Core(event) => self.execute(event).await,
            DomainEvent::Payment(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Execute<CoreEvent> for Projector {
    type Error = ServiceError;
    async fn execute(&self, event: CoreEvent) -> Result<(), Self::Error> {
        match event {
            CoreEvent::ConsultorioEvent(event) => self.execute(event).await,
            CoreEvent::RatingEvent(event) => self.execute(event).await,
            CoreEvent::ReservationEvent(event) => self.execute(event).await,
            CoreEvent::AgendaEvent(_)
            | CoreEvent::FavoritesEvent(_)
            | CoreEvent::MediaEvent(_)
            | CoreEvent::ProfileEvent(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Execute<ConsultorioEvent> for Projector {
    type Error = ServiceError;
    async fn execute(&self, event: ConsultorioEvent) -> Result<(), Self::Error> {
        let id = match event {
            ConsultorioEvent::ConsultorioCreated { id, .. }
            | ConsultorioEvent::DetailsChanged { id, .. }
            | ConsultorioEvent::AddressChanged { id, .. }
            | ConsultorioEvent::PricingChanged { id, .. }
            | ConsultorioEvent::AmenitiesChanged { id, .. }
            | ConsultorioEvent::OpeningHoursChanged { id, .. }
            | ConsultorioEvent::ImageAdded { id, .. }
            | ConsultorioEvent::ImageRemoved { id, .. }
            | ConsultorioEvent::Approved { id }
            | ConsultorioEvent::ApprovalRevoked { id }
            | ConsultorioEvent::Activated { id }
            | ConsultorioEvent::Deactivated { id }
            | ConsultorioEvent::ConsultorioDeleted { id } => id,
        };
        self.refresh_consultorio(id).await
    }
}

#[async_trait]
impl Execute<RatingEvent> for Projector {
    type Error = ServiceError;
    async fn execute(&self, event: RatingEvent) -> Result<(), Self::Error> {
        let id = match event {
            RatingEvent::RatingSubmitted { id, .. }
            | RatingEvent::RatingRevised { id, .. }
            | RatingEvent::RatingWithdrawn { id, .. } => id,
        };
        self.refresh_consultorio(id).await
    }
}

#[async_trait]
impl Execute<ReservationEvent> for Projector {
    type Error = ServiceError;
    async fn execute(&self, event: ReservationEvent) -> Result<(), Self::Error> {
        let id = match event {
            ReservationEvent::ReservationCreated { id, .. }
            | ReservationEvent::ReservationConfirmed { id }
            | ReservationEvent::ReservationCancelled { id, .. }
            | ReservationEvent::ReservationCompleted { id }
            | ReservationEvent::PaymentStatusChanged { id, .. } => id,
        };
        self.refresh_reservation(id).await
    }
}

#[cfg(test)]
mod tests {
    use crate::application::tests::store;
    use crate::domain::core::draft;
    use crate::infrastructure::InMemoryCatalog;

    use super::*;

    #[tokio::test]
    async fn test_projects_listing_and_ratings() {
        let store = store();
        let catalog = Arc::new(InMemoryCatalog::default());
        let projector = Projector::new(store.clone(), catalog.clone());

        let mut consultorio = Consultorio::create(10.into(), 1.into(), draft()).unwrap();
        consultorio.approve().unwrap();
        store.consultorios.save(&mut consultorio).await.unwrap();
        let mut ratings = RatingBoard::new(10.into());
        ratings.submit(2.into(), 4, None, Utc::now()).unwrap();
        store.ratings.save(&mut ratings).await.unwrap();

        projector
            .execute(DomainEvent::from(ConsultorioEvent::Approved { id: 10.into() }))
            .await
            .unwrap();
        let found = catalog
            .search_consultorios(&ListingQuery {
                text: Some("roma".to_owned()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rating_average, Some(4.0));
        assert_eq!(found[0].price_per_hour, Some(45_000));

        consultorio.delete().unwrap();
        store.consultorios.save(&mut consultorio).await.unwrap();
        projector
            .execute(DomainEvent::from(ConsultorioEvent::ConsultorioDeleted {
                id: 10.into(),
            }))
            .await
            .unwrap();
        assert!(catalog
            .consultorios_of_owner(1.into())
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_listing_query_filters() {
        let mut consultorio = Consultorio::create(10.into(), 1.into(), draft()).unwrap();
        let document = ConsultorioDocument::new(&consultorio, None);
        assert!(!ListingQuery::default().matches(&document), "not approved");

        consultorio.approve().unwrap();
        let document = ConsultorioDocument::new(&consultorio, None);
        let query = |city: &str, max: i64| ListingQuery {
            city: Some(city.to_owned()),
            max_price_per_hour: Some(max),
            ..Default::default()
        };
        assert!(query("cdmx", 45_000).matches(&document));
        assert!(!query("cdmx", 44_999).matches(&document));
        assert!(!query("Monterrey", 45_000).matches(&document));
        assert_eq!(ListingQuery::default().limit(), 20);
        assert_eq!(
            ListingQuery {
                limit: Some(1000),
                ..Default::default()
            }
            .limit(),
            100
        );
    }
}
