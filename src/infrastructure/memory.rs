use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    RwLock,
};
use tracing::warn;

use crate::application::{
    Catalog, CatalogWriter, ConsultorioDocument, Execute, ListingQuery, Projector,
    ReservationDocument, Store,
};
use crate::domain::{
    core::{ConsultorioId, ProfileId, ReservationId},
    Aggregation, DataAccessError, DomainEvent, Entity, Repository,
};

use super::stream_name;

/// Repository keeping event streams in process memory.
///
/// Saved events are published on the bus, which stands in for an event
/// store subscription.
pub struct InMemoryRepository<A: Aggregation> {
    streams: RwLock<HashMap<A::Id, Vec<A::Event>>>,
    bus: broadcast::Sender<DomainEvent>,
}

impl<A: Aggregation> InMemoryRepository<A> {
    pub fn new(bus: broadcast::Sender<DomainEvent>) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            bus,
        }
    }
}

#[async_trait]
impl<A> Repository<A> for InMemoryRepository<A>
where
    A: Aggregation,
    A::Event: Into<DomainEvent>,
{
    async fn find_by_id(&self, id: A::Id) -> Result<Option<A>, DataAccessError> {
        let streams = self.streams.read().await;
        let events = match streams.get(&id) {
            Some(events) if !events.is_empty() => events,
            _ => return Ok(None),
        };
        let mut entity = A::default();
        for event in events {
            entity.apply(event.clone());
        }
        entity
            .events_mut()
            .set_revision(Some(events.len() as u64 - 1));
        Ok(Some(entity))
    }

    async fn save(&self, entity: &mut A) -> Result<bool, DataAccessError> {
        if entity.events().is_empty() {
            return Ok(false);
        }
        let mut streams = self.streams.write().await;
        let stream = streams.entry(entity.id()).or_default();
        let current = stream.len().checked_sub(1).map(|r| r as u64);
        if current != entity.revision() {
            return Err(DataAccessError::Conflict(stream_name::<A>(entity.id())));
        }
        let events = entity.pop_all();
        stream.extend(events.iter().cloned());
        let revision = Some(stream.len() as u64 - 1);
        drop(streams);
        entity.events_mut().set_revision(revision);
        for event in events {
            // no subscribers is fine
            let _ = self.bus.send(event.into());
        }
        Ok(true)
    }

    async fn delete(&self, entity: &mut A) -> Result<bool, DataAccessError> {
        self.save(entity).await?;
        let removed = self.streams.write().await.remove(&entity.id()).is_some();
        entity.events_mut().set_revision(None);
        Ok(removed)
    }
}

impl Store {
    /// Repositories without external services. Every saved event is sent
    /// on `bus`.
    pub fn in_memory(bus: broadcast::Sender<DomainEvent>) -> Self {
        Self {
            profiles: Arc::new(InMemoryRepository::new(bus.clone())),
            consultorios: Arc::new(InMemoryRepository::new(bus.clone())),
            agendas: Arc::new(InMemoryRepository::new(bus.clone())),
            reservations: Arc::new(InMemoryRepository::new(bus.clone())),
            favorites: Arc::new(InMemoryRepository::new(bus.clone())),
            ratings: Arc::new(InMemoryRepository::new(bus.clone())),
            media: Arc::new(InMemoryRepository::new(bus.clone())),
            stripe_accounts: Arc::new(InMemoryRepository::new(bus.clone())),
            stripe_payments: Arc::new(InMemoryRepository::new(bus.clone())),
            stripe_webhooks: Arc::new(InMemoryRepository::new(bus)),
        }
    }
}

/// Feeds events published on the bus to `projector` until every sender is
/// dropped.
pub async fn project_events(projector: Projector, mut events: broadcast::Receiver<DomainEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Err(e) = projector.execute(event).await {
                    warn!("イベントの投影に失敗: {}", e);
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!("{} 件のイベントを取りこぼしました", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Catalog held in process memory.
#[derive(Default)]
pub struct InMemoryCatalog {
    consultorios: RwLock<HashMap<ConsultorioId, ConsultorioDocument>>,
    reservations: RwLock<HashMap<ReservationId, ReservationDocument>>,
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn search_consultorios(
        &self,
        query: &ListingQuery,
    ) -> Result<Vec<ConsultorioDocument>, DataAccessError> {
        let mut found: Vec<_> = self
            .consultorios
            .read()
            .await
            .values()
            .filter(|d| query.matches(d))
            .cloned()
            .collect();
        found.sort_by_key(|d| *d.id);
        Ok(found
            .into_iter()
            .skip(query.offset())
            .take(query.limit())
            .collect())
    }

    async fn consultorios_of_owner(
        &self,
        owner: ProfileId,
    ) -> Result<Vec<ConsultorioDocument>, DataAccessError> {
        let mut found: Vec<_> = self
            .consultorios
            .read()
            .await
            .values()
            .filter(|d| d.owner == owner)
            .cloned()
            .collect();
        found.sort_by_key(|d| *d.id);
        Ok(found)
    }

    async fn reservations_of_booker(
        &self,
        booker: ProfileId,
    ) -> Result<Vec<ReservationDocument>, DataAccessError> {
        let mut found: Vec<_> = self
            .reservations
            .read()
            .await
            .values()
            .filter(|d| d.booker == booker)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.start_ts.cmp(&a.start_ts));
        Ok(found)
    }

    async fn reservations_of_consultorio(
        &self,
        consultorio: ConsultorioId,
    ) -> Result<Vec<ReservationDocument>, DataAccessError> {
        let mut found: Vec<_> = self
            .reservations
            .read()
            .await
            .values()
            .filter(|d| d.consultorio == consultorio)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.start_ts.cmp(&a.start_ts));
        Ok(found)
    }
}

#[async_trait]
impl CatalogWriter for InMemoryCatalog {
    async fn upsert_consultorio(
        &self,
        document: ConsultorioDocument,
    ) -> Result<(), DataAccessError> {
        self.consultorios
            .write()
            .await
            .insert(document.id, document);
        Ok(())
    }

    async fn remove_consultorio(&self, id: ConsultorioId) -> Result<(), DataAccessError> {
        self.consultorios.write().await.remove(&id);
        Ok(())
    }

    async fn upsert_reservation(
        &self,
        document: ReservationDocument,
    ) -> Result<(), DataAccessError> {
        self.reservations
            .write()
            .await
            .insert(document.id, document);
        Ok(())
    }
}
