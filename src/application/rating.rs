use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::core::{ConsultorioId, ProfileId, Rating, RatingBoard, ReservationStatus};

use super::{actor, live_consultorio, load, Catalog, ServiceError, Store};

/// Score and optional comment sent by a guest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingInput {
    pub score: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Ratings of one listing with their summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
    pub consultorio: ConsultorioId,
    pub average: Option<f64>,
    pub count: usize,
    pub ratings: Vec<Rating>,
}

impl RatingSummary {
    fn new(consultorio: ConsultorioId, board: Option<&RatingBoard>) -> Self {
        Self {
            consultorio,
            average: board.and_then(|b| b.average()),
            count: board.map(|b| b.count()).unwrap_or_default(),
            ratings: board.map(|b| b.ratings().to_vec()).unwrap_or_default(),
        }
    }
}

/// 評価サービス
#[derive(Clone)]
pub struct RatingService {
    store: Store,
    catalog: Arc<dyn Catalog>,
}

impl RatingService {
    pub fn new(store: Store, catalog: Arc<dyn Catalog>) -> Self {
        Self { store, catalog }
    }

    pub async fn list(&self, consultorio: ConsultorioId) -> Result<RatingSummary, ServiceError> {
        live_consultorio(&self.store, consultorio).await?;
        let board = self.store.ratings.find_by_id(consultorio).await?;
        Ok(RatingSummary::new(consultorio, board.as_ref()))
    }

    /// Only guests who completed a reservation at the listing may rate it.
    pub async fn submit(
        &self,
        user: ProfileId,
        consultorio: ConsultorioId,
        input: RatingInput,
        now: DateTime<Utc>,
    ) -> Result<RatingSummary, ServiceError> {
        actor(&self.store, user).await?;
        let listing = live_consultorio(&self.store, consultorio).await?;
        if listing.owner() == user {
            return Err(ServiceError::Forbidden("You cannot rate your own consultorio"));
        }
        let stayed = self
            .catalog
            .reservations_of_booker(user)
            .await?
            .iter()
            .any(|r| r.consultorio == consultorio && r.status == ReservationStatus::Completada);
        if !stayed {
            return Err(ServiceError::Forbidden(
                "Only guests with a completed reservation can rate",
            ));
        }
        let mut board = self
            .store
            .ratings
            .find_by_id(consultorio)
            .await?
            .unwrap_or_else(|| RatingBoard::new(consultorio));
        board.submit(user, input.score, input.comment, now)?;
        self.store.ratings.save(&mut board).await?;
        info!("診察室 {} に評価 {} を登録", consultorio, input.score);
        Ok(RatingSummary::new(consultorio, Some(&board)))
    }

    pub async fn revise(
        &self,
        user: ProfileId,
        consultorio: ConsultorioId,
        input: RatingInput,
        now: DateTime<Utc>,
    ) -> Result<RatingSummary, ServiceError> {
        actor(&self.store, user).await?;
        live_consultorio(&self.store, consultorio).await?;
        let mut board = load(self.store.ratings.as_ref(), consultorio, "Rating").await?;
        board.revise(user, input.score, input.comment, now)?;
        self.store.ratings.save(&mut board).await?;
        Ok(RatingSummary::new(consultorio, Some(&board)))
    }

    pub async fn withdraw(
        &self,
        user: ProfileId,
        consultorio: ConsultorioId,
    ) -> Result<RatingSummary, ServiceError> {
        actor(&self.store, user).await?;
        let mut board = load(self.store.ratings.as_ref(), consultorio, "Rating").await?;
        board.withdraw(user)?;
        self.store.ratings.save(&mut board).await?;
        Ok(RatingSummary::new(consultorio, Some(&board)))
    }
}
