//! Use cases of the marketplace. Each service loads aggregates from the
//! [`Store`], runs a command and saves the result.

mod auth;
mod booking;
mod catalog;
mod favorite;
mod listing;
mod payment;
mod profile;
mod rating;

use std::sync::Arc;

use thiserror::Error;

use crate::domain::{
    core::{
        Agenda, AgendaError, Consultorio, ConsultorioError, Favorites, FavoritesError, Media,
        MediaError, MoneyError, Profile, ProfileError, ProfileId, RatingBoard, RatingError,
        Reservation, ReservationError,
    },
    payment::{
        GatewayError, StripeAccount, StripeAccountError, StripePayment, StripePaymentError,
        StripeWebhook, StripeWebhookError,
    },
    Aggregation, DataAccessError, Entity, Repository,
};

pub use self::auth::*;
pub use self::booking::*;
pub use self::catalog::*;
pub use self::favorite::*;
pub use self::listing::*;
pub use self::payment::*;
pub use self::profile::*;
pub use self::rating::*;

/// One repository per aggregate type.
#[derive(Clone)]
pub struct Store {
    pub profiles: Arc<dyn Repository<Profile>>,
    pub consultorios: Arc<dyn Repository<Consultorio>>,
    pub agendas: Arc<dyn Repository<Agenda>>,
    pub reservations: Arc<dyn Repository<Reservation>>,
    pub favorites: Arc<dyn Repository<Favorites>>,
    pub ratings: Arc<dyn Repository<RatingBoard>>,
    pub media: Arc<dyn Repository<Media>>,
    pub stripe_accounts: Arc<dyn Repository<StripeAccount>>,
    pub stripe_payments: Arc<dyn Repository<StripePayment>>,
    pub stripe_webhooks: Arc<dyn Repository<StripeWebhook>>,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Authentication required")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    DataAccess(#[from] DataAccessError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

macro_rules! invalid_from {
    ($($error:ty),*) => {
        $(
            impl From<$error> for ServiceError {
                fn from(value: $error) -> Self {
                    ServiceError::Invalid(value.to_string())
                }
            }
        )*
    };
}

invalid_from!(
    ConsultorioError,
    FavoritesError,
    MediaError,
    MoneyError,
    ProfileError,
    RatingError,
    StripeAccountError,
    StripePaymentError,
    StripeWebhookError
);

impl From<AgendaError> for ServiceError {
    fn from(value: AgendaError) -> Self {
        match value {
            AgendaError::SlotTaken | AgendaError::DuplicateReservation => {
                ServiceError::Conflict(value.to_string())
            }
            _ => ServiceError::Invalid(value.to_string()),
        }
    }
}

impl From<ReservationError> for ServiceError {
    fn from(value: ReservationError) -> Self {
        match value {
            ReservationError::InvalidStatusTransition
            | ReservationError::InvalidPaymentTransition => {
                ServiceError::Conflict(value.to_string())
            }
            _ => ServiceError::Invalid(value.to_string()),
        }
    }
}

/// Loads an aggregate or fails with `NotFound(what)`.
async fn load<A: Aggregation>(
    repository: &dyn Repository<A>,
    id: A::Id,
    what: &'static str,
) -> Result<A, ServiceError> {
    repository
        .find_by_id(id)
        .await?
        .ok_or(ServiceError::NotFound(what))
}

/// Profile of the caller. Every command except registration needs one.
async fn actor(store: &Store, id: ProfileId) -> Result<Profile, ServiceError> {
    store
        .profiles
        .find_by_id(id)
        .await?
        .ok_or(ServiceError::Forbidden("Register your profile first"))
}

/// Listing that exists and was not deleted.
async fn live_consultorio(
    store: &Store,
    id: crate::domain::core::ConsultorioId,
) -> Result<Consultorio, ServiceError> {
    match load(store.consultorios.as_ref(), id, "Consultorio").await? {
        c if c.is_deleted() => Err(ServiceError::NotFound("Consultorio")),
        c => Ok(c),
    }
}

fn ensure_owner_or_admin(
    actor: &Profile,
    owner: ProfileId,
    message: &'static str,
) -> Result<(), ServiceError> {
    match actor.id() == owner || actor.role().is_admin() {
        true => Ok(()),
        false => Err(ServiceError::Forbidden(message)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use tokio::sync::broadcast;

    use crate::domain::core::Role;

    use super::*;

    pub(crate) fn store() -> Store {
        let (bus, _) = broadcast::channel(64);
        Store::in_memory(bus)
    }

    pub(crate) async fn register(store: &Store, subject: &str, role: Role) -> Profile {
        let mut profile = Profile::register(
            subject.to_owned(),
            format!("{}@example.com", subject.replace('|', ".")),
            subject.to_owned(),
            None,
        )
        .unwrap();
        if role != Role::User {
            profile.change_role(role).unwrap();
        }
        store.profiles.save(&mut profile).await.unwrap();
        profile
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            ServiceError::from(AgendaError::SlotTaken),
            ServiceError::Conflict(_)
        ));
        assert!(matches!(
            ServiceError::from(AgendaError::NotOneHour),
            ServiceError::Invalid(_)
        ));
        assert!(matches!(
            ServiceError::from(ReservationError::InvalidStatusTransition),
            ServiceError::Conflict(_)
        ));
        assert_eq!(
            ServiceError::from(ProfileError::InvalidEmail).to_string(),
            "Invalid email address"
        );
    }

    #[tokio::test]
    async fn test_actor_requires_profile() {
        let store = store();
        assert!(matches!(
            actor(&store, 1.into()).await,
            Err(ServiceError::Forbidden(_))
        ));
        let profile = register(&store, "auth|ana", Role::User).await;
        assert_eq!(actor(&store, profile.id()).await.unwrap().id(), profile.id());
    }
}
