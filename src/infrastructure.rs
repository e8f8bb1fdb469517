mod auth;
mod event_store;
mod memory;
mod search;
mod stripe;

use eventstore::{EventData, ResolvedEvent};
use serde_json::{json, Value};

use crate::domain::{
    core::{
        Agenda, Consultorio, CoreEvent, Favorites, Media, Profile, RatingBoard, Reservation,
    },
    payment::{PaymentEvent, StripeAccount, StripePayment, StripeWebhook},
    DataAccessError, DomainEvent, Entity, Event, Id,
};

use std::fmt::Display;

pub use self::auth::*;
pub use self::event_store::*;
pub use self::memory::*;
pub use self::search::*;
pub use self::stripe::*;

impl From<eventstore::Error> for DataAccessError {
    fn from(value: eventstore::Error) -> Self {
        match value {
            eventstore::Error::ConnectionClosed
            | eventstore::Error::Grpc { .. }
            | eventstore::Error::GrpcConnectionError(_)
            | eventstore::Error::DeadlineExceeded
            | eventstore::Error::InitializationError(_) => Self::ConnectionError(Box::new(value)),
            eventstore::Error::ServerError(_)
            | eventstore::Error::NotLeaderException(_)
            | eventstore::Error::AccessDenied
            | eventstore::Error::UnsupportedFeature
            | eventstore::Error::InternalParsingError(_)
            | eventstore::Error::InternalClientError => Self::QueryError(Box::new(value)),
            eventstore::Error::ResourceNotFound | eventstore::Error::ResourceDeleted => {
                Self::ReadError(Box::new(value))
            }
            eventstore::Error::ResourceAlreadyExists
            | eventstore::Error::WrongExpectedVersion { .. } => Self::Conflict(value.to_string()),
            eventstore::Error::IllegalStateError(_) => Self::ClientSideError(Box::new(value)),
        }
    }
}

impl From<EventConvertError> for DataAccessError {
    fn from(value: EventConvertError) -> Self {
        DataAccessError::ClientSideError(Box::new(value))
    }
}

#[derive(Debug)]
pub struct EventConvertError;

impl std::error::Error for EventConvertError {}

impl Display for EventConvertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to convert event")
    }
}

impl From<serde_json::Error> for EventConvertError {
    fn from(_value: serde_json::Error) -> Self {
        EventConvertError
    }
}

fn entity_id<I: Id>(stream_id: &str) -> Option<I> {
    stream_id
        .rsplit('-')
        .next()
        .and_then(|s| s.parse::<I::Inner>().ok())
        .map(I::from)
}

pub fn stream_name<E: Entity>(id: E::Id) -> String {
    E::ENTITY_NAME.to_owned() + "-" + &id.to_string()
}

/// Stores the variant name as the event type and the variant's fields,
/// minus the stream id, as the payload.
fn from_event<E: Event>(event: &E) -> Result<EventData, EventConvertError> {
    let (event_type, data) = event_payload(event)?;
    Ok(EventData::json(event_type, data)?)
}

fn event_payload<E: Event>(event: &E) -> Result<(String, Value), EventConvertError> {
    let (event_type, mut data) = match serde_json::to_value(event)? {
        Value::Object(root) => root.into_iter().next().ok_or(EventConvertError)?,
        _ => return Err(EventConvertError),
    };
    data.as_object_mut()
        .ok_or(EventConvertError)?
        .remove("id");
    Ok((event_type, data))
}

fn try_from_resolved_event<E: Event>(value: &ResolvedEvent) -> Result<E, EventConvertError> {
    let event = value.get_original_event();
    let id = entity_id::<E::Id>(&event.stream_id).ok_or(EventConvertError)?;
    let mut data: Value = serde_json::from_slice(event.data.as_ref())?;
    data.as_object_mut()
        .ok_or(EventConvertError)?
        .insert("id".to_owned(), serde_json::to_value(id)?);
    let json = json!({ &event.event_type: data });
    Ok(serde_json::from_value(json)?)
}

impl TryFrom<&ResolvedEvent> for DomainEvent {
    type Error = EventConvertError;

    fn try_from(value: &ResolvedEvent) -> Result<Self, Self::Error> {
        let entity = value
            .get_original_stream_id()
            .split('-')
            .next()
            .ok_or(EventConvertError)?;
        let event: DomainEvent = match entity {
            Agenda::ENTITY_NAME => CoreEvent::AgendaEvent(try_from_resolved_event(value)?).into(),
            Consultorio::ENTITY_NAME => {
                CoreEvent::ConsultorioEvent(try_from_resolved_event(value)?).into()
            }
            Favorites::ENTITY_NAME => {
                CoreEvent::FavoritesEvent(try_from_resolved_event(value)?).into()
            }
            Media::ENTITY_NAME => CoreEvent::MediaEvent(try_from_resolved_event(value)?).into(),
            Profile::ENTITY_NAME => CoreEvent::ProfileEvent(try_from_resolved_event(value)?).into(),
            RatingBoard::ENTITY_NAME => {
                CoreEvent::RatingEvent(try_from_resolved_event(value)?).into()
            }
            Reservation::ENTITY_NAME => {
                CoreEvent::ReservationEvent(try_from_resolved_event(value)?).into()
            }
            StripeAccount::ENTITY_NAME => {
                PaymentEvent::StripeAccountEvent(try_from_resolved_event(value)?).into()
            }
            StripePayment::ENTITY_NAME => {
                PaymentEvent::StripePaymentEvent(try_from_resolved_event(value)?).into()
            }
            StripeWebhook::ENTITY_NAME => {
                PaymentEvent::StripeWebhookEvent(try_from_resolved_event(value)?).into()
            }
            _ => return Err(EventConvertError),
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::domain::core::{AgendaEvent, ConsultorioId, ProfileEvent, ProfileId};

    use super::*;

    #[test]
    fn test_stream_name() {
        assert_eq!(stream_name::<Agenda>(42.into()), "agenda-42");
        assert_eq!(
            stream_name::<StripeWebhook>(7.into()),
            "stripe_webhook-7"
        );
        assert_eq!(
            entity_id::<ConsultorioId>("agenda-42"),
            Some(ConsultorioId::from(42))
        );
        assert_eq!(entity_id::<ConsultorioId>("agenda-x"), None);
    }

    #[test]
    fn test_event_data_drops_stream_id() {
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 15, 0, 0).unwrap();
        let event = AgendaEvent::SlotBooked {
            id: 42.into(),
            reservation: 9.into(),
            time: start..start + chrono::Duration::hours(1),
        };
        let (event_type, data) = event_payload(&event).unwrap();
        assert_eq!(event_type, "SlotBooked");
        assert!(data.get("id").is_none());
        assert_eq!(data["reservation"], "9");

        let profile = ProfileEvent::RoleChanged {
            id: ProfileId::from(3),
            role: Default::default(),
        };
        assert!(from_event(&profile).is_ok());
        let (event_type, data) = event_payload(&profile).unwrap();
        assert_eq!(event_type, "RoleChanged");
        assert_eq!(data["role"], "user");
    }
}
