mod agenda;
mod consultorio;
mod favorite;
mod media;
mod money;
mod profile;
mod rating;
mod reservation;

use std::fmt::Display;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use serde_with::serde_as;
use serde_with::DisplayFromStr;

pub use self::agenda::*;
pub use self::consultorio::*;
pub use self::favorite::*;
pub use self::media::*;
pub use self::money::*;
pub use self::profile::*;
pub use self::rating::*;
pub use self::reservation::*;

#[cfg(test)]
pub(crate) use self::consultorio::tests::{draft, hours};
#[cfg(test)]
pub(crate) use self::media::tests::png;

/// Events of the marketplace core, as fed to the read-model projector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoreEvent {
    AgendaEvent(AgendaEvent),
    ConsultorioEvent(ConsultorioEvent),
    FavoritesEvent(FavoritesEvent),
    MediaEvent(MediaEvent),
    ProfileEvent(ProfileEvent),
    RatingEvent(RatingEvent),
    ReservationEvent(ReservationEvent),
}

macro_rules! core_event_from {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for CoreEvent {
                fn from(value: $variant) -> Self {
                    CoreEvent::$variant(value)
                }
            }

            impl From<$variant> for crate::domain::DomainEvent {
                fn from(value: $variant) -> Self {
                    crate::domain::DomainEvent::Core(CoreEvent::$variant(value))
                }
            }
        )*
    };
}

core_event_from!(
    AgendaEvent,
    ConsultorioEvent,
    FavoritesEvent,
    MediaEvent,
    ProfileEvent,
    RatingEvent,
    ReservationEvent
);

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mime(#[serde_as(as = "DisplayFromStr")] mime::Mime);

impl Mime {
    pub fn is_image(&self) -> bool {
        self.0.type_() == mime::IMAGE
    }
}

impl From<mime::Mime> for Mime {
    fn from(value: mime::Mime) -> Self {
        Self(value)
    }
}

impl FromStr for Mime {
    type Err = mime::FromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        mime::Mime::from_str(s).map(Mime::from)
    }
}

impl Display for Mime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Default for Mime {
    fn default() -> Self {
        Self(mime::STAR_STAR)
    }
}
