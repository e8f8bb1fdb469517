use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregation, Entity, Event, EventQueue};

use super::{ConsultorioId, ProfileId};

/// お気に入りイベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FavoritesEvent {
    FavoriteAdded {
        id: ProfileId,
        consultorio: ConsultorioId,
    },
    FavoriteRemoved {
        id: ProfileId,
        consultorio: ConsultorioId,
    },
}

impl Event for FavoritesEvent {
    type Id = ProfileId;
}

/// Consultorios saved by one profile, in the order they were added.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Favorites {
    id: ProfileId,
    consultorios: Vec<ConsultorioId>,
    #[serde(skip)]
    events: EventQueue<FavoritesEvent>,
}

impl Favorites {
    pub fn new(id: ProfileId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn add(&mut self, consultorio: ConsultorioId) -> Result<(), FavoritesError> {
        self.record(FavoritesEvent::FavoriteAdded {
            id: self.id,
            consultorio,
        })
    }

    pub fn remove(&mut self, consultorio: ConsultorioId) -> Result<(), FavoritesError> {
        self.record(FavoritesEvent::FavoriteRemoved {
            id: self.id,
            consultorio,
        })
    }

    pub fn consultorios(&self) -> &[ConsultorioId] {
        &self.consultorios
    }

    pub fn contains(&self, consultorio: &ConsultorioId) -> bool {
        self.consultorios.contains(consultorio)
    }
}

impl Entity for Favorites {
    type Id = ProfileId;

    const ENTITY_NAME: &'static str = "favorites";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for Favorites {
    type Event = FavoritesEvent;
    type Error = FavoritesError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            FavoritesEvent::FavoriteAdded { id, consultorio } => {
                if self.id != *id {
                    return Err(FavoritesError::MismatchedId);
                }
                match self.contains(consultorio) {
                    true => Err(FavoritesError::AlreadyFavorite),
                    false => Ok(()),
                }
            }
            FavoritesEvent::FavoriteRemoved { id, consultorio } => {
                if self.id != *id {
                    return Err(FavoritesError::MismatchedId);
                }
                match self.contains(consultorio) {
                    true => Ok(()),
                    false => Err(FavoritesError::NotFavorite),
                }
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            FavoritesEvent::FavoriteAdded { id, consultorio } => {
                self.id = id;
                self.consultorios.push(consultorio);
            }
            FavoritesEvent::FavoriteRemoved { consultorio, .. } => {
                self.consultorios.retain(|c| *c != consultorio)
            }
        }
    }

    fn events(&self) -> &EventQueue<Self::Event> {
        &self.events
    }

    fn events_mut(&mut self) -> &mut EventQueue<Self::Event> {
        &mut self.events
    }
}

#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum FavoritesError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Consultorio is already a favorite")]
    AlreadyFavorite,
    #[display(fmt = "Consultorio is not a favorite")]
    NotFavorite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove() {
        let mut favorites = Favorites::new(1.into());
        favorites.add(10.into()).unwrap();
        favorites.add(11.into()).unwrap();
        assert_eq!(favorites.add(10.into()), Err(FavoritesError::AlreadyFavorite));
        favorites.remove(10.into()).unwrap();
        assert_eq!(favorites.consultorios(), &[ConsultorioId::from(11)]);
        assert_eq!(favorites.remove(10.into()), Err(FavoritesError::NotFavorite));
    }

    #[test]
    fn test_replay_keeps_order() {
        let mut favorites = Favorites::new(1.into());
        favorites.add(12.into()).unwrap();
        favorites.add(10.into()).unwrap();
        let mut replayed = Favorites::default();
        for event in favorites.pop_all() {
            replayed.apply(event);
        }
        assert_eq!(replayed.id(), ProfileId::from(1));
        assert_eq!(
            replayed.consultorios(),
            &[ConsultorioId::from(12), ConsultorioId::from(10)]
        );
    }
}
