use chrono::{DateTime, Utc};
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregation, Entity, Event, EventQueue};

use super::{ConsultorioId, ProfileId};

pub const MAX_COMMENT_CHARS: usize = 1000;

/// 評価イベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RatingEvent {
    RatingSubmitted {
        id: ConsultorioId,
        user: ProfileId,
        score: u8,
        comment: Option<String>,
        rated_at: DateTime<Utc>,
    },
    RatingRevised {
        id: ConsultorioId,
        user: ProfileId,
        score: u8,
        comment: Option<String>,
        rated_at: DateTime<Utc>,
    },
    RatingWithdrawn {
        id: ConsultorioId,
        user: ProfileId,
    },
}

impl Event for RatingEvent {
    type Id = ConsultorioId;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub user: ProfileId,
    pub score: u8,
    pub comment: Option<String>,
    pub rated_at: DateTime<Utc>,
}

/// All ratings of one consultorio, at most one per user.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RatingBoard {
    id: ConsultorioId,
    ratings: Vec<Rating>,
    #[serde(skip)]
    events: EventQueue<RatingEvent>,
}

impl RatingBoard {
    pub fn new(id: ConsultorioId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn submit(
        &mut self,
        user: ProfileId,
        score: u8,
        comment: Option<String>,
        rated_at: DateTime<Utc>,
    ) -> Result<(), RatingError> {
        self.record(RatingEvent::RatingSubmitted {
            id: self.id,
            user,
            score,
            comment: normalize_comment(comment),
            rated_at,
        })
    }

    pub fn revise(
        &mut self,
        user: ProfileId,
        score: u8,
        comment: Option<String>,
        rated_at: DateTime<Utc>,
    ) -> Result<(), RatingError> {
        self.record(RatingEvent::RatingRevised {
            id: self.id,
            user,
            score,
            comment: normalize_comment(comment),
            rated_at,
        })
    }

    pub fn withdraw(&mut self, user: ProfileId) -> Result<(), RatingError> {
        self.record(RatingEvent::RatingWithdrawn { id: self.id, user })
    }

    pub fn ratings(&self) -> &[Rating] {
        &self.ratings
    }

    pub fn rating_of(&self, user: &ProfileId) -> Option<&Rating> {
        self.ratings.iter().find(|r| r.user == *user)
    }

    pub fn count(&self) -> usize {
        self.ratings.len()
    }

    /// Mean score, `None` without ratings.
    pub fn average(&self) -> Option<f64> {
        if self.ratings.is_empty() {
            return None;
        }
        let total: u32 = self.ratings.iter().map(|r| r.score as u32).sum();
        Some(total as f64 / self.ratings.len() as f64)
    }

    fn validate_id(&self, id: &ConsultorioId) -> Result<(), RatingError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(RatingError::MismatchedId),
        }
    }

    fn validate_content(score: u8, comment: &Option<String>) -> Result<(), RatingError> {
        if !(1..=5).contains(&score) {
            return Err(RatingError::ScoreOutOfRange);
        }
        match comment {
            Some(c) if c.chars().count() > MAX_COMMENT_CHARS => Err(RatingError::CommentTooLong),
            _ => Ok(()),
        }
    }
}

fn normalize_comment(comment: Option<String>) -> Option<String> {
    comment
        .map(|c| c.trim().to_owned())
        .filter(|c| !c.is_empty())
}

impl Entity for RatingBoard {
    type Id = ConsultorioId;

    const ENTITY_NAME: &'static str = "ratings";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for RatingBoard {
    type Event = RatingEvent;
    type Error = RatingError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            RatingEvent::RatingSubmitted {
                id,
                user,
                score,
                comment,
                ..
            } => {
                self.validate_id(id)?;
                if self.rating_of(user).is_some() {
                    return Err(RatingError::AlreadyRated);
                }
                Self::validate_content(*score, comment)
            }
            RatingEvent::RatingRevised {
                id,
                user,
                score,
                comment,
                ..
            } => {
                self.validate_id(id)?;
                if self.rating_of(user).is_none() {
                    return Err(RatingError::RatingNotFound);
                }
                Self::validate_content(*score, comment)
            }
            RatingEvent::RatingWithdrawn { id, user } => {
                self.validate_id(id)?;
                match self.rating_of(user) {
                    Some(_) => Ok(()),
                    None => Err(RatingError::RatingNotFound),
                }
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            RatingEvent::RatingSubmitted {
                id,
                user,
                score,
                comment,
                rated_at,
            } => {
                self.id = id;
                self.ratings.push(Rating {
                    user,
                    score,
                    comment,
                    rated_at,
                });
            }
            RatingEvent::RatingRevised {
                user,
                score,
                comment,
                rated_at,
                ..
            } => {
                if let Some(rating) = self.ratings.iter_mut().find(|r| r.user == user) {
                    rating.score = score;
                    rating.comment = comment;
                    rating.rated_at = rated_at;
                }
            }
            RatingEvent::RatingWithdrawn { user, .. } => self.ratings.retain(|r| r.user != user),
        }
    }

    fn events(&self) -> &EventQueue<Self::Event> {
        &self.events
    }

    fn events_mut(&mut self) -> &mut EventQueue<Self::Event> {
        &mut self.events
    }
}

/// 評価エラー
#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum RatingError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Score must be between 1 and 5")]
    ScoreOutOfRange,
    #[display(fmt = "Comment cannot exceed 1000 characters")]
    CommentTooLong,
    #[display(fmt = "You already rated this consultorio")]
    AlreadyRated,
    #[display(fmt = "Rating not found")]
    RatingNotFound,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 20, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_submit_and_average() {
        let mut board = RatingBoard::new(3.into());
        assert_eq!(board.average(), None);
        board.submit(1.into(), 5, None, at()).unwrap();
        board
            .submit(2.into(), 4, Some("  Muy limpio ".to_owned()), at())
            .unwrap();
        assert_eq!(board.average(), Some(4.5));
        assert_eq!(
            board.rating_of(&2.into()).unwrap().comment.as_deref(),
            Some("Muy limpio")
        );
        assert_eq!(
            board.submit(1.into(), 3, None, at()),
            Err(RatingError::AlreadyRated)
        );
    }

    #[test]
    fn test_rejects_bad_content() {
        let mut board = RatingBoard::new(3.into());
        assert_eq!(
            board.submit(1.into(), 0, None, at()),
            Err(RatingError::ScoreOutOfRange)
        );
        assert_eq!(
            board.submit(1.into(), 6, None, at()),
            Err(RatingError::ScoreOutOfRange)
        );
        let long = "a".repeat(MAX_COMMENT_CHARS + 1);
        assert_eq!(
            board.submit(1.into(), 5, Some(long), at()),
            Err(RatingError::CommentTooLong)
        );
        let exact = "ñ".repeat(MAX_COMMENT_CHARS);
        board.submit(1.into(), 5, Some(exact), at()).unwrap();
    }

    #[test]
    fn test_revise_and_withdraw() {
        let mut board = RatingBoard::new(3.into());
        assert_eq!(
            board.revise(1.into(), 2, None, at()),
            Err(RatingError::RatingNotFound)
        );
        board.submit(1.into(), 2, None, at()).unwrap();
        board.revise(1.into(), 4, None, at()).unwrap();
        assert_eq!(board.average(), Some(4.0));
        board.withdraw(1.into()).unwrap();
        assert_eq!(board.count(), 0);
        assert_eq!(board.withdraw(1.into()), Err(RatingError::RatingNotFound));
    }
}
