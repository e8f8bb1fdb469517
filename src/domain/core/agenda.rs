use std::ops::Range;

use bio::data_structures::interval_tree::IntervalTree;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregation, Entity, Event, EventQueue};

use super::{Consultorio, ConsultorioId, ReservationId};

/// 予約枠イベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgendaEvent {
    /// 枠が予約された
    SlotBooked {
        id: ConsultorioId,
        reservation: ReservationId,
        time: Range<DateTime<Utc>>,
    },
    /// 枠が解放された
    SlotReleased {
        id: ConsultorioId,
        reservation: ReservationId,
    },
}

impl Event for AgendaEvent {
    type Id = ConsultorioId;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    reservation: ReservationId,
    time: Range<DateTime<Utc>>,
}

impl Booking {
    pub fn reservation(&self) -> ReservationId {
        self.reservation
    }

    pub fn time(&self) -> &Range<DateTime<Utc>> {
        &self.time
    }
}

/// One bookable hour of a listing on a given date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Local start hour.
    pub hour: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub available: bool,
}

/// Live bookings of one consultorio.
///
/// All reservations of a listing go through its agenda stream, so saving it
/// at the loaded revision serializes competing bookings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Agenda {
    id: ConsultorioId,
    bookings: Vec<Booking>,
    #[serde(skip)]
    events: EventQueue<AgendaEvent>,
}

impl Agenda {
    pub fn new(id: ConsultorioId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn book(
        &mut self,
        reservation: ReservationId,
        time: Range<DateTime<Utc>>,
    ) -> Result<(), AgendaError> {
        self.record(AgendaEvent::SlotBooked {
            id: self.id,
            reservation,
            time,
        })
    }

    pub fn release(&mut self, reservation: ReservationId) -> Result<(), AgendaError> {
        self.record(AgendaEvent::SlotReleased {
            id: self.id,
            reservation,
        })
    }

    pub fn bookings(&self) -> &[Booking] {
        &self.bookings
    }

    pub fn booking(&self, reservation: &ReservationId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.reservation == *reservation)
    }

    pub fn is_free(&self, time: &Range<DateTime<Utc>>) -> bool {
        self.validate_overlapping(time).is_ok()
    }

    /// Every whole-hour slot of `date` (local to `offset`) inside the
    /// listing's opening hours. Slots already booked or starting at or before
    /// `now` are marked unavailable. A closed day has no slots.
    pub fn slots(
        &self,
        consultorio: &Consultorio,
        date: NaiveDate,
        offset: &FixedOffset,
        now: DateTime<Utc>,
    ) -> Vec<Slot> {
        let opening_hours = consultorio.opening_hours();
        if !opening_hours.is_open_on(date.weekday()) {
            return Vec::new();
        }
        opening_hours
            .slot_hours()
            .filter_map(|hour| {
                let time = Self::slot_time(date, hour, offset)?;
                Some(Slot {
                    hour,
                    available: time.start > now && self.is_free(&time),
                    start: time.start,
                    end: time.end,
                })
            })
            .collect()
    }

    /// UTC range of the hour starting at `hour:00` local time on `date`.
    pub fn slot_time(
        date: NaiveDate,
        hour: u32,
        offset: &FixedOffset,
    ) -> Option<Range<DateTime<Utc>>> {
        let local = date.and_hms_opt(hour, 0, 0)?;
        let start = offset
            .from_local_datetime(&local)
            .single()?
            .with_timezone(&Utc);
        Some(start..start + Duration::hours(1))
    }

    fn validate_id(&self, id: &ConsultorioId) -> Result<(), AgendaError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(AgendaError::MismatchedId),
        }
    }

    fn validate_time(time: &Range<DateTime<Utc>>) -> Result<(), AgendaError> {
        if time.start >= time.end {
            return Err(AgendaError::InvalidTime);
        }
        if time.end - time.start != Duration::hours(1) {
            return Err(AgendaError::NotOneHour);
        }
        Ok(())
    }

    fn validate_overlapping(&self, time: &Range<DateTime<Utc>>) -> Result<(), AgendaError> {
        if time.start >= time.end {
            return Err(AgendaError::InvalidTime);
        }
        let tree: IntervalTree<DateTime<Utc>, ReservationId> = self
            .bookings
            .iter()
            .map(|b| (b.time.clone(), b.reservation))
            .collect();
        match tree.find(time.clone()).next() {
            Some(_) => Err(AgendaError::SlotTaken),
            None => Ok(()),
        }
    }

    fn validate_booked(
        &self,
        reservation: &ReservationId,
        time: &Range<DateTime<Utc>>,
    ) -> Result<(), AgendaError> {
        if self.booking(reservation).is_some() {
            return Err(AgendaError::DuplicateReservation);
        }
        Self::validate_time(time)?;
        self.validate_overlapping(time)
    }

    fn validate_released(&self, reservation: &ReservationId) -> Result<(), AgendaError> {
        match self.booking(reservation) {
            Some(_) => Ok(()),
            None => Err(AgendaError::BookingNotFound),
        }
    }
}

impl Entity for Agenda {
    type Id = ConsultorioId;

    const ENTITY_NAME: &'static str = "agenda";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for Agenda {
    type Event = AgendaEvent;
    type Error = AgendaError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            AgendaEvent::SlotBooked {
                id,
                reservation,
                time,
            } => {
                self.validate_id(id)?;
                self.validate_booked(reservation, time)
            }
            AgendaEvent::SlotReleased { id, reservation } => {
                self.validate_id(id)?;
                self.validate_released(reservation)
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            AgendaEvent::SlotBooked {
                id,
                reservation,
                time,
            } => {
                self.id = id;
                self.bookings.push(Booking { reservation, time });
            }
            AgendaEvent::SlotReleased { reservation, .. } => {
                self.bookings.retain(|b| b.reservation != reservation)
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

impl PartialEq for Agenda {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.bookings == other.bookings
    }
}

impl Eq for Agenda {}

#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum AgendaError {
    #[display(fmt = "Mismatched id")]
    MismatchedId,
    #[display(fmt = "Invalid time range")]
    InvalidTime,
    #[display(fmt = "A reservation must span exactly one hour")]
    NotOneHour,
    #[display(fmt = "The slot is already taken")]
    SlotTaken,
    #[display(fmt = "The reservation is already booked")]
    DuplicateReservation,
    #[display(fmt = "No booking for this reservation")]
    BookingNotFound,
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;

    use crate::domain::core::consultorio::tests::draft;

    use super::*;

    fn offset() -> FixedOffset {
        FixedOffset::west_opt(6 * 3600).unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn hour(h: u32) -> Range<DateTime<Utc>> {
        Agenda::slot_time(monday(), h, &offset()).unwrap()
    }

    #[test]
    fn test_slot_time_uses_local_offset() {
        let time = hour(9);
        assert_eq!(time.start.to_rfc3339(), "2026-10-19T15:00:00+00:00");
        assert_eq!(time.end - time.start, Duration::hours(1));
    }

    #[test]
    fn test_book_rejects_overlap() {
        let mut agenda = Agenda::new(1.into());
        agenda.book(100.into(), hour(10)).unwrap();
        assert_eq!(agenda.book(101.into(), hour(10)), Err(AgendaError::SlotTaken));
        let half = hour(10).start + Duration::minutes(30);
        assert_eq!(
            agenda.book(102.into(), half..half + Duration::hours(1)),
            Err(AgendaError::SlotTaken)
        );
        // adjacent hours do not overlap
        agenda.book(103.into(), hour(9)).unwrap();
        agenda.book(104.into(), hour(11)).unwrap();
        assert_eq!(agenda.bookings().len(), 3);
    }

    #[test]
    fn test_book_rejects_wrong_span() {
        let mut agenda = Agenda::new(1.into());
        let start = hour(10).start;
        assert_eq!(
            agenda.book(100.into(), start..start + Duration::hours(2)),
            Err(AgendaError::NotOneHour)
        );
        assert_eq!(agenda.book(100.into(), start..start), Err(AgendaError::InvalidTime));
        agenda.book(100.into(), hour(12)).unwrap();
        assert_eq!(
            agenda.book(100.into(), hour(13)),
            Err(AgendaError::DuplicateReservation)
        );
    }

    #[test]
    fn test_release_frees_slot() {
        let mut agenda = Agenda::new(1.into());
        agenda.book(100.into(), hour(10)).unwrap();
        agenda.release(100.into()).unwrap();
        assert!(agenda.is_free(&hour(10)));
        assert_eq!(agenda.release(100.into()), Err(AgendaError::BookingNotFound));
        agenda.book(101.into(), hour(10)).unwrap();
    }

    #[test]
    fn test_slots() {
        let consultorio = Consultorio::create(1.into(), 1.into(), draft()).unwrap();
        let mut agenda = Agenda::new(1.into());
        agenda.book(100.into(), hour(11)).unwrap();
        let now = hour(9).start + Duration::minutes(5);

        let slots = agenda.slots(&consultorio, monday(), &offset(), now);
        assert_eq!(slots.len(), 9);
        assert_eq!(slots[0].hour, 9);
        assert!(!slots[0].available, "started before now");
        assert!(slots[1].available);
        assert!(!slots[2].available, "booked");
        assert_eq!(slots.iter().filter(|s| s.available).count(), 7);

        let sunday = monday().pred_opt().unwrap();
        assert_eq!(sunday.weekday(), Weekday::Sun);
        assert!(agenda.slots(&consultorio, sunday, &offset(), now).is_empty());
    }

    #[test]
    fn test_replay_restores_state() {
        let mut agenda = Agenda::new(7.into());
        agenda.book(100.into(), hour(10)).unwrap();
        agenda.book(101.into(), hour(12)).unwrap();
        agenda.release(100.into()).unwrap();
        let mut replayed = Agenda::default();
        for event in agenda.pop_all() {
            replayed.apply(event);
        }
        assert_eq!(replayed, agenda);
        assert_eq!(replayed.id(), ConsultorioId::from(7));
    }
}
