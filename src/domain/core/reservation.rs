use std::ops::Range;

use chrono::{DateTime, Duration, Utc};
use derive_more::{Deref, Display, Error, From};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::domain::{Aggregation, Entity, Event, EventQueue, Id};

use super::{ConsultorioId, Money, MoneyError, ProfileId};

/// 予約ID
#[serde_as]
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Deref, Default,
)]
pub struct ReservationId(#[serde_as(as = "DisplayFromStr")] u64);

impl Id for ReservationId {
    type Inner = u64;
}

/// 予約ステータス
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    #[default]
    Pendiente,
    Confirmada,
    Cancelada,
    Completada,
}

impl ReservationStatus {
    fn can_become(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pendiente, Confirmada)
                | (Pendiente, Cancelada)
                | (Confirmada, Cancelada)
                | (Confirmada, Completada)
        )
    }

    pub fn is_live(&self) -> bool {
        matches!(self, ReservationStatus::Pendiente | ReservationStatus::Confirmada)
    }
}

/// 支払いステータス
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Processing,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn can_become(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Paid)
                | (Pending, Failed)
                | (Processing, Paid)
                | (Processing, Failed)
                | (Processing, Pending)
                | (Failed, Pending)
                | (Failed, Processing)
                | (Failed, Paid)
                | (Paid, Refunded)
        )
    }

    /// Money already moved, so no new charge may start.
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Refunded)
    }
}

/// 料金内訳
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subtotal: Money,
    /// Platform commission withheld from the owner's share.
    pub platform_fee: Money,
    pub owner_payout: Money,
    /// Amount charged to the booker.
    pub total: Money,
}

impl PriceBreakdown {
    pub fn hourly(price_per_hour: Money, fee_bps: u32) -> Result<Self, MoneyError> {
        let platform_fee = price_per_hour.fee(fee_bps)?;
        Ok(Self {
            subtotal: price_per_hour,
            owner_payout: price_per_hour.checked_sub(&platform_fee)?,
            platform_fee,
            total: price_per_hour,
        })
    }
}

/// 予約イベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationEvent {
    /// 予約が作成された
    ReservationCreated {
        id: ReservationId,
        consultorio: ConsultorioId,
        booker: ProfileId,
        owner: ProfileId,
        time: Range<DateTime<Utc>>,
        hour: u32,
        price: PriceBreakdown,
    },
    /// 予約が確定された
    ReservationConfirmed { id: ReservationId },
    /// 予約がキャンセルされた
    ReservationCancelled {
        id: ReservationId,
        by: ProfileId,
        reason: Option<String>,
    },
    /// 利用が完了した
    ReservationCompleted { id: ReservationId },
    /// 支払いステータスが変更された
    PaymentStatusChanged {
        id: ReservationId,
        payment_status: PaymentStatus,
    },
}

impl Event for ReservationEvent {
    type Id = ReservationId;
}

/// 予約エンティティ
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Reservation {
    id: ReservationId,
    consultorio: ConsultorioId,
    booker: ProfileId,
    owner: ProfileId,
    time: Range<DateTime<Utc>>,
    hour: u32,
    price: PriceBreakdown,
    status: ReservationStatus,
    payment_status: PaymentStatus,
    cancelled_by: Option<ProfileId>,
    cancel_reason: Option<String>,
    #[serde(skip)]
    events: EventQueue<ReservationEvent>,
}

impl Reservation {
    pub fn create(
        id: ReservationId,
        consultorio: ConsultorioId,
        booker: ProfileId,
        owner: ProfileId,
        time: Range<DateTime<Utc>>,
        hour: u32,
        price: PriceBreakdown,
    ) -> Result<Self, ReservationError> {
        let mut entity = Reservation::default();
        entity.record(ReservationEvent::ReservationCreated {
            id,
            consultorio,
            booker,
            owner,
            time,
            hour,
            price,
        })?;
        Ok(entity)
    }

    pub fn confirm(&mut self) -> Result<(), ReservationError> {
        self.record(ReservationEvent::ReservationConfirmed { id: self.id })
    }

    pub fn cancel(&mut self, by: ProfileId, reason: Option<String>) -> Result<(), ReservationError> {
        self.record(ReservationEvent::ReservationCancelled {
            id: self.id,
            by,
            reason: reason.map(|r| r.trim().to_owned()).filter(|r| !r.is_empty()),
        })
    }

    pub fn complete(&mut self) -> Result<(), ReservationError> {
        self.record(ReservationEvent::ReservationCompleted { id: self.id })
    }

    pub fn change_payment_status(
        &mut self,
        payment_status: PaymentStatus,
    ) -> Result<(), ReservationError> {
        self.record(ReservationEvent::PaymentStatusChanged {
            id: self.id,
            payment_status,
        })
    }

    pub fn consultorio(&self) -> ConsultorioId {
        self.consultorio
    }

    pub fn booker(&self) -> ProfileId {
        self.booker
    }

    pub fn owner(&self) -> ProfileId {
        self.owner
    }

    pub fn time(&self) -> &Range<DateTime<Utc>> {
        &self.time
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn price(&self) -> &PriceBreakdown {
        &self.price
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn cancelled_by(&self) -> Option<ProfileId> {
        self.cancelled_by
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    /// Booker, owner of the listing.
    pub fn is_party(&self, profile: ProfileId) -> bool {
        self.booker == profile || self.owner == profile
    }

    fn is_created(&self) -> bool {
        self.time.start < self.time.end
    }

    fn validate_id(&self, id: &ReservationId) -> Result<(), ReservationError> {
        if !self.is_created() || self.id != *id {
            return Err(ReservationError::MismatchedId);
        }
        Ok(())
    }

    fn validate_created(
        &self,
        booker: &ProfileId,
        owner: &ProfileId,
        time: &Range<DateTime<Utc>>,
        price: &PriceBreakdown,
    ) -> Result<(), ReservationError> {
        if self.is_created() {
            return Err(ReservationError::AlreadyCreated);
        }
        if time.start >= time.end {
            return Err(ReservationError::InvalidTime);
        }
        if time.end - time.start != Duration::hours(1) {
            return Err(ReservationError::NotOneHour);
        }
        if booker == owner {
            return Err(ReservationError::OwnListing);
        }
        if !price.total.is_positive() {
            return Err(ReservationError::InvalidPrice);
        }
        Ok(())
    }

    fn validate_status(&self, next: ReservationStatus) -> Result<(), ReservationError> {
        match self.status.can_become(next) {
            true => Ok(()),
            false => Err(ReservationError::InvalidStatusTransition),
        }
    }

    fn validate_payment_status(&self, next: PaymentStatus) -> Result<(), ReservationError> {
        match self.payment_status.can_become(next) {
            true => Ok(()),
            false => Err(ReservationError::InvalidPaymentTransition),
        }
    }
}

impl Entity for Reservation {
    type Id = ReservationId;

    const ENTITY_NAME: &'static str = "reservation";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for Reservation {
    type Event = ReservationEvent;
    type Error = ReservationError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            ReservationEvent::ReservationCreated {
                booker,
                owner,
                time,
                price,
                ..
            } => self.validate_created(booker, owner, time, price),
            ReservationEvent::ReservationConfirmed { id } => {
                self.validate_id(id)?;
                self.validate_status(ReservationStatus::Confirmada)
            }
            ReservationEvent::ReservationCancelled { id, .. } => {
                self.validate_id(id)?;
                self.validate_status(ReservationStatus::Cancelada)
            }
            ReservationEvent::ReservationCompleted { id } => {
                self.validate_id(id)?;
                self.validate_status(ReservationStatus::Completada)
            }
            ReservationEvent::PaymentStatusChanged { id, payment_status } => {
                self.validate_id(id)?;
                self.validate_payment_status(*payment_status)
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ReservationEvent::ReservationCreated {
                id,
                consultorio,
                booker,
                owner,
                time,
                hour,
                price,
            } => {
                *self = Reservation {
                    id,
                    consultorio,
                    booker,
                    owner,
                    time,
                    hour,
                    price,
                    events: std::mem::take(&mut self.events),
                    ..Reservation::default()
                };
            }
            ReservationEvent::ReservationConfirmed { .. } => {
                self.status = ReservationStatus::Confirmada
            }
            ReservationEvent::ReservationCancelled { by, reason, .. } => {
                self.status = ReservationStatus::Cancelada;
                self.cancelled_by = Some(by);
                self.cancel_reason = reason;
            }
            ReservationEvent::ReservationCompleted { .. } => {
                self.status = ReservationStatus::Completada
            }
            ReservationEvent::PaymentStatusChanged { payment_status, .. } => {
                self.payment_status = payment_status
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

impl PartialEq for Reservation {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.consultorio == other.consultorio
            && self.booker == other.booker
            && self.owner == other.owner
            && self.time == other.time
            && self.hour == other.hour
            && self.price == other.price
            && self.status == other.status
            && self.payment_status == other.payment_status
            && self.cancelled_by == other.cancelled_by
            && self.cancel_reason == other.cancel_reason
    }
}

impl Eq for Reservation {}

/// 予約エラー
#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum ReservationError {
    /// IDが一致しません
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Reservation already exists")]
    AlreadyCreated,
    /// 時間が不正です
    #[display(fmt = "Invalid time")]
    InvalidTime,
    #[display(fmt = "A reservation must span exactly one hour")]
    NotOneHour,
    #[display(fmt = "Owners cannot book their own consultorio")]
    OwnListing,
    #[display(fmt = "Reservation total must be positive")]
    InvalidPrice,
    #[display(fmt = "Invalid status transition")]
    InvalidStatusTransition,
    #[display(fmt = "Invalid payment status transition")]
    InvalidPaymentTransition,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use crate::domain::core::Currency;

    use super::*;

    fn reservation() -> Reservation {
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 16, 0, 0).unwrap();
        Reservation::create(
            500.into(),
            10.into(),
            2.into(),
            1.into(),
            start..start + Duration::hours(1),
            10,
            PriceBreakdown::hourly(Money::new(45_000, Currency::MXN), 1000).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_price_breakdown() {
        let price = PriceBreakdown::hourly(Money::new(45_000, Currency::MXN), 1250).unwrap();
        assert_eq!(price.platform_fee.amount(), 5_625);
        assert_eq!(price.owner_payout.amount(), 39_375);
        assert_eq!(price.total.amount(), 45_000);
    }

    #[test]
    fn test_create() {
        let reservation = reservation();
        assert_eq!(reservation.status(), ReservationStatus::Pendiente);
        assert_eq!(reservation.payment_status(), PaymentStatus::Pending);
        assert!(reservation.is_party(1.into()));
        assert!(reservation.is_party(2.into()));
        assert!(!reservation.is_party(3.into()));
    }

    #[test]
    fn test_create_rejects_own_listing_and_long_spans() {
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 16, 0, 0).unwrap();
        let price = PriceBreakdown::hourly(Money::new(45_000, Currency::MXN), 1000).unwrap();
        let own = Reservation::create(
            1.into(),
            10.into(),
            1.into(),
            1.into(),
            start..start + Duration::hours(1),
            10,
            price.clone(),
        );
        assert_eq!(own.unwrap_err(), ReservationError::OwnListing);
        let long = Reservation::create(
            1.into(),
            10.into(),
            2.into(),
            1.into(),
            start..start + Duration::minutes(90),
            10,
            price,
        );
        assert_eq!(long.unwrap_err(), ReservationError::NotOneHour);
    }

    #[test]
    fn test_status_machine() {
        let mut reservation = reservation();
        assert_eq!(
            reservation.complete(),
            Err(ReservationError::InvalidStatusTransition)
        );
        reservation.confirm().unwrap();
        reservation.complete().unwrap();
        assert_eq!(
            reservation.cancel(2.into(), None),
            Err(ReservationError::InvalidStatusTransition)
        );

        let mut other = super::tests::reservation();
        other.cancel(2.into(), Some("  cambio de agenda ".to_owned())).unwrap();
        assert_eq!(other.status(), ReservationStatus::Cancelada);
        assert_eq!(other.cancel_reason(), Some("cambio de agenda"));
        assert!(!other.status().is_live());
        assert_eq!(other.confirm(), Err(ReservationError::InvalidStatusTransition));
    }

    #[test]
    fn test_payment_status_machine() {
        let mut reservation = reservation();
        reservation
            .change_payment_status(PaymentStatus::Failed)
            .unwrap();
        assert_eq!(
            reservation.change_payment_status(PaymentStatus::Refunded),
            Err(ReservationError::InvalidPaymentTransition)
        );
        reservation
            .change_payment_status(PaymentStatus::Processing)
            .unwrap();
        reservation
            .change_payment_status(PaymentStatus::Failed)
            .unwrap();
        reservation
            .change_payment_status(PaymentStatus::Pending)
            .unwrap();
        reservation
            .change_payment_status(PaymentStatus::Processing)
            .unwrap();
        reservation.change_payment_status(PaymentStatus::Paid).unwrap();
        assert_eq!(
            reservation.change_payment_status(PaymentStatus::Failed),
            Err(ReservationError::InvalidPaymentTransition)
        );
        reservation
            .change_payment_status(PaymentStatus::Refunded)
            .unwrap();
    }

    #[test]
    fn test_failed_payment_can_succeed_later() {
        assert!(PaymentStatus::Failed.can_become(PaymentStatus::Paid));
        assert!(!PaymentStatus::Failed.can_become(PaymentStatus::Refunded));
        assert!(!PaymentStatus::Refunded.can_become(PaymentStatus::Failed));

        let mut reservation = reservation();
        reservation
            .change_payment_status(PaymentStatus::Failed)
            .unwrap();
        reservation.change_payment_status(PaymentStatus::Paid).unwrap();
        assert_eq!(reservation.payment_status(), PaymentStatus::Paid);
    }

    #[test]
    fn test_replay() {
        let mut reservation = reservation();
        reservation.confirm().unwrap();
        let mut replayed = Reservation::default();
        for event in reservation.pop_all() {
            replayed.apply(event);
        }
        assert_eq!(replayed, reservation);
    }
}
