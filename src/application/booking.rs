use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use tracing::{error, info, warn};

use crate::domain::{
    core::{
        Agenda, ConsultorioId, PriceBreakdown, ProfileId, Reservation, ReservationError,
        ReservationId, ReservationStatus, Slot,
    },
    DataAccessError, Entity, ID_GENERATOR,
};

use super::{
    actor, ensure_owner_or_admin, live_consultorio, load, Catalog, ReservationDocument,
    ServiceError, Store,
};

/// Reservation use cases.
///
/// Every booking of a listing goes through its [`Agenda`]. The agenda is
/// saved at the revision it was loaded at, so of two concurrent bookings
/// only one commits and the other reports the slot as taken.
#[derive(Clone)]
pub struct BookingService {
    store: Store,
    catalog: Arc<dyn Catalog>,
    offset: FixedOffset,
    fee_bps: u32,
}

impl BookingService {
    const RELEASE_ATTEMPTS: usize = 3;

    pub fn new(
        store: Store,
        catalog: Arc<dyn Catalog>,
        offset: FixedOffset,
        fee_bps: u32,
    ) -> Self {
        Self {
            store,
            catalog,
            offset,
            fee_bps,
        }
    }

    /// Hourly slots of `date` with their availability.
    pub async fn slots(
        &self,
        id: ConsultorioId,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<Slot>, ServiceError> {
        let consultorio = live_consultorio(&self.store, id).await?;
        if !consultorio.is_bookable() {
            return Err(ServiceError::Invalid(
                "Consultorio is not accepting reservations".to_owned(),
            ));
        }
        let agenda = self.agenda(id).await?;
        Ok(agenda.slots(&consultorio, date, &self.offset, now))
    }

    /// Books the local hour `hour:00` of `date` for `booker`.
    pub async fn create_hourly_reservation(
        &self,
        booker: ProfileId,
        id: ConsultorioId,
        date: NaiveDate,
        hour: u32,
        now: DateTime<Utc>,
    ) -> Result<Reservation, ServiceError> {
        if !actor(&self.store, booker).await?.role().can_book() {
            return Err(ServiceError::Forbidden("Your role cannot book consultorios"));
        }
        let consultorio = live_consultorio(&self.store, id).await?;
        if !consultorio.is_bookable() {
            return Err(ServiceError::Invalid(
                "Consultorio is not accepting reservations".to_owned(),
            ));
        }
        if consultorio.owner() == booker {
            return Err(ReservationError::OwnListing.into());
        }
        let price = consultorio.pricing().per_hour.ok_or_else(|| {
            ServiceError::Invalid("Consultorio has no hourly price".to_owned())
        })?;
        let opening_hours = consultorio.opening_hours();
        if !opening_hours.is_open_on(date.weekday()) || !opening_hours.contains_hour(hour) {
            return Err(ServiceError::Invalid(
                "Slot is outside opening hours".to_owned(),
            ));
        }
        let time = Agenda::slot_time(date, hour, &self.offset)
            .ok_or_else(|| ServiceError::Invalid("Invalid slot".to_owned()))?;
        if time.start <= now {
            return Err(ServiceError::Invalid("Slot has already started".to_owned()));
        }

        let mut reservation = Reservation::create(
            ID_GENERATOR.generate(),
            id,
            booker,
            consultorio.owner(),
            time.clone(),
            hour,
            PriceBreakdown::hourly(price, self.fee_bps)?,
        )?;
        let mut agenda = self.agenda(id).await?;
        agenda.book(reservation.id(), time)?;
        match self.store.agendas.save(&mut agenda).await {
            Err(DataAccessError::Conflict(_)) => {
                return Err(ServiceError::Conflict("Slot taken, retry".to_owned()))
            }
            result => result?,
        };
        if let Err(e) = self.store.reservations.save(&mut reservation).await {
            error!("予約 {} の保存に失敗したため枠を解放: {}", reservation.id(), e);
            if let Err(e) = self.release(id, reservation.id()).await {
                error!("枠の解放に失敗: {}", e);
            }
            return Err(e.into());
        }
        info!(
            "予約 {} を作成 (診察室 {}, {} {}:00)",
            reservation.id(),
            id,
            date,
            hour
        );
        Ok(reservation)
    }

    pub async fn get(
        &self,
        viewer: ProfileId,
        id: ReservationId,
    ) -> Result<Reservation, ServiceError> {
        let viewer = actor(&self.store, viewer).await?;
        let reservation = load(self.store.reservations.as_ref(), id, "Reservation").await?;
        match reservation.is_party(viewer.id()) || viewer.role().is_admin() {
            true => Ok(reservation),
            false => Err(ServiceError::Forbidden("Not your reservation")),
        }
    }

    /// Cancels and frees the slot. Cancelling again while the slot is
    /// still held only retries the release.
    pub async fn cancel(
        &self,
        by: ProfileId,
        id: ReservationId,
        reason: Option<String>,
    ) -> Result<Reservation, ServiceError> {
        let mut reservation = self.get(by, id).await?;
        if reservation.status() == ReservationStatus::Cancelada
            && self.holds_slot(&reservation).await?
        {
            info!("キャンセル済み予約 {} の枠解放を再試行", id);
            self.release(reservation.consultorio(), id).await?;
            return Ok(reservation);
        }
        reservation.cancel(by, reason)?;
        self.store.reservations.save(&mut reservation).await?;
        if let Err(e) = self.release(reservation.consultorio(), id).await {
            warn!("予約 {} の枠解放に失敗: {}", id, e);
            return Err(e);
        }
        info!("予約 {} をキャンセル", id);
        Ok(reservation)
    }

    /// Marks a finished reservation completed and drops it from the agenda.
    pub async fn complete(
        &self,
        by: ProfileId,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<Reservation, ServiceError> {
        let editor = actor(&self.store, by).await?;
        let mut reservation = load(self.store.reservations.as_ref(), id, "Reservation").await?;
        ensure_owner_or_admin(
            &editor,
            reservation.owner(),
            "Only the owner can complete a reservation",
        )?;
        if reservation.status() == ReservationStatus::Completada
            && self.holds_slot(&reservation).await?
        {
            self.release(reservation.consultorio(), id).await?;
            return Ok(reservation);
        }
        if now < reservation.time().end {
            return Err(ServiceError::Invalid(
                "Reservation has not ended yet".to_owned(),
            ));
        }
        reservation.complete()?;
        self.store.reservations.save(&mut reservation).await?;
        if let Err(e) = self.release(reservation.consultorio(), id).await {
            warn!("予約 {} の枠解放に失敗: {}", id, e);
            return Err(e);
        }
        info!("予約 {} を完了", id);
        Ok(reservation)
    }

    pub async fn of_booker(
        &self,
        booker: ProfileId,
    ) -> Result<Vec<ReservationDocument>, ServiceError> {
        actor(&self.store, booker).await?;
        Ok(self.catalog.reservations_of_booker(booker).await?)
    }

    pub async fn of_consultorio(
        &self,
        viewer: ProfileId,
        id: ConsultorioId,
    ) -> Result<Vec<ReservationDocument>, ServiceError> {
        let viewer = actor(&self.store, viewer).await?;
        let consultorio = live_consultorio(&self.store, id).await?;
        ensure_owner_or_admin(&viewer, consultorio.owner(), "Not your consultorio")?;
        Ok(self.catalog.reservations_of_consultorio(id).await?)
    }

    async fn agenda(&self, id: ConsultorioId) -> Result<Agenda, ServiceError> {
        Ok(self
            .store
            .agendas
            .find_by_id(id)
            .await?
            .unwrap_or_else(|| Agenda::new(id)))
    }

    async fn holds_slot(&self, reservation: &Reservation) -> Result<bool, ServiceError> {
        let agenda = self.agenda(reservation.consultorio()).await?;
        Ok(agenda.booking(&reservation.id()).is_some())
    }

    /// Removes the booking from the agenda, reloading on conflicts.
    async fn release(
        &self,
        consultorio: ConsultorioId,
        reservation: ReservationId,
    ) -> Result<(), ServiceError> {
        for _ in 0..Self::RELEASE_ATTEMPTS {
            let mut agenda = self.agenda(consultorio).await?;
            if agenda.booking(&reservation).is_none() {
                return Ok(());
            }
            agenda.release(reservation)?;
            match self.store.agendas.save(&mut agenda).await {
                Err(DataAccessError::Conflict(_)) => continue,
                result => {
                    result?;
                    return Ok(());
                }
            }
        }
        Err(ServiceError::Conflict("Agenda is busy, retry".to_owned()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    use crate::application::tests::{register, store};
    use crate::domain::Repository;
    use crate::domain::core::{
        draft, Consultorio, Currency, Money, PaymentStatus, Role,
    };
    use crate::infrastructure::InMemoryCatalog;

    use super::*;

    pub(crate) fn offset() -> FixedOffset {
        FixedOffset::west_opt(6 * 3600).unwrap()
    }

    /// Friday 2026-10-16 12:00 local.
    pub(crate) fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 18, 0, 0).unwrap()
    }

    pub(crate) fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    /// Approved listing owned by a fresh `owner` profile.
    pub(crate) async fn listing(store: &Store) -> Consultorio {
        let owner = register(store, "owner", Role::User).await;
        let mut consultorio =
            Consultorio::create(ID_GENERATOR.generate(), owner.id(), draft()).unwrap();
        consultorio.approve().unwrap();
        store.consultorios.save(&mut consultorio).await.unwrap();
        consultorio
    }

    pub(crate) fn service(store: &Store) -> BookingService {
        BookingService::new(
            store.clone(),
            Arc::new(InMemoryCatalog::default()),
            offset(),
            1000,
        )
    }

    #[tokio::test]
    async fn test_slots_of_open_and_closed_days() {
        let store = store();
        let service = service(&store);
        let consultorio = listing(&store).await;

        let slots = service.slots(consultorio.id(), monday(), now()).await.unwrap();
        assert_eq!(slots.len(), 9);
        assert_eq!(slots[0].hour, 9);
        assert_eq!(slots[0].start, Utc.with_ymd_and_hms(2026, 10, 19, 15, 0, 0).unwrap());
        assert!(slots.iter().all(|s| s.available));

        let sunday = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        assert!(service
            .slots(consultorio.id(), sunday, now())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_create_hourly_reservation() {
        let store = store();
        let service = service(&store);
        let consultorio = listing(&store).await;
        let booker = register(&store, "medica", Role::User).await;

        let reservation = service
            .create_hourly_reservation(booker.id(), consultorio.id(), monday(), 10, now())
            .await
            .unwrap();
        assert_eq!(reservation.status(), ReservationStatus::Pendiente);
        assert_eq!(reservation.payment_status(), PaymentStatus::Pending);
        assert_eq!(reservation.hour(), 10);
        assert_eq!(reservation.time().end - reservation.time().start, Duration::hours(1));
        assert_eq!(reservation.price().total, Money::new(45_000, Currency::MXN));
        assert_eq!(reservation.price().platform_fee, Money::new(4_500, Currency::MXN));
        assert_eq!(reservation.owner(), consultorio.owner());

        let slots = service.slots(consultorio.id(), monday(), now()).await.unwrap();
        let taken: Vec<_> = slots.iter().filter(|s| !s.available).map(|s| s.hour).collect();
        assert_eq!(taken, vec![10]);

        let rival = register(&store, "rival", Role::User).await;
        assert!(matches!(
            service
                .create_hourly_reservation(rival.id(), consultorio.id(), monday(), 10, now())
                .await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_reservation_rules() {
        let store = store();
        let service = service(&store);
        let consultorio = listing(&store).await;
        let booker = register(&store, "medica", Role::User).await;
        let id = consultorio.id();

        let invalid = [
            (monday(), 8),
            (monday(), 18),
            (NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(), 10),
            (NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(), 11),
        ];
        for (date, hour) in invalid {
            assert!(matches!(
                service
                    .create_hourly_reservation(booker.id(), id, date, hour, now())
                    .await,
                Err(ServiceError::Invalid(_))
            ));
        }
        assert!(matches!(
            service
                .create_hourly_reservation(consultorio.owner(), id, monday(), 10, now())
                .await,
            Err(ServiceError::Invalid(_))
        ));
        let landlord = register(&store, "landlord", Role::Owner).await;
        assert!(matches!(
            service
                .create_hourly_reservation(landlord.id(), id, monday(), 10, now())
                .await,
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_bookings_commit_once() {
        let store = store();
        let service = service(&store);
        let consultorio = listing(&store).await;
        let ana = register(&store, "ana", Role::User).await;
        let luis = register(&store, "luis", Role::User).await;

        let (first, second) = tokio::join!(
            service.create_hourly_reservation(ana.id(), consultorio.id(), monday(), 11, now()),
            service.create_hourly_reservation(luis.id(), consultorio.id(), monday(), 11, now()),
        );
        assert_eq!(
            [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(),
            1
        );
        let agenda = store.agendas.find_by_id(consultorio.id()).await.unwrap().unwrap();
        assert_eq!(agenda.bookings().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_releases_slot() {
        let store = store();
        let service = service(&store);
        let consultorio = listing(&store).await;
        let booker = register(&store, "medica", Role::User).await;
        let stranger = register(&store, "stranger", Role::User).await;
        let reservation = service
            .create_hourly_reservation(booker.id(), consultorio.id(), monday(), 12, now())
            .await
            .unwrap();

        assert!(matches!(
            service.cancel(stranger.id(), reservation.id(), None).await,
            Err(ServiceError::Forbidden(_))
        ));
        let cancelled = service
            .cancel(booker.id(), reservation.id(), Some(" cambio de agenda ".to_owned()))
            .await
            .unwrap();
        assert_eq!(cancelled.status(), ReservationStatus::Cancelada);
        assert_eq!(cancelled.cancel_reason(), Some("cambio de agenda"));
        assert!(matches!(
            service.cancel(booker.id(), reservation.id(), None).await,
            Err(ServiceError::Conflict(_))
        ));

        let slots = service.slots(consultorio.id(), monday(), now()).await.unwrap();
        assert!(slots.iter().all(|s| s.available));
        service
            .create_hourly_reservation(stranger.id(), consultorio.id(), monday(), 12, now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_complete_after_end() {
        let store = store();
        let service = service(&store);
        let consultorio = listing(&store).await;
        let booker = register(&store, "medica", Role::User).await;
        let mut reservation = service
            .create_hourly_reservation(booker.id(), consultorio.id(), monday(), 9, now())
            .await
            .unwrap();
        reservation.confirm().unwrap();
        store.reservations.save(&mut reservation).await.unwrap();
        let end = reservation.time().end;

        assert!(matches!(
            service.complete(booker.id(), reservation.id(), end).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            service
                .complete(consultorio.owner(), reservation.id(), end - Duration::minutes(1))
                .await,
            Err(ServiceError::Invalid(_))
        ));
        let completed = service
            .complete(consultorio.owner(), reservation.id(), end)
            .await
            .unwrap();
        assert_eq!(completed.status(), ReservationStatus::Completada);
        let agenda = store.agendas.find_by_id(consultorio.id()).await.unwrap().unwrap();
        assert!(agenda.bookings().is_empty());
        assert!(matches!(
            service.complete(consultorio.owner(), reservation.id(), end).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    /// Agenda repository whose next `failures` saves report a conflict.
    struct ContendedAgendas {
        inner: Arc<dyn Repository<Agenda>>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl Repository<Agenda> for ContendedAgendas {
        async fn find_by_id(&self, id: ConsultorioId) -> Result<Option<Agenda>, DataAccessError> {
            self.inner.find_by_id(id).await
        }

        async fn save(&self, entity: &mut Agenda) -> Result<bool, DataAccessError> {
            let pending = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            match pending {
                Ok(_) => Err(DataAccessError::Conflict("agenda".to_owned())),
                Err(_) => self.inner.save(entity).await,
            }
        }

        async fn delete(&self, entity: &mut Agenda) -> Result<bool, DataAccessError> {
            self.inner.delete(entity).await
        }
    }

    #[tokio::test]
    async fn test_cancel_retries_failed_release() {
        let base = store();
        let agendas = Arc::new(ContendedAgendas {
            inner: base.agendas.clone(),
            failures: AtomicUsize::new(0),
        });
        let store = Store {
            agendas: agendas.clone(),
            ..base
        };
        let service = service(&store);
        let consultorio = listing(&store).await;
        let booker = register(&store, "medica", Role::User).await;
        let reservation = service
            .create_hourly_reservation(booker.id(), consultorio.id(), monday(), 15, now())
            .await
            .unwrap();

        agendas
            .failures
            .store(BookingService::RELEASE_ATTEMPTS, Ordering::SeqCst);
        assert!(matches!(
            service.cancel(booker.id(), reservation.id(), None).await,
            Err(ServiceError::Conflict(_))
        ));
        let stored = store.reservations.find_by_id(reservation.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), ReservationStatus::Cancelada);
        let slots = service.slots(consultorio.id(), monday(), now()).await.unwrap();
        assert!(slots.iter().any(|s| s.hour == 15 && !s.available));

        let retried = service.cancel(booker.id(), reservation.id(), None).await.unwrap();
        assert_eq!(retried.status(), ReservationStatus::Cancelada);
        let slots = service.slots(consultorio.id(), monday(), now()).await.unwrap();
        assert!(slots.iter().all(|s| s.available));
        assert!(matches!(
            service.cancel(booker.id(), reservation.id(), None).await,
            Err(ServiceError::Conflict(_))
        ));
    }
}
