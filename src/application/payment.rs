use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::{
    core::{Money, PaymentStatus, ProfileId, ReservationId, ReservationStatus},
    payment::{
        verify_signature, ConnectedAccount, IntentStatus, NewPaymentIntent, PaymentGateway,
        StripeAccount, StripePayment, StripeWebhook, WebhookEvent, WebhookId,
    },
    Entity,
};

use super::{actor, load, ServiceError, Store};

/// Hosted onboarding for a connected account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Onboarding {
    pub account_id: String,
    pub url: String,
}

/// What the booker's browser needs to confirm the payment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkout {
    pub reservation: ReservationId,
    pub intent_id: String,
    pub client_secret: String,
    pub amount: Money,
    pub application_fee: Money,
    pub status: IntentStatus,
}

impl From<&StripePayment> for Checkout {
    fn from(payment: &StripePayment) -> Self {
        Self {
            reservation: payment.id(),
            intent_id: payment.intent_id().to_owned(),
            client_secret: payment.client_secret().to_owned(),
            amount: payment.amount(),
            application_fee: payment.application_fee(),
            status: payment.status(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookOutcome {
    /// The event changed local state.
    Handled,
    /// Recorded, but nothing to do for its type.
    Ignored,
    /// Already processed on an earlier delivery.
    Duplicate,
}

/// 決済サービス
#[derive(Clone)]
pub struct PaymentService {
    store: Store,
    gateway: Arc<dyn PaymentGateway>,
    webhook_secret: String,
    tolerance_secs: u64,
}

impl PaymentService {
    pub fn new(
        store: Store,
        gateway: Arc<dyn PaymentGateway>,
        webhook_secret: String,
        tolerance_secs: u64,
    ) -> Self {
        Self {
            store,
            gateway,
            webhook_secret,
            tolerance_secs,
        }
    }

    /// Creates the owner's connected account on first use and returns a
    /// fresh onboarding link.
    pub async fn connect_account(&self, owner: ProfileId) -> Result<Onboarding, ServiceError> {
        let profile = actor(&self.store, owner).await?;
        if !profile.role().can_list() {
            return Err(ServiceError::Forbidden("Your role cannot receive payments"));
        }
        let account = match self.store.stripe_accounts.find_by_id(owner).await? {
            Some(account) => account,
            None => {
                let remote = self
                    .gateway
                    .create_connected_account(owner, profile.email())
                    .await?;
                let mut account = StripeAccount::connect(owner, remote.id.clone())?;
                account.update_status(
                    remote.charges_enabled,
                    remote.payouts_enabled,
                    remote.details_submitted,
                )?;
                self.store.stripe_accounts.save(&mut account).await?;
                info!("プロフィール {} の連結アカウント {} を作成", owner, remote.id);
                account
            }
        };
        let url = self
            .gateway
            .create_onboarding_link(account.account_id())
            .await?;
        Ok(Onboarding {
            account_id: account.account_id().to_owned(),
            url,
        })
    }

    pub async fn account(&self, owner: ProfileId) -> Result<StripeAccount, ServiceError> {
        actor(&self.store, owner).await?;
        load(self.store.stripe_accounts.as_ref(), owner, "Stripe account").await
    }

    /// Pulls the account's capabilities from the processor.
    pub async fn refresh_account(&self, owner: ProfileId) -> Result<StripeAccount, ServiceError> {
        let mut account = self.account(owner).await?;
        let remote = self.gateway.retrieve_account(account.account_id()).await?;
        self.apply_account(&mut account, &remote).await?;
        Ok(account)
    }

    /// Intent for a pending reservation. An open intent is handed out again.
    pub async fn create_payment_intent(
        &self,
        booker: ProfileId,
        id: ReservationId,
    ) -> Result<Checkout, ServiceError> {
        actor(&self.store, booker).await?;
        let reservation = load(self.store.reservations.as_ref(), id, "Reservation").await?;
        if reservation.booker() != booker {
            return Err(ServiceError::Forbidden("Only the booker can pay"));
        }
        if reservation.status() != ReservationStatus::Pendiente {
            return Err(ServiceError::Conflict(
                "Reservation is not awaiting payment".to_owned(),
            ));
        }
        if reservation.payment_status().is_settled() {
            return Err(ServiceError::Conflict("Reservation is already paid".to_owned()));
        }
        let mut payment = self
            .store
            .stripe_payments
            .find_by_id(id)
            .await?
            .unwrap_or_default();
        if payment.is_open() {
            return Ok(Checkout::from(&payment));
        }
        let account = self
            .store
            .stripe_accounts
            .find_by_id(reservation.owner())
            .await?
            .filter(|a| a.charges_enabled())
            .ok_or_else(|| {
                ServiceError::Invalid("The owner cannot receive payments yet".to_owned())
            })?;

        let price = reservation.price();
        let intent = self
            .gateway
            .create_payment_intent(&NewPaymentIntent {
                reservation: id,
                amount: price.total,
                application_fee: price.platform_fee,
                destination: account.account_id().to_owned(),
            })
            .await?;
        payment.create_intent(
            id,
            intent.id,
            intent.client_secret,
            price.total,
            price.platform_fee,
            account.account_id().to_owned(),
        )?;
        self.store.stripe_payments.save(&mut payment).await?;
        info!("予約 {} の決済インテント {} を作成", id, payment.intent_id());
        Ok(Checkout::from(&payment))
    }

    /// Verifies and applies one processor notification.
    ///
    /// Each event is logged under its processor id. An event already
    /// processed is acknowledged without effect. A failed one is retried on
    /// redelivery.
    pub async fn handle_webhook(
        &self,
        payload: &str,
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let signature = signature
            .ok_or_else(|| ServiceError::BadRequest("Missing Stripe-Signature".to_owned()))?;
        verify_signature(
            payload,
            signature,
            &self.webhook_secret,
            self.tolerance_secs,
            now,
        )
        .map_err(|e| ServiceError::BadRequest(e.to_string()))?;
        let event: WebhookEvent = serde_json::from_str(payload)
            .map_err(|e| ServiceError::BadRequest(format!("Invalid event: {}", e)))?;

        let mut webhook = match self
            .store
            .stripe_webhooks
            .find_by_id(WebhookId::from_event_id(&event.id))
            .await?
        {
            Some(webhook) if webhook.is_processed() => {
                debug!("処理済みのWebhook {} をスキップ", event.id);
                return Ok(WebhookOutcome::Duplicate);
            }
            Some(webhook) => webhook,
            None => {
                let mut webhook = StripeWebhook::receive(
                    event.id.clone(),
                    event.event_type.clone(),
                    payload.to_owned(),
                    now,
                )?;
                self.store.stripe_webhooks.save(&mut webhook).await?;
                webhook
            }
        };

        match self.dispatch(&event).await {
            Ok(handled) => {
                webhook.mark_processed(now)?;
                self.store.stripe_webhooks.save(&mut webhook).await?;
                Ok(match handled {
                    true => WebhookOutcome::Handled,
                    false => WebhookOutcome::Ignored,
                })
            }
            Err(error) => {
                warn!("Webhook {} の処理に失敗: {}", event.id, error);
                webhook.mark_failed(error.to_string(), now)?;
                self.store.stripe_webhooks.save(&mut webhook).await?;
                Err(error)
            }
        }
    }

    async fn dispatch(&self, event: &WebhookEvent) -> Result<bool, ServiceError> {
        let object = &event.data.object;
        let status = match event.event_type.as_str() {
            "payment_intent.succeeded" => IntentStatus::Succeeded,
            "payment_intent.processing" => IntentStatus::Processing,
            "payment_intent.payment_failed" => IntentStatus::Failed,
            "payment_intent.canceled" => IntentStatus::Canceled,
            "account.updated" => return self.account_updated(object).await,
            other => {
                debug!("未対応のWebhook種別 {}", other);
                return Ok(false);
            }
        };
        self.intent_changed(object, status).await
    }

    async fn intent_changed(
        &self,
        object: &Value,
        status: IntentStatus,
    ) -> Result<bool, ServiceError> {
        let id: ReservationId = metadata_id(object, "reservation_id")?.into();
        let intent_id = object["id"].as_str().unwrap_or_default();
        let mut payment = load(self.store.stripe_payments.as_ref(), id, "Payment").await?;
        if payment.intent_id() != intent_id {
            warn!("予約 {} の古いインテント {} を無視", id, intent_id);
            return Ok(false);
        }
        if payment.status().is_terminal() && payment.status() != status {
            warn!(
                "終了済みインテント {} への {:?} を無視",
                intent_id, status
            );
            return Ok(false);
        }
        let message = object["last_payment_error"]["message"]
            .as_str()
            .map(str::to_owned);
        if payment.change_status(status, message)? {
            self.store.stripe_payments.save(&mut payment).await?;
        }

        let mut reservation = load(self.store.reservations.as_ref(), id, "Reservation").await?;
        let target = status.payment_status();
        if reservation.payment_status() != target {
            if reservation.payment_status().can_become(target) {
                reservation.change_payment_status(target)?;
            } else {
                warn!(
                    "予約 {} の支払状態 {:?} から {:?} へは変更できません",
                    id,
                    reservation.payment_status(),
                    target
                );
            }
        }
        if reservation.payment_status() == PaymentStatus::Paid
            && reservation.status() == ReservationStatus::Pendiente
        {
            reservation.confirm()?;
            info!("予約 {} の支払いが完了し確定", id);
        }
        self.store.reservations.save(&mut reservation).await?;
        Ok(true)
    }

    async fn account_updated(&self, object: &Value) -> Result<bool, ServiceError> {
        let remote: ConnectedAccount = serde_json::from_value(object.clone())
            .map_err(|e| ServiceError::BadRequest(format!("Invalid account: {}", e)))?;
        let owner: ProfileId = metadata_id(object, "profile_id")?.into();
        let mut account = match self.store.stripe_accounts.find_by_id(owner).await? {
            Some(account) if account.account_id() == remote.id => account,
            _ => {
                warn!("未登録の連結アカウント {} を無視", remote.id);
                return Ok(false);
            }
        };
        self.apply_account(&mut account, &remote).await
    }

    async fn apply_account(
        &self,
        account: &mut StripeAccount,
        remote: &ConnectedAccount,
    ) -> Result<bool, ServiceError> {
        let changed = account.update_status(
            remote.charges_enabled,
            remote.payouts_enabled,
            remote.details_submitted,
        )?;
        if changed {
            self.store.stripe_accounts.save(account).await?;
        }
        Ok(changed)
    }
}

fn metadata_id(object: &Value, key: &str) -> Result<u64, ServiceError> {
    object["metadata"][key]
        .as_str()
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| ServiceError::BadRequest(format!("metadata.{} is missing", key)))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::application::booking::tests::{listing, monday, now, service as booking};
    use crate::application::tests::{register, store};
    use crate::domain::core::{Reservation, Role};
    use crate::domain::payment::{signature_header, GatewayError, PaymentIntent};

    use super::*;

    const SECRET: &str = "whsec_test";

    #[derive(Default)]
    struct MockGateway {
        account: Mutex<ConnectedAccount>,
        intents: Mutex<Vec<NewPaymentIntent>>,
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn create_connected_account(
            &self,
            _profile: ProfileId,
            _email: &str,
        ) -> Result<ConnectedAccount, GatewayError> {
            let mut account = self.account.lock().unwrap();
            account.id = "acct_owner".to_owned();
            Ok(account.clone())
        }

        async fn create_onboarding_link(&self, account_id: &str) -> Result<String, GatewayError> {
            Ok(format!("https://connect.test/{}", account_id))
        }

        async fn retrieve_account(
            &self,
            _account_id: &str,
        ) -> Result<ConnectedAccount, GatewayError> {
            Ok(self.account.lock().unwrap().clone())
        }

        async fn create_payment_intent(
            &self,
            intent: &NewPaymentIntent,
        ) -> Result<PaymentIntent, GatewayError> {
            let mut intents = self.intents.lock().unwrap();
            intents.push(intent.clone());
            Ok(PaymentIntent {
                id: format!("pi_{}", intents.len()),
                client_secret: format!("pi_{}_secret", intents.len()),
                status: "requires_payment_method".to_owned(),
            })
        }
    }

    struct Fixture {
        store: Store,
        gateway: Arc<MockGateway>,
        service: PaymentService,
        reservation: Reservation,
    }

    /// A pending reservation whose owner has an enabled account.
    async fn fixture() -> Fixture {
        let store = store();
        let gateway = Arc::new(MockGateway::default());
        let service = PaymentService::new(store.clone(), gateway.clone(), SECRET.to_owned(), 300);
        let consultorio = listing(&store).await;
        let booker = register(&store, "medica", Role::User).await;
        let reservation = booking(&store)
            .create_hourly_reservation(booker.id(), consultorio.id(), monday(), 10, now())
            .await
            .unwrap();
        service.connect_account(consultorio.owner()).await.unwrap();
        gateway.account.lock().unwrap().charges_enabled = true;
        service.refresh_account(consultorio.owner()).await.unwrap();
        Fixture {
            store,
            gateway,
            service,
            reservation,
        }
    }

    fn intent_event(event_id: &str, kind: &str, intent: &str, reservation: ReservationId) -> String {
        json!({
            "id": event_id,
            "type": kind,
            "data": { "object": {
                "id": intent,
                "object": "payment_intent",
                "metadata": { "reservation_id": reservation.to_string() }
            }}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_connect_account_reuses_account() {
        let store = store();
        let gateway = Arc::new(MockGateway::default());
        let service = PaymentService::new(store.clone(), gateway, SECRET.to_owned(), 300);
        let owner = register(&store, "owner", Role::Owner).await;
        let first = service.connect_account(owner.id()).await.unwrap();
        assert_eq!(first.account_id, "acct_owner");
        assert_eq!(first.url, "https://connect.test/acct_owner");
        let second = service.connect_account(owner.id()).await.unwrap();
        assert_eq!(second.account_id, first.account_id);
        assert!(!service.account(owner.id()).await.unwrap().charges_enabled());

        let professional = register(&store, "pro", Role::Professional).await;
        assert!(matches!(
            service.connect_account(professional.id()).await,
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_payment_intent_requires_enabled_account() {
        let store = store();
        let gateway = Arc::new(MockGateway::default());
        let service = PaymentService::new(store.clone(), gateway, SECRET.to_owned(), 300);
        let consultorio = listing(&store).await;
        let booker = register(&store, "medica", Role::User).await;
        let reservation = booking(&store)
            .create_hourly_reservation(booker.id(), consultorio.id(), monday(), 10, now())
            .await
            .unwrap();
        assert!(matches!(
            service.create_payment_intent(booker.id(), reservation.id()).await,
            Err(ServiceError::Invalid(_))
        ));
        service.connect_account(consultorio.owner()).await.unwrap();
        assert!(matches!(
            service.create_payment_intent(booker.id(), reservation.id()).await,
            Err(ServiceError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_create_payment_intent() {
        let f = fixture().await;
        let booker = f.reservation.booker();
        assert!(matches!(
            f.service
                .create_payment_intent(f.reservation.owner(), f.reservation.id())
                .await,
            Err(ServiceError::Forbidden(_))
        ));

        let checkout = f
            .service
            .create_payment_intent(booker, f.reservation.id())
            .await
            .unwrap();
        assert_eq!(checkout.intent_id, "pi_1");
        assert_eq!(checkout.amount, f.reservation.price().total);
        assert_eq!(checkout.application_fee, f.reservation.price().platform_fee);
        let again = f
            .service
            .create_payment_intent(booker, f.reservation.id())
            .await
            .unwrap();
        assert_eq!(again, checkout);

        let intents = f.gateway.intents.lock().unwrap();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].destination, "acct_owner");
    }

    #[tokio::test]
    async fn test_webhook_confirms_reservation_once() {
        let f = fixture().await;
        let checkout = f
            .service
            .create_payment_intent(f.reservation.booker(), f.reservation.id())
            .await
            .unwrap();
        let payload = intent_event(
            "evt_1",
            "payment_intent.succeeded",
            &checkout.intent_id,
            f.reservation.id(),
        );
        let header = signature_header(&payload, SECRET, now()).unwrap();

        let outcome = f
            .service
            .handle_webhook(&payload, Some(&header), now())
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Handled);
        let reservation = f
            .store
            .reservations
            .find_by_id(f.reservation.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reservation.status(), ReservationStatus::Confirmada);
        assert_eq!(reservation.payment_status(), PaymentStatus::Paid);

        let outcome = f
            .service
            .handle_webhook(&payload, Some(&header), now())
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Duplicate);
        assert!(matches!(
            f.service
                .create_payment_intent(f.reservation.booker(), f.reservation.id())
                .await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_webhook_failure_is_retried() {
        let f = fixture().await;
        let payload = intent_event("evt_2", "payment_intent.payment_failed", "pi_1", f.reservation.id());
        let header = signature_header(&payload, SECRET, now()).unwrap();
        assert!(matches!(
            f.service.handle_webhook(&payload, Some(&header), now()).await,
            Err(ServiceError::NotFound(_))
        ));
        let webhook = f
            .store
            .stripe_webhooks
            .find_by_id(WebhookId::from_event_id("evt_2"))
            .await
            .unwrap()
            .unwrap();
        assert!(!webhook.is_processed());

        f.service
            .create_payment_intent(f.reservation.booker(), f.reservation.id())
            .await
            .unwrap();
        let outcome = f
            .service
            .handle_webhook(&payload, Some(&header), now())
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Handled);
        let reservation = f
            .store
            .reservations
            .find_by_id(f.reservation.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reservation.payment_status(), PaymentStatus::Failed);
        assert_eq!(reservation.status(), ReservationStatus::Pendiente);
    }

    async fn deliver(f: &Fixture, event_id: &str, kind: &str, intent: &str) -> WebhookOutcome {
        let payload = intent_event(event_id, kind, intent, f.reservation.id());
        let header = signature_header(&payload, SECRET, now()).unwrap();
        f.service
            .handle_webhook(&payload, Some(&header), now())
            .await
            .unwrap()
    }

    async fn stored(f: &Fixture) -> (Reservation, StripePayment) {
        let id = f.reservation.id();
        let reservation = f.store.reservations.find_by_id(id).await.unwrap().unwrap();
        let payment = f.store.stripe_payments.find_by_id(id).await.unwrap().unwrap();
        (reservation, payment)
    }

    #[tokio::test]
    async fn test_failed_attempt_then_success() {
        let f = fixture().await;
        f.service
            .create_payment_intent(f.reservation.booker(), f.reservation.id())
            .await
            .unwrap();
        let outcome = deliver(&f, "evt_f", "payment_intent.payment_failed", "pi_1").await;
        assert_eq!(outcome, WebhookOutcome::Handled);
        let outcome = deliver(&f, "evt_s", "payment_intent.succeeded", "pi_1").await;
        assert_eq!(outcome, WebhookOutcome::Handled);

        let (reservation, payment) = stored(&f).await;
        assert_eq!(reservation.payment_status(), PaymentStatus::Paid);
        assert_eq!(reservation.status(), ReservationStatus::Confirmada);
        assert_eq!(payment.status(), IntentStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_stale_intent_is_ignored() {
        let f = fixture().await;
        f.service
            .create_payment_intent(f.reservation.booker(), f.reservation.id())
            .await
            .unwrap();
        let outcome = deliver(&f, "evt_c", "payment_intent.canceled", "pi_1").await;
        assert_eq!(outcome, WebhookOutcome::Handled);
        let replacement = f
            .service
            .create_payment_intent(f.reservation.booker(), f.reservation.id())
            .await
            .unwrap();
        assert_eq!(replacement.intent_id, "pi_2");

        let outcome = deliver(&f, "evt_old", "payment_intent.succeeded", "pi_1").await;
        assert_eq!(outcome, WebhookOutcome::Ignored);
        let (reservation, payment) = stored(&f).await;
        assert_eq!(reservation.status(), ReservationStatus::Pendiente);
        assert_eq!(reservation.payment_status(), PaymentStatus::Pending);
        assert_eq!(payment.intent_id(), "pi_2");
        assert_eq!(payment.status(), IntentStatus::RequiresPaymentMethod);
    }

    #[tokio::test]
    async fn test_failure_after_success_is_ignored() {
        let f = fixture().await;
        f.service
            .create_payment_intent(f.reservation.booker(), f.reservation.id())
            .await
            .unwrap();
        let outcome = deliver(&f, "evt_ok", "payment_intent.succeeded", "pi_1").await;
        assert_eq!(outcome, WebhookOutcome::Handled);

        let outcome = deliver(&f, "evt_late", "payment_intent.payment_failed", "pi_1").await;
        assert_eq!(outcome, WebhookOutcome::Ignored);
        let (reservation, payment) = stored(&f).await;
        assert_eq!(reservation.payment_status(), PaymentStatus::Paid);
        assert_eq!(reservation.status(), ReservationStatus::Confirmada);
        assert_eq!(payment.status(), IntentStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let f = fixture().await;
        let payload = intent_event("evt_3", "payment_intent.succeeded", "pi_1", f.reservation.id());
        let header = signature_header(&payload, "whsec_other", now()).unwrap();
        assert!(matches!(
            f.service.handle_webhook(&payload, Some(&header), now()).await,
            Err(ServiceError::BadRequest(_))
        ));
        assert!(matches!(
            f.service.handle_webhook(&payload, None, now()).await,
            Err(ServiceError::BadRequest(_))
        ));
        assert!(f
            .store
            .stripe_webhooks
            .find_by_id(WebhookId::from_event_id("evt_3"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_account_updated_and_unknown_events() {
        let f = fixture().await;
        let owner = f.reservation.owner();
        let payload = json!({
            "id": "evt_4",
            "type": "account.updated",
            "data": { "object": {
                "id": "acct_owner",
                "charges_enabled": true,
                "payouts_enabled": true,
                "details_submitted": true,
                "metadata": { "profile_id": owner.to_string() }
            }}
        })
        .to_string();
        let header = signature_header(&payload, SECRET, now()).unwrap();
        assert_eq!(
            f.service
                .handle_webhook(&payload, Some(&header), now())
                .await
                .unwrap(),
            WebhookOutcome::Handled
        );
        let account = f.service.account(owner).await.unwrap();
        assert!(account.payouts_enabled());
        assert!(account.details_submitted());

        let payload = json!({
            "id": "evt_5",
            "type": "charge.refunded",
            "data": { "object": {} }
        })
        .to_string();
        let header = signature_header(&payload, SECRET, now()).unwrap();
        assert_eq!(
            f.service
                .handle_webhook(&payload, Some(&header), now())
                .await
                .unwrap(),
            WebhookOutcome::Ignored
        );
    }
}
