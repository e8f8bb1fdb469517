use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

use crate::domain::{core::ProfileId, Aggregation, Entity, Event, EventQueue};

/// Stripe連結アカウントイベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StripeAccountEvent {
    AccountConnected {
        id: ProfileId,
        account_id: String,
    },
    AccountStatusChanged {
        id: ProfileId,
        charges_enabled: bool,
        payouts_enabled: bool,
        details_submitted: bool,
    },
}

impl Event for StripeAccountEvent {
    type Id = ProfileId;
}

/// Connected account of a listing owner.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StripeAccount {
    id: ProfileId,
    account_id: String,
    charges_enabled: bool,
    payouts_enabled: bool,
    details_submitted: bool,
    #[serde(skip)]
    events: EventQueue<StripeAccountEvent>,
}

impl StripeAccount {
    pub fn connect(id: ProfileId, account_id: String) -> Result<Self, StripeAccountError> {
        let mut entity = StripeAccount::default();
        entity.record(StripeAccountEvent::AccountConnected { id, account_id })?;
        Ok(entity)
    }

    /// Records the processor's view of the account. Returns `false` when
    /// nothing changed.
    pub fn update_status(
        &mut self,
        charges_enabled: bool,
        payouts_enabled: bool,
        details_submitted: bool,
    ) -> Result<bool, StripeAccountError> {
        if self.charges_enabled == charges_enabled
            && self.payouts_enabled == payouts_enabled
            && self.details_submitted == details_submitted
        {
            return Ok(false);
        }
        self.record(StripeAccountEvent::AccountStatusChanged {
            id: self.id,
            charges_enabled,
            payouts_enabled,
            details_submitted,
        })?;
        Ok(true)
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn charges_enabled(&self) -> bool {
        self.charges_enabled
    }

    pub fn payouts_enabled(&self) -> bool {
        self.payouts_enabled
    }

    pub fn details_submitted(&self) -> bool {
        self.details_submitted
    }

    fn is_connected(&self) -> bool {
        !self.account_id.is_empty()
    }
}

impl Entity for StripeAccount {
    type Id = ProfileId;

    const ENTITY_NAME: &'static str = "stripe_account";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for StripeAccount {
    type Event = StripeAccountEvent;
    type Error = StripeAccountError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            StripeAccountEvent::AccountConnected { account_id, .. } => {
                if self.is_connected() {
                    return Err(StripeAccountError::AlreadyConnected);
                }
                match account_id.starts_with("acct_") {
                    true => Ok(()),
                    false => Err(StripeAccountError::InvalidAccountId),
                }
            }
            StripeAccountEvent::AccountStatusChanged { id, .. } => {
                match self.is_connected() && self.id == *id {
                    true => Ok(()),
                    false => Err(StripeAccountError::MismatchedId),
                }
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            StripeAccountEvent::AccountConnected { id, account_id } => {
                self.id = id;
                self.account_id = account_id;
            }
            StripeAccountEvent::AccountStatusChanged {
                charges_enabled,
                payouts_enabled,
                details_submitted,
                ..
            } => {
                self.charges_enabled = charges_enabled;
                self.payouts_enabled = payouts_enabled;
                self.details_submitted = details_submitted;
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
pub enum StripeAccountError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "A connected account already exists")]
    AlreadyConnected,
    #[display(fmt = "Invalid connected account id")]
    InvalidAccountId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_and_update() {
        let mut account = StripeAccount::connect(1.into(), "acct_1Nv0".to_owned()).unwrap();
        assert!(!account.charges_enabled());
        assert!(account.update_status(true, false, true).unwrap());
        assert!(!account.update_status(true, false, true).unwrap());
        assert_eq!(account.events().len(), 2);
        assert!(account.charges_enabled());
    }

    #[test]
    fn test_rejects_invalid_account() {
        assert_eq!(
            StripeAccount::connect(1.into(), "cus_123".to_owned()).unwrap_err(),
            StripeAccountError::InvalidAccountId
        );
        let mut account = StripeAccount::connect(1.into(), "acct_1".to_owned()).unwrap();
        let again = StripeAccountEvent::AccountConnected {
            id: 1.into(),
            account_id: "acct_2".to_owned(),
        };
        assert_eq!(account.record(again), Err(StripeAccountError::AlreadyConnected));
    }
}
