use std::{fmt, str::FromStr};

use derive_more::{Display, Error};
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

/// 金額 (amount in the currency's minor unit)
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Money {
    amount: i64,
    currency: Currency,
}

impl Money {
    pub const fn new(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }

    /// Commission of `bps` basis points, rounded half up.
    pub fn fee(&self, bps: u32) -> Result<Money, MoneyError> {
        self.amount
            .checked_mul(i64::from(bps))
            .and_then(|scaled| scaled.checked_add(5_000))
            .map(|scaled| Money::new(scaled / 10_000, self.currency))
            .ok_or(MoneyError::Overflow)
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        self.amount
            .checked_add(other.amount)
            .map(|amount| Money::new(amount, self.currency))
            .ok_or(MoneyError::Overflow)
    }

    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        self.amount
            .checked_sub(other.amount)
            .map(|amount| Money::new(amount, self.currency))
            .ok_or(MoneyError::Overflow)
    }

    fn same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        match self.currency == other.currency {
            true => Ok(()),
            false => Err(MoneyError::CurrencyMismatch),
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        let exponent = self.currency.exponent();
        if exponent == 0 {
            return write!(
                f,
                "{}{}{}",
                sign,
                self.currency.symbol(),
                abs.to_formatted_string(&Locale::en)
            );
        }
        let scale = 10u64.pow(exponent);
        write!(
            f,
            "{}{}{}.{:0width$}",
            sign,
            self.currency.symbol(),
            (abs / scale).to_formatted_string(&Locale::en),
            abs % scale,
            width = exponent as usize
        )
    }
}

/// 通貨
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Currency {
    #[default]
    MXN,
    USD,
    EUR,
    JPY,
}

impl Currency {
    /// Number of minor-unit digits.
    pub fn exponent(&self) -> u32 {
        match self {
            Currency::JPY => 0,
            Currency::MXN | Currency::USD | Currency::EUR => 2,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::MXN | Currency::USD => "$",
            Currency::EUR => "€",
            Currency::JPY => "¥",
        }
    }

    /// ISO code in the lower case the payment processor expects.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::MXN => "mxn",
            Currency::USD => "usd",
            Currency::EUR => "eur",
            Currency::JPY => "jpy",
        }
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MXN" => Ok(Currency::MXN),
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "JPY" => Ok(Currency::JPY),
            _ => Err(MoneyError::UnknownCurrency),
        }
    }
}

#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum MoneyError {
    #[display(fmt = "Currencies do not match")]
    CurrencyMismatch,
    #[display(fmt = "Amount overflow")]
    Overflow,
    #[display(fmt = "Unknown currency")]
    UnknownCurrency,
}
