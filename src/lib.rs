use chrono::{FixedOffset, Offset, Utc};
use config::{Config, ConfigError};
use serde::Deserialize;

pub mod application;
pub mod domain;
pub mod infrastructure;

#[derive(Clone, Debug, Deserialize)]
pub struct WellPointConfig {
    pub eventstore: Option<EventStore>,
    pub meilisearch: Option<MeiliSearch>,
    pub logger: Logger,
    pub web: Web,
    pub auth: Auth,
    pub stripe: Stripe,
    pub booking: Booking,
    pub media: MediaLimits,
}

impl WellPointConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("logger.level", "INFO")?
            .set_default("web.address", "0.0.0.0:8080")?
            .set_default("auth.url", "http://localhost:54321")?
            .set_default("auth.api_key", "")?
            .set_default("stripe.api_base", "https://api.stripe.com")?
            .set_default("stripe.secret_key", "")?
            .set_default("stripe.webhook_secret", "")?
            .set_default("stripe.platform_fee_bps", 1000_i64)?
            .set_default("stripe.webhook_tolerance_secs", 300_i64)?
            .set_default("stripe.refresh_url", "http://localhost:3000/dashboard/stripe/refresh")?
            .set_default("stripe.return_url", "http://localhost:3000/dashboard/stripe/return")?
            .set_default("booking.utc_offset_minutes", -360_i64)?
            .set_default("media.max_bytes", 5_242_880_i64)?
            .add_source(config::File::with_name("wellpoint.toml").required(false))
            .add_source(config::Environment::with_prefix("WELLPOINT").separator("__"))
            .build()?
            .try_deserialize::<WellPointConfig>()?
            .validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        self.stripe.validate()?;
        Ok(self)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct EventStore {
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MeiliSearch {
    pub url: String,
    pub api_key: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Logger {
    pub level: Level,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Web {
    pub address: String,
    pub tls: Option<Tls>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Tls {
    pub cert: String,
    pub key: String,
}

/// Hosted auth provider used to verify bearer tokens.
#[derive(Clone, Debug, Deserialize)]
pub struct Auth {
    pub url: String,
    pub api_key: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Stripe {
    pub api_base: String,
    pub secret_key: String,
    pub webhook_secret: String,
    /// Platform commission in basis points of the reservation total.
    pub platform_fee_bps: u32,
    pub webhook_tolerance_secs: u64,
    pub refresh_url: String,
    pub return_url: String,
}

impl Stripe {
    /// A fee of the whole charge.
    pub const MAX_FEE_BPS: u32 = 10_000;

    fn validate(&self) -> Result<(), ConfigError> {
        if self.platform_fee_bps > Self::MAX_FEE_BPS {
            return Err(ConfigError::Message(format!(
                "stripe.platform_fee_bps must be at most {}, got {}",
                Self::MAX_FEE_BPS,
                self.platform_fee_bps
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Booking {
    /// Offset of the marketplace's local time from UTC. Opening hours and
    /// slot dates are interpreted in this offset.
    pub utc_offset_minutes: i32,
}

impl Booking {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct MediaLimits {
    pub max_bytes: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub enum Level {
    TRACE,
    DEBUG,
    INFO,
    WARN,
    ERROR,
}

impl From<&Level> for tracing::Level {
    fn from(value: &Level) -> Self {
        match value {
            Level::TRACE => tracing::Level::TRACE,
            Level::DEBUG => tracing::Level::DEBUG,
            Level::INFO => tracing::Level::INFO,
            Level::WARN => tracing::Level::WARN,
            Level::ERROR => tracing::Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripe(platform_fee_bps: u32) -> Stripe {
        Stripe {
            api_base: "https://api.stripe.com".to_owned(),
            secret_key: String::new(),
            webhook_secret: String::new(),
            platform_fee_bps,
            webhook_tolerance_secs: 300,
            refresh_url: String::new(),
            return_url: String::new(),
        }
    }

    #[test]
    fn test_platform_fee_bounds() {
        assert!(stripe(0).validate().is_ok());
        assert!(stripe(1000).validate().is_ok());
        assert!(stripe(Stripe::MAX_FEE_BPS).validate().is_ok());
        assert!(matches!(
            stripe(Stripe::MAX_FEE_BPS + 1).validate(),
            Err(ConfigError::Message(_))
        ));
    }
}
