//! Session timing and transport configuration.
//!
//! All timings are durations; on disk they are stored as whole milliseconds
//! (`access_ttl_ms`, `refresh_ttl_ms`, ...). Defaults match the reference
//! authentication service: a 10 second access credential inside a 20 second
//! session ceiling, refreshed 2 seconds early, with a 10 second inactivity limit.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default base URL of the authentication service
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

/// HTTP request timeout in seconds.
/// 30s allows for slow responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(10);
const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(20);
const DEFAULT_REFRESH_LEAD: Duration = Duration::from_secs(2);
const DEFAULT_CEILING_MARGIN: Duration = Duration::from_secs(1);
const DEFAULT_INACTIVITY_LIMIT: Duration = Duration::from_secs(10);
const DEFAULT_ACTIVITY_THROTTLE: Duration = Duration::from_secs(1);

/// Consecutive immediate silent refreshes allowed before the engine gives up
/// and leaves the ceiling as the backstop.
const DEFAULT_MAX_CATCHUP_REFRESHES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of an access credential from the moment it is issued
    #[serde(rename = "access_ttl_ms", with = "duration_ms")]
    pub access_ttl: Duration,
    /// Lifetime of the refresh credential; the hard session ceiling
    #[serde(rename = "refresh_ttl_ms", with = "duration_ms")]
    pub refresh_ttl: Duration,
    /// How long before the access deadline a silent refresh fires
    #[serde(rename = "refresh_lead_ms", with = "duration_ms")]
    pub refresh_lead: Duration,
    /// No silent refresh is attempted this close to the ceiling
    #[serde(rename = "ceiling_margin_ms", with = "duration_ms")]
    pub ceiling_margin: Duration,
    #[serde(rename = "inactivity_limit_ms", with = "duration_ms")]
    pub inactivity_limit: Duration,
    #[serde(rename = "activity_throttle_ms", with = "duration_ms")]
    pub activity_throttle: Duration,
    pub max_catchup_refreshes: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            refresh_lead: DEFAULT_REFRESH_LEAD,
            ceiling_margin: DEFAULT_CEILING_MARGIN,
            inactivity_limit: DEFAULT_INACTIVITY_LIMIT,
            activity_throttle: DEFAULT_ACTIVITY_THROTTLE,
            max_catchup_refreshes: DEFAULT_MAX_CATCHUP_REFRESHES,
        }
    }
}

impl SessionConfig {
    /// Check the ordering constraints between the configured durations:
    /// `refresh_lead < access_ttl < refresh_ttl` and `inactivity_limit <= refresh_ttl`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_ttl.is_zero() {
            return Err(ConfigError::Zero("access TTL"));
        }
        if self.activity_throttle.is_zero() {
            return Err(ConfigError::Zero("activity throttle"));
        }
        if self.inactivity_limit.is_zero() {
            return Err(ConfigError::Zero("inactivity limit"));
        }
        if self.refresh_lead >= self.access_ttl {
            return Err(ConfigError::LeadTimeTooLong {
                lead: self.refresh_lead,
                access: self.access_ttl,
            });
        }
        if self.access_ttl >= self.refresh_ttl {
            return Err(ConfigError::AccessOutlivesRefresh {
                access: self.access_ttl,
                refresh: self.refresh_ttl,
            });
        }
        if self.inactivity_limit > self.refresh_ttl {
            return Err(ConfigError::InactivityBeyondCeiling {
                inactivity: self.inactivity_limit,
                refresh: self.refresh_ttl,
            });
        }
        if self.ceiling_margin >= self.refresh_ttl {
            return Err(ConfigError::MarginTooLong {
                margin: self.ceiling_margin,
                refresh: self.refresh_ttl,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub base_url: String,
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
