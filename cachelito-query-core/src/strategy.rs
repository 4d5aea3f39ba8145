use crate::utils::now_millis;
use crate::SlotStatus;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Freshness policy consulted by a cached fetch before reusing a stored slot.
///
/// A strategy answers two questions:
///
/// * `is_expired` - is a value stored at `timestamp_ms` stale *now*?
/// * `is_available` - may a completed slot be returned without a new fetch?
///
/// The built-in policies are provided by [`Freshness`] and the [`available`],
/// [`refetch`] and [`expire`] constructors. Custom policies implement this
/// trait directly and are shared as `Arc<dyn Strategy>`.
///
/// # Examples
///
/// ```
/// use cachelito_query_core::{Strategy, SlotStatus};
///
/// #[derive(Debug)]
/// struct OnlyWhenIdle;
///
/// impl Strategy for OnlyWhenIdle {
///     fn is_expired(&self, _timestamp_ms: u64) -> bool {
///         false
///     }
///
///     fn is_available(&self, slot: SlotStatus) -> bool {
///         !slot.pending && slot.completed_at.is_some()
///     }
/// }
///
/// let strategy = OnlyWhenIdle;
/// assert!(strategy.is_available(SlotStatus { pending: false, completed_at: Some(1) }));
/// ```
pub trait Strategy: Send + Sync + fmt::Debug {
    /// Returns `true` if a value stored at `timestamp_ms` (unix millis) is stale.
    fn is_expired(&self, timestamp_ms: u64) -> bool;

    /// Returns `true` if the slot's completed value may be served as-is.
    ///
    /// The default accepts any completed slot that has not expired.
    fn is_available(&self, slot: SlotStatus) -> bool {
        slot.completed_at
            .map_or(false, |timestamp| !self.is_expired(timestamp))
    }
}

/// Built-in freshness policies.
///
/// # Variants
///
/// * `Available` - never expires; any completed slot is reused
/// * `Refetch` - always expired; every access performs a fresh fetch
/// * `Expire(ms)` - a completed slot is reused while its age is below `ms`
///
/// # Examples
///
/// ```
/// use cachelito_query_core::Freshness;
///
/// let policy: Freshness = "expire:1000".parse().unwrap();
/// assert_eq!(policy, Freshness::Expire(1000));
///
/// assert!(!Freshness::Expire(1000).is_expired_at(1_000, 1_999));
/// assert!(Freshness::Expire(1000).is_expired_at(1_000, 2_000));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Available,
    Refetch,
    Expire(u64),
}

impl Freshness {
    /// Pure variant of [`Strategy::is_expired`] evaluated against an explicit `now_ms`.
    pub fn is_expired_at(&self, timestamp_ms: u64, now_ms: u64) -> bool {
        match self {
            Freshness::Available => false,
            Freshness::Refetch => true,
            Freshness::Expire(ttl_ms) => now_ms.saturating_sub(timestamp_ms) >= *ttl_ms,
        }
    }
}

impl Strategy for Freshness {
    fn is_expired(&self, timestamp_ms: u64) -> bool {
        self.is_expired_at(timestamp_ms, now_millis())
    }

    fn is_available(&self, slot: SlotStatus) -> bool {
        match self {
            Freshness::Available => slot.completed_at.is_some(),
            Freshness::Refetch => false,
            Freshness::Expire(_) => slot
                .completed_at
                .map_or(false, |timestamp| !self.is_expired(timestamp)),
        }
    }
}

impl Default for Freshness {
    fn default() -> Self {
        Freshness::Available
    }
}

/// Never expire; any completed slot is acceptable.
pub const fn available() -> Freshness {
    Freshness::Available
}

/// Always expired; a completed slot is never reused.
pub const fn refetch() -> Freshness {
    Freshness::Refetch
}

/// A completed slot is reused while it is younger than `ms` milliseconds.
pub const fn expire(ms: u64) -> Freshness {
    Freshness::Expire(ms)
}

/// Error returned when a freshness policy string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFreshnessError {
    #[error("unknown freshness policy `{0}` (expected available, refetch or expire:<ms>)")]
    Unknown(String),
    #[error("invalid expiration `{0}`: expected milliseconds")]
    InvalidDuration(String),
}

/// Parses `"available"`, `"refetch"` or `"expire:<ms>"` (case-insensitive).
impl FromStr for Freshness {
    type Err = ParseFreshnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "available" => Ok(Freshness::Available),
            "refetch" => Ok(Freshness::Refetch),
            other => match other.strip_prefix("expire:") {
                Some(ms) => ms
                    .trim()
                    .parse()
                    .map(Freshness::Expire)
                    .map_err(|_| ParseFreshnessError::InvalidDuration(ms.to_string())),
                None => Err(ParseFreshnessError::Unknown(s.to_string())),
            },
        }
    }
}
