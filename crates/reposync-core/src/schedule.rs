//! Gate for scheduled (non-manual) runs.
//!
//! A manual request bypasses the gate entirely; the host only consults it for
//! periodic triggers.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Connectivity class of the current network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkClass {
    /// Wi-Fi or wired; no data cap.
    Unmetered,
    /// Mobile data or a hotspot.
    Metered,
    /// Not known; treated as metered.
    #[default]
    Unknown,
}

impl FromStr for NetworkClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unmetered" | "wifi" | "ethernet" => Ok(Self::Unmetered),
            "metered" | "mobile" | "cellular" => Ok(Self::Metered),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!(
                "unknown network class '{other}' (expected unmetered, metered or unknown)"
            )),
        }
    }
}

/// Everything the gate looks at.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleInput {
    /// Configured interval in hours; zero disables scheduled runs.
    pub interval_hours: u32,
    /// When the last run completed, if ever.
    pub last_run: Option<DateTime<Utc>>,
    /// Current time.
    pub now: DateTime<Utc>,
    /// Only run on unmetered networks.
    pub wifi_only: bool,
    /// Current network.
    pub network: NetworkClass,
}

/// Why a scheduled run was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The interval is zero.
    Disabled,
    /// The interval has not elapsed; `remaining` until it has.
    NotDue {
        /// Time left before the next run is due.
        remaining: Duration,
    },
    /// Wi-Fi only mode and the network is not unmetered.
    MeteredNetwork,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "scheduled updates are disabled"),
            Self::NotDue { remaining } => {
                write!(f, "next update due in {} minutes", remaining.num_minutes())
            }
            Self::MeteredNetwork => write!(f, "waiting for an unmetered network"),
        }
    }
}

/// Outcome of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Run now.
    Proceed,
    /// Do not run.
    Skip(SkipReason),
}

/// Decide whether a scheduled run should proceed.
///
/// # Example
///
/// ```
/// use chrono::{Duration, Utc};
/// use reposync_core::schedule::{evaluate, GateDecision, NetworkClass, ScheduleInput};
///
/// let now = Utc::now();
/// let input = ScheduleInput {
///     interval_hours: 24,
///     last_run: Some(now - Duration::hours(25)),
///     now,
///     wifi_only: false,
///     network: NetworkClass::Metered,
/// };
/// assert_eq!(evaluate(&input), GateDecision::Proceed);
/// ```
pub fn evaluate(input: &ScheduleInput) -> GateDecision {
    if input.interval_hours == 0 {
        return GateDecision::Skip(SkipReason::Disabled);
    }

    if let Some(last) = input.last_run {
        let due = last + Duration::hours(i64::from(input.interval_hours));
        if due > input.now {
            return GateDecision::Skip(SkipReason::NotDue {
                remaining: due - input.now,
            });
        }
    }

    if input.wifi_only && input.network != NetworkClass::Unmetered {
        return GateDecision::Skip(SkipReason::MeteredNetwork);
    }

    GateDecision::Proceed
}
