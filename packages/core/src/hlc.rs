//! Hybrid Logical Clock (HLC) for distributed causality tracking.
//!
//! Provides monotonically increasing timestamps that combine physical
//! wall-clock time with a logical counter, ensuring total ordering of events
//! across nodes. The HLC anchors LWW (Last-Write-Wins) conflict resolution.
//!
//! # Wire format
//!
//! Timestamps serialize to the string format `"millis:counter:nodeId"`.
//! Node IDs must not contain the `:` character. Parsing rejects any other
//! arity with [`HlcError::MalformedTimestamp`].

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Errors produced by the clock subsystem.
#[derive(Debug, thiserror::Error)]
pub enum HlcError {
    /// A remote timestamp exceeded the drift threshold while the clock is in
    /// strict mode.
    #[error(
        "clock drift detected: remote time {remote_millis} is {drift_ms}ms ahead of local \
         {local_millis} (threshold: {max_drift_ms}ms)"
    )]
    ClockDriftTooLarge {
        /// Physical millis of the offending remote timestamp.
        remote_millis: u64,
        /// Observed drift in milliseconds.
        drift_ms: u64,
        /// Local system time at the moment of the check.
        local_millis: u64,
        /// Configured drift threshold.
        max_drift_ms: u64,
    },
    /// A timestamp string did not match `"millis:counter:nodeId"`.
    #[error("malformed timestamp: {0}")]
    MalformedTimestamp(String),
}

/// A hybrid logical timestamp combining physical time, logical counter, and
/// node identity.
///
/// Ordering is: `millis` first, then `counter`, then `node_id` (lexicographic
/// byte order). The node id tiebreak makes the order total, so any two
/// distinct events on distinct nodes are comparable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Physical wall-clock milliseconds since the Unix epoch.
    pub millis: u64,
    /// Logical counter for events within the same millisecond.
    pub counter: u32,
    /// Unique identifier of the node that generated this timestamp.
    pub node_id: String,
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.millis
            .cmp(&other.millis)
            .then_with(|| self.counter.cmp(&other.counter))
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.millis, self.counter, self.node_id)
    }
}

impl FromStr for Timestamp {
    type Err = HlcError;

    /// Parses the wire format `"millis:counter:nodeId"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(3, ':').collect();
        if parts.len() != 3 {
            return Err(HlcError::MalformedTimestamp(s.to_string()));
        }
        let millis = parts[0]
            .parse::<u64>()
            .map_err(|_| HlcError::MalformedTimestamp(s.to_string()))?;
        let counter = parts[1]
            .parse::<u32>()
            .map_err(|_| HlcError::MalformedTimestamp(s.to_string()))?;
        let node_id = parts[2];
        if node_id.is_empty() {
            return Err(HlcError::MalformedTimestamp(s.to_string()));
        }
        Ok(Timestamp {
            millis,
            counter,
            node_id: node_id.to_string(),
        })
    }
}

impl Timestamp {
    /// Builds a timestamp from its parts.
    #[must_use]
    pub fn new(millis: u64, counter: u32, node_id: impl Into<String>) -> Self {
        Self {
            millis,
            counter,
            node_id: node_id.into(),
        }
    }
}

/// Abstraction over the system clock for dependency injection.
///
/// Allows deterministic testing by replacing the real clock with a fixed one.
/// The default implementation ([`SystemClock`]) delegates to
/// `std::time::SystemTime`.
pub trait ClockSource: Send + Sync {
    /// Returns the current time as milliseconds since the Unix epoch.
    fn now(&self) -> u64;
}

/// Default clock source that reads the real system time.
#[derive(Debug, Clone)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before Unix epoch")
            .as_millis() as u64
    }
}

/// Hybrid Logical Clock.
///
/// Generates monotonically increasing [`Timestamp`]s. When the system clock
/// advances past the last logical time, the counter resets to 0; otherwise
/// the counter increments, so every locally generated timestamp strictly
/// exceeds every previously generated or received one.
///
/// # Drift detection
///
/// [`HLC::update`] checks whether a remote timestamp runs ahead of the local
/// system time by more than `max_drift_ms`. In strict mode the update fails
/// with [`HlcError::ClockDriftTooLarge`]; otherwise a warning is logged via
/// `tracing` and the timestamp is accepted.
pub struct HLC {
    last_millis: u64,
    last_counter: u32,
    node_id: String,
    strict_mode: bool,
    max_drift_ms: u64,
    clock_source: Box<dyn ClockSource>,
}

/// Default drift threshold: one minute.
pub const DEFAULT_MAX_DRIFT_MS: u64 = 60_000;

impl HLC {
    /// Creates a new HLC with the given node id and clock source.
    ///
    /// Uses default options: non-strict mode, 60-second max drift.
    pub fn new(node_id: impl Into<String>, clock_source: Box<dyn ClockSource>) -> Self {
        Self::with_options(node_id, clock_source, false, DEFAULT_MAX_DRIFT_MS)
    }

    /// Creates a new HLC with explicit strict mode and drift configuration.
    pub fn with_options(
        node_id: impl Into<String>,
        clock_source: Box<dyn ClockSource>,
        strict_mode: bool,
        max_drift_ms: u64,
    ) -> Self {
        Self {
            last_millis: 0,
            last_counter: 0,
            node_id: node_id.into(),
            strict_mode,
            max_drift_ms,
            clock_source,
        }
    }

    /// Returns the node id of this clock.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Returns whether strict drift checking is enabled.
    pub fn strict_mode(&self) -> bool {
        self.strict_mode
    }

    /// Returns the maximum allowed clock drift in milliseconds.
    pub fn max_drift_ms(&self) -> u64 {
        self.max_drift_ms
    }

    /// Returns the clock source used by this HLC.
    ///
    /// The owning map uses the same source for TTL expiry checks so logical
    /// and physical time never disagree within one map instance.
    pub fn clock_source(&self) -> &dyn ClockSource {
        &*self.clock_source
    }

    /// Generates a new unique timestamp for a local event.
    pub fn now(&mut self) -> Timestamp {
        let system_time = self.clock_source.now();

        if system_time > self.last_millis {
            // System clock advanced: reset counter
            self.last_millis = system_time;
            self.last_counter = 0;
        } else {
            // System clock unchanged or behind: increment counter
            self.last_counter += 1;
        }

        Timestamp {
            millis: self.last_millis,
            counter: self.last_counter,
            node_id: self.node_id.clone(),
        }
    }

    /// Updates the local clock from a received remote timestamp.
    ///
    /// Must be called whenever a record is received from another node, before
    /// merge resolution, so that subsequent local events causally follow the
    /// remote one.
    ///
    /// # Errors
    ///
    /// Returns [`HlcError::ClockDriftTooLarge`] in strict mode if the remote
    /// millis exceed `local_system_time + max_drift_ms`. In non-strict mode
    /// the drift is logged and the timestamp accepted.
    pub fn update(&mut self, remote: &Timestamp) -> Result<(), HlcError> {
        let system_time = self.clock_source.now();

        // Only positive drift (remote ahead of local) is checked.
        if remote.millis > system_time {
            let drift = remote.millis - system_time;
            if drift > self.max_drift_ms {
                if self.strict_mode {
                    return Err(HlcError::ClockDriftTooLarge {
                        remote_millis: remote.millis,
                        drift_ms: drift,
                        local_millis: system_time,
                        max_drift_ms: self.max_drift_ms,
                    });
                }
                tracing::warn!(
                    drift_ms = drift,
                    remote_millis = remote.millis,
                    local_millis = system_time,
                    max_drift_ms = self.max_drift_ms,
                    "clock drift detected"
                );
            }
        }

        let max_millis = self.last_millis.max(system_time).max(remote.millis);

        if max_millis == self.last_millis && max_millis == remote.millis {
            // Both logical clocks on the same millisecond: take max counter + 1
            self.last_counter = self.last_counter.max(remote.counter) + 1;
        } else if max_millis == self.last_millis {
            // Local logical clock is ahead: just increment
            self.last_counter += 1;
        } else if max_millis == remote.millis {
            // Remote clock is ahead: fast-forward
            self.last_counter = remote.counter + 1;
        } else {
            // System time is ahead of both: reset counter
            self.last_counter = 0;
        }

        self.last_millis = max_millis;
        Ok(())
    }

    /// Compares two timestamps: millis, then counter, then node id.
    #[must_use]
    pub fn compare(a: &Timestamp, b: &Timestamp) -> Ordering {
        a.cmp(b)
    }
}
