//! Vaccination protocol engine.
//!
//! Pipeline: Dose Registration → State Machine → Store, with the Overdue Sweep
//! and the read-side queries running against the same store.
//!
//! The engine owns no state of its own between calls. It borrows a
//! [`Database`] and a [`Clock`], and every operation runs inside one store
//! transaction.

mod admin;
mod queries;
mod registration;
mod state_machine;
mod sweep;

pub use admin::*;
pub use registration::*;
pub use state_machine::*;
pub use sweep::*;

use std::time::{Duration, Instant};

use chrono::{FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use thiserror::Error;
use tracing::warn;

use crate::db::{Database, DbError, StoreTx, DEFAULT_BUSY_TIMEOUT};
use crate::schedule::{shelter_day, Clock};

/// Engine errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Database error: {0}")]
    Store(#[from] DbError),
}

impl EngineError {
    /// Whether retrying the whole transaction may succeed.
    pub fn is_conflict(&self) -> bool {
        match self {
            EngineError::ConcurrencyConflict(_) => true,
            EngineError::Store(err) => err.is_conflict(),
            _ => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Shelter time zone, UTC-03:00.
const DEFAULT_UTC_OFFSET_WEST_SECS: i32 = 3 * 3600;

/// Operational parameters of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Offset that defines the shelter's calendar day
    pub utc_offset: FixedOffset,
    /// Local time of the daily overdue sweep
    pub sweep_at: NaiveTime,
    /// Days ahead (inclusive) that an in-progress dose raises an alert
    pub alert_window_days: u32,
    /// Days ahead (inclusive) covered by the upcoming schedule
    pub upcoming_window_days: u32,
    /// Default size of the recent doses list
    pub recent_doses_limit: usize,
    /// Attempts per write transaction before reporting a conflict
    pub max_attempts: u32,
    /// Busy wait restored after a bounded call
    pub busy_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            utc_offset: FixedOffset::west_opt(DEFAULT_UTC_OFFSET_WEST_SECS).unwrap_or_else(|| Utc.fix()),
            sweep_at: NaiveTime::MIN,
            alert_window_days: 7,
            upcoming_window_days: 30,
            recent_doses_limit: 5,
            max_attempts: 5,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Entry point for every protocol operation.
pub struct VaccinationEngine<'a> {
    db: &'a Database,
    clock: &'a dyn Clock,
    config: EngineConfig,
    timeout: Option<Duration>,
}

impl<'a> VaccinationEngine<'a> {
    /// Create an engine with default configuration.
    pub fn new(db: &'a Database, clock: &'a dyn Clock) -> Self {
        Self {
            db,
            clock,
            config: EngineConfig::default(),
            timeout: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Bound every subsequent call. Exceeding it fails with
    /// [`EngineError::Timeout`] and writes nothing.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shelter's calendar day right now.
    pub fn today(&self) -> NaiveDate {
        shelter_day(self.clock.now(), self.config.utc_offset)
    }

    /// Run `f` in a write transaction, retrying the whole transaction on
    /// store conflicts until attempts or the caller's timeout run out.
    fn write<T, F>(&self, operation: &str, f: F) -> EngineResult<T>
    where
        F: Fn(&StoreTx<'_>) -> EngineResult<T>,
    {
        self.bounded(|deadline| {
            let max_attempts = self.config.max_attempts.max(1);
            let mut attempt = 1;
            loop {
                if let Some(deadline) = &deadline {
                    deadline.arm(self.db)?;
                }

                let err = match self.db.with_transaction(&f) {
                    Ok(value) => return Ok(value),
                    Err(err) if err.is_conflict() => err,
                    Err(err) => return Err(err),
                };

                if let Some(deadline) = &deadline {
                    if deadline.expired() {
                        return Err(EngineError::Timeout(deadline.budget));
                    }
                }
                if attempt >= max_attempts {
                    return Err(EngineError::ConcurrencyConflict(format!(
                        "{} gave up after {} attempts: {}",
                        operation, attempt, err
                    )));
                }

                warn!(operation, attempt, error = %err, "Store conflict, retrying transaction");
                let mut pause = Duration::from_millis(10 * u64::from(attempt));
                if let Some(deadline) = &deadline {
                    pause = pause.min(deadline.remaining());
                }
                std::thread::sleep(pause);
                attempt += 1;
            }
        })
    }

    /// Run `f` against one consistent snapshot.
    fn read<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&StoreTx<'_>) -> EngineResult<T>,
    {
        self.bounded(|deadline| {
            if let Some(deadline) = &deadline {
                deadline.arm(self.db)?;
            }
            self.db.with_read_transaction(f).map_err(|err| match &deadline {
                Some(deadline) if err.is_conflict() && deadline.expired() => {
                    EngineError::Timeout(deadline.budget)
                }
                _ => err,
            })
        })
    }

    /// Apply the caller timeout, if any, and restore the connection's busy
    /// wait afterwards.
    fn bounded<T>(&self, run: impl FnOnce(Option<Deadline>) -> EngineResult<T>) -> EngineResult<T> {
        let Some(budget) = self.timeout else {
            return run(None);
        };

        let result = run(Some(Deadline::after(budget)));
        let restored = self.db.set_busy_timeout(self.config.busy_timeout);
        let value = result?;
        restored?;
        Ok(value)
    }
}

/// Absolute end of a bounded call.
struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Fail fast once expired, otherwise cap the store's busy wait at what
    /// is left.
    fn arm(&self, db: &Database) -> EngineResult<()> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return Err(EngineError::Timeout(self.budget));
        }
        db.set_busy_timeout(remaining)?;
        Ok(())
    }
}
