//! Vaccination protocol models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{Animal, DoseRecord, Vaccine};

/// Lifecycle status of a vaccination protocol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolStatus {
    /// Created, no dose recorded yet
    Pending,
    /// Some doses recorded, more expected
    InProgress,
    /// All required doses recorded
    Complete,
    /// Next dose date passed without a registration (set by the sweep)
    Overdue,
}

/// Cycle parameters supplied when a new protocol is created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CycleParams {
    /// Number of doses that complete the cycle
    pub doses_required: u32,
    /// Days between consecutive doses (ignored for single-dose cycles)
    pub interval_days: Option<u32>,
    /// Whether a completed cycle schedules an annual booster reminder
    pub requires_annual_booster: bool,
}

impl CycleParams {
    /// Single-dose cycle.
    pub fn single_dose(requires_annual_booster: bool) -> Self {
        Self {
            doses_required: 1,
            interval_days: None,
            requires_annual_booster,
        }
    }

    /// Multi-dose cycle with a fixed interval.
    pub fn multi_dose(doses_required: u32, interval_days: u32, requires_annual_booster: bool) -> Self {
        Self {
            doses_required,
            interval_days: Some(interval_days),
            requires_annual_booster,
        }
    }
}

/// The derived, mutable part of a protocol: what every dose registration,
/// sweep or status override rewrites.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolState {
    pub status: ProtocolStatus,
    pub next_dose_date: Option<NaiveDate>,
    pub next_cycle_reminder_date: Option<NaiveDate>,
}

/// One vaccination cycle for an (animal, vaccine) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VaccinationProtocol {
    /// Unique ID (UUID v4)
    pub id: String,
    pub animal_id: String,
    pub vaccine_id: String,
    pub doses_required: u32,
    pub interval_days: Option<u32>,
    pub requires_annual_booster: bool,
    pub status: ProtocolStatus,
    /// Only one active protocol may exist per (animal, vaccine)
    pub active: bool,
    /// Due date of the next dose while the cycle is running
    pub next_dose_date: Option<NaiveDate>,
    /// Annual booster reminder, set once a booster cycle completes
    pub next_cycle_reminder_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VaccinationProtocol {
    /// Create a fresh, active, pending protocol.
    pub fn new(
        animal_id: String,
        vaccine_id: String,
        params: &CycleParams,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            animal_id,
            vaccine_id,
            doses_required: params.doses_required,
            interval_days: params.interval_days,
            requires_annual_booster: params.requires_annual_booster,
            status: ProtocolStatus::Pending,
            active: true,
            next_dose_date: None,
            next_cycle_reminder_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Complete and without booster: no further doses may be registered.
    pub fn is_terminal(&self) -> bool {
        self.status == ProtocolStatus::Complete && !self.requires_annual_booster
    }

    /// Complete with booster: the next registration archives this protocol
    /// and opens a new cycle.
    pub fn awaits_booster_cycle(&self) -> bool {
        self.status == ProtocolStatus::Complete && self.requires_annual_booster
    }

    /// Current derived state.
    pub fn state(&self) -> ProtocolState {
        ProtocolState {
            status: self.status,
            next_dose_date: self.next_dose_date,
            next_cycle_reminder_date: self.next_cycle_reminder_date,
        }
    }

    /// Overwrite the derived state.
    pub fn apply(&mut self, state: ProtocolState, now: DateTime<Utc>) {
        self.status = state.status;
        self.next_dose_date = state.next_dose_date;
        self.next_cycle_reminder_date = state.next_cycle_reminder_date;
        self.updated_at = now;
    }

    /// The date this protocol is scheduled around, if any.
    pub fn schedule_date(&self) -> Option<NaiveDate> {
        self.next_dose_date.or(self.next_cycle_reminder_date)
    }
}

/// A protocol together with its chronological dose list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolWithDoses {
    pub protocol: VaccinationProtocol,
    pub doses: Vec<DoseRecord>,
}

/// A protocol joined with its catalog entities, for history and alert views.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolDetail {
    pub protocol: VaccinationProtocol,
    pub animal: Animal,
    pub vaccine: Vaccine,
    pub doses: Vec<DoseRecord>,
}

/// Dashboard counters, all computed against the same day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VaccinationKpis {
    /// Every dose ever recorded
    pub doses_applied: u64,
    /// Pending or in-progress protocols due today or later
    pub scheduled: u64,
    /// Protocols marked overdue, plus in-progress ones already past due
    pub overdue: u64,
    /// Completed protocols
    pub completed: u64,
}
