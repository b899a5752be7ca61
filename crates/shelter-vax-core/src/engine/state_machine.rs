//! Protocol state machine.
//!
//! ```text
//!            dose, count < required
//!   PENDING ──────────────────────────▶ IN_PROGRESS ◀─┐
//!      │                                  │    │      │ dose, count < required
//!      │ dose, count ≥ required           │    │ sweep (next dose < today)
//!      ▼                                  │    ▼      │
//!   COMPLETE ◀────────────────────────────┘  OVERDUE ─┘
//!              dose, count ≥ required           │
//!      ▲                                        │
//!      └────────────────────────────────────────┘
//! ```
//!
//! OVERDUE is only ever assigned by the sweep; a dose registered against an
//! overdue protocol follows the same rule as any other.

use chrono::NaiveDate;

use super::{EngineError, EngineResult};
use crate::models::{ProtocolState, ProtocolStatus, VaccinationProtocol};
use crate::schedule::{add_days, add_years};

/// Derive a protocol's state after `doses_applied` doses, as of `today`.
pub fn advance(
    protocol: &VaccinationProtocol,
    doses_applied: u32,
    today: NaiveDate,
) -> EngineResult<ProtocolState> {
    if doses_applied >= protocol.doses_required {
        return Ok(completed(protocol, today));
    }

    let interval = protocol.interval_days.ok_or_else(|| {
        EngineError::InvalidState(format!(
            "Protocol {} expects {} doses but has no dose interval",
            protocol.id, protocol.doses_required
        ))
    })?;

    Ok(ProtocolState {
        status: ProtocolStatus::InProgress,
        next_dose_date: Some(add_days(today, interval)),
        next_cycle_reminder_date: None,
    })
}

/// The completed state: no next dose, and a booster reminder one year out
/// when the protocol asks for one.
pub fn completed(protocol: &VaccinationProtocol, today: NaiveDate) -> ProtocolState {
    ProtocolState {
        status: ProtocolStatus::Complete,
        next_dose_date: None,
        next_cycle_reminder_date: protocol
            .requires_annual_booster
            .then(|| add_years(today, 1)),
    }
}
