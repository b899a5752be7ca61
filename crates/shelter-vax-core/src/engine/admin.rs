//! Administrative protocol edits.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::registration::validate_cycle;
use super::state_machine::completed;
use super::{EngineError, EngineResult, VaccinationEngine};
use crate::db::StoreTx;
use crate::models::{
    CycleParams, ProtocolState, ProtocolStatus, ProtocolWithDoses, VaccinationProtocol,
};
use crate::schedule::{add_days, shelter_day};

/// Corrections to a running protocol's cycle parameters. Unset fields keep
/// their current value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolParamsUpdate {
    pub doses_required: Option<u32>,
    pub interval_days: Option<u32>,
}

impl VaccinationEngine<'_> {
    /// Correct the dose count or interval of an active, unfinished protocol.
    ///
    /// When the doses already recorded meet the new requirement the protocol
    /// completes today; otherwise its status and next dose date stand.
    pub fn update_protocol_params(
        &self,
        protocol_id: &str,
        update: ProtocolParamsUpdate,
    ) -> EngineResult<ProtocolWithDoses> {
        if update.doses_required == Some(0) || update.interval_days == Some(0) {
            return Err(EngineError::InvalidInput(
                "Dose count and interval must be positive".into(),
            ));
        }

        let result = self.write("update_protocol_params", |tx| {
            let now = self.clock.now();
            let mut protocol = editable(tx, protocol_id)?;
            if protocol.status == ProtocolStatus::Complete {
                return Err(EngineError::InvalidState(format!(
                    "Protocol {} is complete; its parameters can no longer change",
                    protocol.id
                )));
            }

            let cycle = CycleParams {
                doses_required: update.doses_required.unwrap_or(protocol.doses_required),
                interval_days: update.interval_days.or(protocol.interval_days),
                requires_annual_booster: protocol.requires_annual_booster,
            };
            validate_cycle(&cycle)?;

            tx.update_cycle_params(&protocol.id, cycle.doses_required, cycle.interval_days, now)?;
            protocol.doses_required = cycle.doses_required;
            protocol.interval_days = cycle.interval_days;
            protocol.updated_at = now;

            if tx.count_doses(&protocol.id)? >= protocol.doses_required {
                let state = completed(&protocol, shelter_day(now, self.config.utc_offset));
                tx.update_protocol(&protocol.id, &state, now)?;
                protocol.apply(state, now);
            }

            let doses = tx.list_doses(&protocol.id)?;
            Ok(ProtocolWithDoses { protocol, doses })
        })?;

        info!(
            protocol_id,
            doses_required = result.protocol.doses_required,
            status = ?result.protocol.status,
            "Protocol parameters updated"
        );
        Ok(result)
    }

    /// Force a protocol into `status`.
    ///
    /// COMPLETE follows the completion rule. Any other status drops the
    /// booster reminder; IN_PROGRESS and OVERDUE also need a next dose date
    /// and get today plus the interval when they lack one.
    pub fn set_protocol_status(
        &self,
        protocol_id: &str,
        status: ProtocolStatus,
    ) -> EngineResult<ProtocolWithDoses> {
        let result = self.write("set_protocol_status", |tx| {
            let now = self.clock.now();
            let today = shelter_day(now, self.config.utc_offset);
            let mut protocol = editable(tx, protocol_id)?;

            let state = match status {
                ProtocolStatus::Complete => completed(&protocol, today),
                ProtocolStatus::Pending => ProtocolState {
                    status,
                    next_dose_date: protocol.next_dose_date,
                    next_cycle_reminder_date: None,
                },
                ProtocolStatus::InProgress | ProtocolStatus::Overdue => ProtocolState {
                    status,
                    next_dose_date: protocol.next_dose_date.or_else(|| {
                        Some(add_days(today, protocol.interval_days.unwrap_or(0)))
                    }),
                    next_cycle_reminder_date: None,
                },
            };

            tx.update_protocol(&protocol.id, &state, now)?;
            protocol.apply(state, now);

            let doses = tx.list_doses(&protocol.id)?;
            Ok(ProtocolWithDoses { protocol, doses })
        })?;

        info!(protocol_id, status = ?status, "Protocol status overridden");
        Ok(result)
    }
}

/// Load a protocol that administrative edits may touch.
fn editable(tx: &StoreTx<'_>, protocol_id: &str) -> EngineResult<VaccinationProtocol> {
    let protocol = tx
        .get_protocol(protocol_id)?
        .ok_or_else(|| EngineError::NotFound(format!("Protocol {}", protocol_id)))?;
    if !protocol.active {
        return Err(EngineError::InvalidState(format!(
            "Protocol {} is archived",
            protocol_id
        )));
    }
    Ok(protocol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::engine::DoseRegistration;
    use crate::models::{Animal, DoseDetails, Vaccine};
    use crate::schedule::FixedClock;
    use chrono::{NaiveDate, TimeZone, Utc};

    struct Fixture {
        db: Database,
        clock: FixedClock,
        animal: Animal,
        vaccine: Vaccine,
    }

    impl Fixture {
        fn new() -> Self {
            let db = Database::open_in_memory().unwrap();
            let animal = Animal::new("Nina".into());
            let vaccine = Vaccine::new("Giárdia".into());
            db.insert_animal(&animal).unwrap();
            db.insert_vaccine(&vaccine).unwrap();
            let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 8, 1, 15, 0, 0).unwrap());
            Self {
                db,
                clock,
                animal,
                vaccine,
            }
        }

        fn engine(&self) -> VaccinationEngine<'_> {
            VaccinationEngine::new(&self.db, &self.clock)
        }

        fn register(&self, cycle: CycleParams) -> ProtocolWithDoses {
            let details = DoseDetails {
                lab: "Ceva".into(),
                batch: "G-1".into(),
                attending_vet: "Dr. Prado".into(),
                amount_paid: 40.0,
                applied_at: None,
            };
            self.engine()
                .register_dose(&DoseRegistration::new(
                    &self.animal.id,
                    &self.vaccine.id,
                    details,
                    Some(cycle),
                ))
                .unwrap()
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_lowering_dose_count_completes() {
        let fx = Fixture::new();
        let running = fx.register(CycleParams::multi_dose(3, 15, true));

        let updated = fx
            .engine()
            .update_protocol_params(
                &running.protocol.id,
                ProtocolParamsUpdate {
                    doses_required: Some(1),
                    interval_days: None,
                },
            )
            .unwrap();

        assert_eq!(updated.protocol.doses_required, 1);
        assert_eq!(updated.protocol.status, ProtocolStatus::Complete);
        assert_eq!(updated.protocol.next_dose_date, None);
        assert_eq!(updated.protocol.next_cycle_reminder_date, Some(date(2025, 8, 1)));
    }

    #[test]
    fn test_interval_change_keeps_schedule() {
        let fx = Fixture::new();
        let running = fx.register(CycleParams::multi_dose(3, 15, false));

        let updated = fx
            .engine()
            .update_protocol_params(
                &running.protocol.id,
                ProtocolParamsUpdate {
                    doses_required: None,
                    interval_days: Some(20),
                },
            )
            .unwrap();

        assert_eq!(updated.protocol.interval_days, Some(20));
        assert_eq!(updated.protocol.status, ProtocolStatus::InProgress);
        assert_eq!(updated.protocol.next_dose_date, Some(date(2024, 8, 16)));
    }

    #[test]
    fn test_param_edit_rejections() {
        let fx = Fixture::new();
        let engine = fx.engine();

        let err = engine
            .update_protocol_params("missing", ProtocolParamsUpdate::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let done = fx.register(CycleParams::single_dose(false));
        let err = engine
            .update_protocol_params(
                &done.protocol.id,
                ProtocolParamsUpdate {
                    doses_required: Some(2),
                    interval_days: Some(10),
                },
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let err = engine
            .update_protocol_params(
                &done.protocol.id,
                ProtocolParamsUpdate {
                    doses_required: Some(0),
                    interval_days: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_oversized_interval_edit_rejected() {
        let fx = Fixture::new();
        let running = fx.register(CycleParams::multi_dose(3, 15, false));

        let err = fx
            .engine()
            .update_protocol_params(
                &running.protocol.id,
                ProtocolParamsUpdate {
                    doses_required: None,
                    interval_days: Some(3_000_000),
                },
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        let stored = fx
            .db
            .with_read_transaction(|tx| tx.get_protocol(&running.protocol.id))
            .unwrap()
            .unwrap();
        assert_eq!(stored.interval_days, Some(15));
    }

    #[test]
    fn test_set_status_overrides() {
        let fx = Fixture::new();
        let engine = fx.engine();
        let booster = fx.register(CycleParams::single_dose(true));
        assert_eq!(booster.protocol.status, ProtocolStatus::Complete);

        let reopened = engine
            .set_protocol_status(&booster.protocol.id, ProtocolStatus::InProgress)
            .unwrap();
        assert_eq!(reopened.protocol.status, ProtocolStatus::InProgress);
        assert_eq!(reopened.protocol.next_dose_date, Some(date(2024, 8, 1)));
        assert_eq!(reopened.protocol.next_cycle_reminder_date, None);

        let closed = engine
            .set_protocol_status(&booster.protocol.id, ProtocolStatus::Complete)
            .unwrap();
        assert_eq!(closed.protocol.next_dose_date, None);
        assert_eq!(closed.protocol.next_cycle_reminder_date, Some(date(2025, 8, 1)));
        assert_eq!(closed.doses.len(), 1);
    }

    #[test]
    fn test_set_status_on_archived_or_missing() {
        let fx = Fixture::new();
        let engine = fx.engine();

        let err = engine
            .set_protocol_status("missing", ProtocolStatus::Overdue)
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let first = fx.register(CycleParams::single_dose(true));
        fx.register(CycleParams::single_dose(true));
        let err = engine
            .set_protocol_status(&first.protocol.id, ProtocolStatus::Pending)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }
}
