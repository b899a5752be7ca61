//! Dose registration workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::state_machine::advance;
use super::{EngineError, EngineResult, VaccinationEngine};
use crate::db::StoreTx;
use crate::models::{
    CycleParams, DoseDetails, DoseRecord, ProtocolWithDoses, VaccinationProtocol,
};
use crate::schedule::{shelter_day, MAX_SCHEDULE_DAYS};

/// A request to record one administered dose.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoseRegistration {
    pub animal_id: String,
    pub vaccine_id: String,
    pub details: DoseDetails,
    /// Only honored when a new protocol has to be opened
    pub cycle: Option<CycleParams>,
}

impl DoseRegistration {
    pub fn new(
        animal_id: impl Into<String>,
        vaccine_id: impl Into<String>,
        details: DoseDetails,
        cycle: Option<CycleParams>,
    ) -> Self {
        Self {
            animal_id: animal_id.into(),
            vaccine_id: vaccine_id.into(),
            details,
            cycle,
        }
    }

    fn validate(&self) -> EngineResult<()> {
        let amount = self.details.amount_paid;
        if !amount.is_finite() || amount < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "Amount paid must be a non-negative number, got {}",
                amount
            )));
        }
        if let Some(cycle) = &self.cycle {
            validate_cycle(cycle)?;
        }
        Ok(())
    }
}

/// Cycle parameters must describe a schedulable cycle.
pub(super) fn validate_cycle(cycle: &CycleParams) -> EngineResult<()> {
    if cycle.doses_required == 0 {
        return Err(EngineError::InvalidInput(
            "A cycle requires at least one dose".into(),
        ));
    }
    match cycle.interval_days {
        Some(0) => Err(EngineError::InvalidInput(
            "Dose interval must be at least one day".into(),
        )),
        Some(days) if days > MAX_SCHEDULE_DAYS => Err(EngineError::InvalidInput(format!(
            "Dose interval of {} days exceeds the {}-day maximum",
            days, MAX_SCHEDULE_DAYS
        ))),
        None if cycle.doses_required > 1 => Err(EngineError::InvalidInput(format!(
            "A {}-dose cycle needs a dose interval",
            cycle.doses_required
        ))),
        _ => Ok(()),
    }
}

impl VaccinationEngine<'_> {
    /// Record a dose for an (animal, vaccine) pair and return the governing
    /// protocol with its full dose history.
    ///
    /// Opens a protocol when the pair has none, starts a new booster cycle
    /// when the active one is complete and asks for boosters, and refuses
    /// when the active one is complete without boosters. Nothing is written
    /// unless every step succeeds.
    pub fn register_dose(&self, request: &DoseRegistration) -> EngineResult<ProtocolWithDoses> {
        request.validate()?;

        let result = self.write("register_dose", |tx| self.register_in(tx, request));
        if let Ok(registered) = &result {
            info!(
                protocol_id = %registered.protocol.id,
                status = ?registered.protocol.status,
                doses = registered.doses.len(),
                "Dose registered"
            );
        }
        result
    }

    fn register_in(
        &self,
        tx: &StoreTx<'_>,
        request: &DoseRegistration,
    ) -> EngineResult<ProtocolWithDoses> {
        let now = self.clock.now();
        let today = shelter_day(now, self.config.utc_offset);

        let animal = tx
            .find_animal(&request.animal_id)?
            .ok_or_else(|| EngineError::NotFound(format!("Animal {}", request.animal_id)))?;
        let vaccine = tx
            .find_vaccine(&request.vaccine_id)?
            .ok_or_else(|| EngineError::NotFound(format!("Vaccine {}", request.vaccine_id)))?;

        let mut protocol = match tx.find_active_protocol(&animal.id, &vaccine.id)? {
            None => open_cycle(tx, request, now)?,
            Some(active) if active.is_terminal() => {
                return Err(EngineError::InvalidState(format!(
                    "Vaccination cycle already complete for {} with {}",
                    animal.name, vaccine.name
                )));
            }
            Some(active) if active.awaits_booster_cycle() => {
                tx.archive_protocol(&active.id, now)?;
                debug!(protocol_id = %active.id, "Archived completed cycle for booster");
                open_cycle(tx, request, now)?
            }
            Some(active) => active,
        };

        tx.insert_dose(&DoseRecord::new(protocol.id.clone(), &request.details, now))?;
        let doses_applied = tx.count_doses(&protocol.id)?;

        let state = advance(&protocol, doses_applied, today)?;
        tx.update_protocol(&protocol.id, &state, now)?;
        protocol.apply(state, now);

        let doses = tx.list_doses(&protocol.id)?;
        Ok(ProtocolWithDoses { protocol, doses })
    }
}

fn open_cycle(
    tx: &StoreTx<'_>,
    request: &DoseRegistration,
    now: DateTime<Utc>,
) -> EngineResult<VaccinationProtocol> {
    let cycle = request.cycle.as_ref().ok_or_else(|| {
        EngineError::InvalidInput(
            "Cycle parameters are required to start a new protocol".into(),
        )
    })?;

    let protocol = VaccinationProtocol::new(
        request.animal_id.clone(),
        request.vaccine_id.clone(),
        cycle,
        now,
    );
    tx.create_protocol(&protocol)?;
    debug!(
        protocol_id = %protocol.id,
        doses_required = protocol.doses_required,
        "Opened protocol"
    );
    Ok(protocol)
}
