//! Dose record models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Animal, Vaccine, VaccinationProtocol};

/// Details of an administered dose, as supplied by the attending vet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoseDetails {
    /// Manufacturing laboratory
    pub lab: String,
    /// Batch / lot number
    pub batch: String,
    /// Veterinarian who applied the dose
    pub attending_vet: String,
    /// Amount paid for the dose
    pub amount_paid: f64,
    /// When the dose was applied; defaults to registration time
    pub applied_at: Option<DateTime<Utc>>,
}

/// One administered dose. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoseRecord {
    pub id: String,
    pub protocol_id: String,
    pub lab: String,
    pub batch: String,
    pub attending_vet: String,
    pub amount_paid: f64,
    pub applied_at: DateTime<Utc>,
}

impl DoseRecord {
    /// Build a record for `protocol_id`, stamping `now` unless the details
    /// carry an explicit application time.
    pub fn new(protocol_id: String, details: &DoseDetails, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            protocol_id,
            lab: details.lab.clone(),
            batch: details.batch.clone(),
            attending_vet: details.attending_vet.clone(),
            amount_paid: details.amount_paid,
            applied_at: details.applied_at.unwrap_or(now),
        }
    }
}

/// A recent dose joined with its protocol and catalog entities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecentDose {
    pub dose: DoseRecord,
    pub protocol: VaccinationProtocol,
    pub animal: Animal,
    pub vaccine: Vaccine,
}
