//! Shelter-Vax Core Library
//!
//! Vaccination protocol engine for animal shelters: dose registration,
//! multi-dose cycle tracking, booster reminders and overdue detection.
//!
//! # Architecture
//!
//! ```text
//!   registerDose ──▶ [ one store transaction ]
//!                      │  find / open / archive protocol
//!                      │  append dose record
//!                      │  advance state machine
//!                      ▼
//!              vaccination_protocols ◀── daily overdue sweep
//!                      │
//!      ┌───────────────┼───────────────┬───────────────┐
//!      ▼               ▼               ▼               ▼
//!   History         Alerts         Upcoming          KPIs
//! ```
//!
//! # Core Principle
//!
//! **The dose ledger drives everything.** A protocol's status and dates are
//! always recomputed from its dose count; nothing is cached between calls.
//!
//! # Modules
//!
//! - [`db`]: SQLite store with explicit transaction handles
//! - [`models`]: Domain types (Animal, Vaccine, VaccinationProtocol, DoseRecord)
//! - [`schedule`]: Clock abstraction and shelter-day date arithmetic
//! - [`engine`]: State machine, registration, sweep, queries and admin edits
//! - [`config`]: TOML configuration
//! - [`logging`]: tracing subscriber setup

pub mod config;
pub mod db;
pub mod engine;
pub mod logging;
pub mod models;
pub mod schedule;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use db::{Database, DbError, ProtocolFilter, ProtocolSort, StoreTx};
pub use engine::{
    DoseRegistration, EngineConfig, EngineError, EngineResult, OverdueSweeper,
    ProtocolParamsUpdate, SweeperHandle, VaccinationEngine,
};
pub use models::{
    Animal, CycleParams, DoseDetails, DoseRecord, ProtocolDetail, ProtocolState, ProtocolStatus,
    ProtocolWithDoses, RecentDose, VaccinationKpis, VaccinationProtocol, Vaccine,
};
pub use schedule::{Clock, FixedClock, SystemClock};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use chrono::{DateTime, NaiveDate, Utc};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

/// How often a bounded call re-checks a busy connection.
const LOCK_POLL: Duration = Duration::from_millis(5);

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum ShelterVaxError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Concurrency conflict: {0}")]
    Conflict(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<DbError> for ShelterVaxError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => ShelterVaxError::NotFound(what),
            other => ShelterVaxError::DatabaseError(other.to_string()),
        }
    }
}

impl From<EngineError> for ShelterVaxError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(msg) => ShelterVaxError::NotFound(msg),
            EngineError::InvalidState(msg) => ShelterVaxError::InvalidState(msg),
            EngineError::InvalidInput(msg) => ShelterVaxError::InvalidInput(msg),
            EngineError::ConcurrencyConflict(msg) => ShelterVaxError::Conflict(msg),
            EngineError::Timeout(after) => ShelterVaxError::Timeout(format!("after {:?}", after)),
            EngineError::Store(err) => err.into(),
        }
    }
}

impl From<ConfigError> for ShelterVaxError {
    fn from(e: ConfigError) -> Self {
        ShelterVaxError::ConfigError(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for ShelterVaxError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        ShelterVaxError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path with default settings.
#[uniffi::export]
pub fn open_database(path: String) -> Result<Arc<ShelterVaxCore>, ShelterVaxError> {
    let db = Database::open(&path)?;
    Ok(ShelterVaxCore::wrap(db, EngineConfig::default()))
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<ShelterVaxCore>, ShelterVaxError> {
    let db = Database::open_in_memory()?;
    Ok(ShelterVaxCore::wrap(db, EngineConfig::default()))
}

/// Open the database named by a config file, or by the default config.
#[uniffi::export]
pub fn open_from_config(config_path: Option<String>) -> Result<Arc<ShelterVaxCore>, ShelterVaxError> {
    let config = match config_path {
        Some(path) => Config::load_from(std::path::Path::new(&path))?,
        None => Config::load()?,
    };
    let engine_config = config.engine_config()?;
    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ShelterVaxError::ConfigError(e.to_string()))?;
    }
    let db = Database::open_with_timeout(&config.database.path, config.busy_timeout())?;
    Ok(ShelterVaxCore::wrap(db, engine_config))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe engine wrapper for FFI.
#[derive(uniffi::Object)]
pub struct ShelterVaxCore {
    db: Arc<Mutex<Database>>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl ShelterVaxCore {
    fn wrap(db: Database, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            db: Arc::new(Mutex::new(db)),
            clock: Arc::new(SystemClock),
            config,
        })
    }

    fn engine<'a>(&'a self, db: &'a Database) -> VaccinationEngine<'a> {
        VaccinationEngine::new(db, self.clock.as_ref()).with_config(self.config.clone())
    }

    /// Take the connection, waiting at most `timeout_ms` when one is given.
    /// Returns the guard and what is left of the budget for the engine call.
    fn lock_within(
        &self,
        timeout_ms: Option<u64>,
    ) -> Result<(MutexGuard<'_, Database>, Option<Duration>), ShelterVaxError> {
        let Some(budget) = timeout_ms.map(Duration::from_millis) else {
            return Ok((self.db.lock()?, None));
        };

        let deadline = Instant::now() + budget;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.db.try_lock() {
                Ok(guard) => return Ok((guard, Some(remaining))),
                Err(TryLockError::Poisoned(err)) => return Err(err.into()),
                Err(TryLockError::WouldBlock) if remaining.is_zero() => {
                    return Err(ShelterVaxError::Timeout(format!(
                        "after {:?} waiting for the database",
                        budget
                    )));
                }
                Err(TryLockError::WouldBlock) => std::thread::sleep(remaining.min(LOCK_POLL)),
            }
        }
    }
}

#[uniffi::export]
impl ShelterVaxCore {
    // =========================================================================
    // Catalog Operations
    // =========================================================================

    /// Register a new animal.
    pub fn create_animal(&self, name: String) -> Result<FfiAnimal, ShelterVaxError> {
        let db = self.db.lock()?;
        let animal = Animal::new(name);
        db.insert_animal(&animal)?;
        Ok(animal.into())
    }

    /// Update an animal's details.
    pub fn update_animal(&self, animal: FfiAnimal) -> Result<(), ShelterVaxError> {
        let db = self.db.lock()?;
        let animal = Animal::try_from(animal)?;
        if !db.update_animal(&animal)? {
            return Err(ShelterVaxError::NotFound(format!("Animal {}", animal.id)));
        }
        Ok(())
    }

    /// Get an animal by ID.
    pub fn get_animal(&self, id: String) -> Result<Option<FfiAnimal>, ShelterVaxError> {
        let db = self.db.lock()?;
        Ok(db.get_animal(&id)?.map(|a| a.into()))
    }

    /// All animals by name.
    pub fn list_animals(&self) -> Result<Vec<FfiAnimal>, ShelterVaxError> {
        let db = self.db.lock()?;
        Ok(db.list_animals()?.into_iter().map(|a| a.into()).collect())
    }

    /// Search animals by name prefix.
    pub fn search_animals(&self, query: String, limit: u32) -> Result<Vec<FfiAnimal>, ShelterVaxError> {
        let db = self.db.lock()?;
        let animals = db.search_animals(&query, limit as usize)?;
        Ok(animals.into_iter().map(|a| a.into()).collect())
    }

    /// Delete an animal that has no vaccination history.
    pub fn delete_animal(&self, id: String) -> Result<bool, ShelterVaxError> {
        let db = self.db.lock()?;
        Ok(db.delete_animal(&id)?)
    }

    /// Register a new vaccine.
    pub fn create_vaccine(&self, name: String) -> Result<FfiVaccine, ShelterVaxError> {
        let db = self.db.lock()?;
        let vaccine = Vaccine::new(name);
        db.insert_vaccine(&vaccine)?;
        Ok(vaccine.into())
    }

    /// Update a vaccine's details.
    pub fn update_vaccine(&self, vaccine: FfiVaccine) -> Result<(), ShelterVaxError> {
        let db = self.db.lock()?;
        let vaccine = Vaccine::try_from(vaccine)?;
        if !db.update_vaccine(&vaccine)? {
            return Err(ShelterVaxError::NotFound(format!("Vaccine {}", vaccine.id)));
        }
        Ok(())
    }

    /// Get a vaccine by ID.
    pub fn get_vaccine(&self, id: String) -> Result<Option<FfiVaccine>, ShelterVaxError> {
        let db = self.db.lock()?;
        Ok(db.get_vaccine(&id)?.map(|v| v.into()))
    }

    /// All vaccines by name.
    pub fn list_vaccines(&self) -> Result<Vec<FfiVaccine>, ShelterVaxError> {
        let db = self.db.lock()?;
        Ok(db.list_vaccines()?.into_iter().map(|v| v.into()).collect())
    }

    // =========================================================================
    // Dose Registration
    // =========================================================================

    /// Record a dose and return the governing protocol with its doses.
    pub fn register_dose(
        &self,
        request: FfiDoseRegistration,
    ) -> Result<FfiProtocolWithDoses, ShelterVaxError> {
        let timeout_ms = request.timeout_ms;
        let registration = DoseRegistration::try_from(request)?;

        let (db, remaining) = self.lock_within(timeout_ms)?;
        let result = self
            .engine(&db)
            .with_timeout(remaining)
            .register_dose(&registration)?;
        Ok(result.into())
    }

    // =========================================================================
    // Queries
    //
    // `timeout_ms` bounds both the wait for the connection and the read.
    // =========================================================================

    /// Every protocol of an animal, archived cycles included.
    pub fn history_for_animal(
        &self,
        animal_id: String,
        timeout_ms: Option<u64>,
    ) -> Result<Vec<FfiProtocolDetail>, ShelterVaxError> {
        let (db, remaining) = self.lock_within(timeout_ms)?;
        let history = self
            .engine(&db)
            .with_timeout(remaining)
            .history_for_animal(&animal_id)?;
        Ok(history.into_iter().map(|d| d.into()).collect())
    }

    /// Overdue protocols and doses due within the alert window.
    pub fn alerts(&self, timeout_ms: Option<u64>) -> Result<Vec<FfiProtocolDetail>, ShelterVaxError> {
        let (db, remaining) = self.lock_within(timeout_ms)?;
        let engine = self.engine(&db).with_timeout(remaining);
        let alerts = engine.alerts(engine.today())?;
        Ok(alerts.into_iter().map(|d| d.into()).collect())
    }

    /// Next doses and booster reminders in the upcoming window.
    pub fn upcoming_schedule(
        &self,
        timeout_ms: Option<u64>,
    ) -> Result<Vec<FfiProtocolDetail>, ShelterVaxError> {
        let (db, remaining) = self.lock_within(timeout_ms)?;
        let engine = self.engine(&db).with_timeout(remaining);
        let upcoming = engine.upcoming_schedule(engine.today())?;
        Ok(upcoming.into_iter().map(|d| d.into()).collect())
    }

    /// Dashboard counters for today.
    pub fn kpis(&self, timeout_ms: Option<u64>) -> Result<FfiKpis, ShelterVaxError> {
        let (db, remaining) = self.lock_within(timeout_ms)?;
        let engine = self.engine(&db).with_timeout(remaining);
        Ok(engine.kpis(engine.today())?.into())
    }

    /// Most recently applied doses.
    pub fn recent_doses(
        &self,
        limit: Option<u32>,
        timeout_ms: Option<u64>,
    ) -> Result<Vec<FfiRecentDose>, ShelterVaxError> {
        let (db, remaining) = self.lock_within(timeout_ms)?;
        let recent = self
            .engine(&db)
            .with_timeout(remaining)
            .recent_doses(limit.map(|l| l as usize))?;
        Ok(recent.into_iter().map(|r| r.into()).collect())
    }

    // =========================================================================
    // Sweep & Administrative Edits
    // =========================================================================

    /// Run the overdue sweep now; returns how many protocols changed.
    pub fn sweep_overdue(&self) -> Result<u32, ShelterVaxError> {
        let db = self.db.lock()?;
        let engine = self.engine(&db);
        let count = engine.sweep_overdue(engine.today())?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Correct the dose count or interval of a running protocol.
    pub fn update_protocol_params(
        &self,
        protocol_id: String,
        doses_required: Option<u32>,
        interval_days: Option<u32>,
    ) -> Result<FfiProtocolWithDoses, ShelterVaxError> {
        let db = self.db.lock()?;
        let update = ProtocolParamsUpdate {
            doses_required,
            interval_days,
        };
        Ok(self.engine(&db).update_protocol_params(&protocol_id, update)?.into())
    }

    /// Force a protocol into a status.
    pub fn set_protocol_status(
        &self,
        protocol_id: String,
        status: FfiProtocolStatus,
    ) -> Result<FfiProtocolWithDoses, ShelterVaxError> {
        let db = self.db.lock()?;
        Ok(self
            .engine(&db)
            .set_protocol_status(&protocol_id, status.into())?
            .into())
    }
}

// =========================================================================
// FFI Types
// =========================================================================

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, ShelterVaxError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| ShelterVaxError::InvalidInput(format!("{} {:?}: {}", field, value, e)))
}

fn parse_instant(field: &str, value: &str) -> Result<DateTime<Utc>, ShelterVaxError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ShelterVaxError::InvalidInput(format!("{} {:?}: {}", field, value, e)))
}

/// FFI-safe protocol status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiProtocolStatus {
    Pending,
    InProgress,
    Complete,
    Overdue,
}

impl From<ProtocolStatus> for FfiProtocolStatus {
    fn from(status: ProtocolStatus) -> Self {
        match status {
            ProtocolStatus::Pending => FfiProtocolStatus::Pending,
            ProtocolStatus::InProgress => FfiProtocolStatus::InProgress,
            ProtocolStatus::Complete => FfiProtocolStatus::Complete,
            ProtocolStatus::Overdue => FfiProtocolStatus::Overdue,
        }
    }
}

impl From<FfiProtocolStatus> for ProtocolStatus {
    fn from(status: FfiProtocolStatus) -> Self {
        match status {
            FfiProtocolStatus::Pending => ProtocolStatus::Pending,
            FfiProtocolStatus::InProgress => ProtocolStatus::InProgress,
            FfiProtocolStatus::Complete => ProtocolStatus::Complete,
            FfiProtocolStatus::Overdue => ProtocolStatus::Overdue,
        }
    }
}

/// FFI-safe animal.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAnimal {
    pub id: String,
    pub name: String,
    pub breed: Option<String>,
    pub age_years: Option<u32>,
    /// YYYY-MM-DD
    pub rescued_on: Option<String>,
    pub notes: Option<String>,
    /// RFC 3339
    pub created_at: String,
    pub updated_at: String,
}

impl From<Animal> for FfiAnimal {
    fn from(animal: Animal) -> Self {
        Self {
            id: animal.id,
            name: animal.name,
            breed: animal.breed,
            age_years: animal.age_years,
            rescued_on: animal.rescued_on.map(format_date),
            notes: animal.notes,
            created_at: animal.created_at.to_rfc3339(),
            updated_at: animal.updated_at.to_rfc3339(),
        }
    }
}

impl TryFrom<FfiAnimal> for Animal {
    type Error = ShelterVaxError;

    fn try_from(animal: FfiAnimal) -> Result<Self, Self::Error> {
        Ok(Animal {
            rescued_on: animal
                .rescued_on
                .as_deref()
                .map(|d| parse_date("rescued_on", d))
                .transpose()?,
            created_at: parse_instant("created_at", &animal.created_at)?,
            updated_at: parse_instant("updated_at", &animal.updated_at)?,
            id: animal.id,
            name: animal.name,
            breed: animal.breed,
            age_years: animal.age_years,
            notes: animal.notes,
        })
    }
}

/// FFI-safe vaccine.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiVaccine {
    pub id: String,
    pub name: String,
    pub manufacturer: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Vaccine> for FfiVaccine {
    fn from(vaccine: Vaccine) -> Self {
        Self {
            id: vaccine.id,
            name: vaccine.name,
            manufacturer: vaccine.manufacturer,
            description: vaccine.description,
            created_at: vaccine.created_at.to_rfc3339(),
            updated_at: vaccine.updated_at.to_rfc3339(),
        }
    }
}

impl TryFrom<FfiVaccine> for Vaccine {
    type Error = ShelterVaxError;

    fn try_from(vaccine: FfiVaccine) -> Result<Self, Self::Error> {
        Ok(Vaccine {
            created_at: parse_instant("created_at", &vaccine.created_at)?,
            updated_at: parse_instant("updated_at", &vaccine.updated_at)?,
            id: vaccine.id,
            name: vaccine.name,
            manufacturer: vaccine.manufacturer,
            description: vaccine.description,
        })
    }
}

/// FFI-safe vaccination protocol.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiProtocol {
    pub id: String,
    pub animal_id: String,
    pub vaccine_id: String,
    pub doses_required: u32,
    pub interval_days: Option<u32>,
    pub requires_annual_booster: bool,
    pub status: FfiProtocolStatus,
    pub active: bool,
    pub next_dose_date: Option<String>,
    pub next_cycle_reminder_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<VaccinationProtocol> for FfiProtocol {
    fn from(protocol: VaccinationProtocol) -> Self {
        Self {
            id: protocol.id,
            animal_id: protocol.animal_id,
            vaccine_id: protocol.vaccine_id,
            doses_required: protocol.doses_required,
            interval_days: protocol.interval_days,
            requires_annual_booster: protocol.requires_annual_booster,
            status: protocol.status.into(),
            active: protocol.active,
            next_dose_date: protocol.next_dose_date.map(format_date),
            next_cycle_reminder_date: protocol.next_cycle_reminder_date.map(format_date),
            created_at: protocol.created_at.to_rfc3339(),
            updated_at: protocol.updated_at.to_rfc3339(),
        }
    }
}

/// FFI-safe dose record.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDose {
    pub id: String,
    pub protocol_id: String,
    pub lab: String,
    pub batch: String,
    pub attending_vet: String,
    pub amount_paid: f64,
    pub applied_at: String,
}

impl From<DoseRecord> for FfiDose {
    fn from(dose: DoseRecord) -> Self {
        Self {
            id: dose.id,
            protocol_id: dose.protocol_id,
            lab: dose.lab,
            batch: dose.batch,
            attending_vet: dose.attending_vet,
            amount_paid: dose.amount_paid,
            applied_at: dose.applied_at.to_rfc3339(),
        }
    }
}

/// FFI-safe registration request. The cycle fields only matter when a new
/// protocol is opened; leave `doses_required` unset to continue an existing
/// one.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDoseRegistration {
    pub animal_id: String,
    pub vaccine_id: String,
    pub lab: String,
    pub batch: String,
    pub attending_vet: String,
    pub amount_paid: f64,
    /// RFC 3339; defaults to now
    pub applied_at: Option<String>,
    pub doses_required: Option<u32>,
    pub interval_days: Option<u32>,
    pub requires_annual_booster: bool,
    pub timeout_ms: Option<u64>,
}

impl TryFrom<FfiDoseRegistration> for DoseRegistration {
    type Error = ShelterVaxError;

    fn try_from(request: FfiDoseRegistration) -> Result<Self, Self::Error> {
        let applied_at = request
            .applied_at
            .as_deref()
            .map(|at| parse_instant("applied_at", at))
            .transpose()?;
        let cycle = request.doses_required.map(|doses_required| CycleParams {
            doses_required,
            interval_days: request.interval_days,
            requires_annual_booster: request.requires_annual_booster,
        });

        Ok(DoseRegistration::new(
            request.animal_id,
            request.vaccine_id,
            DoseDetails {
                lab: request.lab,
                batch: request.batch,
                attending_vet: request.attending_vet,
                amount_paid: request.amount_paid,
                applied_at,
            },
            cycle,
        ))
    }
}

/// FFI-safe protocol with its doses.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiProtocolWithDoses {
    pub protocol: FfiProtocol,
    pub doses: Vec<FfiDose>,
}

impl From<ProtocolWithDoses> for FfiProtocolWithDoses {
    fn from(value: ProtocolWithDoses) -> Self {
        Self {
            protocol: value.protocol.into(),
            doses: value.doses.into_iter().map(|d| d.into()).collect(),
        }
    }
}

/// FFI-safe protocol with catalog context.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiProtocolDetail {
    pub protocol: FfiProtocol,
    pub animal: FfiAnimal,
    pub vaccine: FfiVaccine,
    pub doses: Vec<FfiDose>,
}

impl From<ProtocolDetail> for FfiProtocolDetail {
    fn from(detail: ProtocolDetail) -> Self {
        Self {
            protocol: detail.protocol.into(),
            animal: detail.animal.into(),
            vaccine: detail.vaccine.into(),
            doses: detail.doses.into_iter().map(|d| d.into()).collect(),
        }
    }
}

/// FFI-safe recent dose.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRecentDose {
    pub dose: FfiDose,
    pub protocol: FfiProtocol,
    pub animal: FfiAnimal,
    pub vaccine: FfiVaccine,
}

impl From<RecentDose> for FfiRecentDose {
    fn from(recent: RecentDose) -> Self {
        Self {
            dose: recent.dose.into(),
            protocol: recent.protocol.into(),
            animal: recent.animal.into(),
            vaccine: recent.vaccine.into(),
        }
    }
}

/// FFI-safe dashboard counters.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiKpis {
    pub doses_applied: u64,
    pub scheduled: u64,
    pub overdue: u64,
    pub completed: u64,
}

impl From<VaccinationKpis> for FfiKpis {
    fn from(kpis: VaccinationKpis) -> Self {
        Self {
            doses_applied: kpis.doses_applied,
            scheduled: kpis.scheduled,
            overdue: kpis.overdue,
            completed: kpis.completed,
        }
    }
}
