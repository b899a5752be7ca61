//! SQLite schema definition.

/// Complete database schema for shelter-vax.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Catalog
-- ============================================================================

CREATE TABLE IF NOT EXISTS animals (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    breed TEXT,
    age_years INTEGER CHECK (age_years IS NULL OR age_years >= 0),
    rescued_on TEXT,                              -- YYYY-MM-DD
    notes TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_animals_name ON animals(name);

CREATE TABLE IF NOT EXISTS vaccines (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    manufacturer TEXT,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- ============================================================================
-- Vaccination Protocols
-- ============================================================================

CREATE TABLE IF NOT EXISTS vaccination_protocols (
    id TEXT PRIMARY KEY,
    animal_id TEXT NOT NULL REFERENCES animals(id),
    vaccine_id TEXT NOT NULL REFERENCES vaccines(id),
    doses_required INTEGER NOT NULL CHECK (doses_required >= 1),
    interval_days INTEGER CHECK (interval_days IS NULL OR interval_days >= 1),
    requires_annual_booster INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'in_progress', 'complete', 'overdue')),
    active INTEGER NOT NULL DEFAULT 1,
    next_dose_date TEXT,                          -- YYYY-MM-DD
    next_cycle_reminder_date TEXT,                -- YYYY-MM-DD
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (status <> 'complete' OR next_dose_date IS NULL)
);

-- One governing protocol per (animal, vaccine); archived rows are exempt
CREATE UNIQUE INDEX IF NOT EXISTS idx_protocols_active_pair
    ON vaccination_protocols(animal_id, vaccine_id) WHERE active = 1;

-- Sweep, alert and KPI scans
CREATE INDEX IF NOT EXISTS idx_protocols_status_due
    ON vaccination_protocols(status, next_dose_date);

CREATE INDEX IF NOT EXISTS idx_protocols_status_reminder
    ON vaccination_protocols(status, next_cycle_reminder_date);

CREATE INDEX IF NOT EXISTS idx_protocols_animal
    ON vaccination_protocols(animal_id, created_at);

-- ============================================================================
-- Dose Records (append-only ledger)
-- ============================================================================

CREATE TABLE IF NOT EXISTS dose_records (
    id TEXT PRIMARY KEY,
    protocol_id TEXT NOT NULL REFERENCES vaccination_protocols(id),
    lab TEXT NOT NULL,
    batch TEXT NOT NULL,
    attending_vet TEXT NOT NULL,
    amount_paid REAL NOT NULL CHECK (amount_paid >= 0),
    applied_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_doses_protocol
    ON dose_records(protocol_id, applied_at);

CREATE INDEX IF NOT EXISTS idx_doses_applied_at
    ON dose_records(applied_at);

CREATE TRIGGER IF NOT EXISTS dose_records_no_update BEFORE UPDATE ON dose_records BEGIN
    SELECT RAISE(ABORT, 'dose records are immutable');
END;

CREATE TRIGGER IF NOT EXISTS dose_records_no_delete BEFORE DELETE ON dose_records BEGIN
    SELECT RAISE(ABORT, 'dose records are immutable');
END;
"#;
