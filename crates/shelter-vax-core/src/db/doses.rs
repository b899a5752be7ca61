//! Dose ledger operations.

use rusqlite::{params, Row};

use super::catalog::{animal_at, vaccine_at};
use super::protocols::protocol_row_at;
use super::{DbError, DbResult, StoreTx};
use crate::models::{DoseRecord, RecentDose};

const DOSE_COLUMNS: &str = "id, protocol_id, lab, batch, attending_vet, amount_paid, applied_at";

impl StoreTx<'_> {
    /// Append a dose to the ledger.
    pub fn insert_dose(&self, dose: &DoseRecord) -> DbResult<()> {
        self.conn().execute(
            r#"
            INSERT INTO dose_records (
                id, protocol_id, lab, batch, attending_vet, amount_paid, applied_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                dose.id,
                dose.protocol_id,
                dose.lab,
                dose.batch,
                dose.attending_vet,
                dose.amount_paid,
                dose.applied_at,
            ],
        )?;
        Ok(())
    }

    /// Number of doses recorded against a protocol.
    pub fn count_doses(&self, protocol_id: &str) -> DbResult<u32> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM dose_records WHERE protocol_id = ?",
            [protocol_id],
            |row| row.get(0),
        )?;
        u32::try_from(count)
            .map_err(|_| DbError::Constraint(format!("Dose count out of range: {}", count)))
    }

    /// Doses of a protocol in the order they were applied.
    pub fn list_doses(&self, protocol_id: &str) -> DbResult<Vec<DoseRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM dose_records WHERE protocol_id = ? ORDER BY applied_at, rowid",
            DOSE_COLUMNS
        ))?;
        let rows = stmt.query_map([protocol_id], dose_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Every dose ever recorded, archived protocols included.
    pub fn count_all_doses(&self) -> DbResult<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM dose_records", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// The most recently applied doses, newest first, joined with their
    /// protocol and catalog entries.
    pub fn recent_doses(&self, limit: usize) -> DbResult<Vec<RecentDose>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT
                d.id, d.protocol_id, d.lab, d.batch, d.attending_vet, d.amount_paid, d.applied_at,
                p.id, p.animal_id, p.vaccine_id, p.doses_required, p.interval_days,
                p.requires_annual_booster, p.status, p.active, p.next_dose_date,
                p.next_cycle_reminder_date, p.created_at, p.updated_at,
                a.id, a.name, a.breed, a.age_years, a.rescued_on, a.notes,
                a.created_at, a.updated_at,
                v.id, v.name, v.manufacturer, v.description, v.created_at, v.updated_at
            FROM dose_records d
            JOIN vaccination_protocols p ON p.id = d.protocol_id
            JOIN animals a ON a.id = p.animal_id
            JOIN vaccines v ON v.id = p.vaccine_id
            ORDER BY d.applied_at DESC, d.rowid DESC
            LIMIT ?
            "#,
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                dose_from_row(row)?,
                protocol_row_at(row, 7)?,
                animal_at(row, 19)?,
                vaccine_at(row, 27)?,
            ))
        })?;

        let mut recent = Vec::new();
        for row in rows {
            let (dose, protocol, animal, vaccine) = row?;
            recent.push(RecentDose {
                dose,
                protocol: protocol.try_into()?,
                animal,
                vaccine,
            });
        }
        Ok(recent)
    }
}

fn dose_from_row(row: &Row<'_>) -> rusqlite::Result<DoseRecord> {
    Ok(DoseRecord {
        id: row.get(0)?,
        protocol_id: row.get(1)?,
        lab: row.get(2)?,
        batch: row.get(3)?,
        attending_vet: row.get(4)?,
        amount_paid: row.get(5)?,
        applied_at: row.get(6)?,
    })
}
