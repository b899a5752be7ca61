//! Vaccination protocol store operations.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row, ToSql};

use super::{DbError, DbResult, StoreTx};
use crate::models::{ProtocolState, ProtocolStatus, VaccinationProtocol};

const PROTOCOL_COLUMNS: &str = r#"
    id, animal_id, vaccine_id, doses_required, interval_days,
    requires_annual_booster, status, active, next_dose_date,
    next_cycle_reminder_date, created_at, updated_at
"#;

/// Keeps bulk updates well under SQLite's bound-parameter limit.
const BULK_CHUNK: usize = 500;

/// Selection criteria for [`StoreTx::query_protocols`].
///
/// Unset fields do not constrain. Date bounds on a column imply the column is
/// not null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtocolFilter {
    pub animal_id: Option<String>,
    pub vaccine_id: Option<String>,
    /// Any of these statuses (empty = all)
    pub statuses: Vec<ProtocolStatus>,
    pub active: Option<bool>,
    pub requires_annual_booster: Option<bool>,
    /// `next_dose_date >= from`
    pub next_dose_from: Option<NaiveDate>,
    /// `next_dose_date <= until`
    pub next_dose_until: Option<NaiveDate>,
    /// `next_dose_date < before`
    pub next_dose_before: Option<NaiveDate>,
    /// `next_cycle_reminder_date >= from`
    pub reminder_from: Option<NaiveDate>,
    /// `next_cycle_reminder_date <= until`
    pub reminder_until: Option<NaiveDate>,
}

impl ProtocolFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_animal(mut self, animal_id: impl Into<String>) -> Self {
        self.animal_id = Some(animal_id.into());
        self
    }

    pub fn for_vaccine(mut self, vaccine_id: impl Into<String>) -> Self {
        self.vaccine_id = Some(vaccine_id.into());
        self
    }

    pub fn with_status(mut self, status: ProtocolStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn only_active(mut self) -> Self {
        self.active = Some(true);
        self
    }

    pub fn booster_required(mut self, required: bool) -> Self {
        self.requires_annual_booster = Some(required);
        self
    }

    /// Inclusive window on the next dose date.
    pub fn next_dose_between(mut self, from: NaiveDate, until: NaiveDate) -> Self {
        self.next_dose_from = Some(from);
        self.next_dose_until = Some(until);
        self
    }

    pub fn next_dose_on_or_after(mut self, from: NaiveDate) -> Self {
        self.next_dose_from = Some(from);
        self
    }

    pub fn next_dose_before(mut self, before: NaiveDate) -> Self {
        self.next_dose_before = Some(before);
        self
    }

    /// Inclusive window on the booster reminder date.
    pub fn reminder_between(mut self, from: NaiveDate, until: NaiveDate) -> Self {
        self.reminder_from = Some(from);
        self.reminder_until = Some(until);
        self
    }

    /// Render as a WHERE clause (always non-empty) with its bound values.
    fn to_where_clause(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(animal_id) = &self.animal_id {
            conditions.push("animal_id = ?".into());
            values.push(Box::new(animal_id.clone()));
        }
        if let Some(vaccine_id) = &self.vaccine_id {
            conditions.push("vaccine_id = ?".into());
            values.push(Box::new(vaccine_id.clone()));
        }
        if !self.statuses.is_empty() {
            let placeholders = vec!["?"; self.statuses.len()].join(", ");
            conditions.push(format!("status IN ({})", placeholders));
            for status in &self.statuses {
                values.push(Box::new(status_to_string(status)));
            }
        }
        if let Some(active) = self.active {
            conditions.push("active = ?".into());
            values.push(Box::new(active));
        }
        if let Some(required) = self.requires_annual_booster {
            conditions.push("requires_annual_booster = ?".into());
            values.push(Box::new(required));
        }

        let date_bounds = [
            ("next_dose_date >= ?", self.next_dose_from),
            ("next_dose_date <= ?", self.next_dose_until),
            ("next_dose_date < ?", self.next_dose_before),
            ("next_cycle_reminder_date >= ?", self.reminder_from),
            ("next_cycle_reminder_date <= ?", self.reminder_until),
        ];
        for (condition, bound) in date_bounds {
            if let Some(date) = bound {
                conditions.push(condition.into());
                values.push(Box::new(date));
            }
        }

        if conditions.is_empty() {
            ("1 = 1".into(), values)
        } else {
            (conditions.join(" AND "), values)
        }
    }
}

/// Result ordering for [`StoreTx::query_protocols`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProtocolSort {
    /// Oldest protocol first
    #[default]
    CreatedAt,
    /// Earliest next dose first, undated last
    NextDoseDate,
}

impl ProtocolSort {
    fn order_by(&self) -> &'static str {
        match self {
            ProtocolSort::CreatedAt => "created_at, rowid",
            ProtocolSort::NextDoseDate => {
                "next_dose_date IS NULL, next_dose_date, created_at, rowid"
            }
        }
    }
}

impl StoreTx<'_> {
    /// The protocol currently governing registrations for the pair.
    pub fn find_active_protocol(
        &self,
        animal_id: &str,
        vaccine_id: &str,
    ) -> DbResult<Option<VaccinationProtocol>> {
        let filter = ProtocolFilter::new()
            .for_animal(animal_id)
            .for_vaccine(vaccine_id)
            .only_active();
        Ok(self.query_protocols(&filter, None, Some(1))?.pop())
    }

    /// Get a protocol by ID, active or archived.
    pub fn get_protocol(&self, id: &str) -> DbResult<Option<VaccinationProtocol>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {} FROM vaccination_protocols WHERE id = ?",
                    PROTOCOL_COLUMNS
                ),
                [id],
                protocol_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Insert a new protocol. A second active protocol for the same pair is
    /// rejected by the unique index.
    pub fn create_protocol(&self, protocol: &VaccinationProtocol) -> DbResult<()> {
        self.conn().execute(
            r#"
            INSERT INTO vaccination_protocols (
                id, animal_id, vaccine_id, doses_required, interval_days,
                requires_annual_booster, status, active, next_dose_date,
                next_cycle_reminder_date, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                protocol.id,
                protocol.animal_id,
                protocol.vaccine_id,
                protocol.doses_required,
                protocol.interval_days,
                protocol.requires_annual_booster,
                status_to_string(&protocol.status),
                protocol.active,
                protocol.next_dose_date,
                protocol.next_cycle_reminder_date,
                protocol.created_at,
                protocol.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Retire a protocol from governing its pair. Its row and doses stay.
    pub fn archive_protocol(&self, id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let rows_affected = self.conn().execute(
            "UPDATE vaccination_protocols SET active = 0, updated_at = ?2 WHERE id = ?1 AND active = 1",
            params![id, now],
        )?;
        Ok(rows_affected > 0)
    }

    /// Persist a new derived state.
    pub fn update_protocol(
        &self,
        id: &str,
        state: &ProtocolState,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows_affected = self.conn().execute(
            r#"
            UPDATE vaccination_protocols SET
                status = ?2,
                next_dose_date = ?3,
                next_cycle_reminder_date = ?4,
                updated_at = ?5
            WHERE id = ?1
            "#,
            params![
                id,
                status_to_string(&state.status),
                state.next_dose_date,
                state.next_cycle_reminder_date,
                now,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Rewrite the cycle parameters of a protocol.
    pub fn update_cycle_params(
        &self,
        id: &str,
        doses_required: u32,
        interval_days: Option<u32>,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows_affected = self.conn().execute(
            r#"
            UPDATE vaccination_protocols SET
                doses_required = ?2,
                interval_days = ?3,
                updated_at = ?4
            WHERE id = ?1
            "#,
            params![id, doses_required, interval_days, now],
        )?;
        Ok(rows_affected > 0)
    }

    /// Mark the given protocols overdue. Rows that are no longer
    /// `in_progress` are left alone. Returns the number changed.
    pub fn bulk_mark_overdue(&self, ids: &[String], now: DateTime<Utc>) -> DbResult<usize> {
        let mut changed = 0;
        for chunk in ids.chunks(BULK_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "UPDATE vaccination_protocols SET status = 'overdue', updated_at = ? \
                 WHERE status = 'in_progress' AND id IN ({})",
                placeholders
            );

            let mut values: Vec<Box<dyn ToSql>> = Vec::with_capacity(chunk.len() + 1);
            values.push(Box::new(now));
            for id in chunk {
                values.push(Box::new(id.clone()));
            }

            changed += self.conn().execute(&sql, params_from_iter(values.iter()))?;
        }
        Ok(changed)
    }

    /// Filtered, ordered protocol listing.
    pub fn query_protocols(
        &self,
        filter: &ProtocolFilter,
        sort: Option<ProtocolSort>,
        limit: Option<usize>,
    ) -> DbResult<Vec<VaccinationProtocol>> {
        let (where_clause, values) = filter.to_where_clause();
        let mut sql = format!(
            "SELECT {} FROM vaccination_protocols WHERE {} ORDER BY {}",
            PROTOCOL_COLUMNS,
            where_clause,
            sort.unwrap_or_default().order_by()
        );
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), protocol_row)?;

        let mut protocols = Vec::new();
        for row in rows {
            protocols.push(row?.try_into()?);
        }
        Ok(protocols)
    }

    /// Count protocols matching `filter`.
    pub fn count_protocols(&self, filter: &ProtocolFilter) -> DbResult<u64> {
        let (where_clause, values) = filter.to_where_clause();
        let sql = format!(
            "SELECT COUNT(*) FROM vaccination_protocols WHERE {}",
            where_clause
        );
        let count: i64 = self
            .conn()
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

/// Intermediate row struct for database mapping.
pub(super) struct ProtocolRow {
    id: String,
    animal_id: String,
    vaccine_id: String,
    doses_required: u32,
    interval_days: Option<u32>,
    requires_annual_booster: bool,
    status: String,
    active: bool,
    next_dose_date: Option<NaiveDate>,
    next_cycle_reminder_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn protocol_row(row: &Row<'_>) -> rusqlite::Result<ProtocolRow> {
    protocol_row_at(row, 0)
}

/// Read the protocol columns starting at column `at` (for joins).
pub(super) fn protocol_row_at(row: &Row<'_>, at: usize) -> rusqlite::Result<ProtocolRow> {
    Ok(ProtocolRow {
        id: row.get(at)?,
        animal_id: row.get(at + 1)?,
        vaccine_id: row.get(at + 2)?,
        doses_required: row.get(at + 3)?,
        interval_days: row.get(at + 4)?,
        requires_annual_booster: row.get(at + 5)?,
        status: row.get(at + 6)?,
        active: row.get(at + 7)?,
        next_dose_date: row.get(at + 8)?,
        next_cycle_reminder_date: row.get(at + 9)?,
        created_at: row.get(at + 10)?,
        updated_at: row.get(at + 11)?,
    })
}

impl TryFrom<ProtocolRow> for VaccinationProtocol {
    type Error = DbError;

    fn try_from(row: ProtocolRow) -> Result<Self, Self::Error> {
        let status = string_to_status(&row.status)?;

        Ok(VaccinationProtocol {
            id: row.id,
            animal_id: row.animal_id,
            vaccine_id: row.vaccine_id,
            doses_required: row.doses_required,
            interval_days: row.interval_days,
            requires_annual_booster: row.requires_annual_booster,
            status,
            active: row.active,
            next_dose_date: row.next_dose_date,
            next_cycle_reminder_date: row.next_cycle_reminder_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) fn status_to_string(status: &ProtocolStatus) -> &'static str {
    match status {
        ProtocolStatus::Pending => "pending",
        ProtocolStatus::InProgress => "in_progress",
        ProtocolStatus::Complete => "complete",
        ProtocolStatus::Overdue => "overdue",
    }
}

pub(crate) fn string_to_status(s: &str) -> Result<ProtocolStatus, DbError> {
    match s {
        "pending" => Ok(ProtocolStatus::Pending),
        "in_progress" => Ok(ProtocolStatus::InProgress),
        "complete" => Ok(ProtocolStatus::Complete),
        "overdue" => Ok(ProtocolStatus::Overdue),
        _ => Err(DbError::Constraint(format!("Unknown protocol status: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Animal, CycleParams, Vaccine};
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn setup_db() -> (Database, Animal, Vaccine) {
        let db = Database::open_in_memory().unwrap();
        let animal = Animal::new("Mingau".into());
        let vaccine = Vaccine::new("V4 Felina".into());
        db.insert_animal(&animal).unwrap();
        db.insert_vaccine(&vaccine).unwrap();
        (db, animal, vaccine)
    }

    fn new_protocol(animal: &Animal, vaccine: &Vaccine) -> VaccinationProtocol {
        VaccinationProtocol::new(
            animal.id.clone(),
            vaccine.id.clone(),
            &CycleParams::multi_dose(3, 30, true),
            now(),
        )
    }

    fn in_tx<T>(db: &Database, f: impl FnOnce(&StoreTx<'_>) -> DbResult<T>) -> T {
        db.with_transaction(f).unwrap()
    }

    #[test]
    fn test_create_and_find_active() {
        let (db, animal, vaccine) = setup_db();
        let protocol = new_protocol(&animal, &vaccine);

        in_tx(&db, |tx| tx.create_protocol(&protocol));

        let found = in_tx(&db, |tx| tx.find_active_protocol(&animal.id, &vaccine.id)).unwrap();
        assert_eq!(found, protocol);
    }

    #[test]
    fn test_second_active_protocol_is_a_conflict() {
        let (db, animal, vaccine) = setup_db();
        in_tx(&db, |tx| tx.create_protocol(&new_protocol(&animal, &vaccine)));

        let err = db
            .with_transaction(|tx| tx.create_protocol(&new_protocol(&animal, &vaccine)))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_archived_protocol_frees_the_pair() {
        let (db, animal, vaccine) = setup_db();
        let first = new_protocol(&animal, &vaccine);
        in_tx(&db, |tx| tx.create_protocol(&first));

        assert!(in_tx(&db, |tx| tx.archive_protocol(&first.id, now())));
        assert!(in_tx(&db, |tx| tx.find_active_protocol(&animal.id, &vaccine.id)).is_none());

        let second = new_protocol(&animal, &vaccine);
        in_tx(&db, |tx| tx.create_protocol(&second));

        let archived = in_tx(&db, |tx| tx.get_protocol(&first.id)).unwrap();
        assert!(!archived.active);
        let all = in_tx(&db, |tx| {
            tx.query_protocols(&ProtocolFilter::new().for_animal(&animal.id), None, None)
        });
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first.id);
    }

    #[test]
    fn test_update_protocol_state() {
        let (db, animal, vaccine) = setup_db();
        let protocol = new_protocol(&animal, &vaccine);
        in_tx(&db, |tx| tx.create_protocol(&protocol));

        let state = ProtocolState {
            status: ProtocolStatus::InProgress,
            next_dose_date: Some(date(2024, 7, 1)),
            next_cycle_reminder_date: None,
        };
        assert!(in_tx(&db, |tx| tx.update_protocol(&protocol.id, &state, now())));

        let stored = in_tx(&db, |tx| tx.get_protocol(&protocol.id)).unwrap();
        assert_eq!(stored.state(), state);
        assert!(!in_tx(&db, |tx| tx.update_protocol("missing", &state, now())));
    }

    #[test]
    fn test_complete_with_next_dose_violates_check() {
        let (db, animal, vaccine) = setup_db();
        let protocol = new_protocol(&animal, &vaccine);
        in_tx(&db, |tx| tx.create_protocol(&protocol));

        let bad = ProtocolState {
            status: ProtocolStatus::Complete,
            next_dose_date: Some(date(2024, 7, 1)),
            next_cycle_reminder_date: None,
        };
        let result = db.with_transaction(|tx| tx.update_protocol(&protocol.id, &bad, now()));
        assert!(result.is_err());
    }

    #[test]
    fn test_bulk_mark_overdue_skips_other_statuses() {
        let (db, animal, vaccine) = setup_db();
        let other_vaccine = Vaccine::new("Raiva".into());
        db.insert_vaccine(&other_vaccine).unwrap();

        let running = new_protocol(&animal, &vaccine);
        let pending = new_protocol(&animal, &other_vaccine);
        in_tx(&db, |tx| {
            tx.create_protocol(&running)?;
            tx.create_protocol(&pending)?;
            tx.update_protocol(
                &running.id,
                &ProtocolState {
                    status: ProtocolStatus::InProgress,
                    next_dose_date: Some(date(2024, 5, 1)),
                    next_cycle_reminder_date: None,
                },
                now(),
            )
        });

        let ids = vec![running.id.clone(), pending.id.clone()];
        assert_eq!(in_tx(&db, |tx| tx.bulk_mark_overdue(&ids, now())), 1);
        assert_eq!(in_tx(&db, |tx| tx.bulk_mark_overdue(&ids, now())), 0);

        let stored = in_tx(&db, |tx| tx.get_protocol(&running.id)).unwrap();
        assert_eq!(stored.status, ProtocolStatus::Overdue);
        let untouched = in_tx(&db, |tx| tx.get_protocol(&pending.id)).unwrap();
        assert_eq!(untouched.status, ProtocolStatus::Pending);
    }

    #[test]
    fn test_query_filters_and_sorts() {
        let (db, animal, vaccine) = setup_db();
        let mut protocols = Vec::new();
        for (name, due) in [("A", date(2024, 6, 20)), ("B", date(2024, 6, 5)), ("C", date(2024, 8, 1))] {
            let v = Vaccine::new(name.into());
            db.insert_vaccine(&v).unwrap();
            let p = new_protocol(&animal, &v);
            in_tx(&db, |tx| {
                tx.create_protocol(&p)?;
                tx.update_protocol(
                    &p.id,
                    &ProtocolState {
                        status: ProtocolStatus::InProgress,
                        next_dose_date: Some(due),
                        next_cycle_reminder_date: None,
                    },
                    now(),
                )
            });
            protocols.push(p);
        }
        // One protocol with no schedule at all
        in_tx(&db, |tx| tx.create_protocol(&new_protocol(&animal, &vaccine)));

        let window = ProtocolFilter::new()
            .with_status(ProtocolStatus::InProgress)
            .next_dose_between(date(2024, 6, 1), date(2024, 6, 30));
        let found = in_tx(&db, |tx| {
            tx.query_protocols(&window, Some(ProtocolSort::NextDoseDate), None)
        });
        let ids: Vec<_> = found.iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec![protocols[1].id.clone(), protocols[0].id.clone()]);

        let by_due = in_tx(&db, |tx| {
            tx.query_protocols(&ProtocolFilter::new(), Some(ProtocolSort::NextDoseDate), Some(3))
        });
        assert_eq!(by_due.len(), 3);
        assert_eq!(by_due[0].id, protocols[1].id);
        assert_eq!(by_due[2].id, protocols[2].id);

        let one_vaccine = ProtocolFilter::new().for_vaccine(&protocols[0].vaccine_id);
        let found = in_tx(&db, |tx| tx.query_protocols(&one_vaccine, None, None));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, protocols[0].id);

        let past_due = ProtocolFilter::new().next_dose_before(date(2024, 6, 20));
        assert_eq!(in_tx(&db, |tx| tx.count_protocols(&past_due)), 1);
        assert_eq!(in_tx(&db, |tx| tx.count_protocols(&ProtocolFilter::new())), 4);
    }

    #[test]
    fn test_status_strings() {
        for status in [
            ProtocolStatus::Pending,
            ProtocolStatus::InProgress,
            ProtocolStatus::Complete,
            ProtocolStatus::Overdue,
        ] {
            assert_eq!(string_to_status(status_to_string(&status)).unwrap(), status);
        }
        assert!(string_to_status("cancelled").is_err());
    }
}
