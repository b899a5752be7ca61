//! Animal and vaccine catalog operations.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbResult, StoreTx};
use crate::models::{Animal, Vaccine};

const ANIMAL_COLUMNS: &str =
    "id, name, breed, age_years, rescued_on, notes, created_at, updated_at";

const VACCINE_COLUMNS: &str = "id, name, manufacturer, description, created_at, updated_at";

impl Database {
    /// Insert a new animal.
    pub fn insert_animal(&self, animal: &Animal) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO animals (
                id, name, breed, age_years, rescued_on, notes, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                animal.id,
                animal.name,
                animal.breed,
                animal.age_years,
                animal.rescued_on,
                animal.notes,
                animal.created_at,
                animal.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Update an existing animal.
    pub fn update_animal(&self, animal: &Animal) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE animals SET
                name = ?2,
                breed = ?3,
                age_years = ?4,
                rescued_on = ?5,
                notes = ?6,
                updated_at = ?7
            WHERE id = ?1
            "#,
            params![
                animal.id,
                animal.name,
                animal.breed,
                animal.age_years,
                animal.rescued_on,
                animal.notes,
                chrono::Utc::now(),
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get an animal by ID.
    pub fn get_animal(&self, id: &str) -> DbResult<Option<Animal>> {
        select_animal(&self.conn, id)
    }

    /// List all animals by name.
    pub fn list_animals(&self) -> DbResult<Vec<Animal>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM animals ORDER BY name",
            ANIMAL_COLUMNS
        ))?;
        let rows = stmt.query_map([], animal_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Search animals by name (prefix match).
    pub fn search_animals(&self, query: &str, limit: usize) -> DbResult<Vec<Animal>> {
        let pattern = format!("{}%", query);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM animals WHERE name LIKE ? ORDER BY name LIMIT ?",
            ANIMAL_COLUMNS
        ))?;
        let rows = stmt.query_map(params![pattern, limit as i64], animal_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Delete an animal. Fails while protocols still reference it.
    pub fn delete_animal(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute("DELETE FROM animals WHERE id = ?", [id])?;
        Ok(rows_affected > 0)
    }

    /// Insert a new vaccine.
    pub fn insert_vaccine(&self, vaccine: &Vaccine) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO vaccines (
                id, name, manufacturer, description, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                vaccine.id,
                vaccine.name,
                vaccine.manufacturer,
                vaccine.description,
                vaccine.created_at,
                vaccine.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Update an existing vaccine.
    pub fn update_vaccine(&self, vaccine: &Vaccine) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE vaccines SET
                name = ?2,
                manufacturer = ?3,
                description = ?4,
                updated_at = ?5
            WHERE id = ?1
            "#,
            params![
                vaccine.id,
                vaccine.name,
                vaccine.manufacturer,
                vaccine.description,
                chrono::Utc::now(),
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a vaccine by ID.
    pub fn get_vaccine(&self, id: &str) -> DbResult<Option<Vaccine>> {
        select_vaccine(&self.conn, id)
    }

    /// List all vaccines by name.
    pub fn list_vaccines(&self) -> DbResult<Vec<Vaccine>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM vaccines ORDER BY name",
            VACCINE_COLUMNS
        ))?;
        let rows = stmt.query_map([], vaccine_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

impl StoreTx<'_> {
    /// Catalog lookup inside the transaction.
    pub fn find_animal(&self, id: &str) -> DbResult<Option<Animal>> {
        select_animal(self.conn(), id)
    }

    /// Catalog lookup inside the transaction.
    pub fn find_vaccine(&self, id: &str) -> DbResult<Option<Vaccine>> {
        select_vaccine(self.conn(), id)
    }
}

fn select_animal(conn: &Connection, id: &str) -> DbResult<Option<Animal>> {
    conn.query_row(
        &format!("SELECT {} FROM animals WHERE id = ?", ANIMAL_COLUMNS),
        [id],
        animal_from_row,
    )
    .optional()
    .map_err(Into::into)
}

fn select_vaccine(conn: &Connection, id: &str) -> DbResult<Option<Vaccine>> {
    conn.query_row(
        &format!("SELECT {} FROM vaccines WHERE id = ?", VACCINE_COLUMNS),
        [id],
        vaccine_from_row,
    )
    .optional()
    .map_err(Into::into)
}

fn animal_from_row(row: &Row<'_>) -> rusqlite::Result<Animal> {
    animal_at(row, 0)
}

fn vaccine_from_row(row: &Row<'_>) -> rusqlite::Result<Vaccine> {
    vaccine_at(row, 0)
}

/// Read the animal columns starting at column `at` (for joins).
pub(super) fn animal_at(row: &Row<'_>, at: usize) -> rusqlite::Result<Animal> {
    Ok(Animal {
        id: row.get(at)?,
        name: row.get(at + 1)?,
        breed: row.get(at + 2)?,
        age_years: row.get(at + 3)?,
        rescued_on: row.get(at + 4)?,
        notes: row.get(at + 5)?,
        created_at: row.get(at + 6)?,
        updated_at: row.get(at + 7)?,
    })
}

/// Read the vaccine columns starting at column `at` (for joins).
pub(super) fn vaccine_at(row: &Row<'_>, at: usize) -> rusqlite::Result<Vaccine> {
    Ok(Vaccine {
        id: row.get(at)?,
        name: row.get(at + 1)?,
        manufacturer: row.get(at + 2)?,
        description: row.get(at + 3)?,
        created_at: row.get(at + 4)?,
        updated_at: row.get(at + 5)?,
    })
}
