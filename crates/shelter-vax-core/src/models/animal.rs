//! Shelter animal catalog models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// An animal housed by the shelter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Animal {
    /// Unique ID (UUID v4)
    pub id: String,
    /// Animal name
    pub name: String,
    /// Breed, if known
    pub breed: Option<String>,
    /// Estimated age in years
    pub age_years: Option<u32>,
    /// Date the animal was rescued
    pub rescued_on: Option<NaiveDate>,
    /// Free-form notes (isolation, known conditions)
    pub notes: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Animal {
    /// Create a new animal with required fields.
    pub fn new(name: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            breed: None,
            age_years: None,
            rescued_on: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_animal() {
        let animal = Animal::new("Mingau".into());
        assert_eq!(animal.name, "Mingau");
        assert_eq!(animal.id.len(), 36); // UUID format
        assert!(animal.breed.is_none());
        assert_eq!(animal.created_at, animal.updated_at);
    }
}
