//! Vaccine catalog models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A vaccine product the shelter administers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vaccine {
    /// Unique ID (UUID v4)
    pub id: String,
    /// Commercial name (e.g., "V4 Felina")
    pub name: String,
    /// Manufacturer
    pub manufacturer: Option<String>,
    /// What the vaccine protects against
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Vaccine {
    /// Create a new vaccine with required fields.
    pub fn new(name: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            manufacturer: None,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}
