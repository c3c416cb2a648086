use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

/// Most floors a project may have.
pub const MAX_FLOORS: u32 = 200;

/// Free-form key/value annotations on a pin. Keys compare exactly.
pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_floors")]
    pub floors: u32,
}

fn default_floors() -> u32 {
    1
}

impl Project {
    /// Floor numbers shown for the project, starting at 1. Rows written
    /// elsewhere are cut off at [`MAX_FLOORS`].
    pub fn floor_numbers(&self) -> std::ops::RangeInclusive<u32> {
        1..=self.floors.min(MAX_FLOORS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub project_id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub id: String,
    pub image_id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// Decode a record returned by the record store.
pub fn from_record<T: DeserializeOwned>(record: Value) -> AppResult<T> {
    serde_json::from_value(record)
        .map_err(|e| AppError::Internal(format!("Unexpected record shape: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn project_without_description_or_floors_uses_defaults() {
        let project: Project = serde_json::from_value(json!({
            "id": "p1",
            "name": "Lakeview Remodel",
            "description": null,
            "created_at": "2024-05-01T10:00:00.123456+00:00",
        }))
        .unwrap();
        assert_eq!(project.description, None);
        assert_eq!(project.floors, 1);
        assert!(project.user_id.is_none());
    }

    #[test]
    fn floor_numbers_count_from_one() {
        let project: Project = serde_json::from_value(json!({
            "id": "p1",
            "name": "Lakeview Remodel",
            "created_at": "2024-05-01T10:00:00Z",
            "floors": 3,
        }))
        .unwrap();
        assert_eq!(project.floor_numbers().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn floor_numbers_stop_at_the_maximum() {
        let project: Project = from_record(json!({
            "id": "p1",
            "name": "Tower",
            "created_at": "2024-01-01T00:00:00Z",
            "floors": 4_000_000_000u32,
        }))
        .unwrap();
        assert_eq!(project.floor_numbers().count(), MAX_FLOORS as usize);
        assert_eq!(project.floor_numbers().last(), Some(MAX_FLOORS));
    }

    #[test]
    fn pin_metadata_reads_from_json_object() {
        let pin: Pin = serde_json::from_value(json!({
            "id": "pin1",
            "image_id": "img1",
            "x": 0.25,
            "y": 0.75,
            "metadata": { "material": "oak", "color": "beige" },
            "created_at": "2024-05-01T10:00:00Z",
        }))
        .unwrap();
        assert_eq!(pin.metadata.get("material").map(String::as_str), Some("oak"));
        assert_eq!(pin.metadata.len(), 2);
    }
}
