//! Row mapping for the `issues` table.

use std::collections::BTreeSet;

use sqlx::types::Json;
use sqlx::FromRow;
use urbanwatch_core::geo::GeoPoint;
use urbanwatch_core::issue::{Evidence, Issue};
use urbanwatch_core::status::{IssueStatus, StatusId};
use urbanwatch_core::types::{IssueId, Timestamp};

use crate::store::StoreError;

/// A row from the `issues` table.
#[derive(Debug, Clone, FromRow)]
pub struct IssueRow {
    pub id: IssueId,
    pub version: i64,
    pub category: String,
    pub lat: f64,
    pub lon: f64,
    pub address: Option<String>,
    pub reporters: Vec<String>,
    pub people_reported: i32,
    pub evidence: Json<Vec<Evidence>>,
    pub summary: String,
    pub criticality: i32,
    pub status_id: StatusId,
    pub admin_notes: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<IssueRow> for Issue {
    type Error = StoreError;

    fn try_from(row: IssueRow) -> Result<Self, Self::Error> {
        let category = row
            .category
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("issue {}: {e}", row.id)))?;
        let status = IssueStatus::from_id(row.status_id)
            .map_err(|e| StoreError::Corrupt(format!("issue {}: {e}", row.id)))?;
        let reporters: BTreeSet<String> = row.reporters.into_iter().collect();

        if reporters.len() != row.people_reported as usize {
            return Err(StoreError::Corrupt(format!(
                "issue {}: people_reported {} does not match {} reporters",
                row.id,
                row.people_reported,
                reporters.len()
            )));
        }

        Ok(Issue {
            id: row.id,
            version: row.version,
            category,
            location: GeoPoint::new(row.lat, row.lon),
            address: row.address,
            reporters,
            evidence: row.evidence.0,
            summary: row.summary,
            criticality: row.criticality,
            status,
            admin_notes: row.admin_notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
