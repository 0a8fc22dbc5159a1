//! Issue categories and their scoring weights.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Kind of physical problem an issue describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Potholes,
    TrashOverflow,
}

impl IssueCategory {
    pub const ALL: [IssueCategory; 2] = [IssueCategory::Potholes, IssueCategory::TrashOverflow];

    /// Stable wire/database name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Potholes => "potholes",
            Self::TrashOverflow => "trash_overflow",
        }
    }

    /// Multiplier applied to the mean severity hint by the criticality scorer.
    ///
    /// Road damage is weighted above overflowing bins because it is a
    /// direct traffic hazard.
    pub fn weight(self) -> f64 {
        match self {
            Self::Potholes => 1.0,
            Self::TrashOverflow => 0.9,
        }
    }

    /// Human readable noun used in generated summaries.
    pub fn label(self) -> &'static str {
        match self {
            Self::Potholes => "Pothole",
            Self::TrashOverflow => "Trash overflow",
        }
    }
}

impl Default for IssueCategory {
    /// Category used when neither the model nor the reporter supplies one.
    fn default() -> Self {
        Self::Potholes
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "potholes" => Ok(Self::Potholes),
            "trash_overflow" => Ok(Self::TrashOverflow),
            other => Err(CoreError::UnknownCategory(other.to_string())),
        }
    }
}
