//! Urban Watch domain logic.
//!
//! Pure types and functions shared by every other crate: coordinates and
//! distance, categories, the issue lifecycle, observation validation, the
//! issue aggregate, and criticality scoring. No I/O lives here.

pub mod category;
pub mod classification;
pub mod error;
pub mod geo;
pub mod issue;
pub mod observation;
pub mod scoring;
pub mod status;
pub mod summary;
pub mod types;
