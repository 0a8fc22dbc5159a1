//! Observation-to-issue resolution: spatial index, cluster resolver, the
//! issue gateway that owns every write, and the cached read service.

pub mod cells;
pub mod config;
pub mod error;
pub mod gateway;
pub mod index;
pub mod locks;
pub mod resolver;
pub mod service;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use gateway::{IngestOutcome, IssueGateway};
pub use index::{Candidate, GeoIndex};
pub use resolver::{ClusterResolver, Decision};
pub use service::IssueService;
