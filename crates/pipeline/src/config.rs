use urbanwatch_core::classification::DEFAULT_MIN_MERGE_CONFIDENCE;

pub const DEFAULT_CLUSTER_RADIUS_METERS: f64 = 50.0;
pub const DEFAULT_CAS_RETRIES: u32 = 8;

/// Matching and write-contention policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    /// Observations within this distance of an open issue's centroid
    /// (inclusive) are candidates for merging into it.
    pub radius_meters: f64,
    /// Model confidence needed for the model's category to be used for matching.
    pub min_merge_confidence: f64,
    /// Compare-and-swap attempts inside one gateway call.
    pub cas_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            radius_meters: DEFAULT_CLUSTER_RADIUS_METERS,
            min_merge_confidence: DEFAULT_MIN_MERGE_CONFIDENCE,
            cas_retries: DEFAULT_CAS_RETRIES,
        }
    }
}
