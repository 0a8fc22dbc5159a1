//! Worker configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use urbanwatch_pipeline::PipelineConfig;

use crate::retry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{0} is required")]
    Missing(&'static str),
}

/// Which classifier implementation to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierMode {
    /// External model service at `url`.
    Http { url: String },
    /// No model; reporter hint or default category.
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    pub mode: ClassifierMode,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Calls before falling back.
    pub attempts: u32,
}

/// Everything the worker binary needs.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    pub classifier: ClassifierConfig,
    pub pipeline: PipelineConfig,
    /// Postgres when set, in-memory store otherwise.
    pub database_url: Option<String>,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default    |
    /// |--------------------------|------------|
    /// | `WORKER_CONCURRENCY`     | `4`        |
    /// | `QUEUE_CAPACITY`         | `1024`     |
    /// | `MAX_ATTEMPTS`           | `5`        |
    /// | `RETRY_INITIAL_DELAY_MS` | `200`      |
    /// | `RETRY_MAX_DELAY_MS`     | `5000`     |
    /// | `CLASSIFIER_MODE`        | `fallback` |
    /// | `CLASSIFIER_URL`         | (none)     |
    /// | `CLASSIFIER_TIMEOUT_MS`  | `3000`     |
    /// | `CLASSIFIER_ATTEMPTS`    | `2`        |
    /// | `CLUSTER_RADIUS_METERS`  | `50`       |
    /// | `MIN_MERGE_CONFIDENCE`   | `0.3`      |
    /// | `STORE_CAS_RETRIES`      | `8`        |
    /// | `DATABASE_URL`           | (none)     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let concurrency: usize = env.parse("WORKER_CONCURRENCY", 4, "a positive integer")?;
        let queue_capacity: usize = env.parse("QUEUE_CAPACITY", 1024, "a positive integer")?;
        if concurrency == 0 {
            return Err(env.invalid("WORKER_CONCURRENCY", "a positive integer"));
        }
        if queue_capacity == 0 {
            return Err(env.invalid("QUEUE_CAPACITY", "a positive integer"));
        }

        let retry = RetryPolicy {
            max_attempts: env.parse("MAX_ATTEMPTS", 5, "a positive integer")?,
            initial_delay: Duration::from_millis(env.parse(
                "RETRY_INITIAL_DELAY_MS",
                200,
                "milliseconds",
            )?),
            max_delay: Duration::from_millis(env.parse("RETRY_MAX_DELAY_MS", 5000, "milliseconds")?),
            ..RetryPolicy::default()
        };
        if retry.max_attempts == 0 {
            return Err(env.invalid("MAX_ATTEMPTS", "a positive integer"));
        }

        let mode = match env.get("CLASSIFIER_MODE").as_deref().unwrap_or("fallback") {
            "fallback" => ClassifierMode::Fallback,
            "http" => ClassifierMode::Http {
                url: env
                    .get("CLASSIFIER_URL")
                    .filter(|u| !u.trim().is_empty())
                    .ok_or(ConfigError::Missing("CLASSIFIER_URL"))?,
            },
            _ => return Err(env.invalid("CLASSIFIER_MODE", "`http` or `fallback`")),
        };
        let classifier = ClassifierConfig {
            mode,
            timeout: Duration::from_millis(env.parse("CLASSIFIER_TIMEOUT_MS", 3000, "milliseconds")?),
            attempts: env.parse("CLASSIFIER_ATTEMPTS", 2, "a positive integer")?,
        };

        let radius_meters: f64 = env.parse("CLUSTER_RADIUS_METERS", 50.0, "a distance in metres")?;
        if !radius_meters.is_finite() || radius_meters < 0.0 {
            return Err(env.invalid("CLUSTER_RADIUS_METERS", "a distance in metres"));
        }
        let min_merge_confidence: f64 =
            env.parse("MIN_MERGE_CONFIDENCE", 0.3, "a number between 0 and 1")?;
        if !(0.0..=1.0).contains(&min_merge_confidence) {
            return Err(env.invalid("MIN_MERGE_CONFIDENCE", "a number between 0 and 1"));
        }
        let pipeline = PipelineConfig {
            radius_meters,
            min_merge_confidence,
            cas_retries: env.parse("STORE_CAS_RETRIES", 8, "a positive integer")?,
        };

        let database_url = env.get("DATABASE_URL").filter(|u| !u.trim().is_empty());

        Ok(Self {
            concurrency,
            queue_capacity,
            retry,
            classifier,
            pipeline,
            database_url,
        })
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var)
    }

    fn parse<T: FromStr>(
        &self,
        var: &'static str,
        default: T,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        match self.get(var) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                var,
                value,
                expected,
            }),
        }
    }

    fn invalid(&self, var: &'static str, expected: &'static str) -> ConfigError {
        ConfigError::Invalid {
            var,
            value: self.get(var).unwrap_or_default(),
            expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(200));
        assert_eq!(config.retry.max_delay, Duration::from_secs(5));
        assert_eq!(config.classifier.mode, ClassifierMode::Fallback);
        assert_eq!(config.classifier.timeout, Duration::from_secs(3));
        assert_eq!(config.classifier.attempts, 2);
        assert_eq!(config.pipeline, PipelineConfig::default());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("WORKER_CONCURRENCY", "16"),
            ("CLASSIFIER_MODE", "http"),
            ("CLASSIFIER_URL", "http://model:8000"),
            ("CLUSTER_RADIUS_METERS", "75.5"),
            ("DATABASE_URL", "postgres://localhost/urbanwatch"),
        ])
        .unwrap();
        assert_eq!(config.concurrency, 16);
        assert_eq!(
            config.classifier.mode,
            ClassifierMode::Http { url: "http://model:8000".into() }
        );
        assert_eq!(config.pipeline.radius_meters, 75.5);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/urbanwatch"));
    }

    #[test]
    fn http_mode_requires_url() {
        assert_matches!(
            load(&[("CLASSIFIER_MODE", "http")]),
            Err(ConfigError::Missing("CLASSIFIER_URL"))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_matches!(
            load(&[("WORKER_CONCURRENCY", "many")]),
            Err(ConfigError::Invalid { var: "WORKER_CONCURRENCY", .. })
        );
        assert_matches!(
            load(&[("WORKER_CONCURRENCY", "0")]),
            Err(ConfigError::Invalid { var: "WORKER_CONCURRENCY", .. })
        );
        assert_matches!(
            load(&[("MIN_MERGE_CONFIDENCE", "1.5")]),
            Err(ConfigError::Invalid { var: "MIN_MERGE_CONFIDENCE", .. })
        );
        assert_matches!(
            load(&[("CLASSIFIER_MODE", "magic")]),
            Err(ConfigError::Invalid { var: "CLASSIFIER_MODE", .. })
        );
    }
}
