//! Worker allocation configuration.
//!
//! The allocation is read from a TOML file and may be overridden by
//! environment variables:
//!
//! | Variable                      | Field               |
//! |-------------------------------|---------------------|
//! | `CCR_PARALLEL_WORKERS`        | `workers`           |
//! | `CCR_PARALLEL_CHUNKS`         | `chunks_per_worker` |
//! | `CCR_PARALLEL_THREAD_PREFIX`  | `thread_name_prefix`|
//!
//! # Example
//!
//! ```
//! use ccr_parallel::{ParallelConfig, WorkerAllocation};
//!
//! let config: ParallelConfig = toml::from_str(r#"
//!     workers = "4"
//!     chunks_per_worker = 2
//! "#).unwrap();
//!
//! assert_eq!(config.workers, WorkerAllocation::Fixed(4));
//! assert_eq!(config.resolved_workers(), 4);
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default number of contiguous chunks per worker.
pub const DEFAULT_CHUNKS_PER_WORKER: usize = 2;

/// How many workers the executor may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerAllocation {
    /// One worker per logical CPU.
    #[default]
    Automatic,
    /// Parallelism switched off: every call runs on the calling thread.
    Disabled,
    /// An explicit number of workers (at least one).
    Fixed(usize),
}

impl WorkerAllocation {
    /// Resolves the allocation into a concrete worker count (always `>= 1`).
    pub fn resolve(&self) -> usize {
        match self {
            Self::Automatic => num_cpus::get().max(1),
            Self::Disabled => 1,
            Self::Fixed(n) => (*n).max(1),
        }
    }
}

impl FromStr for WorkerAllocation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "automatic" | "auto" => Ok(Self::Automatic),
            "disabled" | "off" => Ok(Self::Disabled),
            other => match other.parse::<usize>() {
                Ok(n) if n >= 1 => Ok(Self::Fixed(n)),
                _ => Err(ConfigError::InvalidWorkerCount(trimmed.to_string())),
            },
        }
    }
}

impl fmt::Display for WorkerAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automatic => write!(f, "automatic"),
            Self::Disabled => write!(f, "disabled"),
            Self::Fixed(n) => write!(f, "{}", n),
        }
    }
}

impl<'de> Deserialize<'de> for WorkerAllocation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Count(n) => WorkerAllocation::from_str(&n.to_string()),
            Raw::Text(s) => WorkerAllocation::from_str(&s),
        }
        .map_err(serde::de::Error::custom)
    }
}

/// Configuration of a [`ParallelExecutor`](crate::ParallelExecutor).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ParallelConfig {
    /// Worker allocation.
    pub workers: WorkerAllocation,
    /// Number of contiguous chunks created per worker when splitting a range.
    pub chunks_per_worker: usize,
    /// Prefix for background worker thread names.
    pub thread_name_prefix: String,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            workers: WorkerAllocation::Automatic,
            chunks_per_worker: DEFAULT_CHUNKS_PER_WORKER,
            thread_name_prefix: "ccr-worker".to_string(),
        }
    }
}

impl ParallelConfig {
    /// Creates a configuration with a fixed allocation and default chunking.
    pub fn with_workers(workers: WorkerAllocation) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Returns the resolved worker count.
    #[inline]
    pub fn resolved_workers(&self) -> usize {
        self.workers.resolve()
    }

    /// Loads the configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileError(format!("{}: {}", path.display(), e)))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `CCR_PARALLEL_*` environment overrides.
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        if let Ok(workers) = std::env::var("CCR_PARALLEL_WORKERS") {
            self.workers = workers.parse()?;
        }
        if let Ok(chunks) = std::env::var("CCR_PARALLEL_CHUNKS") {
            self.chunks_per_worker = chunks
                .trim()
                .parse()
                .map_err(|_| ConfigError::ParseError(format!("CCR_PARALLEL_CHUNKS='{}'", chunks)))?;
        }
        if let Ok(prefix) = std::env::var("CCR_PARALLEL_THREAD_PREFIX") {
            self.thread_name_prefix = prefix;
        }
        self.validate()?;
        Ok(self)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunks_per_worker == 0 {
            return Err(ConfigError::InvalidChunksPerWorker(self.chunks_per_worker));
        }
        if let WorkerAllocation::Fixed(0) = self.workers {
            return Err(ConfigError::InvalidWorkerCount("0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_worker_allocation() {
        assert_eq!(
            "automatic".parse::<WorkerAllocation>().unwrap(),
            WorkerAllocation::Automatic
        );
        assert_eq!(
            "Disabled".parse::<WorkerAllocation>().unwrap(),
            WorkerAllocation::Disabled
        );
        assert_eq!(
            " 8 ".parse::<WorkerAllocation>().unwrap(),
            WorkerAllocation::Fixed(8)
        );
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        for bad in ["", "0", "-2", "many", "2.5"] {
            let err = bad.parse::<WorkerAllocation>().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidWorkerCount(_)), "{bad}");
        }
    }

    #[test]
    fn test_resolve() {
        assert_eq!(WorkerAllocation::Disabled.resolve(), 1);
        assert_eq!(WorkerAllocation::Fixed(3).resolve(), 3);
        assert!(WorkerAllocation::Automatic.resolve() >= 1);
    }

    #[test]
    fn test_display_round_trips() {
        for alloc in [
            WorkerAllocation::Automatic,
            WorkerAllocation::Disabled,
            WorkerAllocation::Fixed(12),
        ] {
            assert_eq!(alloc.to_string().parse::<WorkerAllocation>().unwrap(), alloc);
        }
    }

    #[test]
    fn test_deserialize_integer_and_text() {
        let config: ParallelConfig = toml::from_str("workers = 6").unwrap();
        assert_eq!(config.workers, WorkerAllocation::Fixed(6));

        let config: ParallelConfig = toml::from_str("workers = \"disabled\"").unwrap();
        assert_eq!(config.workers, WorkerAllocation::Disabled);

        let result: Result<ParallelConfig, _> = toml::from_str("workers = \"lots\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_default_config() {
        let config = ParallelConfig::default();
        assert_eq!(config.workers, WorkerAllocation::Automatic);
        assert_eq!(config.chunks_per_worker, DEFAULT_CHUNKS_PER_WORKER);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_chunks() {
        let config = ParallelConfig {
            chunks_per_worker: 0,
            ..ParallelConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidChunksPerWorker(0))
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workers = \"3\"\nchunks_per_worker = 4").unwrap();

        let config = ParallelConfig::from_file(file.path()).unwrap();
        assert_eq!(config.workers, WorkerAllocation::Fixed(3));
        assert_eq!(config.chunks_per_worker, 4);
    }

    #[test]
    fn test_from_missing_file() {
        let err = ParallelConfig::from_file(Path::new("/nonexistent/ccr.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileError(_)));
    }
}
