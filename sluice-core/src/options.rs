use std::fs;
use std::path::Path;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::pipe::{Cancellation, EdgeFormat, Piper, DEFAULT_CAPACITY, DEFAULT_CHUNK_SIZE};

/// Tunables for one executor process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorOptions {
    /// Name announced to agents when dialing shards
    pub name: String,
    /// Chunks buffered per local pipe
    pub pipe_capacity: usize,
    /// Bytes per pipe chunk
    pub chunk_size: usize,
    /// Timeout for establishing shard connections
    pub connect_timeout_ms: u64,
    /// Snappy-compress shard transfers
    pub compression: bool,
    /// Memory budget of a k-way merge, in MB
    pub merge_memory_mb: u64,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        ExecutorOptions {
            name: format!("executor-{}", Uuid::new_v4()),
            pipe_capacity: DEFAULT_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout_ms: 10_000,
            compression: false,
            merge_memory_mb: 5,
        }
    }
}

impl ExecutorOptions {
    /// Parses options from json; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads options from a json file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        ExecutorOptions::from_json(&json)
    }

    /// Shard connection timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Merge budget in bytes
    pub fn merge_memory_bytes(&self) -> usize {
        (self.merge_memory_mb as usize).saturating_mul(1024 * 1024)
    }

    /// Creates a pipe sized by these options.
    pub fn piper(&self, format: EdgeFormat, cancel: &Cancellation) -> Piper {
        Piper::new(self.pipe_capacity, self.chunk_size, format, cancel)
    }
}

#[cfg(test)]
mod test_options {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let opts = ExecutorOptions::from_json(r#"{"name": "worker-3", "compression": true}"#).unwrap();
        assert_eq!(opts.name, "worker-3");
        assert!(opts.compression);
        assert_eq!(opts.pipe_capacity, DEFAULT_CAPACITY);
        assert_eq!(opts.merge_memory_mb, 5);
    }

    #[test]
    fn test_default_names_are_unique() {
        let a = ExecutorOptions::default();
        let b = ExecutorOptions::default();
        assert!(a.name.starts_with("executor-"));
        assert_ne!(a.name, b.name);
    }

    #[test]
    fn test_bad_json() {
        assert!(ExecutorOptions::from_json("{").is_err());
    }
}
