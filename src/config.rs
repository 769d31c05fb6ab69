//! Configuration options for spilling maps and storage locations.

use serde::{Deserialize, Serialize};

/// Default number of buffered entries before the buffer is persisted.
pub const DEFAULT_BUFFER_PERSIST_THRESHOLD: usize = 1000;

/// Default maximum number of segment files before compaction kicks in.
pub const DEFAULT_MAX_OPEN_FILES: usize = 100;

/// Default number of retries per storage location.
pub const DEFAULT_NUM_RETRIES: usize = 2;

/// Default number of leading records re-read during verification.
pub const DEFAULT_NUM_ELEMENTS_TO_VERIFY: usize = 100;

/// Read-back verification performed after a segment file is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistOptions {
    /// Re-read the first `num_elements_to_verify` records and compare them.
    /// Default: true
    pub verify_elements: bool,

    /// How many leading records to compare.
    /// Default: 100
    pub num_elements_to_verify: usize,

    /// Re-read the trailing record count and compare it with the number written.
    /// Default: true
    pub verify_size: bool,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            verify_elements: true,
            num_elements_to_verify: DEFAULT_NUM_ELEMENTS_TO_VERIFY,
            verify_size: true,
        }
    }
}

impl PersistOptions {
    /// Options that skip all read-back checks.
    pub fn unverified() -> Self {
        Self { verify_elements: false, num_elements_to_verify: 0, verify_size: false }
    }

    /// Sets whether leading records are verified.
    pub fn verify_elements(mut self, value: bool) -> Self {
        self.verify_elements = value;
        self
    }

    /// Sets how many leading records are verified.
    pub fn num_elements_to_verify(mut self, count: usize) -> Self {
        self.num_elements_to_verify = count;
        self
    }

    /// Sets whether the trailing count is verified.
    pub fn verify_size(mut self, value: bool) -> Self {
        self.verify_size = value;
        self
    }
}

/// Configuration for a spilling map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpillOptions {
    /// Number of entries the active buffer may hold before it is persisted.
    /// Default: 1000
    pub buffer_persist_threshold: usize,

    /// Maximum number of persisted segments before compaction.
    /// 0 disables compaction.
    /// Default: 100
    pub max_open_files: usize,

    /// Extra attempts per storage location after the first failed write.
    /// Default: 2
    pub num_retries: usize,
}

impl Default for SpillOptions {
    fn default() -> Self {
        Self {
            buffer_persist_threshold: DEFAULT_BUFFER_PERSIST_THRESHOLD,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            num_retries: DEFAULT_NUM_RETRIES,
        }
    }
}

impl SpillOptions {
    /// Creates a new SpillOptions with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Sets the buffer persist threshold.
    pub fn buffer_persist_threshold(mut self, threshold: usize) -> Self {
        self.buffer_persist_threshold = threshold;
        self
    }

    /// Sets the maximum number of segment files.
    pub fn max_open_files(mut self, max: usize) -> Self {
        self.max_open_files = max;
        self
    }

    /// Sets the number of retries per location.
    pub fn num_retries(mut self, retries: usize) -> Self {
        self.num_retries = retries;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.buffer_persist_threshold == 0 {
            return Err(crate::Error::invalid_argument("buffer_persist_threshold must be > 0"));
        }
        Ok(())
    }
}

/// Configuration for one storage location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationOptions {
    /// Minimum free bytes required before a new segment file is created.
    /// Default: 0
    pub min_free_bytes: u64,

    /// Minimum free space, as a percentage of the total, required before a
    /// new segment file is created.
    /// Default: 0.0
    pub min_free_percent: f64,

    /// Sub-directory scoping this map's segment files inside the location.
    /// Default: "spill"
    pub sub_path: String,

    /// Verification applied to files written here.
    pub persist: PersistOptions,
}

impl Default for LocationOptions {
    fn default() -> Self {
        Self {
            min_free_bytes: 0,
            min_free_percent: 0.0,
            sub_path: "spill".to_string(),
            persist: PersistOptions::default(),
        }
    }
}

impl LocationOptions {
    /// Creates a new LocationOptions with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Sets the minimum free bytes.
    pub fn min_free_bytes(mut self, bytes: u64) -> Self {
        self.min_free_bytes = bytes;
        self
    }

    /// Sets the minimum free percentage.
    pub fn min_free_percent(mut self, percent: f64) -> Self {
        self.min_free_percent = percent;
        self
    }

    /// Sets the sub-path.
    pub fn sub_path(mut self, sub_path: impl Into<String>) -> Self {
        self.sub_path = sub_path.into();
        self
    }

    /// Sets the persist options.
    pub fn persist(mut self, persist: PersistOptions) -> Self {
        self.persist = persist;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if !(0.0..=100.0).contains(&self.min_free_percent) {
            return Err(crate::Error::invalid_argument(
                "min_free_percent must be between 0 and 100",
            ));
        }
        if self.sub_path.is_empty() {
            return Err(crate::Error::invalid_argument("sub_path must not be empty"));
        }
        Ok(())
    }
}
