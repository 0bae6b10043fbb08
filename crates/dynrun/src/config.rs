//! Loader configuration.

use serde::Deserialize;
use serde::Serialize;

use crate::arena::INPUT_WINDOW;
use crate::error::ConfigError;
use crate::image::PAGE_SIZE;

/// Guest memory is addressed with 32-bit pointers.
const ADDRESS_SPACE: usize = u32::MAX as usize;

/// Limits applied to every invocation.
///
/// Can be built in code with the `with_*` setters or read from TOML:
///
/// ```toml
/// max_code_size = 1048576
/// arena_size = 524288
/// max_cycles = 70000000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Largest accepted script envelope, in bytes.
    pub max_script_size: usize,
    /// Capacity of the code arena. Must be a multiple of `PAGE_SIZE`.
    pub max_code_size: usize,
    /// Size of the execution arena handed to `construct`.
    pub arena_size: usize,
    /// Fuel budget for all entry-point calls of one invocation.
    pub max_cycles: u64,
    /// Keep guest debug messages in the invocation report.
    pub capture_debug: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_script_size: 32 * 1024,
            max_code_size: 1024 * 1024,
            arena_size: 512 * 1024,
            max_cycles: 70_000_000,
            capture_debug: true,
        }
    }
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a TOML document. Missing keys take defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_script_size(mut self, n: usize) -> Self {
        self.max_script_size = n;
        self
    }

    pub fn with_max_code_size(mut self, n: usize) -> Self {
        self.max_code_size = n;
        self
    }

    pub fn with_arena_size(mut self, n: usize) -> Self {
        self.arena_size = n;
        self
    }

    pub fn with_max_cycles(mut self, n: u64) -> Self {
        self.max_cycles = n;
        self
    }

    pub fn with_capture_debug(mut self, on: bool) -> Self {
        self.capture_debug = on;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_code_size == 0 || self.max_code_size % PAGE_SIZE != 0 {
            return Err(ConfigError::Unaligned {
                field: "max_code_size",
                unit: PAGE_SIZE,
                value: self.max_code_size,
            });
        }
        if self.arena_size == 0 {
            return Err(ConfigError::Unaligned {
                field: "arena_size",
                unit: 1,
                value: 0,
            });
        }
        let limit = ADDRESS_SPACE - INPUT_WINDOW;
        if self.arena_size > limit {
            return Err(ConfigError::OutOfRange {
                field: "arena_size",
                value: self.arena_size,
                limit,
            });
        }
        if self.max_script_size == 0 {
            return Err(ConfigError::Unaligned {
                field: "max_script_size",
                unit: 1,
                value: 0,
            });
        }
        Ok(())
    }
}
