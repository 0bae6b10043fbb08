//! # Error Definitions
//!
//! Every failure of an invocation is a `LoaderError`. Each error belongs to one
//! `ErrorKind` and maps to a stable process exit code.

use crate::syscalls::SysError;

/// Exit codes reported to the host. Negative values are shared with other
/// scripts; this loader's own failures start at 40.
pub mod code {
    pub const SUCCESS: i32 = 0;
    pub const ARGUMENTS_LEN: i32 = -1;
    pub const ENCODING: i32 = -2;
    pub const SYSCALL: i32 = -3;
    pub const SCRIPT_TOO_LONG: i32 = -21;
    pub const CANT_LOAD_LIB: i32 = 40;
    pub const LIB_MALFORMED: i32 = 41;
    pub const CANT_FIND_SYMBOL: i32 = 42;
    pub const INVALID_ARGS_FORMAT: i32 = 43;
    pub const CANT_CONSTRUCT: i32 = 44;
    pub const TRAPPED: i32 = 45;
    pub const EXCEEDED_MAX_CYCLES: i32 = 46;
}

/// Coarse failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Encoding,
    ArgumentFormat,
    SizeLimit,
    LoadFailure,
    ImageIntegrity,
    SymbolResolution,
    Syscall,
    Execution,
}

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("script envelope is malformed: {0}")]
    Encoding(dynpack::Error),

    #[error("script is {len} bytes; limit is {limit}")]
    ScriptTooLarge { len: usize, limit: usize },

    #[error("arguments are {len} bytes; at least {min} required")]
    InvalidArgsFormat { len: usize, min: usize },

    #[error("unknown hash type {0:#04x}")]
    UnknownHashType(u8),

    #[error("payload of {payload} bytes with label of {label} bytes does not fit the input window")]
    ArgumentsLen { payload: usize, label: usize },

    #[error("syscall failed: {0:?}")]
    Syscall(SysError),

    #[error("no code dependency matches hash {}", hex(.0))]
    CodeNotFound([u8; 32]),

    #[error("code blob does not authenticate against {}", hex(.0))]
    HashMismatch([u8; 32]),

    #[error("code is {len} bytes; arena capacity is {capacity}")]
    CodeTooLarge { len: usize, capacity: usize },

    #[error("cannot load code image: {0}")]
    CannotLoad(wasmtime::Error),

    #[error("code image of {len} bytes is not page aligned")]
    MalformedImage { len: usize },

    #[error("symbol `{0}` not found")]
    SymbolNotFound(&'static str),

    #[error("symbol `{0}` does not have the expected signature")]
    SignatureMismatch(&'static str),

    #[error("construct returned a null context")]
    ConstructFailed,

    #[error("evaluate returned {0}")]
    EvaluateFailed(i32),

    #[error("entry point trapped: {0}")]
    Trapped(wasmtime::Error),

    #[error("exceeded maximum cycles")]
    ExceededMaxCycles,
}

impl LoaderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Encoding(_) => ErrorKind::Encoding,
            Self::InvalidArgsFormat { .. }
            | Self::UnknownHashType(_)
            | Self::ArgumentsLen { .. } => ErrorKind::ArgumentFormat,
            Self::ScriptTooLarge { .. } | Self::CodeTooLarge { .. } => ErrorKind::SizeLimit,
            Self::CodeNotFound(_) | Self::HashMismatch(_) | Self::CannotLoad(_) => {
                ErrorKind::LoadFailure
            }
            Self::MalformedImage { .. } => ErrorKind::ImageIntegrity,
            Self::SymbolNotFound(_) | Self::SignatureMismatch(_) => ErrorKind::SymbolResolution,
            Self::Syscall(_) => ErrorKind::Syscall,
            Self::ConstructFailed
            | Self::EvaluateFailed(_)
            | Self::Trapped(_)
            | Self::ExceededMaxCycles => ErrorKind::Execution,
        }
    }

    /// The exit code the host observes for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ArgumentsLen { .. } => code::ARGUMENTS_LEN,
            Self::Encoding(_) => code::ENCODING,
            Self::Syscall(_) => code::SYSCALL,
            Self::ScriptTooLarge { .. } | Self::CodeTooLarge { .. } => code::SCRIPT_TOO_LONG,
            Self::CodeNotFound(_) | Self::HashMismatch(_) | Self::CannotLoad(_) => {
                code::CANT_LOAD_LIB
            }
            Self::MalformedImage { .. } => code::LIB_MALFORMED,
            Self::SymbolNotFound(_) | Self::SignatureMismatch(_) => code::CANT_FIND_SYMBOL,
            Self::InvalidArgsFormat { .. } | Self::UnknownHashType(_) => {
                code::INVALID_ARGS_FORMAT
            }
            Self::ConstructFailed => code::CANT_CONSTRUCT,
            Self::Trapped(_) => code::TRAPPED,
            Self::ExceededMaxCycles => code::EXCEEDED_MAX_CYCLES,
            Self::EvaluateFailed(status) => *status,
        }
    }
}

impl From<SysError> for LoaderError {
    fn from(e: SysError) -> Self {
        Self::Syscall(e)
    }
}

impl From<dynpack::Error> for LoaderError {
    fn from(e: dynpack::Error) -> Self {
        Self::Encoding(e)
    }
}

/// Configuration is rejected before any invocation runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be a non-zero multiple of {unit}, got {value}")]
    Unaligned {
        field: &'static str,
        unit: usize,
        value: usize,
    },

    #[error("{field} of {value} exceeds the limit of {limit}")]
    OutOfRange {
        field: &'static str,
        value: usize,
        limit: usize,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("engine setup failed: {0}")]
    Engine(wasmtime::Error),
}

pub type Result<T> = std::result::Result<T, LoaderError>;

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
