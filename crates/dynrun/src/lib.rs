//! # Dynrun
//!
//! Loads code selected at runtime by a content hash carried in a script's own
//! arguments, verifies it, and runs its entry points.
//!
//! An invocation flows through:
//!
//! 1. `envelope`: verify the script record
//! 2. `args`: decode `[reserved][code_hash][hash_type]` from its arguments
//! 3. `resolver`: locate, authenticate, and load the code image
//! 4. `symbol`: resolve `construct`, `evaluate`, `teardown`
//! 5. `arena`: reserve a zeroed execution arena
//! 6. `driver`: call the entry points and report an exit code

pub mod arena;
pub mod args;
pub mod config;
pub mod context;
pub mod driver;
pub mod envelope;
pub mod error;
pub mod hash;
pub mod host;
pub mod image;
pub mod local;
pub mod resolver;
pub mod symbol;
pub mod syscalls;

pub use args::CodeReference;
pub use args::HashType;
pub use config::LoaderConfig;
pub use driver::Loader;
pub use driver::Payload;
pub use driver::Report;
pub use driver::Stage;
pub use error::ConfigError;
pub use error::ErrorKind;
pub use error::LoaderError;
pub use local::LocalHost;
pub use resolver::CodeImage;
pub use resolver::CodeResolver;
pub use syscalls::Syscalls;
