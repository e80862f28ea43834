//! `RunConfig` discovery (CLI > env > file > defaults) and the
//! provider-capabilities file loader.

pub mod capabilities;
pub mod discovery;
pub mod overrides;
pub mod source;

pub use capabilities::{CapabilityRecord, CapabilityStore, CapabilityError};
pub use discovery::{discover, discover_from, ConfigError};
pub use overrides::CliOverrides;
pub use source::ConfigSource;
