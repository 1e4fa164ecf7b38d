//! npm registry support: specifier parsing and registry metadata.

pub mod spec;
pub mod types;

pub use spec::NpmPackageNameSchema;
pub use types::NpmPackageMetadata;

/// Default public registry prefix.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.com";
