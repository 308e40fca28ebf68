#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

pub mod attribute;
pub mod backend;
pub mod compression;
pub mod dataset;
pub mod migrate;
pub mod migrate_arguments;
pub mod path;
pub mod policy;
pub mod progress;

pub use attribute::AttributeType;
pub use backend::{
    open_container, BackendError, BackendKind, Container, ContainerAccess, StorageBackend,
};
pub use compression::{Compression, CompressionOverride};
pub use dataset::{DatasetAttributes, ElementType};
pub use migrate::{
    migrate, CancellationToken, Diagnostic, DiagnosticKind, MigrationEngine, MigrationError,
    MigrationOptions, MigrationReport,
};
pub use migrate_arguments::MigrateArguments;

/// The `zarrs_migrate` version with the `zarrs` version.
///
/// Example:
/// `0.1.0 (zarrs 0.17.0)`
#[must_use]
pub fn version_with_zarrs() -> String {
    format!(
        "{} (zarrs {}.{}.{})",
        env!("CARGO_PKG_VERSION"),
        zarrs::version::version_major(),
        zarrs::version::version_minor(),
        zarrs::version::version_patch()
    )
}
