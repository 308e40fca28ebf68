//! The container migration engine.
//!
//! A migration walks the source hierarchy depth first.
//! Each group is created at the destination before its attributes and children are copied.
//! Each dataset is copied block by block into a dataset with the effective block size and compression, then its attributes are copied.

mod migration_error;
mod migration_report;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use rayon_iter_concurrent_limit::iter_concurrent_limit;
use zarrs::array_subset::ArraySubset;

pub use migration_error::MigrationError;
pub use migration_report::{Diagnostic, DiagnosticKind, MigrationReport};

use crate::{
    backend::{ArrayReader, BackendError, StorageBackend},
    compression::CompressionOverride,
    dataset::DatasetAttributes,
    path,
    policy::{AttributeTransferPolicy, DEFAULT_SPATIAL_ATTRIBUTE_KEYS},
    progress::{Progress, ProgressCallback},
};

/// Migration parameters supplied at the start of a run.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Paths to migrate. If [`None`], the whole hierarchy is migrated.
    pub root_paths: Option<Vec<String>>,
    /// The block size of destination datasets of the same rank.
    pub block_size: Option<Vec<u64>>,
    pub compression: CompressionOverride,
    /// Per-axis attributes reordered when axis conventions differ.
    pub spatial_attribute_keys: Vec<String>,
    /// The number of blocks copied concurrently. Defaults to the available parallelism.
    pub concurrent_chunks: Option<usize>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            root_paths: None,
            block_size: None,
            compression: CompressionOverride::Unset,
            spatial_attribute_keys: DEFAULT_SPATIAL_ATTRIBUTE_KEYS.map(str::to_string).to_vec(),
            concurrent_chunks: None,
        }
    }
}

impl MigrationOptions {
    /// Validate the options.
    ///
    /// # Errors
    /// Returns [`MigrationError::Configuration`] if the block size is empty or has a zero component, or the concurrency is zero.
    pub fn validate(&self) -> Result<(), MigrationError> {
        if let Some(block_size) = &self.block_size {
            if block_size.is_empty() || block_size.contains(&0) {
                return Err(MigrationError::Configuration(format!(
                    "block size {block_size:?} must be a sequence of positive integers"
                )));
            }
        }
        if self.concurrent_chunks == Some(0) {
            return Err(MigrationError::Configuration(
                "the number of concurrent chunks must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The structural attributes of a destination dataset copied from a source dataset.
    ///
    /// The block size override only applies to datasets of the same rank, other datasets keep their source block size.
    #[must_use]
    pub fn destination_attributes(&self, source: &DatasetAttributes) -> DatasetAttributes {
        let compression = self.compression.effective(source.compression());
        let attributes = source.with_compression(compression);
        match &self.block_size {
            Some(block_size) if block_size.len() == source.rank() => attributes
                .with_block_size(block_size.clone())
                .unwrap_or(attributes),
            Some(block_size) => {
                log::debug!(
                    "block size {block_size:?} does not match rank {}, keeping {:?}",
                    source.rank(),
                    source.block_size()
                );
                attributes
            }
            None => attributes,
        }
    }
}

/// A cooperative cancellation signal shared between a migration and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum WriteArrayError {
    Cancelled,
    Backend(BackendError),
}

impl From<BackendError> for WriteArrayError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err)
    }
}

/// Migrates a hierarchy from a source container to a destination container.
pub struct MigrationEngine<'a> {
    source: &'a dyn StorageBackend,
    destination: &'a dyn StorageBackend,
    options: &'a MigrationOptions,
    policy: AttributeTransferPolicy,
    cancellation: CancellationToken,
    progress_callback: Option<&'a ProgressCallback<'a>>,
}

impl<'a> MigrationEngine<'a> {
    /// Create a migration engine.
    ///
    /// # Errors
    /// Returns [`MigrationError::Configuration`] if the options are invalid.
    pub fn new(
        source: &'a dyn StorageBackend,
        destination: &'a dyn StorageBackend,
        options: &'a MigrationOptions,
    ) -> Result<Self, MigrationError> {
        options.validate()?;
        let policy = AttributeTransferPolicy::new(
            options.spatial_attribute_keys.clone(),
            source.kind(),
            destination.kind(),
        );
        if policy.reverses_axes() {
            log::info!(
                "{} and {} axis orders differ, reversing {:?}",
                source.kind(),
                destination.kind(),
                policy.spatial_keys()
            );
        }
        Ok(Self {
            source,
            destination,
            options,
            policy,
            cancellation: CancellationToken::default(),
            progress_callback: None,
        })
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    #[must_use]
    pub fn with_progress_callback(mut self, progress_callback: &'a ProgressCallback<'a>) -> Self {
        self.progress_callback = Some(progress_callback);
        self
    }

    /// Run the migration.
    ///
    /// Failures at individual nodes are recorded in the returned report and do not stop the migration.
    ///
    /// # Errors
    /// Returns [`MigrationError::Cancelled`] if the migration was cancelled.
    /// Datasets copied before cancellation are left in place.
    pub fn run(&self) -> Result<MigrationReport, MigrationError> {
        let mut report = MigrationReport::default();
        match &self.options.root_paths {
            None => self.copy_node(path::ROOT, &mut report)?,
            Some(root_paths) => {
                for root_path in root_paths {
                    self.copy_root(&path::normalize(root_path), &mut report)?;
                }
            }
        }
        log::info!("{report}");
        Ok(report)
    }

    fn copy_root(&self, path: &str, report: &mut MigrationReport) -> Result<(), MigrationError> {
        match self.source.exists(path) {
            Ok(true) => {}
            Ok(false) => {
                log::info!("{path} does not exist in the source, skipping");
                return Ok(());
            }
            Err(err) => {
                report.record(path, None, DiagnosticKind::SubtreeListing, err);
                return Ok(());
            }
        }
        if let Some(parent) = path::parent(path) {
            if let Err(err) = self.destination.create_group(&parent) {
                report.record(&parent, None, DiagnosticKind::SubtreeCreation, err);
                return Ok(());
            }
        }
        self.copy_node(path, report)
    }

    fn copy_node(&self, path: &str, report: &mut MigrationReport) -> Result<(), MigrationError> {
        match self.source.is_dataset(path) {
            Ok(true) => self.copy_dataset(path, report),
            Ok(false) => self.copy_group(path, report),
            Err(err) => {
                report.record(path, None, DiagnosticKind::SubtreeListing, err);
                Ok(())
            }
        }
    }

    fn copy_group(&self, path: &str, report: &mut MigrationReport) -> Result<(), MigrationError> {
        log::info!("group {path}");
        if let Err(err) = self.destination.create_group(path) {
            report.record(path, None, DiagnosticKind::SubtreeCreation, err);
            return Ok(());
        }
        report.add_group();
        self.copy_attributes(path, false, report);

        let children = match self.source.list_children(path) {
            Ok(children) => children,
            Err(err) => {
                report.record(path, None, DiagnosticKind::SubtreeListing, err);
                return Ok(());
            }
        };
        for child in children {
            self.copy_node(&path::join(path, &child), report)?;
        }
        Ok(())
    }

    fn copy_dataset(&self, path: &str, report: &mut MigrationReport) -> Result<(), MigrationError> {
        if self.cancellation.is_cancelled() {
            return Err(MigrationError::Cancelled(path.to_string()));
        }
        let source_attributes = match self.source.dataset_attributes(path) {
            Ok(attributes) => attributes,
            Err(err) => {
                report.record(path, None, DiagnosticKind::UnsupportedDataset, err);
                return Ok(());
            }
        };
        let attributes = self.options.destination_attributes(&source_attributes);
        log::info!(
            "dataset {path} {:?} {} blockSize={:?} compression={}",
            attributes.dimensions(),
            attributes.data_type(),
            attributes.block_size(),
            attributes.compression()
        );

        let reader = match self.source.open_array(path) {
            Ok(reader) => reader,
            Err(err) => {
                report.record(path, None, DiagnosticKind::UnsupportedDataset, err);
                return Ok(());
            }
        };
        let written = self.write_array(path, reader.as_ref(), &attributes);
        self.destination.finish_dataset(path);
        match written {
            Ok(()) => {}
            Err(WriteArrayError::Cancelled) => {
                return Err(MigrationError::Cancelled(path.to_string()))
            }
            Err(WriteArrayError::Backend(err)) => {
                report.record(path, None, DiagnosticKind::DatasetWrite, err);
                return Ok(());
            }
        }
        report.add_dataset();
        self.copy_attributes(path, true, report);
        Ok(())
    }

    /// The number of blocks written concurrently for a dataset with `num_blocks` blocks.
    fn concurrent_limit(&self, num_blocks: usize) -> usize {
        if !self.destination.supports_concurrent_write() {
            return 1;
        }
        self.options
            .concurrent_chunks
            .unwrap_or_else(|| {
                std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
            })
            .min(num_blocks)
            .max(1)
    }

    /// Create the destination dataset and copy every block into it.
    ///
    /// Returns once all block writes have completed.
    fn write_array(
        &self,
        path: &str,
        reader: &dyn ArrayReader,
        attributes: &DatasetAttributes,
    ) -> Result<(), WriteArrayError> {
        self.destination.create_dataset(path, attributes)?;

        let blocks = ArraySubset::new_with_shape(attributes.grid_shape());
        let num_blocks = blocks.num_elements_usize();
        let progress = Progress::new(path, num_blocks, self.progress_callback);
        let copy_block = |grid_position: Vec<u64>| -> Result<(), WriteArrayError> {
            if self.cancellation.is_cancelled() {
                return Err(WriteArrayError::Cancelled);
            }
            let subset = attributes.block_subset(&grid_position)?;
            let bytes = progress.read(|| reader.read_subset(&subset))?;
            progress.write(|| self.destination.write_block(path, &grid_position, bytes))?;
            progress.next();
            Ok(())
        };

        let concurrent_limit = self.concurrent_limit(num_blocks);
        let indices = blocks.indices();
        if concurrent_limit > 1 {
            iter_concurrent_limit!(concurrent_limit, indices, try_for_each, copy_block)?;
        } else {
            indices.iter().try_for_each(copy_block)?;
        }

        let stats = progress.stats();
        log::debug!(
            "dataset {path} copied {} blocks with {concurrent_limit} writers, read {:.2}ms write {:.2}ms",
            stats.step,
            stats.read.as_secs_f32() * 1e3,
            stats.write.as_secs_f32() * 1e3,
        );
        Ok(())
    }

    fn copy_attributes(&self, path: &str, is_dataset: bool, report: &mut MigrationReport) {
        let attributes = match self.source.list_attributes(path) {
            Ok(attributes) => attributes,
            Err(err) => {
                report.record(path, None, DiagnosticKind::AttributeRead, err);
                return;
            }
        };
        for (key, attribute_type) in attributes {
            if self.policy.skips(&key, is_dataset) {
                log::debug!("{path} skipping structural attribute {key}");
                continue;
            }
            let value = match self.source.get_attribute(path, &key, attribute_type) {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(err) => {
                    report.record(path, Some(&key), DiagnosticKind::AttributeRead, err);
                    continue;
                }
            };
            let value = self.policy.transform(&key, attribute_type, value);
            match self.destination.set_attribute(path, &key, &value) {
                Ok(()) => log::debug!("{path} {key}: {attribute_type} = {value}"),
                Err(err) => report.record(path, Some(&key), DiagnosticKind::AttributeWrite, err),
            }
        }
    }
}

/// Migrate a hierarchy from `source` to `destination`.
///
/// # Errors
/// Returns an error if the options are invalid.
pub fn migrate(
    source: &dyn StorageBackend,
    destination: &dyn StorageBackend,
    options: &MigrationOptions,
) -> Result<MigrationReport, MigrationError> {
    MigrationEngine::new(source, destination, options)?.run()
}
