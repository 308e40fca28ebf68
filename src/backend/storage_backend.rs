use enum_dispatch::enum_dispatch;
use serde_json::Value;
use zarrs::array_subset::ArraySubset;

use crate::{attribute::AttributeType, dataset::DatasetAttributes};

use super::{memory::MemoryBackend, n5::N5Backend, zarr::ZarrBackend, BackendError, BackendKind};

/// A handle to a dataset opened for reading.
pub trait ArrayReader: Send + Sync {
    /// Read the elements of `subset` in the logical axis order, fastest varying axis first.
    ///
    /// # Errors
    /// Returns an error if the subset is out of bounds or the underlying store fails.
    fn read_subset(&self, subset: &ArraySubset) -> Result<Vec<u8>, BackendError>;
}

/// The capabilities of a hierarchical chunked array container.
///
/// Paths are slash delimited and relative to the container root `/`.
/// Voxel payloads are always in the logical axis order, each backend maps them to its native order.
///
/// Implementations must be safe for concurrent [`write_block`](StorageBackend::write_block) calls on distinct blocks
/// if [`supports_concurrent_write`](StorageBackend::supports_concurrent_write) is true.
#[enum_dispatch]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn supports_concurrent_write(&self) -> bool {
        self.kind().supports_concurrent_write()
    }

    /// Returns true if a group or dataset exists at `path`.
    fn exists(&self, path: &str) -> Result<bool, BackendError>;

    fn is_dataset(&self, path: &str) -> Result<bool, BackendError>;

    /// The names of the direct children of the group at `path`, in backend listing order.
    fn list_children(&self, path: &str) -> Result<Vec<String>, BackendError>;

    /// The attribute keys of the node at `path` along with their declared types.
    fn list_attributes(&self, path: &str) -> Result<Vec<(String, AttributeType)>, BackendError>;

    /// Get an attribute, or [`None`] if it is not set.
    ///
    /// # Errors
    /// Returns [`BackendError::AttributeTypeMismatch`] if the attribute cannot be read as `attribute_type`.
    fn get_attribute(
        &self,
        path: &str,
        key: &str,
        attribute_type: AttributeType,
    ) -> Result<Option<Value>, BackendError>;

    fn set_attribute(&self, path: &str, key: &str, value: &Value) -> Result<(), BackendError>;

    /// The dimensions, block size, compression and element type of the dataset at `path`.
    fn dataset_attributes(&self, path: &str) -> Result<DatasetAttributes, BackendError>;

    /// Create a group and any missing ancestors.
    ///
    /// Creating a group that already exists is a no-op.
    ///
    /// # Errors
    /// Returns [`BackendError::NodeConflict`] if a dataset occupies `path` or one of its ancestors.
    fn create_group(&self, path: &str) -> Result<(), BackendError>;

    /// Create a dataset. The parent group must exist.
    ///
    /// An existing dataset at `path` is replaced.
    fn create_dataset(&self, path: &str, attributes: &DatasetAttributes)
        -> Result<(), BackendError>;

    /// Open a dataset for reading.
    ///
    /// # Errors
    /// Returns an error if the dataset does not exist or its element type or compression is unsupported.
    fn open_array(&self, path: &str) -> Result<Box<dyn ArrayReader>, BackendError>;

    /// Write the block at `grid_position` of the dataset at `path`.
    ///
    /// `bytes` holds the elements of the block bounded by the dataset dimensions, in the logical axis order.
    fn write_block(
        &self,
        path: &str,
        grid_position: &[u64],
        bytes: Vec<u8>,
    ) -> Result<(), BackendError>;

    /// Release any state held for writing the dataset at `path`.
    ///
    /// Called once all blocks of a dataset have been written or the write has failed.
    fn finish_dataset(&self, _path: &str) {}
}

/// A container opened on one of the supported backends.
#[enum_dispatch(StorageBackend)]
pub enum Container {
    Memory(MemoryBackend),
    N5(N5Backend),
    Zarr(ZarrBackend),
}
