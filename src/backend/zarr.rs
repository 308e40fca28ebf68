//! A directory-of-chunks container on a Zarr V3 hierarchy.
//!
//! Zarr stores the fastest varying axis last, so array shapes, chunk shapes and subsets are reversed at this boundary.
//! The bytes of a logical block are identical in both orders.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use serde::Deserialize;
use serde_json::{Map, Value};
use zarrs::{
    array::{
        codec::{
            bytes_to_bytes::{
                bz2::{Bz2Codec, Bz2CompressionLevel},
                gzip::GzipCodec,
            },
            BytesToBytesCodecTraits,
        },
        Array, ArrayBuilder, ArrayBytes, ArrayMetadataOptions, DataType, FillValue,
    },
    array_subset::ArraySubset,
    group::{Group, GroupBuilder},
    storage::{
        ReadableWritableListableStorage, ReadableWritableListableStorageTraits, StoreKey,
        StorePrefix,
    },
};
use zarrs_filesystem::FilesystemStore;

use crate::{
    attribute::{self, AttributeType},
    compression::Compression,
    dataset::{is_structural_attribute, DatasetAttributes, ElementType},
    path,
};

use super::{ArrayReader, BackendError, BackendKind, StorageBackend};

/// The gzip level written when the implementation default (-1) is requested.
const ZARR_DEFAULT_GZIP_LEVEL: u32 = 6;

/// The attribute holding `zarrs` version information, which is not a user attribute.
const ZARRS_METADATA_KEY: &str = "_zarrs";

type ZarrArray = Array<dyn ReadableWritableListableStorageTraits>;

#[derive(Deserialize)]
struct ZarrChunkGridConfiguration {
    chunk_shape: Vec<u64>,
}

#[derive(Deserialize)]
struct ZarrChunkGrid {
    configuration: ZarrChunkGridConfiguration,
}

#[derive(Deserialize)]
struct ZarrCodec {
    name: String,
    #[serde(default)]
    configuration: Map<String, Value>,
}

/// The parts of `zarr.json` node metadata relevant to migration.
#[derive(Deserialize)]
struct ZarrNodeMetadata {
    node_type: String,
    #[serde(default)]
    attributes: Map<String, Value>,
    #[serde(default)]
    shape: Vec<u64>,
    #[serde(default)]
    data_type: Option<Value>,
    #[serde(default)]
    chunk_grid: Option<ZarrChunkGrid>,
    #[serde(default)]
    codecs: Vec<ZarrCodec>,
}

impl ZarrNodeMetadata {
    fn is_array(&self) -> bool {
        self.node_type == "array"
    }

    fn dataset_attributes(&self, path: &str) -> Result<DatasetAttributes, BackendError> {
        if !self.is_array() {
            return Err(BackendError::NotADataset(path.to_string()));
        }
        let data_type = match &self.data_type {
            Some(Value::String(name)) => serde_json::from_value::<ElementType>(Value::String(
                name.clone(),
            ))
            .map_err(|_| BackendError::UnsupportedElementType(name.clone()))?,
            data_type => {
                return Err(BackendError::UnsupportedElementType(format!(
                    "{data_type:?}"
                )))
            }
        };
        let chunk_shape = self
            .chunk_grid
            .as_ref()
            .map(|chunk_grid| chunk_grid.configuration.chunk_shape.clone())
            .ok_or_else(|| {
                BackendError::InvalidDatasetAttributes(format!("{path} has no regular chunk grid"))
            })?;
        DatasetAttributes::new(
            self.shape.iter().rev().copied().collect(),
            chunk_shape.into_iter().rev().collect(),
            data_type,
            self.compression()?,
        )
    }

    fn compression(&self) -> Result<Compression, BackendError> {
        let mut compression = Compression::Raw;
        for codec in &self.codecs {
            let level = codec
                .configuration
                .get("level")
                .and_then(Value::as_u64)
                .and_then(|level| u32::try_from(level).ok());
            let name = codec.name.as_str();
            compression = match name.rsplit(['/', '.']).next().unwrap_or(name) {
                "bytes" => continue,
                "gzip" => Compression::Gzip {
                    level: level
                        .and_then(|level| i32::try_from(level).ok())
                        .unwrap_or(crate::compression::DEFAULT_GZIP_LEVEL),
                    use_zlib: false,
                },
                "bz2" => Compression::Bzip2 {
                    block_size: level.unwrap_or(crate::compression::DEFAULT_BZIP2_BLOCK_SIZE),
                },
                _ => return Err(BackendError::UnsupportedCompression(name.to_string())),
            };
        }
        Ok(compression)
    }
}

fn metadata_key(path: &str) -> Result<StoreKey, BackendError> {
    StoreKey::new(format!("{}zarr.json", path::store_prefix(path)))
        .map_err(|err| BackendError::InvalidPath(err.to_string()))
}

fn zarr_data_type(element_type: ElementType) -> Result<DataType, BackendError> {
    match element_type {
        ElementType::UInt8 => Ok(DataType::UInt8),
        ElementType::UInt16 => Ok(DataType::UInt16),
        ElementType::UInt32 => Ok(DataType::UInt32),
        ElementType::UInt64 => Ok(DataType::UInt64),
        ElementType::Int8 => Ok(DataType::Int8),
        ElementType::Int16 => Ok(DataType::Int16),
        ElementType::Int32 => Ok(DataType::Int32),
        ElementType::Int64 => Ok(DataType::Int64),
        ElementType::Float32 => Ok(DataType::Float32),
        ElementType::Float64 => Ok(DataType::Float64),
        ElementType::Object => Err(BackendError::UnsupportedElementType(
            element_type.to_string(),
        )),
    }
}

fn zarr_codecs(
    compression: &Compression,
) -> Result<Vec<Arc<dyn BytesToBytesCodecTraits>>, BackendError> {
    let unsupported = || BackendError::UnsupportedCompression(compression.to_string());
    match compression {
        Compression::Raw => Ok(vec![]),
        Compression::Gzip { level, .. } => {
            let level = u32::try_from(*level).map_or(ZARR_DEFAULT_GZIP_LEVEL, |level| level.min(9));
            let codec: Arc<dyn BytesToBytesCodecTraits> =
                Arc::new(GzipCodec::new(level).map_err(|_| unsupported())?);
            Ok(vec![codec])
        }
        Compression::Bzip2 { block_size } => {
            let level = Bz2CompressionLevel::new(*block_size).map_err(|_| unsupported())?;
            let codec: Arc<dyn BytesToBytesCodecTraits> = Arc::new(Bz2Codec::new(level));
            Ok(vec![codec])
        }
        Compression::Lz4 { .. } | Compression::Xz { .. } | Compression::Jpeg { .. } => {
            Err(unsupported())
        }
    }
}

/// Reverse the axes of a logical subset.
fn reverse_subset(subset: &ArraySubset) -> Result<ArraySubset, BackendError> {
    ArraySubset::new_with_start_shape(
        subset.start().iter().rev().copied().collect(),
        subset.shape().iter().rev().copied().collect(),
    )
    .map_err(|err| BackendError::InvalidSubset(err.to_string()))
}

fn metadata_options() -> ArrayMetadataOptions {
    let mut metadata_options = ArrayMetadataOptions::default();
    metadata_options.set_include_zarrs_metadata(false);
    metadata_options
}

/// A dataset being written.
struct ZarrDataset {
    array: ZarrArray,
    attributes: DatasetAttributes,
}

/// A Zarr V3 hierarchy.
pub struct ZarrBackend {
    storage: ReadableWritableListableStorage,
    datasets: Mutex<HashMap<String, Arc<ZarrDataset>>>,
}

impl ZarrBackend {
    #[must_use]
    pub fn new(storage: ReadableWritableListableStorage) -> Self {
        Self {
            storage,
            datasets: Mutex::new(HashMap::new()),
        }
    }

    /// Open an existing hierarchy in a directory.
    ///
    /// # Errors
    /// Returns an error if `path` is not a directory holding a Zarr V3 root node.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(BackendError::NotFound(path.display().to_string()));
        }
        let store = FilesystemStore::new(path)
            .map_err(|err| BackendError::UnsupportedContainer(err.to_string()))?;
        let backend = Self::new(Arc::new(store));
        if !backend.exists(path::ROOT)? {
            return Err(BackendError::UnsupportedContainer(format!(
                "{} has no zarr.json root node",
                path.display()
            )));
        }
        Ok(backend)
    }

    /// Open or create a hierarchy in a directory, creating the root group if required.
    ///
    /// # Errors
    /// Returns an error if the directory or root group cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let store = FilesystemStore::new(path)
            .map_err(|err| BackendError::UnsupportedContainer(err.to_string()))?;
        let backend = Self::new(Arc::new(store));
        backend.create_group(path::ROOT)?;
        Ok(backend)
    }

    fn node_metadata(&self, path: &str) -> Result<Option<ZarrNodeMetadata>, BackendError> {
        let Some(bytes) = self.storage.get(&metadata_key(path)?)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn expect_node_metadata(&self, path: &str) -> Result<ZarrNodeMetadata, BackendError> {
        self.node_metadata(path)?
            .ok_or_else(|| BackendError::NotFound(path::normalize(path)))
    }

    /// The dataset at `path` as cached by [`create_dataset`](StorageBackend::create_dataset), or opened if not cached.
    fn dataset(&self, path: &str) -> Result<Arc<ZarrDataset>, BackendError> {
        let path = path::normalize(path);
        if let Some(dataset) = self.datasets.lock().unwrap().get(&path) {
            return Ok(dataset.clone());
        }
        let dataset = Arc::new(ZarrDataset {
            attributes: self.dataset_attributes(&path)?,
            array: Array::open(self.storage.clone(), &path)?,
        });
        self.datasets
            .lock()
            .unwrap()
            .entry(path)
            .or_insert_with(|| dataset.clone());
        Ok(dataset)
    }
}

struct ZarrArrayReader {
    array: ZarrArray,
    attributes: DatasetAttributes,
}

impl ArrayReader for ZarrArrayReader {
    fn read_subset(&self, subset: &ArraySubset) -> Result<Vec<u8>, BackendError> {
        let dimensions = self.attributes.dimensions();
        let in_bounds = subset.dimensionality() == dimensions.len()
            && itertools::izip!(subset.start(), subset.shape(), dimensions)
                .all(|(start, length, dimension)| start + length <= *dimension);
        if !in_bounds {
            return Err(BackendError::InvalidSubset(format!(
                "{subset:?} is out of bounds of an array with dimensions {dimensions:?}"
            )));
        }
        match self.array.retrieve_array_subset(&reverse_subset(subset)?)? {
            ArrayBytes::Fixed(bytes) => Ok(bytes.into_owned()),
            ArrayBytes::Variable(..) => Err(BackendError::UnsupportedElementType(
                self.attributes.data_type().to_string(),
            )),
        }
    }
}

impl StorageBackend for ZarrBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Zarr
    }

    fn exists(&self, path: &str) -> Result<bool, BackendError> {
        Ok(self.storage.get(&metadata_key(path)?)?.is_some())
    }

    fn is_dataset(&self, path: &str) -> Result<bool, BackendError> {
        Ok(self
            .node_metadata(path)?
            .is_some_and(|metadata| metadata.is_array()))
    }

    fn list_children(&self, path: &str) -> Result<Vec<String>, BackendError> {
        let metadata = self.expect_node_metadata(path)?;
        if metadata.is_array() {
            return Ok(vec![]);
        }
        let parent = path::store_prefix(path);
        let prefix = StorePrefix::new(parent.clone())
            .map_err(|err| BackendError::InvalidPath(err.to_string()))?;
        let mut children = vec![];
        for child in self.storage.list_dir(&prefix)?.prefixes() {
            let child = child.as_str();
            let name = child
                .strip_prefix(parent.as_str())
                .unwrap_or(child)
                .trim_end_matches('/');
            if self.exists(&path::join(path, name))? {
                children.push(name.to_string());
            }
        }
        Ok(children)
    }

    fn list_attributes(&self, path: &str) -> Result<Vec<(String, AttributeType)>, BackendError> {
        let metadata = self.expect_node_metadata(path)?;
        Ok(metadata
            .attributes
            .iter()
            .filter(|(key, _)| key.as_str() != ZARRS_METADATA_KEY)
            .map(|(key, value)| (key.clone(), AttributeType::of(value)))
            .collect())
    }

    fn get_attribute(
        &self,
        path: &str,
        key: &str,
        attribute_type: AttributeType,
    ) -> Result<Option<Value>, BackendError> {
        let mut metadata = self.expect_node_metadata(path)?;
        if key == ZARRS_METADATA_KEY {
            return Ok(None);
        }
        metadata
            .attributes
            .remove(key)
            .map(|value| attribute::expect_type(key, attribute_type, value))
            .transpose()
    }

    fn set_attribute(&self, path: &str, key: &str, value: &Value) -> Result<(), BackendError> {
        let path = path::normalize(path);
        if self.expect_node_metadata(&path)?.is_array() {
            if is_structural_attribute(key) {
                return Err(BackendError::StructuralAttribute(key.to_string()));
            }
            let mut array = Array::open(self.storage.clone(), &path)?;
            array.attributes_mut().insert(key.to_string(), value.clone());
            array.store_metadata_opt(&metadata_options())?;
        } else {
            let mut group = Group::open(self.storage.clone(), &path)?;
            group.attributes_mut().insert(key.to_string(), value.clone());
            group.store_metadata()?;
        }
        Ok(())
    }

    fn dataset_attributes(&self, path: &str) -> Result<DatasetAttributes, BackendError> {
        self.expect_node_metadata(path)?
            .dataset_attributes(&path::normalize(path))
    }

    fn create_group(&self, path: &str) -> Result<(), BackendError> {
        let path = path::normalize(path);
        let mut lineage = path::ancestors(&path);
        lineage.push(path);
        for group in lineage {
            match self.node_metadata(&group)? {
                Some(metadata) if metadata.is_array() => {
                    return Err(BackendError::NodeConflict(group))
                }
                Some(_) => {}
                None => {
                    GroupBuilder::new()
                        .build(self.storage.clone(), &group)?
                        .store_metadata()?;
                }
            }
        }
        Ok(())
    }

    fn create_dataset(
        &self,
        path: &str,
        attributes: &DatasetAttributes,
    ) -> Result<(), BackendError> {
        let path = path::normalize(path);
        let parent = path::parent(&path).ok_or(BackendError::NodeConflict(path.clone()))?;
        match self.node_metadata(&parent)? {
            Some(metadata) if metadata.is_array() => {
                return Err(BackendError::NodeConflict(parent))
            }
            Some(_) => {}
            None => return Err(BackendError::ParentMissing(path)),
        }
        match self.node_metadata(&path)? {
            Some(metadata) if !metadata.is_array() => {
                return Err(BackendError::NodeConflict(path))
            }
            Some(_) => {
                let prefix = StorePrefix::new(path::store_prefix(&path))
                    .map_err(|err| BackendError::InvalidPath(err.to_string()))?;
                self.storage.erase_prefix(&prefix)?;
            }
            None => {}
        }

        let element_size = attributes.data_type().size().ok_or_else(|| {
            BackendError::UnsupportedElementType(attributes.data_type().to_string())
        })?;
        let shape = attributes.dimensions().iter().rev().copied().collect::<Vec<_>>();
        let chunk_shape = attributes.block_size().iter().rev().copied().collect::<Vec<_>>();
        let mut array_builder = ArrayBuilder::new(
            shape,
            zarr_data_type(attributes.data_type())?,
            chunk_shape.clone().try_into().map_err(|_| {
                BackendError::InvalidDatasetAttributes(format!("chunk shape {chunk_shape:?}"))
            })?,
            FillValue::new(vec![0; element_size]),
        );
        array_builder.bytes_to_bytes_codecs(zarr_codecs(attributes.compression())?);
        let array = array_builder.build(self.storage.clone(), &path)?;
        array.store_metadata_opt(&metadata_options())?;
        let dataset = ZarrDataset {
            array,
            attributes: attributes.clone(),
        };
        self.datasets
            .lock()
            .unwrap()
            .insert(path, Arc::new(dataset));
        Ok(())
    }

    fn open_array(&self, path: &str) -> Result<Box<dyn ArrayReader>, BackendError> {
        let attributes = self.dataset_attributes(path)?;
        zarr_data_type(attributes.data_type())?;
        let array = Array::open(self.storage.clone(), &path::normalize(path))?;
        Ok(Box::new(ZarrArrayReader { array, attributes }))
    }

    fn write_block(
        &self,
        path: &str,
        grid_position: &[u64],
        bytes: Vec<u8>,
    ) -> Result<(), BackendError> {
        let dataset = self.dataset(path)?;
        let attributes = &dataset.attributes;
        let subset = attributes.block_subset(grid_position)?;
        let expected = usize::try_from(subset.num_elements())
            .ok()
            .and_then(|num_elements| {
                attributes
                    .data_type()
                    .size()
                    .and_then(|size| size.checked_mul(num_elements))
            })
            .unwrap_or(0);
        if bytes.len() != expected {
            return Err(BackendError::InvalidBlockLength {
                expected,
                actual: bytes.len(),
            });
        }
        dataset
            .array
            .store_array_subset(&reverse_subset(&subset)?, bytes)?;
        Ok(())
    }

    fn finish_dataset(&self, path: &str) {
        self.datasets.lock().unwrap().remove(&path::normalize(path));
    }
}
