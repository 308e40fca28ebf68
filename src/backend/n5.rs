//! A directory-of-chunks container in the N5 format.
//!
//! N5 stores the fastest varying axis first, which is the logical order, so shapes and grid positions are used as is.
//! The structural and free attributes of a node share its `attributes.json`.
//! A block is stored at `<node>/<i0>/<i1>/...` as a big endian header followed by the compressed elements in big endian byte order.
//! Edge blocks are truncated to the dataset dimensions.

use std::{
    collections::HashMap,
    io::{Read, Write},
    path::Path,
    sync::{Arc, Mutex},
};

use itertools::Itertools;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use zarrs::{
    array_subset::ArraySubset,
    storage::{ReadableWritableListableStorage, StoreKey, StorePrefix},
};
use zarrs_filesystem::FilesystemStore;

use crate::{
    attribute::{self, AttributeType},
    compression::Compression,
    dataset::{is_structural_attribute, DatasetAttributes, ElementType},
    path,
};

use super::{dense, ArrayReader, BackendError, BackendKind, StorageBackend};

const ATTRIBUTES_FILE: &str = "attributes.json";

/// The root attribute holding the format version.
const N5_VERSION_KEY: &str = "n5";
const N5_VERSION: &str = "4.0.0";

const BLOCK_MODE_DEFAULT: u16 = 0;
const BLOCK_MODE_VARLENGTH: u16 = 1;
const BLOCK_MODE_OBJECT: u16 = 2;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct N5DatasetMetadata {
    dimensions: Vec<u64>,
    block_size: Vec<u64>,
    data_type: String,
    #[serde(default)]
    compression: Option<Value>,
    /// Compression of containers written before version 1.0.0.
    #[serde(default)]
    compression_type: Option<String>,
}

impl N5DatasetMetadata {
    fn dataset_attributes(self) -> Result<DatasetAttributes, BackendError> {
        let data_type = serde_json::from_value::<ElementType>(Value::String(self.data_type.clone()))
            .map_err(|_| BackendError::UnsupportedElementType(self.data_type.clone()))?;
        let compression = match (self.compression, self.compression_type) {
            (Some(compression), _) => parse_compression(compression)?,
            (None, Some(compression_type)) => {
                parse_compression(json!({ "type": compression_type }))?
            }
            (None, None) => Compression::Raw,
        };
        DatasetAttributes::new(self.dimensions, self.block_size, data_type, compression)
    }
}

fn parse_compression(value: Value) -> Result<Compression, BackendError> {
    let name = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    serde_json::from_value(value).map_err(|_| BackendError::UnsupportedCompression(name))
}

fn is_dataset_metadata(attributes: &Map<String, Value>) -> bool {
    attributes.contains_key("dimensions") && attributes.contains_key("dataType")
}

fn attributes_key(path: &str) -> Result<StoreKey, BackendError> {
    StoreKey::new(format!("{}{ATTRIBUTES_FILE}", path::store_prefix(path)))
        .map_err(|err| BackendError::InvalidPath(err.to_string()))
}

fn block_key(path: &str, grid_position: &[u64]) -> Result<StoreKey, BackendError> {
    StoreKey::new(format!(
        "{}{}",
        path::store_prefix(path),
        grid_position.iter().join("/")
    ))
    .map_err(|err| BackendError::InvalidPath(err.to_string()))
}

fn is_supported(compression: &Compression) -> bool {
    matches!(
        compression,
        Compression::Raw | Compression::Gzip { .. } | Compression::Bzip2 { .. }
    )
}

fn compress(compression: &Compression, bytes: &[u8]) -> Result<Vec<u8>, BackendError> {
    match compression {
        Compression::Raw => Ok(bytes.to_vec()),
        Compression::Gzip { level, use_zlib } => {
            let level = u32::try_from(*level).map_or(flate2::Compression::default(), |level| {
                flate2::Compression::new(level.min(9))
            });
            if *use_zlib {
                let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), level);
                encoder.write_all(bytes)?;
                Ok(encoder.finish()?)
            } else {
                let mut encoder = flate2::write::GzEncoder::new(Vec::new(), level);
                encoder.write_all(bytes)?;
                Ok(encoder.finish()?)
            }
        }
        Compression::Bzip2 { block_size } => {
            let level = bzip2::Compression::new((*block_size).clamp(1, 9));
            let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), level);
            encoder.write_all(bytes)?;
            Ok(encoder.finish()?)
        }
        Compression::Lz4 { .. } | Compression::Xz { .. } | Compression::Jpeg { .. } => Err(
            BackendError::UnsupportedCompression(compression.to_string()),
        ),
    }
}

fn decompress(compression: &Compression, bytes: &[u8]) -> Result<Vec<u8>, BackendError> {
    let mut decompressed = Vec::new();
    match compression {
        Compression::Raw => return Ok(bytes.to_vec()),
        Compression::Gzip { use_zlib: true, .. } => {
            flate2::read::ZlibDecoder::new(bytes).read_to_end(&mut decompressed)?
        }
        Compression::Gzip { .. } => {
            flate2::read::GzDecoder::new(bytes).read_to_end(&mut decompressed)?
        }
        Compression::Bzip2 { .. } => {
            bzip2::read::BzDecoder::new(bytes).read_to_end(&mut decompressed)?
        }
        Compression::Lz4 { .. } | Compression::Xz { .. } | Compression::Jpeg { .. } => {
            return Err(BackendError::UnsupportedCompression(
                compression.to_string(),
            ))
        }
    };
    Ok(decompressed)
}

/// Swap elements between native and big endian byte order.
fn swap_big_endian(bytes: &mut [u8], element_size: usize) {
    if cfg!(target_endian = "little") && element_size > 1 {
        bytes
            .chunks_exact_mut(element_size)
            .for_each(<[u8]>::reverse);
    }
}

/// Encode the elements of a block with shape `shape`.
fn encode_block(
    compression: &Compression,
    element_size: usize,
    shape: &[u64],
    mut bytes: Vec<u8>,
) -> Result<Vec<u8>, BackendError> {
    let ndim = u16::try_from(shape.len())
        .map_err(|_| BackendError::InvalidBlock(format!("rank {} is too large", shape.len())))?;
    swap_big_endian(&mut bytes, element_size);
    let data = compress(compression, &bytes)?;

    let mut block = Vec::with_capacity(4 + 4 * shape.len() + data.len());
    block.extend(BLOCK_MODE_DEFAULT.to_be_bytes());
    block.extend(ndim.to_be_bytes());
    for length in shape {
        let length = u32::try_from(*length)
            .map_err(|_| BackendError::InvalidBlock(format!("shape {shape:?} is too large")))?;
        block.extend(length.to_be_bytes());
    }
    block.extend(data);
    Ok(block)
}

/// Decode a block into its shape and its elements in native byte order.
fn decode_block(
    compression: &Compression,
    element_size: usize,
    block: &[u8],
) -> Result<(Vec<u64>, Vec<u8>), BackendError> {
    let truncated = || BackendError::InvalidBlock("truncated header".to_string());
    let read_u16 = |offset: usize| {
        block
            .get(offset..offset + 2)
            .and_then(|bytes| bytes.try_into().ok())
            .map(u16::from_be_bytes)
            .ok_or_else(truncated)
    };
    let read_u32 = |offset: usize| {
        block
            .get(offset..offset + 4)
            .and_then(|bytes| bytes.try_into().ok())
            .map(u32::from_be_bytes)
            .ok_or_else(truncated)
    };

    let mode = read_u16(0)?;
    let ndim = usize::from(read_u16(2)?);
    let shape = (0..ndim)
        .map(|axis| read_u32(4 + 4 * axis).map(u64::from))
        .collect::<Result<Vec<_>, _>>()?;
    let mut offset = 4 + 4 * ndim;
    let num_elements = match mode {
        BLOCK_MODE_DEFAULT => shape.iter().product::<u64>(),
        BLOCK_MODE_VARLENGTH => {
            let num_elements = read_u32(offset)?;
            offset += 4;
            u64::from(num_elements)
        }
        BLOCK_MODE_OBJECT => {
            return Err(BackendError::UnsupportedElementType(
                ElementType::Object.to_string(),
            ))
        }
        mode => return Err(BackendError::InvalidBlock(format!("unknown mode {mode}"))),
    };

    let mut bytes = decompress(compression, block.get(offset..).ok_or_else(truncated)?)?;
    let expected = usize::try_from(num_elements)
        .ok()
        .and_then(|num_elements| num_elements.checked_mul(element_size));
    if expected != Some(bytes.len()) || shape.iter().product::<u64>() != num_elements {
        return Err(BackendError::InvalidBlockLength {
            expected: expected.unwrap_or(0),
            actual: bytes.len(),
        });
    }
    swap_big_endian(&mut bytes, element_size);
    Ok((shape, bytes))
}

/// The intersection of `subset` and `block`, relative to the start of `block` and to the start of `subset`.
fn overlap(
    subset: &ArraySubset,
    block: &ArraySubset,
) -> Result<(ArraySubset, ArraySubset), BackendError> {
    let mut in_block = (vec![], vec![]);
    let mut in_subset = (vec![], vec![]);
    for (subset_start, subset_length, block_start, block_length) in itertools::izip!(
        subset.start(),
        subset.shape(),
        block.start(),
        block.shape()
    ) {
        let start = (*subset_start).max(*block_start);
        let end = (subset_start + subset_length).min(block_start + block_length);
        let length = end.saturating_sub(start);
        in_block.0.push(start - block_start);
        in_block.1.push(length);
        in_subset.0.push(start - subset_start);
        in_subset.1.push(length);
    }
    let to_subset = |(start, shape): (Vec<u64>, Vec<u64>)| {
        ArraySubset::new_with_start_shape(start, shape)
            .map_err(|err| BackendError::InvalidSubset(err.to_string()))
    };
    Ok((to_subset(in_block)?, to_subset(in_subset)?))
}

/// An N5 container.
pub struct N5Backend {
    storage: ReadableWritableListableStorage,
    datasets: Mutex<HashMap<String, Arc<DatasetAttributes>>>,
}

impl N5Backend {
    #[must_use]
    pub fn new(storage: ReadableWritableListableStorage) -> Self {
        Self {
            storage,
            datasets: Mutex::new(HashMap::new()),
        }
    }

    /// Open an existing container in a directory.
    ///
    /// # Errors
    /// Returns an error if `path` is not a directory holding a root `attributes.json`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(BackendError::NotFound(path.display().to_string()));
        }
        let store = FilesystemStore::new(path)
            .map_err(|err| BackendError::UnsupportedContainer(err.to_string()))?;
        let backend = Self::new(Arc::new(store));
        if backend.read_attributes(path::ROOT)?.is_none() {
            return Err(BackendError::UnsupportedContainer(format!(
                "{} has no root {ATTRIBUTES_FILE}",
                path.display()
            )));
        }
        Ok(backend)
    }

    /// Open or create a container in a directory, recording the format version at the root.
    ///
    /// # Errors
    /// Returns an error if the directory or root attributes cannot be written.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let store = FilesystemStore::new(path)
            .map_err(|err| BackendError::UnsupportedContainer(err.to_string()))?;
        let backend = Self::new(Arc::new(store));
        let mut attributes = backend.read_attributes(path::ROOT)?.unwrap_or_default();
        if !attributes.contains_key(N5_VERSION_KEY) {
            attributes.insert(N5_VERSION_KEY.to_string(), json!(N5_VERSION));
            backend.write_attributes(path::ROOT, &attributes)?;
        }
        Ok(backend)
    }

    fn read_attributes(&self, path: &str) -> Result<Option<Map<String, Value>>, BackendError> {
        let Some(bytes) = self.storage.get(&attributes_key(path)?)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn write_attributes(
        &self,
        path: &str,
        attributes: &Map<String, Value>,
    ) -> Result<(), BackendError> {
        let bytes = serde_json::to_vec_pretty(attributes)?;
        self.storage.set(&attributes_key(path)?, bytes.into())?;
        Ok(())
    }

    /// The attributes of an existing node. A group directory without `attributes.json` has none.
    fn node_attributes(&self, path: &str) -> Result<Map<String, Value>, BackendError> {
        match self.read_attributes(path)? {
            Some(attributes) => Ok(attributes),
            None if self.exists(path)? => Ok(Map::new()),
            None => Err(BackendError::NotFound(path::normalize(path))),
        }
    }

    fn store_prefix(path: &str) -> Result<StorePrefix, BackendError> {
        StorePrefix::new(path::store_prefix(path))
            .map_err(|err| BackendError::InvalidPath(err.to_string()))
    }

    /// The attributes of the dataset at `path` as cached by [`create_dataset`](StorageBackend::create_dataset), or read if not cached.
    fn cached_dataset_attributes(
        &self,
        path: &str,
    ) -> Result<Arc<DatasetAttributes>, BackendError> {
        let path = path::normalize(path);
        if let Some(attributes) = self.datasets.lock().unwrap().get(&path) {
            return Ok(attributes.clone());
        }
        let attributes = Arc::new(self.dataset_attributes(&path)?);
        self.datasets
            .lock()
            .unwrap()
            .entry(path)
            .or_insert_with(|| attributes.clone());
        Ok(attributes)
    }
}

struct N5ArrayReader {
    storage: ReadableWritableListableStorage,
    path: String,
    attributes: DatasetAttributes,
    element_size: usize,
}

impl N5ArrayReader {
    fn read_block(
        &self,
        grid_position: &[u64],
    ) -> Result<Option<(Vec<u64>, Vec<u8>)>, BackendError> {
        let Some(block) = self.storage.get(&block_key(&self.path, grid_position)?)? else {
            return Ok(None);
        };
        let (shape, bytes) =
            decode_block(self.attributes.compression(), self.element_size, &block)?;
        let bounded = self.attributes.block_subset(grid_position)?;
        if shape.len() != bounded.dimensionality()
            || std::iter::zip(&shape, bounded.shape()).any(|(length, bounded)| length < bounded)
        {
            return Err(BackendError::InvalidBlock(format!(
                "{} {grid_position:?} has shape {shape:?}, expected {:?}",
                self.path,
                bounded.shape()
            )));
        }
        Ok(Some((shape, bytes)))
    }
}

impl ArrayReader for N5ArrayReader {
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

        // Missing blocks read as zero
        let mut bytes = vec![0; subset.num_elements_usize() * self.element_size];
        let block_size = self.attributes.block_size();
        let grid_start = std::iter::zip(subset.start(), block_size)
            .map(|(start, block)| start / block)
            .collect::<Vec<_>>();
        let grid_shape =
            itertools::izip!(subset.start(), subset.shape(), block_size, &grid_start)
                .map(|(start, length, block, grid_start)| {
                    (start + length).div_ceil(*block) - grid_start
                })
                .collect::<Vec<_>>();
        let grid = ArraySubset::new_with_start_shape(grid_start, grid_shape)
            .map_err(|err| BackendError::InvalidSubset(err.to_string()))?;
        for grid_position in grid.indices().iter() {
            let Some((shape, block)) = self.read_block(&grid_position)? else {
                continue;
            };
            let (in_block, in_subset) =
                overlap(subset, &self.attributes.block_subset(&grid_position)?)?;
            let elements = dense::read_subset(&block, &shape, self.element_size, &in_block)?;
            dense::write_subset(
                &mut bytes,
                subset.shape(),
                self.element_size,
                &in_subset,
                &elements,
            )?;
        }
        Ok(bytes)
    }
}

impl StorageBackend for N5Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::N5
    }

    fn exists(&self, path: &str) -> Result<bool, BackendError> {
        if self.read_attributes(path)?.is_some() {
            return Ok(true);
        }
        let listing = self.storage.list_dir(&Self::store_prefix(path)?)?;
        Ok(!listing.keys().is_empty() || !listing.prefixes().is_empty())
    }

    fn is_dataset(&self, path: &str) -> Result<bool, BackendError> {
        Ok(self
            .read_attributes(path)?
            .is_some_and(|attributes| is_dataset_metadata(&attributes)))
    }

    fn list_children(&self, path: &str) -> Result<Vec<String>, BackendError> {
        if is_dataset_metadata(&self.node_attributes(path)?) {
            return Ok(vec![]);
        }
        let parent = path::store_prefix(path);
        Ok(self
            .storage
            .list_dir(&Self::store_prefix(path)?)?
            .prefixes()
            .iter()
            .map(|child| {
                let child = child.as_str();
                child
                    .strip_prefix(parent.as_str())
                    .unwrap_or(child)
                    .trim_end_matches('/')
                    .to_string()
            })
            .collect())
    }

    fn list_attributes(&self, path: &str) -> Result<Vec<(String, AttributeType)>, BackendError> {
        let is_root = path::normalize(path) == path::ROOT;
        Ok(self
            .node_attributes(path)?
            .iter()
            .filter(|(key, _)| !(is_root && key.as_str() == N5_VERSION_KEY))
            .map(|(key, value)| (key.clone(), AttributeType::of(value)))
            .collect())
    }

    fn get_attribute(
        &self,
        path: &str,
        key: &str,
        attribute_type: AttributeType,
    ) -> Result<Option<Value>, BackendError> {
        let mut attributes = self.node_attributes(path)?;
        if path::normalize(path) == path::ROOT && key == N5_VERSION_KEY {
            return Ok(None);
        }
        attributes
            .remove(key)
            .map(|value| attribute::expect_type(key, attribute_type, value))
            .transpose()
    }

    fn set_attribute(&self, path: &str, key: &str, value: &Value) -> Result<(), BackendError> {
        let mut attributes = self.node_attributes(path)?;
        if is_dataset_metadata(&attributes) && is_structural_attribute(key) {
            return Err(BackendError::StructuralAttribute(key.to_string()));
        }
        attributes.insert(key.to_string(), value.clone());
        self.write_attributes(path, &attributes)
    }

    fn dataset_attributes(&self, path: &str) -> Result<DatasetAttributes, BackendError> {
        let path = path::normalize(path);
        let attributes = self
            .read_attributes(&path)?
            .ok_or_else(|| BackendError::NotFound(path.clone()))?;
        if !is_dataset_metadata(&attributes) {
            return Err(BackendError::NotADataset(path));
        }
        serde_json::from_value::<N5DatasetMetadata>(Value::Object(attributes))?
            .dataset_attributes()
    }

    fn create_group(&self, path: &str) -> Result<(), BackendError> {
        let path = path::normalize(path);
        let mut lineage = path::ancestors(&path);
        lineage.push(path);
        for group in lineage {
            match self.read_attributes(&group)? {
                Some(attributes) if is_dataset_metadata(&attributes) => {
                    return Err(BackendError::NodeConflict(group))
                }
                Some(_) => {}
                None => self.write_attributes(&group, &Map::new())?,
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
        if !self.exists(&parent)? {
            return Err(BackendError::ParentMissing(path));
        }
        if self.is_dataset(&parent)? {
            return Err(BackendError::NodeConflict(parent));
        }
        if self.is_dataset(&path)? {
            self.storage.erase_prefix(&Self::store_prefix(&path)?)?;
        } else if self.exists(&path)? {
            return Err(BackendError::NodeConflict(path));
        }

        if attributes.data_type().size().is_none() {
            return Err(BackendError::UnsupportedElementType(
                attributes.data_type().to_string(),
            ));
        }
        if !is_supported(attributes.compression()) {
            return Err(BackendError::UnsupportedCompression(
                attributes.compression().to_string(),
            ));
        }
        self.write_attributes(&path, &attributes.to_attributes())?;
        self.datasets
            .lock()
            .unwrap()
            .insert(path, Arc::new(attributes.clone()));
        Ok(())
    }

    fn open_array(&self, path: &str) -> Result<Box<dyn ArrayReader>, BackendError> {
        let attributes = self.dataset_attributes(path)?;
        let element_size = attributes.data_type().size().ok_or_else(|| {
            BackendError::UnsupportedElementType(attributes.data_type().to_string())
        })?;
        if !is_supported(attributes.compression()) {
            return Err(BackendError::UnsupportedCompression(
                attributes.compression().to_string(),
            ));
        }
        Ok(Box::new(N5ArrayReader {
            storage: self.storage.clone(),
            path: path::normalize(path),
            attributes,
            element_size,
        }))
    }

    fn write_block(
        &self,
        path: &str,
        grid_position: &[u64],
        bytes: Vec<u8>,
    ) -> Result<(), BackendError> {
        let attributes = self.cached_dataset_attributes(path)?;
        let element_size = attributes.data_type().size().ok_or_else(|| {
            BackendError::UnsupportedElementType(attributes.data_type().to_string())
        })?;
        let subset = attributes.block_subset(grid_position)?;
        let expected = subset.num_elements_usize() * element_size;
        if bytes.len() != expected {
            return Err(BackendError::InvalidBlockLength {
                expected,
                actual: bytes.len(),
            });
        }
        let block = encode_block(attributes.compression(), element_size, subset.shape(), bytes)?;
        self.storage
            .set(&block_key(path, grid_position)?, block.into())?;
        Ok(())
    }

    fn finish_dataset(&self, path: &str) {
        self.datasets.lock().unwrap().remove(&path::normalize(path));
    }
}
