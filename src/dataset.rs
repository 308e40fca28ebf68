//! Dataset structural attributes and block grid arithmetic.

use serde::{Deserialize, Serialize};
use zarrs::array_subset::ArraySubset;

use crate::{backend::BackendError, compression::Compression};

/// Attribute keys conveying the structure of a dataset rather than free metadata.
///
/// These are never copied as free attributes, since the destination structure may differ from the source.
pub const STRUCTURAL_ATTRIBUTE_KEYS: [&str; 4] = ["dimensions", "blockSize", "dataType", "compression"];

/// Returns true if `key` names a structural attribute.
#[must_use]
pub fn is_structural_attribute(key: &str) -> bool {
    STRUCTURAL_ATTRIBUTE_KEYS.contains(&key)
}

/// The element type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Serialised objects. These cannot be copied block-wise.
    Object,
}

impl ElementType {
    /// The size of an element in bytes, or [`None`] if it is not fixed.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        match self {
            Self::UInt8 | Self::Int8 => Some(1),
            Self::UInt16 | Self::Int16 => Some(2),
            Self::UInt32 | Self::Int32 | Self::Float32 => Some(4),
            Self::UInt64 | Self::Int64 | Self::Float64 => Some(8),
            Self::Object => None,
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&name)
    }
}

/// The structural attributes of a dataset.
///
/// Dimensions and block size are in the logical axis order, fastest varying axis first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetAttributes {
    dimensions: Vec<u64>,
    block_size: Vec<u64>,
    data_type: ElementType,
    compression: Compression,
}

impl DatasetAttributes {
    /// Create dataset attributes.
    ///
    /// # Errors
    /// Returns [`BackendError::InvalidDatasetAttributes`] if the dimensions are empty, the block size rank differs from the dimensions rank, or any block size or dimension is zero.
    pub fn new(
        dimensions: Vec<u64>,
        block_size: Vec<u64>,
        data_type: ElementType,
        compression: Compression,
    ) -> Result<Self, BackendError> {
        if dimensions.is_empty() {
            return Err(BackendError::InvalidDatasetAttributes(
                "datasets must have at least one dimension".to_string(),
            ));
        }
        if dimensions.len() != block_size.len() {
            return Err(BackendError::InvalidDatasetAttributes(format!(
                "block size {block_size:?} does not match the rank of dimensions {dimensions:?}"
            )));
        }
        if dimensions.contains(&0) || block_size.contains(&0) {
            return Err(BackendError::InvalidDatasetAttributes(format!(
                "dimensions {dimensions:?} and block size {block_size:?} must be positive"
            )));
        }
        Ok(Self {
            dimensions,
            block_size,
            data_type,
            compression,
        })
    }

    #[must_use]
    pub fn dimensions(&self) -> &[u64] {
        &self.dimensions
    }

    #[must_use]
    pub fn block_size(&self) -> &[u64] {
        &self.block_size
    }

    #[must_use]
    pub fn data_type(&self) -> ElementType {
        self.data_type
    }

    #[must_use]
    pub fn compression(&self) -> &Compression {
        &self.compression
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Replace the block size.
    ///
    /// # Errors
    /// Returns an error if the block size is incompatible with the dimensions.
    pub fn with_block_size(&self, block_size: Vec<u64>) -> Result<Self, BackendError> {
        Self::new(
            self.dimensions.clone(),
            block_size,
            self.data_type,
            self.compression,
        )
    }

    /// Replace the compression.
    #[must_use]
    pub fn with_compression(&self, compression: Compression) -> Self {
        Self {
            compression,
            ..self.clone()
        }
    }

    /// The number of blocks along each dimension.
    #[must_use]
    pub fn grid_shape(&self) -> Vec<u64> {
        std::iter::zip(&self.dimensions, &self.block_size)
            .map(|(dimension, block)| dimension.div_ceil(*block))
            .collect()
    }

    /// The total number of blocks.
    #[must_use]
    pub fn num_blocks(&self) -> u64 {
        self.grid_shape().iter().product()
    }

    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.dimensions.iter().product()
    }

    /// The size of the whole array in bytes, or [`None`] for variable sized elements.
    #[must_use]
    pub fn size_bytes(&self) -> Option<usize> {
        let num_elements = usize::try_from(self.num_elements()).ok()?;
        self.data_type
            .size()
            .and_then(|size| size.checked_mul(num_elements))
    }

    /// The region of the array covered by the block at `grid_position`, bounded by the array dimensions.
    ///
    /// # Errors
    /// Returns [`BackendError::InvalidGridPosition`] if the grid position is outside of the block grid.
    pub fn block_subset(&self, grid_position: &[u64]) -> Result<ArraySubset, BackendError> {
        let grid_shape = self.grid_shape();
        if grid_position.len() != grid_shape.len()
            || std::iter::zip(grid_position, &grid_shape).any(|(index, blocks)| index >= blocks)
        {
            return Err(BackendError::InvalidGridPosition(grid_position.to_vec()));
        }
        let start = std::iter::zip(grid_position, &self.block_size)
            .map(|(index, block)| index * block)
            .collect::<Vec<_>>();
        let shape = itertools::izip!(&start, &self.block_size, &self.dimensions)
            .map(|(start, block, dimension)| std::cmp::min(*block, dimension - start))
            .collect::<Vec<_>>();
        ArraySubset::new_with_start_shape(start, shape)
            .map_err(|err| BackendError::InvalidSubset(err.to_string()))
    }

    /// The structural attributes as they appear in an N5 style attribute map.
    #[must_use]
    pub fn to_attributes(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}
