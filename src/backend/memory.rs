//! An in-process container usable as any [`BackendKind`].

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use serde_json::{Map, Value};
use zarrs::array_subset::ArraySubset;

use crate::{
    attribute::{self, AttributeType},
    dataset::{is_structural_attribute, DatasetAttributes},
    path,
};

use super::{dense, ArrayReader, BackendError, BackendKind, StorageBackend};

struct MemoryDataset {
    attributes: DatasetAttributes,
    data: RwLock<Vec<u8>>,
}

enum MemoryNodeType {
    Group { children: Vec<String> },
    Dataset(Arc<MemoryDataset>),
}

struct MemoryNode {
    node_type: MemoryNodeType,
    attributes: Map<String, Value>,
}

impl MemoryNode {
    fn group() -> Self {
        Self {
            node_type: MemoryNodeType::Group { children: vec![] },
            attributes: Map::new(),
        }
    }

    fn dataset(&self) -> Option<&Arc<MemoryDataset>> {
        match &self.node_type {
            MemoryNodeType::Dataset(dataset) => Some(dataset),
            MemoryNodeType::Group { .. } => None,
        }
    }
}

/// An in-memory container.
///
/// Children are listed in insertion order.
/// Dataset elements are stored uncompressed, the compression descriptor is recorded as is.
/// Like N5 containers, the structural attributes of a dataset appear in its attribute listing but cannot be set.
///
/// As [`BackendKind::Hdf5`], null and object valued attributes are rejected and concurrent block writers fail.
pub struct MemoryBackend {
    kind: BackendKind,
    nodes: Mutex<HashMap<String, MemoryNode>>,
    protected: Mutex<Vec<String>>,
    write_delay: Option<Duration>,
    active_writers: AtomicUsize,
    peak_writers: AtomicUsize,
}

impl MemoryBackend {
    /// Create an empty container with a root group.
    #[must_use]
    pub fn new(kind: BackendKind) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(path::ROOT.to_string(), MemoryNode::group());
        Self {
            kind,
            nodes: Mutex::new(nodes),
            protected: Mutex::new(vec![]),
            write_delay: None,
            active_writers: AtomicUsize::new(0),
            peak_writers: AtomicUsize::new(0),
        }
    }

    /// Delay each block write, simulating a slow store.
    #[must_use]
    pub fn with_write_delay(mut self, write_delay: Duration) -> Self {
        self.write_delay = Some(write_delay);
        self
    }

    /// Mark the subtree at `path` as read only.
    pub fn protect(&self, path: &str) {
        self.protected.lock().unwrap().push(path::normalize(path));
    }

    /// The largest number of block writes observed in flight at once.
    #[must_use]
    pub fn peak_writers(&self) -> usize {
        self.peak_writers.load(Ordering::SeqCst)
    }

    /// Insert a dataset with elements `data`, creating missing ancestor groups.
    ///
    /// `data` holds the whole array in the logical axis order.
    /// Datasets with variable sized elements hold no data and cannot be opened for reading.
    ///
    /// # Errors
    /// Returns an error if `data` does not match `attributes` or the dataset cannot be created.
    pub fn insert_dataset(
        &self,
        path: &str,
        attributes: &DatasetAttributes,
        data: Vec<u8>,
    ) -> Result<(), BackendError> {
        let path = path::normalize(path);
        let expected = attributes.size_bytes().unwrap_or(0);
        if data.len() != expected {
            return Err(BackendError::InvalidBlockLength {
                expected,
                actual: data.len(),
            });
        }
        if let Some(parent) = path::parent(&path) {
            self.create_group(&parent)?;
        }
        self.insert_node(&path, attributes, data)
    }

    /// Read the whole array of a dataset in the logical axis order.
    ///
    /// # Errors
    /// Returns an error if there is no dataset at `path`.
    pub fn read_dataset(&self, path: &str) -> Result<Vec<u8>, BackendError> {
        let dataset = self.get_dataset(path)?;
        let data = dataset.data.read().unwrap().clone();
        Ok(data)
    }

    /// The free attributes of the node at `path`.
    ///
    /// # Errors
    /// Returns [`BackendError::NotFound`] if the node does not exist.
    pub fn attributes(&self, path: &str) -> Result<Map<String, Value>, BackendError> {
        let path = path::normalize(path);
        let nodes = self.nodes.lock().unwrap();
        let node = nodes.get(&path).ok_or(BackendError::NotFound(path.clone()))?;
        Ok(node.attributes.clone())
    }

    fn check_writable(&self, path: &str) -> Result<(), BackendError> {
        let protected = self.protected.lock().unwrap();
        let is_protected = protected.iter().any(|protected| {
            protected == path::ROOT
                || protected == path
                || path.starts_with(&format!("{protected}/"))
        });
        if is_protected {
            Err(BackendError::ReadOnly(path.to_string()))
        } else {
            Ok(())
        }
    }

    fn get_dataset(&self, path: &str) -> Result<Arc<MemoryDataset>, BackendError> {
        let path = path::normalize(path);
        let nodes = self.nodes.lock().unwrap();
        let node = nodes.get(&path).ok_or(BackendError::NotFound(path.clone()))?;
        node.dataset()
            .cloned()
            .ok_or(BackendError::NotADataset(path))
    }

    fn insert_node(
        &self,
        path: &str,
        attributes: &DatasetAttributes,
        data: Vec<u8>,
    ) -> Result<(), BackendError> {
        self.check_writable(path)?;
        let parent = path::parent(path).ok_or(BackendError::NodeConflict(path.to_string()))?;
        let name = path.rsplit('/').next().unwrap_or_default().to_string();

        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get(path).map(|node| node.dataset().is_some()) {
            Some(false) => return Err(BackendError::NodeConflict(path.to_string())),
            Some(true) => {}
            None => match nodes.get_mut(&parent).map(|node| &mut node.node_type) {
                Some(MemoryNodeType::Group { children }) => children.push(name),
                Some(MemoryNodeType::Dataset(_)) => {
                    return Err(BackendError::NodeConflict(parent))
                }
                None => return Err(BackendError::ParentMissing(path.to_string())),
            },
        }
        nodes.insert(
            path.to_string(),
            MemoryNode {
                node_type: MemoryNodeType::Dataset(Arc::new(MemoryDataset {
                    attributes: attributes.clone(),
                    data: RwLock::new(data),
                })),
                attributes: Map::new(),
            },
        );
        Ok(())
    }

    fn write_block_inner(
        &self,
        path: &str,
        grid_position: &[u64],
        bytes: &[u8],
    ) -> Result<(), BackendError> {
        let dataset = self.get_dataset(path)?;
        let element_size = dataset
            .attributes
            .data_type()
            .size()
            .ok_or_else(|| {
                BackendError::UnsupportedElementType(dataset.attributes.data_type().to_string())
            })?;
        let subset = dataset.attributes.block_subset(grid_position)?;
        if let Some(write_delay) = self.write_delay {
            std::thread::sleep(write_delay);
        }
        let mut data = dataset.data.write().unwrap();
        dense::write_subset(
            &mut data,
            dataset.attributes.dimensions(),
            element_size,
            &subset,
            bytes,
        )
    }
}

struct MemoryArrayReader {
    dataset: Arc<MemoryDataset>,
    element_size: usize,
}

impl ArrayReader for MemoryArrayReader {
    fn read_subset(&self, subset: &ArraySubset) -> Result<Vec<u8>, BackendError> {
        let data = self.dataset.data.read().unwrap();
        dense::read_subset(
            &data,
            self.dataset.attributes.dimensions(),
            self.element_size,
            subset,
        )
    }
}

impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn exists(&self, path: &str) -> Result<bool, BackendError> {
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .contains_key(&path::normalize(path)))
    }

    fn is_dataset(&self, path: &str) -> Result<bool, BackendError> {
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .get(&path::normalize(path))
            .is_some_and(|node| node.dataset().is_some()))
    }

    fn list_children(&self, path: &str) -> Result<Vec<String>, BackendError> {
        let path = path::normalize(path);
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(&path).map(|node| &node.node_type) {
            Some(MemoryNodeType::Group { children }) => Ok(children.clone()),
            Some(MemoryNodeType::Dataset(_)) => Ok(vec![]),
            None => Err(BackendError::NotFound(path)),
        }
    }

    fn list_attributes(&self, path: &str) -> Result<Vec<(String, AttributeType)>, BackendError> {
        let path = path::normalize(path);
        let nodes = self.nodes.lock().unwrap();
        let node = nodes.get(&path).ok_or(BackendError::NotFound(path.clone()))?;
        let structural = node
            .dataset()
            .map(|dataset| dataset.attributes.to_attributes())
            .unwrap_or_default();
        Ok(structural
            .iter()
            .chain(node.attributes.iter())
            .map(|(key, value)| (key.clone(), AttributeType::of(value)))
            .collect())
    }

    fn get_attribute(
        &self,
        path: &str,
        key: &str,
        attribute_type: AttributeType,
    ) -> Result<Option<Value>, BackendError> {
        let path = path::normalize(path);
        let nodes = self.nodes.lock().unwrap();
        let node = nodes.get(&path).ok_or(BackendError::NotFound(path.clone()))?;
        let value = match node.dataset() {
            Some(dataset) if is_structural_attribute(key) => {
                dataset.attributes.to_attributes().remove(key)
            }
            _ => node.attributes.get(key).cloned(),
        };
        value
            .map(|value| attribute::expect_type(key, attribute_type, value))
            .transpose()
    }

    fn set_attribute(&self, path: &str, key: &str, value: &Value) -> Result<(), BackendError> {
        let path = path::normalize(path);
        self.check_writable(&path)?;
        let attribute_type = AttributeType::of(value);
        if self.kind == BackendKind::Hdf5
            && matches!(attribute_type, AttributeType::Null | AttributeType::Object)
        {
            return Err(BackendError::UnsupportedAttribute {
                key: key.to_string(),
                attribute_type,
            });
        }
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes
            .get_mut(&path)
            .ok_or(BackendError::NotFound(path.clone()))?;
        if node.dataset().is_some() && is_structural_attribute(key) {
            return Err(BackendError::StructuralAttribute(key.to_string()));
        }
        node.attributes.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn dataset_attributes(&self, path: &str) -> Result<DatasetAttributes, BackendError> {
        Ok(self.get_dataset(path)?.attributes.clone())
    }

    fn create_group(&self, path: &str) -> Result<(), BackendError> {
        let path = path::normalize(path);
        let mut nodes = self.nodes.lock().unwrap();
        let mut lineage = path::ancestors(&path);
        lineage.push(path.clone());
        for (parent, group) in lineage.iter().zip(lineage.iter().skip(1)) {
            match nodes.get(group).map(|node| node.dataset().is_some()) {
                Some(false) => continue,
                Some(true) => return Err(BackendError::NodeConflict(group.clone())),
                None => {}
            }
            self.check_writable(group)?;
            match nodes.get_mut(parent).map(|node| &mut node.node_type) {
                Some(MemoryNodeType::Group { children }) => {
                    let name = group.rsplit('/').next().unwrap_or_default();
                    children.push(name.to_string());
                }
                Some(MemoryNodeType::Dataset(_)) => {
                    return Err(BackendError::NodeConflict(parent.clone()))
                }
                None => return Err(BackendError::ParentMissing(group.clone())),
            }
            nodes.insert(group.clone(), MemoryNode::group());
        }
        Ok(())
    }

    fn create_dataset(
        &self,
        path: &str,
        attributes: &DatasetAttributes,
    ) -> Result<(), BackendError> {
        let path = path::normalize(path);
        let size = attributes.size_bytes().ok_or_else(|| {
            BackendError::UnsupportedElementType(attributes.data_type().to_string())
        })?;
        self.insert_node(&path, attributes, vec![0; size])
    }

    fn open_array(&self, path: &str) -> Result<Box<dyn ArrayReader>, BackendError> {
        let dataset = self.get_dataset(path)?;
        let element_size = dataset.attributes.data_type().size().ok_or_else(|| {
            BackendError::UnsupportedElementType(dataset.attributes.data_type().to_string())
        })?;
        Ok(Box::new(MemoryArrayReader {
            dataset,
            element_size,
        }))
    }

    fn write_block(
        &self,
        path: &str,
        grid_position: &[u64],
        bytes: Vec<u8>,
    ) -> Result<(), BackendError> {
        let path = path::normalize(path);
        self.check_writable(&path)?;
        let active = self.active_writers.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_writers.fetch_max(active, Ordering::SeqCst);
        let result = if active > 1 && !self.kind.supports_concurrent_write() {
            Err(BackendError::ConcurrentWrite(path.clone()))
        } else {
            self.write_block_inner(&path, grid_position, &bytes)
        };
        self.active_writers.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
