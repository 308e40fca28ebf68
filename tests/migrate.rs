use std::time::Duration;

use serde_json::{json, Value};
use zarrs_migrate::{
    backend::{ArrayReader, MemoryBackend, N5Backend, ZarrBackend},
    migrate, open_container,
    progress::{ProgressCallback, ProgressStats},
    AttributeType, BackendError, BackendKind, CancellationToken, Compression,
    CompressionOverride, ContainerAccess, DatasetAttributes, DiagnosticKind, ElementType,
    MigrationEngine, MigrationError, MigrationOptions, StorageBackend,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn raw_attributes() -> DatasetAttributes {
    DatasetAttributes::new(
        vec![10, 7, 3],
        vec![4, 4, 2],
        ElementType::UInt16,
        Compression::Gzip {
            level: 4,
            use_zlib: false,
        },
    )
    .unwrap()
}

fn raw_data() -> Vec<u8> {
    (0..210u16).flat_map(u16::to_le_bytes).collect()
}

fn ids_attributes() -> DatasetAttributes {
    DatasetAttributes::new(vec![5], vec![2], ElementType::UInt64, Compression::Raw).unwrap()
}

fn ids_data() -> Vec<u8> {
    (10..15u64).flat_map(u64::to_le_bytes).collect()
}

/// A container holding `/volumes/raw` (3D) and `/labels/ids` (1D).
fn source(kind: BackendKind) -> MemoryBackend {
    let backend = MemoryBackend::new(kind);
    backend
        .insert_dataset("/volumes/raw", &raw_attributes(), raw_data())
        .unwrap();
    backend
        .set_attribute("/volumes/raw", "resolution", &json!([4.0, 4.0, 40.0]))
        .unwrap();
    backend
        .set_attribute("/volumes/raw", "offset", &json!([0, 8, 120]))
        .unwrap();
    backend
        .set_attribute("/volumes/raw", "name", &json!("raw"))
        .unwrap();
    backend
        .set_attribute("/volumes", "description", &json!("imaging volumes"))
        .unwrap();
    backend
        .insert_dataset("/labels/ids", &ids_attributes(), ids_data())
        .unwrap();
    backend
}

/// A [`MemoryBackend`] whose node lookups, listings or attribute reads fail at chosen paths.
#[derive(Default)]
struct FailingBackend {
    inner: Option<MemoryBackend>,
    failing_exists: Vec<&'static str>,
    failing_is_dataset: Vec<&'static str>,
    failing_children: Vec<&'static str>,
    failing_attributes: Vec<&'static str>,
    failing_attribute_keys: Vec<(&'static str, &'static str)>,
}

impl FailingBackend {
    fn new(inner: MemoryBackend) -> Self {
        Self {
            inner: Some(inner),
            ..Default::default()
        }
    }

    fn inner(&self) -> &MemoryBackend {
        self.inner.as_ref().unwrap()
    }

    fn fail(failing: bool, path: &str) -> Result<(), BackendError> {
        if failing {
            Err(BackendError::IOError(std::io::Error::other(format!(
                "{path} is unreadable"
            ))))
        } else {
            Ok(())
        }
    }
}

impl StorageBackend for FailingBackend {
    fn kind(&self) -> BackendKind {
        self.inner().kind()
    }

    fn exists(&self, path: &str) -> Result<bool, BackendError> {
        Self::fail(self.failing_exists.contains(&path), path)?;
        self.inner().exists(path)
    }

    fn is_dataset(&self, path: &str) -> Result<bool, BackendError> {
        Self::fail(self.failing_is_dataset.contains(&path), path)?;
        self.inner().is_dataset(path)
    }

    fn list_children(&self, path: &str) -> Result<Vec<String>, BackendError> {
        Self::fail(self.failing_children.contains(&path), path)?;
        self.inner().list_children(path)
    }

    fn list_attributes(&self, path: &str) -> Result<Vec<(String, AttributeType)>, BackendError> {
        Self::fail(self.failing_attributes.contains(&path), path)?;
        self.inner().list_attributes(path)
    }

    fn get_attribute(
        &self,
        path: &str,
        key: &str,
        attribute_type: AttributeType,
    ) -> Result<Option<Value>, BackendError> {
        Self::fail(self.failing_attribute_keys.contains(&(path, key)), path)?;
        self.inner().get_attribute(path, key, attribute_type)
    }

    fn set_attribute(&self, path: &str, key: &str, value: &Value) -> Result<(), BackendError> {
        self.inner().set_attribute(path, key, value)
    }

    fn dataset_attributes(&self, path: &str) -> Result<DatasetAttributes, BackendError> {
        self.inner().dataset_attributes(path)
    }

    fn create_group(&self, path: &str) -> Result<(), BackendError> {
        self.inner().create_group(path)
    }

    fn create_dataset(
        &self,
        path: &str,
        attributes: &DatasetAttributes,
    ) -> Result<(), BackendError> {
        self.inner().create_dataset(path, attributes)
    }

    fn open_array(&self, path: &str) -> Result<Box<dyn ArrayReader>, BackendError> {
        self.inner().open_array(path)
    }

    fn write_block(
        &self,
        path: &str,
        grid_position: &[u64],
        bytes: Vec<u8>,
    ) -> Result<(), BackendError> {
        self.inner().write_block(path, grid_position, bytes)
    }
}

#[test]
fn migrate_round_trip_identity() {
    init_logger();
    let source = source(BackendKind::N5);
    let destination = MemoryBackend::new(BackendKind::N5);
    let report = migrate(&source, &destination, &MigrationOptions::default()).unwrap();
    assert!(report.is_clean(), "{report}");
    assert_eq!(report.datasets(), 2);
    assert_eq!(report.groups(), 3);

    for path in ["/volumes/raw", "/labels/ids"] {
        assert_eq!(
            destination.read_dataset(path).unwrap(),
            source.read_dataset(path).unwrap()
        );
        assert_eq!(
            destination.dataset_attributes(path).unwrap(),
            source.dataset_attributes(path).unwrap()
        );
        assert_eq!(
            destination.attributes(path).unwrap(),
            source.attributes(path).unwrap()
        );
    }
    assert_eq!(
        destination.attributes("/volumes").unwrap(),
        source.attributes("/volumes").unwrap()
    );
    assert_eq!(
        destination.list_children("/").unwrap(),
        vec!["volumes", "labels"]
    );
}

#[test]
fn migrate_rechunk_invariance() {
    init_logger();
    let source = source(BackendKind::N5);
    let destination = MemoryBackend::new(BackendKind::N5);
    let options = MigrationOptions {
        block_size: Some(vec![3, 5, 1]),
        compression: CompressionOverride::resolve(Some("raw"), None),
        concurrent_chunks: Some(4),
        ..Default::default()
    };
    let report = migrate(&source, &destination, &options).unwrap();
    assert!(report.is_clean(), "{report}");

    let raw = destination.dataset_attributes("/volumes/raw").unwrap();
    assert_eq!(raw.block_size(), &[3, 5, 1]);
    assert_eq!(raw.compression(), &Compression::Raw);
    assert_eq!(raw.dimensions(), &[10, 7, 3]);
    assert_eq!(destination.read_dataset("/volumes/raw").unwrap(), raw_data());

    // Rank mismatch keeps the source block size
    let ids = destination.dataset_attributes("/labels/ids").unwrap();
    assert_eq!(ids.block_size(), &[2]);
    assert_eq!(ids.compression(), &Compression::Raw);
    assert_eq!(destination.read_dataset("/labels/ids").unwrap(), ids_data());
}

#[test]
fn migrate_unrecognized_compression_inherits() {
    init_logger();
    let source = source(BackendKind::N5);
    let destination = MemoryBackend::new(BackendKind::N5);
    let options = MigrationOptions {
        compression: CompressionOverride::resolve(Some("snappy"), Some(3)),
        ..Default::default()
    };
    migrate(&source, &destination, &options).unwrap();
    assert_eq!(
        destination
            .dataset_attributes("/volumes/raw")
            .unwrap()
            .compression(),
        &Compression::Gzip {
            level: 4,
            use_zlib: false
        }
    );
}

#[test]
fn migrate_axis_reversal() {
    init_logger();
    let cases = [
        (BackendKind::N5, BackendKind::Hdf5, true),
        (BackendKind::N5, BackendKind::Zarr, true),
        (BackendKind::N5, BackendKind::N5, false),
        (BackendKind::Zarr, BackendKind::Hdf5, false),
        (BackendKind::Hdf5, BackendKind::N5, true),
    ];
    for (source_kind, destination_kind, reversed) in cases {
        let source = source(source_kind);
        let destination = MemoryBackend::new(destination_kind);
        let report = migrate(&source, &destination, &MigrationOptions::default()).unwrap();
        assert!(report.is_clean(), "{report}");

        let attributes = destination.attributes("/volumes/raw").unwrap();
        let (resolution, offset) = if reversed {
            (json!([40.0, 4.0, 4.0]), json!([120, 8, 0]))
        } else {
            (json!([4.0, 4.0, 40.0]), json!([0, 8, 120]))
        };
        assert_eq!(attributes["resolution"], resolution, "{source_kind} to {destination_kind}");
        assert_eq!(attributes["offset"], offset, "{source_kind} to {destination_kind}");
        assert_eq!(attributes["name"], "raw");
        // Data is in the logical axis order regardless of the backend
        assert_eq!(destination.read_dataset("/volumes/raw").unwrap(), raw_data());
    }
}

#[test]
fn migrate_custom_spatial_attributes() {
    init_logger();
    let source = source(BackendKind::N5);
    source
        .set_attribute("/volumes/raw", "pixelResolution", &json!([1, 2, 3]))
        .unwrap();
    let destination = MemoryBackend::new(BackendKind::Hdf5);
    let options = MigrationOptions {
        spatial_attribute_keys: vec!["pixelResolution".to_string()],
        ..Default::default()
    };
    migrate(&source, &destination, &options).unwrap();
    let attributes = destination.attributes("/volumes/raw").unwrap();
    assert_eq!(attributes["pixelResolution"], json!([3, 2, 1]));
    assert_eq!(attributes["resolution"], json!([4.0, 4.0, 40.0]));
}

#[test]
fn migrate_excludes_structural_attributes() {
    init_logger();
    let source = source(BackendKind::N5);
    let destination = MemoryBackend::new(BackendKind::N5);
    let report = migrate(&source, &destination, &MigrationOptions::default()).unwrap();
    // Setting a structural attribute on a dataset fails, so a clean report means none were copied
    assert!(report.is_clean(), "{report}");
    let attributes = destination.attributes("/volumes/raw").unwrap();
    for key in ["dimensions", "blockSize", "dataType", "compression"] {
        assert!(!attributes.contains_key(key));
    }

    // Structural keys on groups are ordinary attributes
    let source = MemoryBackend::new(BackendKind::N5);
    source
        .set_attribute("/", "compression", &json!("none"))
        .unwrap();
    let destination = MemoryBackend::new(BackendKind::N5);
    migrate(&source, &destination, &MigrationOptions::default()).unwrap();
    assert_eq!(destination.attributes("/").unwrap()["compression"], "none");
}

#[test]
fn migrate_partial_failure_isolation() {
    init_logger();
    let source = source(BackendKind::N5);
    let objects =
        DatasetAttributes::new(vec![4], vec![2], ElementType::Object, Compression::Raw).unwrap();
    source
        .insert_dataset("/volumes/objects", &objects, vec![])
        .unwrap();
    source
        .set_attribute("/volumes/objects", "kind", &json!("strings"))
        .unwrap();
    source
        .insert_dataset("/volumes/after", &ids_attributes(), ids_data())
        .unwrap();

    let destination = MemoryBackend::new(BackendKind::N5);
    let report = migrate(&source, &destination, &MigrationOptions::default()).unwrap();
    assert_eq!(
        report.paths(DiagnosticKind::UnsupportedDataset),
        vec!["/volumes/objects"]
    );
    assert_eq!(report.diagnostics().len(), 1);
    assert!(!report.has_subtree_failures());
    assert_eq!(report.datasets(), 3);
    assert!(!destination.exists("/volumes/objects").unwrap());
    assert_eq!(destination.read_dataset("/volumes/after").unwrap(), ids_data());
    assert_eq!(destination.read_dataset("/labels/ids").unwrap(), ids_data());
}

#[test]
fn migrate_selected_paths() {
    init_logger();
    let source = MemoryBackend::new(BackendKind::N5);
    for path in ["/a/b", "/a/x", "/c/d", "/c/e", "/e"] {
        source
            .insert_dataset(path, &ids_attributes(), ids_data())
            .unwrap();
    }
    source.set_attribute("/a", "note", &json!("a")).unwrap();
    source.set_attribute("/c", "note", &json!("c")).unwrap();

    let destination = MemoryBackend::new(BackendKind::N5);
    let options = MigrationOptions {
        root_paths: Some(vec![
            "a/b".to_string(),
            "/c".to_string(),
            "/missing".to_string(),
        ]),
        ..Default::default()
    };
    let report = migrate(&source, &destination, &options).unwrap();
    assert!(report.is_clean(), "{report}");
    assert!(destination.is_dataset("/a/b").unwrap());
    assert!(destination.is_dataset("/c/d").unwrap());
    assert!(destination.is_dataset("/c/e").unwrap());
    assert_eq!(report.datasets(), 3);
    assert!(!destination.exists("/a/x").unwrap());
    assert!(!destination.exists("/e").unwrap());
    assert!(!destination.exists("/missing").unwrap());
    // Only selected nodes have their attributes copied
    assert!(destination.attributes("/a").unwrap().is_empty());
    assert_eq!(destination.attributes("/c").unwrap()["note"], "c");
}

#[test]
fn migrate_single_writer_is_sequential() {
    init_logger();
    let source = source(BackendKind::N5);
    let destination =
        MemoryBackend::new(BackendKind::Hdf5).with_write_delay(Duration::from_millis(2));
    let options = MigrationOptions {
        block_size: Some(vec![2, 2, 1]),
        concurrent_chunks: Some(8),
        ..Default::default()
    };
    let report = migrate(&source, &destination, &options).unwrap();
    assert!(report.is_clean(), "{report}");
    assert_eq!(destination.peak_writers(), 1);
    assert_eq!(destination.read_dataset("/volumes/raw").unwrap(), raw_data());
}

#[test]
fn migrate_concurrent_writers_are_bounded() {
    init_logger();
    let source = source(BackendKind::N5);
    let destination =
        MemoryBackend::new(BackendKind::N5).with_write_delay(Duration::from_millis(2));
    let options = MigrationOptions {
        block_size: Some(vec![2, 2, 1]),
        concurrent_chunks: Some(3),
        ..Default::default()
    };
    let thread_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(4)
        .build()
        .unwrap();
    let report = thread_pool
        .install(|| migrate(&source, &destination, &options))
        .unwrap();
    assert!(report.is_clean(), "{report}");
    let peak_writers = destination.peak_writers();
    assert!(
        (2..=3).contains(&peak_writers),
        "{peak_writers} concurrent writers"
    );
    assert_eq!(destination.read_dataset("/volumes/raw").unwrap(), raw_data());
}

#[test]
fn migrate_cancellation() {
    init_logger();
    let source = source(BackendKind::N5);
    let destination = MemoryBackend::new(BackendKind::N5);
    let options = MigrationOptions::default();
    let cancellation = CancellationToken::new();
    cancellation.cancel();
    let result = MigrationEngine::new(&source, &destination, &options)
        .unwrap()
        .with_cancellation(cancellation)
        .run();
    assert!(matches!(result, Err(MigrationError::Cancelled(path)) if path == "/volumes/raw"));
}

#[test]
fn migrate_cancellation_during_dataset() {
    init_logger();
    let source = source(BackendKind::N5);
    let destination = MemoryBackend::new(BackendKind::Hdf5);
    let options = MigrationOptions {
        block_size: Some(vec![1, 1, 1]),
        ..Default::default()
    };
    let cancellation = CancellationToken::new();
    let callback = {
        let cancellation = cancellation.clone();
        move |stats: ProgressStats| {
            if stats.step == 5 {
                cancellation.cancel();
            }
        }
    };
    let progress_callback = ProgressCallback::new(&callback);
    let result = MigrationEngine::new(&source, &destination, &options)
        .unwrap()
        .with_cancellation(cancellation)
        .with_progress_callback(&progress_callback)
        .run();
    assert!(matches!(result, Err(MigrationError::Cancelled(_))));
    assert!(!destination.exists("/labels").unwrap());
}

#[test]
fn migrate_attribute_write_failure() {
    init_logger();
    let source = source(BackendKind::Zarr);
    source.set_attribute("/volumes", "unset", &Value::Null).unwrap();
    source
        .set_attribute("/volumes", "nested", &json!({"a": [1, 2]}))
        .unwrap();
    let destination = MemoryBackend::new(BackendKind::Hdf5);
    let report = migrate(&source, &destination, &MigrationOptions::default()).unwrap();
    assert!(!report.has_subtree_failures());
    assert_eq!(
        report.paths(DiagnosticKind::AttributeWrite),
        vec!["/volumes", "/volumes"]
    );
    let mut keys = report
        .diagnostics()
        .iter()
        .filter_map(|diagnostic| diagnostic.key.as_deref())
        .collect::<Vec<_>>();
    keys.sort_unstable();
    assert_eq!(keys, vec!["nested", "unset"]);
    assert_eq!(
        destination.attributes("/volumes").unwrap()["description"],
        "imaging volumes"
    );
    assert_eq!(report.datasets(), 2);
}

#[test]
fn migrate_subtree_creation_failure() {
    init_logger();
    let source = source(BackendKind::N5);
    let destination = MemoryBackend::new(BackendKind::N5);
    destination.protect("/volumes");
    let report = migrate(&source, &destination, &MigrationOptions::default()).unwrap();
    assert!(report.has_subtree_failures());
    assert_eq!(
        report.paths(DiagnosticKind::SubtreeCreation),
        vec!["/volumes"]
    );
    assert!(!destination.exists("/volumes").unwrap());
    assert_eq!(destination.read_dataset("/labels/ids").unwrap(), ids_data());
    assert_eq!(report.datasets(), 1);
}

#[test]
fn migrate_dataset_write_failure() {
    init_logger();
    let directory = tempfile::TempDir::new().unwrap();
    let source = source(BackendKind::N5);
    let destination = ZarrBackend::create(directory.path()).unwrap();
    let options = MigrationOptions {
        compression: CompressionOverride::resolve(Some("lz4"), None),
        ..Default::default()
    };
    let report = migrate(&source, &destination, &options).unwrap();
    assert_eq!(
        report.paths(DiagnosticKind::DatasetWrite),
        vec!["/volumes/raw", "/labels/ids"]
    );
    assert_eq!(report.diagnostics().len(), 2);
    assert!(!report.has_subtree_failures());
    assert_eq!(report.datasets(), 0);
    assert_eq!(report.groups(), 3);

    assert_eq!(
        destination
            .get_attribute("/volumes", "description", AttributeType::String)
            .unwrap(),
        Some(json!("imaging volumes"))
    );
    for path in ["/volumes/raw", "/labels/ids"] {
        assert!(!destination.exists(path).unwrap());
    }
}

#[test]
fn migrate_subtree_listing_failure() {
    init_logger();
    let source = FailingBackend {
        failing_is_dataset: vec!["/labels"],
        failing_children: vec!["/volumes"],
        ..FailingBackend::new(source(BackendKind::N5))
    };
    let destination = MemoryBackend::new(BackendKind::N5);
    let report = migrate(&source, &destination, &MigrationOptions::default()).unwrap();
    assert!(report.has_subtree_failures());
    assert_eq!(
        report.paths(DiagnosticKind::SubtreeListing),
        vec!["/volumes", "/labels"]
    );
    assert_eq!(report.diagnostics().len(), 2);
    assert_eq!(report.datasets(), 0);
    // The group with unlistable children is created along with its attributes
    assert_eq!(
        destination.attributes("/volumes").unwrap()["description"],
        "imaging volumes"
    );
    assert!(!destination.exists("/volumes/raw").unwrap());
    assert!(!destination.exists("/labels").unwrap());

    // A selected path that cannot be looked up is skipped
    let source = FailingBackend {
        failing_exists: vec!["/labels/ids"],
        ..FailingBackend::new(self::source(BackendKind::N5))
    };
    let destination = MemoryBackend::new(BackendKind::N5);
    let options = MigrationOptions {
        root_paths: Some(vec!["/labels/ids".to_string(), "/volumes/raw".to_string()]),
        ..Default::default()
    };
    let report = migrate(&source, &destination, &options).unwrap();
    assert_eq!(
        report.paths(DiagnosticKind::SubtreeListing),
        vec!["/labels/ids"]
    );
    assert_eq!(report.datasets(), 1);
    assert!(!destination.exists("/labels").unwrap());
    assert_eq!(destination.read_dataset("/volumes/raw").unwrap(), raw_data());
}

#[test]
fn migrate_attribute_read_failure() {
    init_logger();
    let source = FailingBackend {
        failing_attributes: vec!["/volumes"],
        failing_attribute_keys: vec![("/volumes/raw", "name")],
        ..FailingBackend::new(source(BackendKind::N5))
    };
    let destination = MemoryBackend::new(BackendKind::N5);
    let report = migrate(&source, &destination, &MigrationOptions::default()).unwrap();
    assert!(!report.has_subtree_failures());
    assert_eq!(report.datasets(), 2);
    let failures = report
        .diagnostics()
        .iter()
        .map(|diagnostic| {
            (
                diagnostic.kind,
                diagnostic.path.as_str(),
                diagnostic.key.as_deref(),
            )
        })
        .collect::<Vec<_>>();
    assert_eq!(
        failures,
        vec![
            (DiagnosticKind::AttributeRead, "/volumes", None),
            (DiagnosticKind::AttributeRead, "/volumes/raw", Some("name")),
        ]
    );

    assert!(destination.attributes("/volumes").unwrap().is_empty());
    // Keys after a failed read are still copied
    let attributes = destination.attributes("/volumes/raw").unwrap();
    assert!(!attributes.contains_key("name"));
    assert_eq!(attributes["resolution"], json!([4.0, 4.0, 40.0]));
    assert_eq!(attributes["offset"], json!([0, 8, 120]));
    assert_eq!(destination.read_dataset("/volumes/raw").unwrap(), raw_data());
}

#[test]
fn migrate_invalid_options() {
    let source = source(BackendKind::N5);
    let destination = MemoryBackend::new(BackendKind::N5);
    let options = MigrationOptions {
        block_size: Some(vec![0, 4, 4]),
        ..Default::default()
    };
    assert!(matches!(
        migrate(&source, &destination, &options),
        Err(MigrationError::Configuration(_))
    ));
}

#[test]
fn migrate_zarr_round_trip() {
    init_logger();
    let directory = tempfile::TempDir::new().unwrap();
    let source = source(BackendKind::N5);
    let report = {
        let zarr = ZarrBackend::create(directory.path()).unwrap();
        migrate(&source, &zarr, &MigrationOptions::default()).unwrap()
    };
    assert!(report.is_clean(), "{report}");

    let path = directory.path().to_string_lossy().to_string();
    let zarr = open_container(&path, ContainerAccess::Read).unwrap();
    assert_eq!(zarr.kind(), BackendKind::Zarr);
    assert_eq!(
        zarr.get_attribute("/volumes/raw", "resolution", AttributeType::FloatArray)
            .unwrap(),
        Some(json!([40.0, 4.0, 4.0]))
    );

    let destination = MemoryBackend::new(BackendKind::N5);
    let options = MigrationOptions {
        block_size: Some(vec![5, 7, 3]),
        ..Default::default()
    };
    let report = migrate(&zarr, &destination, &options).unwrap();
    assert!(report.is_clean(), "{report}");
    assert_eq!(destination.read_dataset("/volumes/raw").unwrap(), raw_data());
    assert_eq!(destination.read_dataset("/labels/ids").unwrap(), ids_data());
    assert_eq!(
        destination.attributes("/volumes/raw").unwrap(),
        source.attributes("/volumes/raw").unwrap()
    );
    assert_eq!(
        destination
            .dataset_attributes("/volumes/raw")
            .unwrap()
            .compression(),
        &Compression::Gzip {
            level: 4,
            use_zlib: false
        }
    );
}

#[test]
fn migrate_zarr_attributes_are_user_attributes() {
    init_logger();
    let directory = tempfile::TempDir::new().unwrap();
    let source = source(BackendKind::Zarr);
    let zarr = ZarrBackend::create(directory.path()).unwrap();
    let report = migrate(&source, &zarr, &MigrationOptions::default()).unwrap();
    assert!(report.is_clean(), "{report}");

    let mut keys = zarr
        .list_attributes("/volumes/raw")
        .unwrap()
        .into_iter()
        .map(|(key, _)| key)
        .collect::<Vec<_>>();
    keys.sort();
    assert_eq!(keys, vec!["name", "offset", "resolution"]);
    assert!(zarr.list_attributes("/labels/ids").unwrap().is_empty());
}

#[test]
fn migrate_n5_round_trip() {
    init_logger();
    let directory = tempfile::TempDir::new().unwrap();
    let n5_path = directory.path().join("sample.n5");
    let zarr_path = directory.path().join("sample.zarr");
    let copy_path = directory.path().join("copy.n5");

    let source = source(BackendKind::N5);
    let n5 = N5Backend::create(&n5_path).unwrap();
    let report = migrate(&source, &n5, &MigrationOptions::default()).unwrap();
    assert!(report.is_clean(), "{report}");

    // N5 to Zarr reverses spatial attributes, Zarr to N5 restores them
    let n5 = open_container(n5_path.to_str().unwrap(), ContainerAccess::Read).unwrap();
    assert_eq!(n5.kind(), BackendKind::N5);
    let zarr = open_container(zarr_path.to_str().unwrap(), ContainerAccess::Write).unwrap();
    let options = MigrationOptions {
        block_size: Some(vec![3, 3, 3]),
        compression: CompressionOverride::resolve(Some("bzip2"), None),
        ..Default::default()
    };
    let report = migrate(&n5, &zarr, &options).unwrap();
    assert!(report.is_clean(), "{report}");
    assert_eq!(
        zarr.get_attribute("/volumes/raw", "resolution", AttributeType::FloatArray)
            .unwrap(),
        Some(json!([40.0, 4.0, 4.0]))
    );

    let copy = open_container(copy_path.to_str().unwrap(), ContainerAccess::Write).unwrap();
    assert_eq!(copy.kind(), BackendKind::N5);
    let options = MigrationOptions {
        compression: CompressionOverride::resolve(Some("zip"), Some(3)),
        ..Default::default()
    };
    let report = migrate(&zarr, &copy, &options).unwrap();
    assert!(report.is_clean(), "{report}");

    let destination = MemoryBackend::new(BackendKind::N5);
    let report = migrate(&copy, &destination, &MigrationOptions::default()).unwrap();
    assert!(report.is_clean(), "{report}");
    assert_eq!(destination.read_dataset("/volumes/raw").unwrap(), raw_data());
    assert_eq!(destination.read_dataset("/labels/ids").unwrap(), ids_data());
    assert_eq!(
        destination.attributes("/volumes/raw").unwrap(),
        source.attributes("/volumes/raw").unwrap()
    );
    assert_eq!(
        destination.attributes("/volumes").unwrap(),
        source.attributes("/volumes").unwrap()
    );
    let raw = destination.dataset_attributes("/volumes/raw").unwrap();
    assert_eq!(raw.block_size(), &[3, 3, 3]);
    assert_eq!(
        raw.compression(),
        &Compression::Gzip {
            level: 3,
            use_zlib: true
        }
    );
}
