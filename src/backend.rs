mod backend_error;
mod backend_kind;
pub mod dense;
pub mod memory;
pub mod n5;
mod storage_backend;
pub mod zarr;

use std::path::Path;

pub use backend_error::BackendError;
pub use backend_kind::BackendKind;
pub use memory::MemoryBackend;
pub use n5::N5Backend;
pub use storage_backend::{ArrayReader, Container, StorageBackend};
pub use zarr::ZarrBackend;

/// How a container is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAccess {
    Read,
    Write,
}

/// Returns true if `path` names a monolithic hierarchical file.
///
/// For reading, any regular file is monolithic.
/// For writing, the file extension decides.
fn is_monolithic(path: &str, access: ContainerAccess) -> bool {
    match access {
        ContainerAccess::Read => Path::new(path).is_file(),
        ContainerAccess::Write => {
            let path = path.to_lowercase();
            [".h5", ".hdf5", ".hdf"]
                .iter()
                .any(|extension| path.ends_with(extension))
        }
    }
}

/// Returns true if `path` names an N5 container.
///
/// An existing directory is N5 if it has a root `attributes.json` and no `zarr.json`.
/// A new container is N5 if its name ends in `.n5`.
fn is_n5(path: &str, access: ContainerAccess) -> bool {
    let directory = Path::new(path);
    if directory.join("zarr.json").is_file() {
        return false;
    }
    directory.join("attributes.json").is_file()
        || (access == ContainerAccess::Write
            && path.trim_end_matches('/').to_lowercase().ends_with(".n5"))
}

/// Open a container on the local filesystem.
///
/// `path` is a local path or a `file://` URI.
/// N5 containers and Zarr V3 hierarchies are supported, and created if they do not exist when opened for writing.
///
/// # Errors
/// Returns [`BackendError::UnsupportedContainer`] for remote URIs and monolithic hierarchical files.
/// Returns an error if the container cannot be opened or created.
pub fn open_container(path: &str, access: ContainerAccess) -> Result<Container, BackendError> {
    let path = match path.split_once("://") {
        None => path,
        Some((scheme, local)) if scheme.eq_ignore_ascii_case("file") => local,
        Some((scheme, _)) => {
            return Err(BackendError::UnsupportedContainer(format!(
                "{path}: unsupported protocol {scheme}"
            )))
        }
    };
    if is_monolithic(path, access) {
        return Err(BackendError::UnsupportedContainer(format!(
            "{path}: monolithic hierarchical files are not supported"
        )));
    }
    let directory = Path::new(path);
    if is_n5(path, access) {
        log::debug!("opening n5 container {path} for {access:?}");
        let backend = match access {
            ContainerAccess::Read => N5Backend::open(directory)?,
            ContainerAccess::Write => N5Backend::create(directory)?,
        };
        return Ok(Container::N5(backend));
    }
    log::debug!("opening zarr container {path} for {access:?}");
    let backend = match access {
        ContainerAccess::Read => ZarrBackend::open(directory)?,
        ContainerAccess::Write => ZarrBackend::create(directory)?,
    };
    Ok(Container::Zarr(backend))
}
