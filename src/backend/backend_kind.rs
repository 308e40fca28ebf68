use serde::{Deserialize, Serialize};

/// The closed set of storage backend kinds.
///
/// Each kind carries the capabilities the migration engine needs to know about.
/// New backends are supported by adding a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// A directory-of-chunks container storing the fastest varying axis first.
    N5,
    /// A directory-of-chunks container storing the fastest varying axis last.
    Zarr,
    /// A monolithic hierarchical file storing the fastest varying axis last.
    ///
    /// Chunks must be written by a single writer.
    Hdf5,
}

impl BackendKind {
    /// Returns true if chunks can be written by concurrent writers.
    #[must_use]
    pub fn supports_concurrent_write(self) -> bool {
        match self {
            Self::N5 | Self::Zarr => true,
            Self::Hdf5 => false,
        }
    }

    /// Returns true if the backend stores the fastest varying axis last.
    #[must_use]
    pub fn uses_reversed_axis_order(self) -> bool {
        match self {
            Self::N5 => false,
            Self::Zarr | Self::Hdf5 => true,
        }
    }

    /// Returns true if `self` and `other` disagree on axis order.
    #[must_use]
    pub fn axis_orders_differ(self, other: Self) -> bool {
        self.uses_reversed_axis_order() != other.uses_reversed_axis_order()
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::N5 => write!(f, "n5"),
            Self::Zarr => write!(f, "zarr"),
            Self::Hdf5 => write!(f, "hdf5"),
        }
    }
}
