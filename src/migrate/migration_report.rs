use serde::Serialize;

/// The kind of a non-fatal failure recorded during a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A source dataset could not be opened for reading. The dataset was skipped.
    UnsupportedDataset,
    /// A destination dataset could not be created or written. Its attributes were skipped.
    DatasetWrite,
    /// A source attribute could not be read.
    AttributeRead,
    /// The destination rejected an attribute.
    AttributeWrite,
    /// A destination group could not be created. Its subtree was skipped.
    SubtreeCreation,
    /// A source group could not be inspected or listed. Its subtree was skipped.
    SubtreeListing,
}

impl DiagnosticKind {
    /// Returns true if a whole subtree was skipped.
    #[must_use]
    pub fn is_subtree_failure(self) -> bool {
        matches!(self, Self::SubtreeCreation | Self::SubtreeListing)
    }
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::UnsupportedDataset => "skipped dataset",
            Self::DatasetWrite => "failed dataset",
            Self::AttributeRead => "unreadable attribute",
            Self::AttributeWrite => "failed attribute",
            Self::SubtreeCreation => "failed group",
            Self::SubtreeListing => "unreadable group",
        };
        f.write_str(name)
    }
}

/// A structured record of a failure at one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub path: String,
    /// The attribute key, for attribute failures.
    pub key: Option<String>,
    pub kind: DiagnosticKind,
    pub cause: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{} {} [{key}]: {}", self.kind, self.path, self.cause),
            None => write!(f, "{} {}: {}", self.kind, self.path, self.cause),
        }
    }
}

/// The outcome of a migration run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    groups: usize,
    datasets: usize,
    diagnostics: Vec<Diagnostic>,
}

impl MigrationReport {
    /// The number of groups created or reused at the destination.
    #[must_use]
    pub fn groups(&self) -> usize {
        self.groups
    }

    /// The number of datasets copied completely.
    #[must_use]
    pub fn datasets(&self) -> usize {
        self.datasets
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Returns true if nothing failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Returns true if any subtree was skipped.
    #[must_use]
    pub fn has_subtree_failures(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|diagnostic| diagnostic.kind.is_subtree_failure())
    }

    /// The paths of diagnostics of `kind`, in the order they were recorded.
    #[must_use]
    pub fn paths(&self, kind: DiagnosticKind) -> Vec<&str> {
        self.diagnostics
            .iter()
            .filter(|diagnostic| diagnostic.kind == kind)
            .map(|diagnostic| diagnostic.path.as_str())
            .collect()
    }

    pub(crate) fn add_group(&mut self) {
        self.groups += 1;
    }

    pub(crate) fn add_dataset(&mut self) {
        self.datasets += 1;
    }

    pub(crate) fn record(
        &mut self,
        path: &str,
        key: Option<&str>,
        kind: DiagnosticKind,
        cause: impl std::fmt::Display,
    ) {
        let diagnostic = Diagnostic {
            path: path.to_string(),
            key: key.map(str::to_string),
            kind,
            cause: cause.to_string(),
        };
        if kind.is_subtree_failure() {
            log::error!("{diagnostic}");
        } else {
            log::warn!("{diagnostic}");
        }
        self.diagnostics.push(diagnostic);
    }
}

impl std::fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Migrated {} groups and {} datasets",
            self.groups, self.datasets
        )?;
        if self.is_clean() {
            return write!(f, " successfully");
        }
        write!(f, " with {} failures", self.diagnostics.len())?;
        for diagnostic in &self.diagnostics {
            write!(f, "\n\t{diagnostic}")?;
        }
        Ok(())
    }
}
