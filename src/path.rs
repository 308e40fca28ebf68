//! Node paths.
//!
//! Nodes are addressed by slash delimited paths relative to the container root `/`.
//! Paths are normalised so that `volumes/raw`, `/volumes/raw/` and `//volumes//raw` all refer to `/volumes/raw`.

/// The container root.
pub const ROOT: &str = "/";

/// Normalise a node path.
#[must_use]
pub fn normalize(path: &str) -> String {
    let components = path
        .split('/')
        .filter(|component| !component.is_empty())
        .collect::<Vec<_>>();
    if components.is_empty() {
        ROOT.to_string()
    } else {
        format!("/{}", components.join("/"))
    }
}

/// Join a child name onto a parent path.
#[must_use]
pub fn join(parent: &str, child: &str) -> String {
    normalize(&format!("{parent}/{child}"))
}

/// The parent of a node, or [`None`] for the root.
#[must_use]
pub fn parent(path: &str) -> Option<String> {
    let path = normalize(path);
    if path == ROOT {
        return None;
    }
    path.rsplit_once('/').map(|(parent, _)| {
        if parent.is_empty() {
            ROOT.to_string()
        } else {
            parent.to_string()
        }
    })
}

/// The ancestors of a node from the root downwards, excluding the node itself.
#[must_use]
pub fn ancestors(path: &str) -> Vec<String> {
    let mut ancestors = Vec::new();
    let mut current = parent(path);
    while let Some(path) = current {
        current = parent(&path);
        ancestors.push(path);
    }
    ancestors.reverse();
    ancestors
}

/// The store prefix of a node, empty for the root and otherwise the path without its leading slash and with a trailing slash.
#[must_use]
pub fn store_prefix(path: &str) -> String {
    let path = normalize(path);
    if path == ROOT {
        String::new()
    } else {
        format!("{}/", path.trim_start_matches('/'))
    }
}
