//! Reader for the framework's per-module dependency traces.
//!
//! A trace is a JSON file `{ "version": 1, "files": [...] }` placed next to
//! the module it describes. The listed paths are relative to the directory of
//! the trace file, not to the project root, and the traced module itself is
//! never listed.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::TraceError;
use crate::io::{absolute, normalize_path};
use crate::report::{WarningKind, Warnings};

/// Deserialized trace file.
#[derive(Debug, Clone, Deserialize)]
pub struct DependencyTrace {
    pub version: u32,
    pub files: Vec<String>,
}

/// Set of project-root relative files one entrypoint needs at runtime.
///
/// Paths never contain `.` or `..` components and iterate in sorted order, so
/// copying a closure is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureSet(BTreeSet<Utf8PathBuf>);

impl ClosureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a root-relative path. Paths that would escape the root are refused.
    pub fn insert(&mut self, path: impl AsRef<Utf8Path>) -> bool {
        let path = normalize_path(path.as_ref());
        if !is_contained(&path) {
            return false;
        }
        self.0.insert(path)
    }

    pub fn union(&mut self, other: ClosureSet) {
        self.0.extend(other.0);
    }

    pub fn contains(&self, path: impl AsRef<Utf8Path>) -> bool {
        self.0.contains(path.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Utf8PathBuf> for ClosureSet {
    fn from_iter<I: IntoIterator<Item = Utf8PathBuf>>(iter: I) -> Self {
        let mut set = ClosureSet::new();
        for path in iter {
            set.insert(path);
        }
        set
    }
}

/// A parsed trace, re-expressed relative to the project root.
#[derive(Debug, Default)]
pub struct ParsedTrace {
    pub files: ClosureSet,
    pub warnings: Warnings,
}

/// Parses `trace` and resolves its entries relative to `root`.
///
/// Entries that resolve outside of `root` are dropped with a warning, partial
/// traces are expected.
pub fn parse_trace(
    trace: impl AsRef<Utf8Path>,
    root: impl AsRef<Utf8Path>,
) -> Result<ParsedTrace, TraceError> {
    let trace = trace.as_ref();

    let text = fs::read_to_string(trace).map_err(|e| match e.kind() {
        ErrorKind::NotFound => TraceError::NotFound(trace.to_path_buf()),
        _ => TraceError::Read {
            path: trace.to_path_buf(),
            source: e,
        },
    })?;

    let data: DependencyTrace =
        serde_json::from_str(&text).map_err(|e| TraceError::Malformed {
            path: trace.to_path_buf(),
            source: e,
        })?;

    let read_err = |e| TraceError::Read {
        path: trace.to_path_buf(),
        source: e,
    };
    let root = absolute(root.as_ref()).map_err(read_err)?;
    let base = absolute(trace)
        .map_err(read_err)?
        .parent()
        .map(Utf8Path::to_path_buf)
        .unwrap_or_default();

    let mut parsed = ParsedTrace::default();

    for file in &data.files {
        let path = normalize_path(&base.join(file));

        match path.strip_prefix(&root) {
            Ok(rel) if !rel.as_str().is_empty() => {
                parsed.files.insert(rel);
            }
            _ => parsed.warnings.at(
                WarningKind::TraceEntryDropped,
                &path,
                format!("outside of project root {root}"),
            ),
        }
    }

    tracing::debug!(
        "parsed trace {} (v{}): {} files",
        trace,
        data.version,
        parsed.files.len()
    );

    Ok(parsed)
}

fn is_contained(path: &Utf8Path) -> bool {
    !path.as_str().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Utf8Component::Normal(_)))
}
