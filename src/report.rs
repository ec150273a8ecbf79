//! Recoverable conditions collected during a build.
//!
//! The isolation pipeline is best-effort: a missing optional manifest or a
//! repair step that cannot find its input does not stop the build. Those
//! conditions are recorded as [`Warning`]s and returned to the caller next to
//! the successful result, so they can be inspected and asserted on.

use std::fmt::{Display, Formatter};

use camino::{Utf8Path, Utf8PathBuf};

/// Category of a recoverable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    /// A trace entry resolved outside the project root and was dropped.
    TraceEntryDropped,
    /// An implicit dependency trace could not be used.
    ImplicitDependency,
    /// One file of a closure batch could not be copied.
    PartialCopy,
    /// Client assets could not be resolved or copied.
    ClientAssets,
    /// An optional manifest was missing or could not be patched.
    Manifest,
    /// A best-effort repair step did not complete.
    Repair,
    /// A build-machine path could not be rewritten.
    Rewrite,
}

impl Display for WarningKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            WarningKind::TraceEntryDropped => "trace entry dropped",
            WarningKind::ImplicitDependency => "implicit dependency",
            WarningKind::PartialCopy => "partial copy",
            WarningKind::ClientAssets => "client assets",
            WarningKind::Manifest => "manifest",
            WarningKind::Repair => "repair",
            WarningKind::Rewrite => "rewrite",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub path: Option<Utf8PathBuf>,
    pub message: String,
}

impl Display for Warning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "[{}] {}: {}", self.kind, path, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

/// An ordered list of warnings. Every pushed warning is also logged.
#[derive(Debug, Clone, Default)]
pub struct Warnings(Vec<Warning>);

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: WarningKind, path: Option<&Utf8Path>, message: impl Display) {
        let warning = Warning {
            kind,
            path: path.map(Utf8Path::to_path_buf),
            message: message.to_string(),
        };
        tracing::warn!("{warning}");
        self.0.push(warning);
    }

    /// Shorthand for a warning attached to a path.
    pub fn at(&mut self, kind: WarningKind, path: impl AsRef<Utf8Path>, message: impl Display) {
        self.push(kind, Some(path.as_ref()), message);
    }

    pub fn extend(&mut self, other: Warnings) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.0.iter()
    }

    pub fn of_kind(&self, kind: WarningKind) -> impl Iterator<Item = &Warning> {
        self.0.iter().filter(move |warning| warning.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for Warnings {
    type Item = Warning;
    type IntoIter = std::vec::IntoIter<Warning>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
