use std::process::ExitStatus;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::orchestrator::Stage;

/// Failure to read a single dependency trace.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Trace '{0}' not found")]
    NotFound(Utf8PathBuf),

    #[error("Couldn't read trace '{path}'.\n{source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Trace '{path}' is malformed.\n{source}")]
    Malformed {
        path: Utf8PathBuf,
        source: serde_json::Error,
    },
}

/// Failure of the external client-reference resolver.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Couldn't start client manifest resolver '{0}'.\n{1}")]
    Spawn(String, std::io::Error),

    #[error("Client manifest resolver exited with {status}:\n{output}")]
    Exit { status: ExitStatus, output: String },

    #[error("Client manifest resolver produced invalid output.\n{source}\n{output}")]
    Malformed {
        source: serde_json::Error,
        output: String,
    },
}

/// Fatal failure while building the dependency closure of an isolate.
#[derive(Debug, Error)]
pub enum ClosureError {
    #[error("Couldn't read the entrypoint trace.\n{0}")]
    EntrypointTrace(#[from] TraceError),

    #[error("Entrypoint '{0}' is missing from the project root")]
    MissingEntrypoint(Utf8PathBuf),

    #[error("Boot script '{0}' is missing from the project root")]
    MissingBootScript(Utf8PathBuf),

    #[error("Build identifier '{0}' is missing from the project root")]
    MissingBuildId(Utf8PathBuf),

    #[error("Routes manifest '{path}' couldn't be patched.\n{source}")]
    RoutesManifest {
        path: Utf8PathBuf,
        source: serde_json::Error,
    },

    #[error("Standalone output '{0}' not found")]
    StandaloneNotFound(Utf8PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("Isolate '{0}' does not exist")]
    IsolateNotFound(Utf8PathBuf),
}

#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("Source application '{0}' not found")]
    SourceNotFound(Utf8PathBuf),

    #[error("No route directory found under '{0}'")]
    RouteDirNotFound(Utf8PathBuf),

    #[error("Route '{route}' is defined by both '{first}' and '{second}'")]
    RouteConflict {
        route: String,
        first: Utf8PathBuf,
        second: Utf8PathBuf,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error)]
#[error("Couldn't rewrite '{path}'.\n{source}")]
pub struct RewriteError {
    pub path: Utf8PathBuf,
    pub source: std::io::Error,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read conventions file '{0}'.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse conventions file '{0}'.\n{1}")]
    Parse(Utf8PathBuf, serde_json::Error),
}

/// One route's pipeline failed at `stage`. Sibling routes are unaffected.
#[derive(Debug, Error)]
#[error("Route '{route}' failed while {stage}:\n{source}")]
pub struct RouteFailure {
    pub route: String,
    pub stage: Stage,
    pub source: anyhow::Error,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Couldn't discover routes.\n{0}")]
    Discovery(#[from] ZoneError),

    #[error("Couldn't build the worker pool.\n{0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid progress bar template.\n{0}")]
    Style(#[from] indicatif::style::TemplateError),
}
