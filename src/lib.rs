#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod client;
mod closure;
mod conventions;
mod error;
mod hash;
mod io;
#[cfg(feature = "logging")]
mod logging;
mod orchestrator;
mod repair;
mod report;
mod rewrite;
mod trace;
mod zone;

pub use crate::client::{ClientManifestResolver, ScriptResolver, normalize_client_path, patch_client_manifest};
pub use crate::closure::{
    ClientAssets, ClosureContext, ClosureRequest, ConventionProbe, ImplicitProbe, Isolate,
    build_closure, copy_standalone, default_probes,
};
pub use crate::conventions::{
    Conventions, DirProxyRule, ImplicitEntry, PermissivePackage, PruneRules, ShimRule,
};
pub use crate::error::*;
pub use crate::hash::{Hash32, fingerprint};
#[cfg(feature = "logging")]
pub use crate::logging::init_logging;
pub use crate::orchestrator::{
    BuildOptions, CancelToken, CommandToolchain, IsolateSummary, Orchestrator, Plan, Report,
    RouteOutcome, Stage, Toolchain,
};
pub use crate::repair::{PruneStats, RepairReport, prune_dependencies, repair};
pub use crate::report::{Warning, WarningKind, Warnings};
pub use crate::rewrite::{apply_asset_prefix, build_source_root, patch_asset_prefix, rewrite_absolute_paths};
pub use crate::trace::{ClosureSet, DependencyTrace, ParsedTrace, parse_trace};
pub use crate::zone::{
    RouteDescriptor, Zone, discover_routes, generate_zone, sanitize_route, service_name, zone_name,
};
