//! Best-effort repairs of an isolate's dependency directory.
//!
//! A closure copied from traces is rarely bootable as is: descriptors of
//! traced packages are missing, some packages are only partially present,
//! internal bundles are hidden behind export maps. Each step here fixes one
//! such gap. Steps are idempotent and independent of each other; a failing
//! step leaves a warning in the [`RepairReport`] and the next one runs.

mod prune;
mod proxy;
mod restore;
mod shim;

use std::io;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};

use crate::conventions::Conventions;
use crate::error::RepairError;
use crate::io::as_overhead;
use crate::report::{WarningKind, Warnings};

pub use prune::{PruneStats, prune_dependencies};

/// What the repair steps did.
#[derive(Debug, Default)]
pub struct RepairReport {
    /// Package descriptors backfilled from the project.
    pub descriptors: usize,
    /// Packages restored wholesale from the trusted root.
    pub restored: Vec<String>,
    /// Shim packages synthesized.
    pub shimmed: Vec<String>,
    /// Directory proxies written.
    pub dir_proxies: usize,
    /// Entry proxies written.
    pub entry_proxies: usize,
    pub pruned: PruneStats,
    pub warnings: Warnings,
}

impl RepairReport {
    fn settle(&mut self, step: &str, result: io::Result<()>) {
        if let Err(e) = result {
            self.warnings
                .push(WarningKind::Repair, None, format!("{step} didn't complete: {e}"));
        }
    }
}

/// Shared inputs of the repair steps.
pub(crate) struct RepairContext<'a> {
    /// Dependency directory of the isolate.
    pub modules: Utf8PathBuf,
    /// Dependency directory of the project the isolate was cut from.
    pub project_modules: Utf8PathBuf,
    /// Dependency directory with full copies of every package. Read only.
    pub trusted: Option<&'a Utf8Path>,
    pub conventions: &'a Conventions,
}

/// Repairs the dependency directory of `isolate`.
///
/// `trusted_root` points at a dependency directory holding complete,
/// untrimmed packages, e.g. the monorepo's `node_modules`. Without it the
/// restore step is skipped.
pub fn repair(
    isolate: &Utf8Path,
    project_root: &Utf8Path,
    trusted_root: Option<&Utf8Path>,
    conventions: &Conventions,
) -> Result<RepairReport, RepairError> {
    if !isolate.is_dir() {
        return Err(RepairError::IsolateNotFound(isolate.to_path_buf()));
    }

    let s = Instant::now();
    let ctx = RepairContext {
        modules: isolate.join(&conventions.dependency_dir),
        project_modules: project_root.join(&conventions.dependency_dir),
        trusted: trusted_root,
        conventions,
    };

    let mut report = RepairReport::default();

    let result = restore::backfill_descriptors(&ctx, &mut report);
    report.settle("descriptor backfill", result);

    let result = restore::restore_packages(&ctx, &mut report);
    report.settle("restore", result);

    let result = shim::shim_internal_modules(&ctx, &mut report);
    report.settle("shim", result);

    let result = proxy::dir_proxies(&ctx, &mut report);
    report.settle("directory proxies", result);

    let result = proxy::permissive_descriptor(&ctx);
    report.settle("permissive descriptor", result);

    let result = proxy::entry_proxies(&ctx, &mut report);
    report.settle("entry proxies", result);

    match prune_dependencies(&ctx.modules, &conventions.prune) {
        Ok(stats) => report.pruned = stats,
        Err(e) => report.settle("prune", Err(e)),
    }

    tracing::info!(
        "repaired {} ({} restored, {} proxies, {} pruned) {}",
        isolate,
        report.restored.len(),
        report.dir_proxies + report.entry_proxies,
        report.pruned.files + report.pruned.dirs,
        as_overhead(s)
    );

    Ok(report)
}
