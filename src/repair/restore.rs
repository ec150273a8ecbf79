use std::fs;
use std::io;

use crate::io::{copy_file, copy_tree, walk_files};
use crate::report::WarningKind;

use super::{RepairContext, RepairReport};

const DESCRIPTOR: &str = "package.json";

/// Copies every package descriptor of the project into the isolate, so that
/// packages whose files were traced but whose descriptor was not still
/// resolve. Descriptors already in the isolate are kept.
pub(super) fn backfill_descriptors(ctx: &RepairContext, report: &mut RepairReport) -> io::Result<()> {
    if !ctx.project_modules.is_dir() {
        tracing::debug!("no dependency directory at {}", ctx.project_modules);
        return Ok(());
    }

    for file in walk_files(&ctx.project_modules)? {
        if file.file_name() != Some(DESCRIPTOR) {
            continue;
        }

        let dst = ctx.modules.join(&file);
        if dst.exists() {
            continue;
        }

        match copy_file(&ctx.project_modules.join(&file), &dst) {
            Ok(_) => report.descriptors += 1,
            Err(e) => report.warnings.at(WarningKind::Repair, &dst, e),
        }
    }

    Ok(())
}

/// Replaces fragile packages with complete copies from the trusted root.
/// Packages the trusted root does not have are skipped silently.
pub(super) fn restore_packages(ctx: &RepairContext, report: &mut RepairReport) -> io::Result<()> {
    let Some(trusted) = ctx.trusted else {
        report
            .warnings
            .push(WarningKind::Repair, None, "no trusted dependency root, restore skipped");
        return Ok(());
    };

    for package in &ctx.conventions.fragile_packages {
        let src = trusted.join(package);
        if !src.is_dir() {
            tracing::debug!("{} not in trusted root {}", package, trusted);
            continue;
        }

        let dst = ctx.modules.join(package);
        let result = (|| {
            if fs::symlink_metadata(&dst).is_ok() {
                fs::remove_dir_all(&dst)?;
            }
            copy_tree(&src, &dst, &|_| true)
        })();

        match result {
            Ok(count) => {
                tracing::debug!("restored {} ({} files)", package, count);
                report.restored.push(package.clone());
            }
            Err(e) => report.warnings.at(WarningKind::Repair, &dst, e),
        }
    }

    Ok(())
}
