use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value, json};

use crate::conventions::ShimRule;
use crate::io::copy_file;
use crate::report::WarningKind;

use super::{RepairContext, RepairReport};

/// Re-exposes compiled internal bundles under their public package names.
pub(super) fn shim_internal_modules(ctx: &RepairContext, report: &mut RepairReport) -> io::Result<()> {
    for rule in &ctx.conventions.shims {
        let Some(source) = locate(ctx, rule) else {
            report.warnings.push(
                WarningKind::Repair,
                None,
                format!("no bundle found for {}, shim skipped", rule.package),
            );
            continue;
        };

        let dest = ctx.modules.join(&rule.package);
        let exported = shim(&source, &dest, rule)?;

        if exported == 0 {
            report.warnings.at(
                WarningKind::Repair,
                &source,
                format!("no {} files for {}", rule.variant, rule.package),
            );
            continue;
        }

        tracing::debug!("shimmed {} from {} ({} exports)", rule.package, source, exported);
        report.shimmed.push(rule.package.clone());
    }

    Ok(())
}

/// First candidate directory present in the isolate, then in the trusted root.
fn locate(ctx: &RepairContext, rule: &ShimRule) -> Option<Utf8PathBuf> {
    let roots = std::iter::once(ctx.modules.as_path()).chain(ctx.trusted);

    roots
        .flat_map(|root| rule.candidates.iter().map(move |candidate| root.join(candidate)))
        .find(|dir| dir.is_dir())
}

fn shim(source: &Utf8Path, dest: &Utf8Path, rule: &ShimRule) -> io::Result<usize> {
    let mut names = Vec::new();
    for entry in source.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string());
        }
    }
    names.sort();

    let mut exports = Map::new();

    for (pattern, target) in &rule.mappings {
        let found = names
            .iter()
            .find(|name| name.contains(pattern.as_str()) && name.contains(rule.variant.as_str()));

        let Some(name) = found else {
            continue;
        };

        copy_file(&source.join(name), &dest.join(target))?;
        exports.insert(format!("./{pattern}"), Value::String(format!("./{target}")));
    }

    if exports.is_empty() {
        return Ok(0);
    }

    let count = exports.len();
    let descriptor = json!({
        "name": rule.package,
        "exports": exports,
    });

    fs::write(
        dest.join("package.json"),
        serde_json::to_string_pretty(&descriptor).map_err(io::Error::other)?,
    )?;

    Ok(count)
}
