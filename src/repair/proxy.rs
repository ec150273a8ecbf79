use std::fs;
use std::io::{self, ErrorKind};

use camino::Utf8Path;
use serde_json::{Value, json};

use crate::report::WarningKind;

use super::{RepairContext, RepairReport};

/// Writes `<proxy_dir>/<name>.js` for each `<source_dir>/<name><extension>`
/// of the configured packages. Existing proxies are kept.
pub(super) fn dir_proxies(ctx: &RepairContext, report: &mut RepairReport) -> io::Result<()> {
    for rule in &ctx.conventions.dir_proxies {
        let package = ctx.modules.join(&rule.package);
        let source = package.join(&rule.source_dir);
        if !source.is_dir() {
            tracing::debug!("{} has no {} directory", rule.package, rule.source_dir);
            continue;
        }

        let proxies = package.join(&rule.proxy_dir);
        fs::create_dir_all(&proxies)?;

        for file in sorted_entries(&source)? {
            let Some(name) = file.strip_suffix(rule.extension.as_str()) else {
                continue;
            };

            let proxy = proxies.join(format!("{name}.js"));
            if proxy.exists() {
                continue;
            }

            fs::write(
                &proxy,
                format!("module.exports = require('../{}/{}');", rule.source_dir, file),
            )?;
            report.dir_proxies += 1;
        }
    }

    Ok(())
}

/// Replaces the descriptor of the configured package with one that has no
/// export map, so deep imports of its internals resolve.
pub(super) fn permissive_descriptor(ctx: &RepairContext) -> io::Result<()> {
    let Some(rule) = &ctx.conventions.permissive_package else {
        return Ok(());
    };

    let package = ctx.modules.join(&rule.name);
    fs::create_dir_all(&package)?;

    let descriptor = json!({
        "name": rule.name,
        "version": rule.version,
        "main": ctx.conventions.entry_file,
    });
    fs::write(
        package.join("package.json"),
        serde_json::to_string_pretty(&descriptor).map_err(io::Error::other)?,
    )?;

    let entry = package.join(&ctx.conventions.entry_file);
    if !entry.exists() {
        fs::write(&entry, &rule.fallback_entry)?;
    }

    Ok(())
}

/// Writes an entry file re-exporting `main` for every package that declares
/// one but lacks the conventional entry file.
pub(super) fn entry_proxies(ctx: &RepairContext, report: &mut RepairReport) -> io::Result<()> {
    if !ctx.modules.is_dir() {
        return Ok(());
    }

    let mut packages = Vec::new();

    for name in sorted_entries(&ctx.modules)? {
        let path = ctx.modules.join(&name);
        if name.starts_with('.') || !path.is_dir() {
            continue;
        }

        if name.starts_with('@') {
            for child in sorted_entries(&path)? {
                packages.push(path.join(child));
            }
        } else {
            packages.push(path);
        }
    }

    for root in &ctx.conventions.nested_package_roots {
        let root = ctx.modules.join(root);
        if root.is_dir() {
            packages.extend(sorted_entries(&root)?.into_iter().map(|child| root.join(child)));
        }
    }

    for package in packages {
        if !package.is_dir() {
            continue;
        }

        match entry_proxy(&package, &ctx.conventions.entry_file) {
            Ok(true) => report.entry_proxies += 1,
            Ok(false) => {}
            Err(e) => report.warnings.at(WarningKind::Repair, &package, e),
        }
    }

    Ok(())
}

fn entry_proxy(package: &Utf8Path, entry_file: &str) -> io::Result<bool> {
    let text = match fs::read_to_string(package.join("package.json")) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    let entry = package.join(entry_file);
    if entry.exists() {
        return Ok(false);
    }

    // not valid JSON, not something we can fix
    let Ok(descriptor) = serde_json::from_str::<Value>(&text) else {
        return Ok(false);
    };

    let Some(main) = descriptor.get("main").and_then(Value::as_str) else {
        return Ok(false);
    };

    let Some(target) = proxy_target(main, entry_file) else {
        return Ok(false);
    };

    fs::write(&entry, format!("module.exports = require('{target}');"))?;
    tracing::debug!("entry proxy {} -> {}", entry, target);

    Ok(true)
}

/// Module specifier an entry proxy requires, or `None` when `main` is empty
/// or names the entry file itself.
fn proxy_target(main: &str, entry_file: &str) -> Option<String> {
    let main = main.trim();
    let bare = main.trim_start_matches("./");
    let stem = Utf8Path::new(entry_file).file_stem().unwrap_or(entry_file);

    if bare.is_empty() || bare == entry_file || bare == stem {
        return None;
    }

    if main.starts_with('.') || main.starts_with('/') {
        Some(main.to_string())
    } else {
        Some(format!("./{main}"))
    }
}

fn sorted_entries(dir: &Utf8Path) -> io::Result<Vec<String>> {
    let mut names = dir
        .read_dir_utf8()?
        .map(|entry| entry.map(|entry| entry.file_name().to_string()))
        .collect::<io::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}
