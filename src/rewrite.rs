//! Rewrites build-machine paths embedded in boot files.
//!
//! The boot manifest and the boot script both carry the absolute path of the
//! directory the application was built in. Inside the container the same
//! files live under a different root, so that path is replaced verbatim. The
//! files are treated as opaque text, never parsed.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::client::patch_client_manifest;
use crate::conventions::Conventions;
use crate::error::RewriteError;
use crate::io::{normalize_path, walk_files};
use crate::report::{WarningKind, Warnings};

/// Derives the directory the application was built in from the project root
/// (the standalone output directory).
///
/// The standalone suffix is stripped when it matches exactly. Otherwise the
/// path is split at the first marker directory and walked up once per
/// component of the application directory. Returns `None` when neither
/// applies.
pub fn build_source_root(project_root: &Utf8Path, conventions: &Conventions) -> Option<Utf8PathBuf> {
    let project_root = normalize_path(project_root);
    let suffix = normalize_path(&conventions.standalone_suffix());

    let trimmed = project_root
        .as_str()
        .strip_suffix(suffix.as_str())
        .filter(|rest| rest.ends_with('/'))
        .map(|rest| rest.trim_end_matches('/'))
        .filter(|rest| !rest.is_empty());

    if let Some(root) = trimmed {
        return Some(Utf8PathBuf::from(root));
    }

    let marker = format!("/{}/", conventions.root_marker);
    let marker_end = format!("/{}", conventions.root_marker);
    let app = if let Some(index) = project_root.as_str().find(&marker) {
        &project_root.as_str()[..index]
    } else {
        project_root.as_str().strip_suffix(&marker_end)?
    };

    let mut root = Utf8Path::new(app);
    for _ in conventions.app_dir.components() {
        root = root.parent()?;
    }

    if root.as_str().is_empty() || root.as_str() == "/" {
        return None;
    }

    Some(root.to_path_buf())
}

/// Replaces every occurrence of `source_root` with `container_root` in the
/// isolate's boot manifest and boot script.
///
/// Returns the number of files changed. Missing files are reported as
/// warnings; a file that exists but cannot be rewritten is an error.
pub fn rewrite_absolute_paths(
    isolate: &Utf8Path,
    source_root: &Utf8Path,
    container_root: &str,
    conventions: &Conventions,
    warnings: &mut Warnings,
) -> Result<usize, RewriteError> {
    let targets = [
        conventions.in_app(&conventions.boot_manifest),
        conventions.in_app(&conventions.boot_script),
    ];

    let mut changed = 0;

    for target in targets {
        let path = isolate.join(&target);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => {
                warnings.at(WarningKind::Rewrite, &target, "not present, left as is");
                continue;
            }
        };

        if !content.contains(source_root.as_str()) {
            continue;
        }

        let patched = content.replace(source_root.as_str(), container_root);
        fs::write(&path, patched).map_err(|source| RewriteError {
            path: path.clone(),
            source,
        })?;

        tracing::debug!("rewrote {} -> {} in {}", source_root, container_root, target);
        changed += 1;
    }

    Ok(changed)
}

/// Replaces the value of the first `"assetPrefix": "..."` property.
pub fn patch_asset_prefix(content: &str, prefix: &str) -> Option<String> {
    const KEY: &str = "\"assetPrefix\"";

    let key = content.find(KEY)?;
    let rest = &content[key + KEY.len()..];
    let colon = rest.find(|c: char| !c.is_whitespace())?;
    if !rest[colon..].starts_with(':') {
        return None;
    }

    let after_colon = &rest[colon + 1..];
    let open = after_colon.find(|c: char| !c.is_whitespace())?;
    if !after_colon[open..].starts_with('"') {
        return None;
    }

    let value = &after_colon[open + 1..];
    let close = find_string_end(value)?;

    let start = key;
    let end = content.len() - value.len() + close + 1;
    let replacement = serde_json::to_string(prefix).ok()?;

    Some(format!(
        "{}\"assetPrefix\":{}{}",
        &content[..start],
        replacement,
        &content[end..]
    ))
}

fn find_string_end(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(i),
            _ => {}
        }
    }
    None
}

/// Points the isolate at a CDN: patches the boot script's asset prefix and
/// makes client-reference manifests reference `static/` relative paths.
pub fn apply_asset_prefix(
    isolate: &Utf8Path,
    prefix: &str,
    conventions: &Conventions,
    warnings: &mut Warnings,
) {
    let boot = conventions.in_app(&conventions.boot_script);
    let boot_path = isolate.join(&boot);

    match fs::read_to_string(&boot_path) {
        Ok(content) => match patch_asset_prefix(&content, prefix) {
            Some(patched) => {
                if let Err(e) = fs::write(&boot_path, patched) {
                    warnings.at(WarningKind::Rewrite, &boot, e);
                }
            }
            None => warnings.at(WarningKind::Rewrite, &boot, "no assetPrefix property to patch"),
        },
        Err(e) => warnings.at(WarningKind::Rewrite, &boot, e),
    }

    let roots = [
        conventions.in_app(&conventions.server_app_dir),
        conventions.in_app(&conventions.server_pages_dir),
    ];

    let mut patched = 0;

    for root in roots {
        let dir = isolate.join(&root);
        if !dir.is_dir() {
            continue;
        }

        let files = match walk_files(&dir) {
            Ok(files) => files,
            Err(e) => {
                warnings.at(WarningKind::Manifest, &root, e);
                continue;
            }
        };

        for file in files {
            if !file.as_str().ends_with("client-reference-manifest.js") {
                continue;
            }

            let path = dir.join(&file);
            let result = fs::read_to_string(&path).and_then(|content| {
                match patch_client_manifest(&content) {
                    Some(content) => fs::write(&path, content).map(|_| true),
                    None => Ok(false),
                }
            });

            match result {
                Ok(true) => patched += 1,
                Ok(false) => warnings.at(WarningKind::Manifest, &path, "unrecognized manifest shape"),
                Err(e) => warnings.at(WarningKind::Manifest, &path, e),
            }
        }
    }

    tracing::debug!("patched {patched} client-reference manifests with asset prefix {prefix}");
}
