//! Dependency closure of an entrypoint and assembly of its isolate.
//!
//! The framework's traces only record direct `require`/`import` edges. Files
//! the renderer loads through other mechanisms (the enclosing root layout, the
//! not-found fallback) are added by [`ImplicitProbe`]s, and the files needed
//! only at process boot (boot script, build identifier, manifests) are copied
//! by convention.

use std::fs;
use std::io::ErrorKind;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;

use crate::client::{ClientManifestResolver, normalize_client_path};
use crate::conventions::Conventions;
use crate::error::ClosureError;
use crate::io::{absolute, as_overhead, clear_dir, copy_file, copy_tree};
use crate::report::{WarningKind, Warnings};
use crate::rewrite::{apply_asset_prefix, build_source_root, rewrite_absolute_paths};
use crate::trace::{ClosureSet, parse_trace};

/// What a probe gets to look at.
pub struct ClosureContext<'a> {
    /// Standalone output directory every closure path is relative to.
    pub project_root: &'a Utf8Path,
    /// Entrypoint being isolated, relative to `project_root`.
    pub entrypoint: &'a Utf8Path,
    pub conventions: &'a Conventions,
}

/// Finds an extra entry file the entrypoint depends on without the trace
/// saying so. The entry's own trace is merged into the closure.
pub trait ImplicitProbe: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the implicit entry, relative to the project root, or `None`
    /// when it does not apply.
    fn probe(&self, ctx: &ClosureContext) -> Option<Utf8PathBuf>;
}

/// Probes a fixed, application-relative entry file.
#[derive(Debug, Clone)]
pub struct ConventionProbe {
    pub name: String,
    pub entry: Utf8PathBuf,
}

impl ImplicitProbe for ConventionProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe(&self, ctx: &ClosureContext) -> Option<Utf8PathBuf> {
        let entry = ctx.conventions.in_app(&self.entry);

        // the entrypoint does not depend on itself
        if entry == ctx.entrypoint {
            return None;
        }

        Some(entry)
    }
}

/// Probes for every implicit entry listed in the conventions.
pub fn default_probes(conventions: &Conventions) -> Vec<Box<dyn ImplicitProbe>> {
    conventions
        .implicit_entries
        .iter()
        .map(|implicit| {
            Box::new(ConventionProbe {
                name: implicit.name.clone(),
                entry: implicit.entry.clone(),
            }) as Box<dyn ImplicitProbe>
        })
        .collect()
}

/// Client assets of the isolated page.
pub struct ClientAssets<'a> {
    /// Client-reference manifest, relative to the project root.
    pub manifest: Utf8PathBuf,
    pub resolver: &'a dyn ClientManifestResolver,
}

/// Input of [`build_closure`].
pub struct ClosureRequest<'a> {
    pub project_root: Utf8PathBuf,
    /// Entrypoint, relative to `project_root`.
    pub entrypoint: Utf8PathBuf,
    /// Target directory. Cleared before anything is copied.
    pub isolate: Utf8PathBuf,
    pub conventions: &'a Conventions,
    pub probes: Vec<Box<dyn ImplicitProbe>>,
    pub client: Option<ClientAssets<'a>>,
    /// Where compiled static assets are read from. Defaults to the parent of
    /// the project root.
    pub static_root: Option<Utf8PathBuf>,
    /// CDN prefix patched into the boot script and client manifests.
    pub asset_prefix: Option<String>,
}

impl<'a> ClosureRequest<'a> {
    pub fn new(
        project_root: impl Into<Utf8PathBuf>,
        entrypoint: impl Into<Utf8PathBuf>,
        isolate: impl Into<Utf8PathBuf>,
        conventions: &'a Conventions,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            entrypoint: entrypoint.into(),
            isolate: isolate.into(),
            conventions,
            probes: default_probes(conventions),
            client: None,
            static_root: None,
            asset_prefix: None,
        }
    }

    pub fn with_client(mut self, manifest: impl Into<Utf8PathBuf>, resolver: &'a dyn ClientManifestResolver) -> Self {
        self.client = Some(ClientAssets {
            manifest: manifest.into(),
            resolver,
        });
        self
    }

    pub fn with_probes(mut self, probes: Vec<Box<dyn ImplicitProbe>>) -> Self {
        self.probes = probes;
        self
    }

    pub fn with_static_root(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.static_root = Some(root.into());
        self
    }

    pub fn with_asset_prefix(mut self, prefix: Option<String>) -> Self {
        self.asset_prefix = prefix;
        self
    }
}

/// An assembled isolate.
#[derive(Debug)]
pub struct Isolate {
    pub dir: Utf8PathBuf,
    /// Merged server closure, relative to the project root.
    pub files: ClosureSet,
    /// Client assets copied into the isolate.
    pub client_assets: usize,
    /// Whether build-machine paths were rewritten.
    pub rewritten: bool,
    pub warnings: Warnings,
}

/// Computes the closure of an entrypoint and assembles it into an isolate.
pub fn build_closure(req: ClosureRequest) -> Result<Isolate, ClosureError> {
    let s = Instant::now();
    let conventions = req.conventions;

    if !req.project_root.is_dir() {
        return Err(ClosureError::StandaloneNotFound(req.project_root.clone()));
    }

    let root = absolute(&req.project_root)?;
    let mut warnings = Warnings::new();

    // entrypoint trace, required
    let trace = root.join(conventions.trace_of(&req.entrypoint));
    let parsed = parse_trace(&trace, &root)?;
    let mut files = parsed.files;
    warnings.extend(parsed.warnings);

    if !root.join(&req.entrypoint).is_file() {
        return Err(ClosureError::MissingEntrypoint(req.entrypoint.clone()));
    }
    files.insert(&req.entrypoint);

    let ctx = ClosureContext {
        project_root: &root,
        entrypoint: &req.entrypoint,
        conventions,
    };

    for probe in &req.probes {
        let Some(entry) = probe.probe(&ctx) else {
            continue;
        };

        match parse_trace(root.join(conventions.trace_of(&entry)), &root) {
            Ok(parsed) => {
                tracing::debug!("merging {} from {}", probe.name(), entry);
                files.union(parsed.files);
                files.insert(&entry);
                warnings.extend(parsed.warnings);
            }
            Err(e) => warnings.at(
                WarningKind::ImplicitDependency,
                &entry,
                format!("{} skipped: {}", probe.name(), e),
            ),
        }
    }

    clear_dir(&req.isolate)?;

    tracing::debug!("copying {} server files into {}", files.len(), req.isolate);

    for file in files.iter() {
        if let Err(e) = copy_file(&root.join(file), &req.isolate.join(file)) {
            warnings.at(WarningKind::PartialCopy, file, e);
        }
    }

    let client_assets = match &req.client {
        Some(client) => {
            let static_root = match &req.static_root {
                Some(path) => path.clone(),
                None => root.parent().map(Utf8Path::to_path_buf).unwrap_or_else(|| root.clone()),
            };
            copy_client_assets(&root, &req.isolate, &static_root, client, conventions, &mut warnings)
        }
        None => 0,
    };

    copy_boot_files(&root, &req.isolate, conventions, &mut warnings)?;
    patch_routes_manifest(&req.isolate, conventions, &mut warnings)?;

    let rewritten = rewrite_paths(&root, &req.isolate, conventions, &mut warnings);

    if let Some(prefix) = &req.asset_prefix {
        apply_asset_prefix(&req.isolate, prefix, conventions, &mut warnings);
    }

    tracing::info!(
        "isolated {} ({} files, {} client assets) {}",
        req.entrypoint,
        files.len(),
        client_assets,
        as_overhead(s)
    );

    Ok(Isolate {
        dir: req.isolate,
        files,
        client_assets,
        rewritten,
        warnings,
    })
}

/// Copies the whole standalone output into `isolate` and applies the same
/// boot fixes as [`build_closure`]. Used when the application is deployed as
/// a single unit.
pub fn copy_standalone(
    project_root: &Utf8Path,
    isolate: &Utf8Path,
    conventions: &Conventions,
    asset_prefix: Option<&str>,
) -> Result<Isolate, ClosureError> {
    let s = Instant::now();

    if !project_root.is_dir() {
        return Err(ClosureError::StandaloneNotFound(project_root.to_path_buf()));
    }

    let root = absolute(project_root)?;
    let mut warnings = Warnings::new();

    clear_dir(isolate)?;
    let copied = copy_tree(&root, isolate, &|_| true)?;

    let boot = conventions.in_app(&conventions.boot_script);
    if !isolate.join(&boot).is_file() {
        return Err(ClosureError::MissingBootScript(boot));
    }

    let build_id = conventions.in_app(&conventions.build_id);
    if conventions.require_build_id && !isolate.join(&build_id).is_file() {
        return Err(ClosureError::MissingBuildId(build_id));
    }

    patch_routes_manifest(isolate, conventions, &mut warnings)?;
    let rewritten = rewrite_paths(&root, isolate, conventions, &mut warnings);

    if let Some(prefix) = asset_prefix {
        apply_asset_prefix(isolate, prefix, conventions, &mut warnings);
    }

    tracing::info!("copied standalone output ({copied} files) {}", as_overhead(s));

    Ok(Isolate {
        dir: isolate.to_path_buf(),
        files: ClosureSet::new(),
        client_assets: 0,
        rewritten,
        warnings,
    })
}

fn copy_client_assets(
    root: &Utf8Path,
    isolate: &Utf8Path,
    static_root: &Utf8Path,
    client: &ClientAssets,
    conventions: &Conventions,
    warnings: &mut Warnings,
) -> usize {
    let manifest = root.join(&client.manifest);

    let assets = match client.resolver.resolve(&manifest) {
        Ok(assets) => assets,
        Err(e) => {
            warnings.at(WarningKind::ClientAssets, &client.manifest, e);
            return 0;
        }
    };

    let dist = isolate.join(conventions.in_app(&conventions.dist_dir));
    let mut copied = 0;

    for asset in assets {
        let path = Utf8PathBuf::from(normalize_client_path(&asset, &conventions.client_prefixes));

        // asset paths come from a foreign tool, keep them inside the isolate
        let mut checked = ClosureSet::new();
        if !checked.insert(&path) {
            warnings.at(WarningKind::ClientAssets, &path, "escapes the static root");
            continue;
        }

        match copy_file(&static_root.join(&path), &dist.join(&path)) {
            Ok(_) => copied += 1,
            Err(e) => warnings.at(WarningKind::ClientAssets, &path, e),
        }
    }

    copied
}

fn copy_boot_files(
    root: &Utf8Path,
    isolate: &Utf8Path,
    conventions: &Conventions,
    warnings: &mut Warnings,
) -> Result<(), ClosureError> {
    let boot = conventions.in_app(&conventions.boot_script);
    copy_file(&root.join(&boot), &isolate.join(&boot)).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ClosureError::MissingBootScript(boot.clone()),
        _ => ClosureError::Io(e),
    })?;

    let build_id = conventions.in_app(&conventions.build_id);
    if let Err(e) = copy_file(&root.join(&build_id), &isolate.join(&build_id)) {
        if conventions.require_build_id {
            return Err(ClosureError::MissingBuildId(build_id));
        }
        warnings.at(WarningKind::Manifest, &build_id, e);
    }

    let optional = conventions
        .manifests
        .iter()
        .chain([&conventions.boot_manifest, &conventions.routes_manifest]);

    for manifest in optional {
        let manifest = conventions.in_app(manifest);
        let src = root.join(&manifest);
        if !src.is_file() {
            warnings.at(WarningKind::Manifest, &manifest, "not present in the build output");
            continue;
        }
        if let Err(e) = copy_file(&src, &isolate.join(&manifest)) {
            warnings.at(WarningKind::Manifest, &manifest, e);
        }
    }

    Ok(())
}

/// Clears the static route table so every route is rendered dynamically.
/// The isolate carries no prerendered output the router could serve.
fn patch_routes_manifest(
    isolate: &Utf8Path,
    conventions: &Conventions,
    warnings: &mut Warnings,
) -> Result<(), ClosureError> {
    let rel = conventions.in_app(&conventions.routes_manifest);
    let path = isolate.join(&rel);

    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warnings.at(WarningKind::Manifest, &rel, "routes manifest absent, nothing to force dynamic");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut manifest: Value = serde_json::from_str(&text).map_err(|source| ClosureError::RoutesManifest {
        path: rel.clone(),
        source,
    })?;

    match manifest.as_object_mut() {
        Some(map) => {
            map.insert("staticRoutes".into(), Value::Array(Vec::new()));
        }
        None => {
            warnings.at(WarningKind::Manifest, &rel, "routes manifest is not an object");
            return Ok(());
        }
    }

    let patched = serde_json::to_string_pretty(&manifest).map_err(|source| ClosureError::RoutesManifest {
        path: rel.clone(),
        source,
    })?;

    fs::write(&path, patched)?;
    Ok(())
}

fn rewrite_paths(
    root: &Utf8Path,
    isolate: &Utf8Path,
    conventions: &Conventions,
    warnings: &mut Warnings,
) -> bool {
    let Some(source_root) = build_source_root(root, conventions) else {
        warnings.at(
            WarningKind::Rewrite,
            root,
            "couldn't determine the build-source root, paths left as is",
        );
        return false;
    };

    match rewrite_absolute_paths(isolate, &source_root, &conventions.container_root, conventions, warnings) {
        Ok(changed) => changed > 0,
        Err(e) => {
            warnings.at(WarningKind::Rewrite, &e.path, &e.source);
            false
        }
    }
}
