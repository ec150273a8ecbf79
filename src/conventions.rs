//! Framework conventions the isolation pipeline depends on.
//!
//! Every file name, search path and rule table the pipeline uses is collected
//! here, so a different framework release only needs a different
//! [`Conventions`] value. The [`Default`] implementation describes the
//! standalone output layout of Next.js.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Conventions of the framework's build output and of the target container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Conventions {
    /// Location of the application inside the standalone output, relative to
    /// the project root. Empty for a single-app repository, `apps/<name>` in
    /// a monorepo.
    pub app_dir: Utf8PathBuf,
    /// Suffix appended to a module's path to find its dependency trace.
    pub trace_suffix: String,
    /// Framework build directory, relative to the application.
    pub dist_dir: Utf8PathBuf,
    /// Compiled app-router pages, relative to the application.
    pub server_app_dir: Utf8PathBuf,
    /// Compiled pages-router pages, relative to the application.
    pub server_pages_dir: Utf8PathBuf,
    /// Standalone output inside a compiled zone.
    pub standalone_dir: Utf8PathBuf,
    /// Where the isolate of a zone is assembled, relative to the zone.
    pub isolate_dir: Utf8PathBuf,
    /// Compiled module name of a page inside its route directory.
    pub page_module: String,
    /// Client-reference manifest of a page inside its route directory.
    pub client_manifest: String,
    /// Boot script, relative to the application.
    pub boot_script: Utf8PathBuf,
    /// Boot manifest carrying build-machine paths, relative to the application.
    pub boot_manifest: Utf8PathBuf,
    /// Routing manifest whose static routes are cleared, relative to the application.
    pub routes_manifest: Utf8PathBuf,
    /// Build identifier, relative to the application.
    pub build_id: Utf8PathBuf,
    /// Whether a missing build identifier fails the isolate.
    pub require_build_id: bool,
    /// Best-effort manifests, relative to the application.
    pub manifests: Vec<Utf8PathBuf>,
    /// Compiled entry files the trace format never links to a page.
    pub implicit_entries: Vec<ImplicitEntry>,
    /// Prefixes stripped from client asset paths.
    pub client_prefixes: Vec<String>,
    /// Dependency directory name.
    pub dependency_dir: String,
    /// Conventional entry file of a dependency package.
    pub entry_file: String,
    /// Packages restored wholesale from the trusted dependency root.
    pub fragile_packages: Vec<String>,
    /// Internal modules re-exposed under a public package name.
    pub shims: Vec<ShimRule>,
    /// Directory proxies synthesized inside packages.
    pub dir_proxies: Vec<DirProxyRule>,
    /// Directories whose child packages also get entry proxies, relative to
    /// the dependency directory.
    pub nested_package_roots: Vec<Utf8PathBuf>,
    /// Package whose descriptor is replaced with a permissive one.
    pub permissive_package: Option<PermissivePackage>,
    /// What the prune step deletes.
    pub prune: PruneRules,
    /// Execution root inside the target container.
    pub container_root: String,
    /// Directory name used to locate the build-source root when the
    /// standalone suffix does not match.
    pub root_marker: String,
    /// Route source directories inside an application, first match wins.
    pub route_dirs: Vec<Utf8PathBuf>,
    /// Page-defining file names, in order of preference.
    pub page_files: Vec<String>,
    /// Name given to the root route.
    pub root_route: String,
    /// Prefixes excluded when cloning a zone.
    pub zone_excludes: Vec<String>,
    /// Maximum number of routes processed at once.
    pub concurrency: usize,
}

/// An implicit dependency of every page, probed by convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplicitEntry {
    /// Label used in logs and warnings.
    pub name: String,
    /// Compiled entry file, relative to the application.
    pub entry: Utf8PathBuf,
}

/// Re-exposes a compiled internal bundle as a public package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimRule {
    /// Public package name created in the dependency directory.
    pub package: String,
    /// Candidate bundle directories, relative to a dependency directory.
    pub candidates: Vec<Utf8PathBuf>,
    /// Substring a source file name must contain to be picked.
    pub variant: String,
    /// `(pattern, destination)` pairs; a file whose name contains `pattern`
    /// is copied to `destination` and exported as `./<pattern>`.
    pub mappings: Vec<(String, String)>,
}

/// Synthesizes `<proxy_dir>/<name>.js` for each `<source_dir>/<name><extension>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirProxyRule {
    pub package: String,
    pub source_dir: String,
    pub extension: String,
    pub proxy_dir: String,
}

/// Permissive replacement descriptor for a package with an export allow-list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissivePackage {
    pub name: String,
    pub version: String,
    /// Entry file body written only when the package has none.
    pub fallback_entry: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PruneRules {
    /// Directory names removed in one step.
    pub dirs: Vec<String>,
    /// File name suffixes, matched case-insensitively.
    pub suffixes: Vec<String>,
    /// Foreign platform identifiers, matched against the lowercased relative path.
    pub platforms: Vec<String>,
}

impl Default for PruneRules {
    fn default() -> Self {
        Self {
            dirs: strings(&["@types"]),
            suffixes: strings(&[
                ".d.ts",
                ".d.mts",
                ".d.cts",
                ".map",
                ".test.js",
                ".spec.js",
                ".md",
                ".markdown",
            ]),
            platforms: strings(&["darwin", "macos", "win32", "windows"]),
        }
    }
}

impl Default for Conventions {
    fn default() -> Self {
        Self {
            app_dir: Utf8PathBuf::new(),
            trace_suffix: ".nft.json".into(),
            dist_dir: ".next".into(),
            server_app_dir: ".next/server/app".into(),
            server_pages_dir: ".next/server/pages".into(),
            standalone_dir: ".next/standalone".into(),
            isolate_dir: "dist-deploy".into(),
            page_module: "page.js".into(),
            client_manifest: "page_client-reference-manifest.js".into(),
            boot_script: "server.js".into(),
            boot_manifest: ".next/required-server-files.json".into(),
            routes_manifest: ".next/routes-manifest.json".into(),
            build_id: ".next/BUILD_ID".into(),
            require_build_id: true,
            manifests: [
                ".next/images-manifest.json",
                ".next/build-manifest.json",
                ".next/react-loadable-manifest.json",
                ".next/server/pages-manifest.json",
                ".next/server/app-paths-manifest.json",
                ".next/server/middleware-manifest.json",
                ".next/server/server-reference-manifest.json",
                ".next/server/functions-config-manifest.json",
                ".next/server/next-font-manifest.json",
            ]
            .into_iter()
            .map(Utf8PathBuf::from)
            .collect(),
            implicit_entries: vec![
                ImplicitEntry {
                    name: "not-found".into(),
                    entry: ".next/server/app/_not-found/page.js".into(),
                },
                ImplicitEntry {
                    name: "root-layout".into(),
                    entry: ".next/server/app/layout.js".into(),
                },
            ],
            client_prefixes: strings(&["/", "_next/"]),
            dependency_dir: "node_modules".into(),
            entry_file: "index.js".into(),
            fragile_packages: strings(&[
                "next",
                "react",
                "react-dom",
                "styled-jsx",
                "@swc/helpers",
                "@next/env",
                "pg",
            ]),
            shims: vec![ShimRule {
                package: "react-server-dom-webpack".into(),
                candidates: vec![
                    "next/dist/compiled/react-server-dom-webpack-experimental/cjs".into(),
                    "next/dist/compiled/react-server-dom-webpack/cjs".into(),
                ],
                variant: "production".into(),
                mappings: vec![
                    ("server.node".into(), "server.node.js".into()),
                    ("client".into(), "client.js".into()),
                    ("server.edge".into(), "server.edge.js".into()),
                ],
            }],
            dir_proxies: vec![DirProxyRule {
                package: "@swc/helpers".into(),
                source_dir: "cjs".into(),
                extension: ".cjs".into(),
                proxy_dir: "_".into(),
            }],
            nested_package_roots: vec!["next/dist/compiled".into()],
            permissive_package: Some(PermissivePackage {
                name: "next".into(),
                version: "0.0.0-shim".into(),
                fallback_entry: "module.exports = {};".into(),
            }),
            prune: PruneRules::default(),
            container_root: "/app".into(),
            root_marker: ".next".into(),
            route_dirs: vec!["src/app".into(), "app".into()],
            page_files: strings(&["page.tsx", "page.ts", "page.jsx", "page.js"]),
            root_route: "home".into(),
            zone_excludes: strings(&[".next", "dist", "node_modules", ".git"]),
            concurrency: 3,
        }
    }
}

impl Conventions {
    /// Reads conventions from a JSON file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read(path.into(), e))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse(path.into(), e))
    }

    /// Resolves an application-relative path against the project root layout.
    pub fn in_app(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.app_dir.join(path)
    }

    /// Trace file of a compiled module.
    pub fn trace_of(&self, module: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}{}", module.as_ref(), self.trace_suffix))
    }

    /// Compiled server directory of a route, relative to the project root.
    pub fn route_server_dir(&self, route: &str) -> Utf8PathBuf {
        let base = self.in_app(&self.server_app_dir);
        if route == self.root_route {
            base
        } else {
            base.join(route)
        }
    }

    /// Compiled page module of a route, relative to the project root.
    pub fn page_entry(&self, route: &str) -> Utf8PathBuf {
        self.route_server_dir(route).join(&self.page_module)
    }

    /// Client-reference manifest of a route, relative to the project root.
    pub fn client_manifest_of(&self, route: &str) -> Utf8PathBuf {
        self.route_server_dir(route).join(&self.client_manifest)
    }

    /// Standalone suffix of a project root, e.g. `apps/web/.next/standalone`.
    pub fn standalone_suffix(&self) -> Utf8PathBuf {
        self.app_dir.join(&self.standalone_dir)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_entry() {
        let conventions = Conventions {
            app_dir: "apps/web".into(),
            ..Default::default()
        };

        assert_eq!(
            conventions.page_entry("dashboard"),
            Utf8Path::new("apps/web/.next/server/app/dashboard/page.js")
        );
        assert_eq!(
            conventions.page_entry("home"),
            Utf8Path::new("apps/web/.next/server/app/page.js")
        );
        assert_eq!(
            conventions.trace_of(conventions.page_entry("users/[id]")),
            Utf8Path::new("apps/web/.next/server/app/users/[id]/page.js.nft.json")
        );
    }

    #[test]
    fn test_empty_app_dir() {
        let conventions = Conventions::default();
        assert_eq!(
            conventions.in_app(&conventions.boot_script),
            Utf8Path::new("server.js")
        );
        assert_eq!(
            conventions.standalone_suffix(),
            Utf8Path::new(".next/standalone")
        );
    }

    #[test]
    fn test_partial_json() {
        let conventions: Conventions =
            serde_json::from_str(r#"{ "app_dir": "apps/shop", "concurrency": 5 }"#).unwrap();

        assert_eq!(conventions.app_dir, "apps/shop");
        assert_eq!(conventions.concurrency, 5);
        assert_eq!(conventions.trace_suffix, ".nft.json");
        assert!(conventions.require_build_id);
        assert_eq!(conventions.prune.platforms.len(), 4);
    }
}
