//! Zones: single-route clones of the application source.
//!
//! A zone is compiled on its own, so the framework only emits the code of one
//! route. It is produced by copying the application (minus build output,
//! dependencies and version control) and deleting the page file of every
//! other route. Layout, loading and error files stay untouched, they are
//! shared by all routes.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{Pattern, glob};

use crate::conventions::Conventions;
use crate::error::ZoneError;
use crate::io::{absolute, clear_dir, copy_tree, walk_files};

/// A route discovered in the application source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    /// Route path relative to the route directory, or the root route sentinel.
    pub name: String,
    /// Directory holding the route's page file.
    pub source_dir: Utf8PathBuf,
}

/// A generated zone.
#[derive(Debug, Clone)]
pub struct Zone {
    pub dir: Utf8PathBuf,
    pub route: String,
    /// Page files deleted from the clone, relative to the zone.
    pub pruned: Vec<Utf8PathBuf>,
}

/// Lowercases a route name and turns it into a single path segment.
pub fn sanitize_route(route: &str) -> String {
    route.replace('/', "-").to_lowercase()
}

/// Directory name of a route's zone under the work directory.
pub fn zone_name(app: &str, route: &str) -> String {
    format!("{}-{}", app, sanitize_route(route))
}

/// Derives a DNS-1123 label for a route's deployable unit.
pub fn service_name(app: &str, route: &str) -> String {
    let raw = zone_name(app, route);
    let mut acc = String::with_capacity(raw.len());

    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
            acc.push(c);
        } else if !acc.ends_with('-') {
            acc.push('-');
        }
    }

    let trimmed: String = acc.trim_matches('-').chars().take(63).collect();
    let trimmed = trimmed.trim_end_matches('-');

    if trimmed.is_empty() {
        "default".into()
    } else {
        trimmed.into()
    }
}

/// Finds the route directory of an application, e.g. `src/app`.
pub fn route_dir(app: &Utf8Path, conventions: &Conventions) -> Result<Utf8PathBuf, ZoneError> {
    conventions
        .route_dirs
        .iter()
        .map(|dir| app.join(dir))
        .find(|dir| dir.is_dir())
        .ok_or_else(|| ZoneError::RouteDirNotFound(app.to_path_buf()))
}

/// Name of the route a page file belongs to.
fn route_of(route_dir: &Utf8Path, page: &Utf8Path, conventions: &Conventions) -> Option<String> {
    let parent = page.parent()?.strip_prefix(route_dir).ok()?;
    let name = parent
        .components()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join("/");

    if name.is_empty() {
        Some(conventions.root_route.clone())
    } else {
        Some(name)
    }
}

/// Scans the application source for page-defining files.
///
/// Routes are returned sorted by name, one per route directory. Two
/// directories resolving to the same name, which happens when a directory is
/// called like [`Conventions::root_route`], are rejected.
pub fn discover_routes(
    app: impl AsRef<Utf8Path>,
    conventions: &Conventions,
) -> Result<Vec<RouteDescriptor>, ZoneError> {
    let app = app.as_ref();
    if !app.is_dir() {
        return Err(ZoneError::SourceNotFound(app.to_path_buf()));
    }

    let dir = absolute(&route_dir(app, conventions)?)?;
    let mut routes: BTreeMap<String, Utf8PathBuf> = BTreeMap::new();

    for page in &conventions.page_files {
        let pattern = format!("{}/**/{}", Pattern::escape(dir.as_str()), page);
        let paths = glob(&pattern).map_err(|e| std::io::Error::other(e.to_string()))?;

        for path in paths {
            let path = path.map_err(|e| e.into_error())?;
            let path = Utf8PathBuf::try_from(path)?;

            let Some(name) = route_of(&dir, &path, conventions) else {
                continue;
            };
            let source_dir = path.parent().map(Utf8Path::to_path_buf).unwrap_or_default();

            // e.g. a `home/` directory next to the root page
            match routes.get(&name) {
                Some(first) if *first != source_dir => {
                    return Err(ZoneError::RouteConflict {
                        route: name,
                        first: first.clone(),
                        second: source_dir,
                    });
                }
                Some(_) => {}
                None => {
                    routes.insert(name, source_dir);
                }
            }
        }
    }

    tracing::info!("discovered {} routes in {}", routes.len(), app);

    Ok(routes
        .into_iter()
        .map(|(name, source_dir)| RouteDescriptor { name, source_dir })
        .collect())
}

/// Clones `app` into `work_dir/<app_name>-<route>` and removes every page
/// file that does not belong to `route`.
pub fn generate_zone(
    app: impl AsRef<Utf8Path>,
    app_name: &str,
    route: &str,
    work_dir: impl AsRef<Utf8Path>,
    conventions: &Conventions,
) -> Result<Zone, ZoneError> {
    let app = app.as_ref();
    if !app.is_dir() {
        return Err(ZoneError::SourceNotFound(app.to_path_buf()));
    }

    let dest = work_dir.as_ref().join(zone_name(app_name, route));

    tracing::info!("generating zone {} -> {}", route, dest);

    let app_abs = absolute(app)?;
    let work_abs = absolute(work_dir.as_ref())?;

    clear_dir(&dest)?;
    copy_tree(app, &dest, &|path| {
        let excluded = path
            .components()
            .next()
            .map(|first| {
                conventions
                    .zone_excludes
                    .iter()
                    .any(|prefix| first.as_str().starts_with(prefix.as_str()))
            })
            .unwrap_or(false);

        // never copy the work directory into itself
        !excluded && app_abs.join(path) != work_abs
    })?;

    let pruned = prune_routes(&dest, route, conventions)?;

    Ok(Zone {
        dir: dest,
        route: route.to_string(),
        pruned,
    })
}

fn prune_routes(
    zone: &Utf8Path,
    target: &str,
    conventions: &Conventions,
) -> Result<Vec<Utf8PathBuf>, ZoneError> {
    let dir = route_dir(zone, conventions)?;
    let mut pruned = Vec::new();
    let mut kept: BTreeMap<Utf8PathBuf, usize> = BTreeMap::new();

    for file in walk_files(&dir)? {
        let Some(name) = file.file_name() else {
            continue;
        };
        let Some(rank) = conventions.page_files.iter().position(|page| page == name) else {
            continue;
        };

        let path = dir.join(&file);
        let Some(route) = route_of(&dir, &path, conventions) else {
            continue;
        };

        if route != target {
            tracing::debug!("pruning route {} (target {})", route, target);
            fs::remove_file(&path)?;
            pruned.push(path.strip_prefix(zone).unwrap_or(&path).to_path_buf());
            continue;
        }

        // a route directory keeps exactly one page file, the preferred one
        let parent = file.parent().map(Utf8Path::to_path_buf).unwrap_or_default();
        match kept.get(&parent) {
            Some(&best) if best <= rank => {
                fs::remove_file(&path)?;
                pruned.push(path.strip_prefix(zone).unwrap_or(&path).to_path_buf());
            }
            Some(&best) => {
                let previous = dir.join(&parent).join(&conventions.page_files[best]);
                fs::remove_file(&previous)?;
                pruned.push(previous.strip_prefix(zone).unwrap_or(&previous).to_path_buf());
                kept.insert(parent, rank);
            }
            None => {
                kept.insert(parent, rank);
            }
        }
    }

    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_route() {
        assert_eq!(sanitize_route("Users/Settings"), "users-settings");
        assert_eq!(sanitize_route("home"), "home");
    }

    #[test]
    fn test_zone_name() {
        assert_eq!(zone_name("shop", "blog/posts"), "shop-blog-posts");
        assert_eq!(zone_name("shop", "blog/posts"), zone_name("shop", "blog-posts"));
    }

    #[test]
    fn test_service_name() {
        assert_eq!(service_name("shop", "home"), "shop-home");
        assert_eq!(service_name("shop", "users/[id]"), "shop-users-id");
        assert_eq!(service_name("My_Shop", "a.b"), "my-shop-a-b");
        assert_eq!(service_name("", "___"), "default");
        assert_eq!(service_name(&"a".repeat(100), "x").len(), 63);
        assert!(!service_name(&"a".repeat(62), "x").ends_with('-'));
    }

    #[test]
    fn test_route_of() {
        let conventions = Conventions::default();
        let dir = Utf8Path::new("/app/src/app");

        assert_eq!(
            route_of(dir, Utf8Path::new("/app/src/app/page.tsx"), &conventions).as_deref(),
            Some("home")
        );
        assert_eq!(
            route_of(dir, Utf8Path::new("/app/src/app/users/[id]/page.tsx"), &conventions)
                .as_deref(),
            Some("users/[id]")
        );
        assert_eq!(
            route_of(dir, Utf8Path::new("/elsewhere/page.tsx"), &conventions),
            None
        );
    }
}
