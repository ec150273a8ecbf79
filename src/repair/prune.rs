use std::fs;
use std::io;

use camino::Utf8Path;

use crate::conventions::PruneRules;

/// What pruning removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    pub files: usize,
    pub dirs: usize,
    /// Size of the removed files, directories not included.
    pub bytes: u64,
}

/// Deletes type declarations, source maps, tests, documentation and foreign
/// platform binaries from a dependency directory.
///
/// Matching directories are removed whole without descending. A missing
/// directory is not an error.
pub fn prune_dependencies(modules: &Utf8Path, rules: &PruneRules) -> io::Result<PruneStats> {
    let mut stats = PruneStats::default();

    if modules.is_dir() {
        prune_rec(modules, Utf8Path::new(""), rules, &mut stats)?;
    }

    tracing::debug!(
        "pruned {} files and {} directories ({} bytes) from {}",
        stats.files,
        stats.dirs,
        stats.bytes,
        modules
    );

    Ok(stats)
}

fn prune_rec(
    root: &Utf8Path,
    rel: &Utf8Path,
    rules: &PruneRules,
    stats: &mut PruneStats,
) -> io::Result<()> {
    for entry in root.join(rel).read_dir_utf8()? {
        let entry = entry?;
        let name = entry.file_name();
        let path = rel.join(name);
        let lower = path.as_str().to_lowercase();

        let foreign = rules
            .platforms
            .iter()
            .any(|platform| lower.contains(platform.as_str()));

        // links are removed, never followed
        let meta = fs::symlink_metadata(entry.path())?;

        if meta.is_dir() {
            if foreign || rules.dirs.iter().any(|dir| dir == name) {
                fs::remove_dir_all(entry.path())?;
                stats.dirs += 1;
            } else {
                prune_rec(root, &path, rules, stats)?;
            }
            continue;
        }

        let name = name.to_lowercase();
        let matched = rules
            .suffixes
            .iter()
            .any(|suffix| name.ends_with(&suffix.to_lowercase()));

        if foreign || matched {
            fs::remove_file(entry.path())?;
            stats.files += 1;
            stats.bytes += meta.len();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::walk_files;

    #[test]
    fn test_prune() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        for file in [
            "a/index.js",
            "a/index.d.ts",
            "a/test.spec.js",
            "b-darwin/bin",
            "@types/node/index.d.ts",
            "c/README.md",
            "c/dist/c.js.map",
            "c/dist/c.js",
        ] {
            let path = root.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "x").unwrap();
        }

        let stats = prune_dependencies(root, &PruneRules::default()).unwrap();

        assert_eq!(
            walk_files(root).unwrap(),
            vec![
                Utf8Path::new("a/index.js").to_path_buf(),
                Utf8Path::new("c/dist/c.js").to_path_buf(),
            ]
        );
        assert_eq!(stats.dirs, 2);
        assert_eq!(stats.files, 4);
        assert_eq!(stats.bytes, 4);
    }

    #[test]
    fn test_prune_missing_dir() {
        let stats =
            prune_dependencies(Utf8Path::new("/nonexistent/node_modules"), &PruneRules::default())
                .unwrap();
        assert_eq!(stats, PruneStats::default());
    }
}
