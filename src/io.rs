use std::fmt::Display;
use std::fs;
use std::io;
use std::time::Instant;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use console::Style;

const ANSI_BLUE: Style = Style::new().blue();

pub(crate) fn as_overhead(s: Instant) -> impl Display {
    let f = format!("(+{}ms)", s.elapsed().as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Delete a directory if it exists and create it anew.
pub(crate) fn clear_dir(path: &Utf8Path) -> io::Result<()> {
    if fs::metadata(path).is_ok() {
        fs::remove_dir_all(path)?;
    }

    fs::create_dir_all(path)
}

/// Copy a single file, creating the parent directories of `dst`.
pub(crate) fn copy_file(src: &Utf8Path, dst: &Utf8Path) -> io::Result<u64> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::copy(src, dst)
}

/// Recursively copy `src` into `dst`. Entries whose path relative to `src`
/// is rejected by `keep` are skipped, directories without descending.
///
/// Returns the number of copied files.
pub(crate) fn copy_tree(
    src: &Utf8Path,
    dst: &Utf8Path,
    keep: &dyn Fn(&Utf8Path) -> bool,
) -> io::Result<u64> {
    copy_rec(src, dst, Utf8Path::new(""), keep)
}

fn copy_rec(
    root: &Utf8Path,
    dst: &Utf8Path,
    rel: &Utf8Path,
    keep: &dyn Fn(&Utf8Path) -> bool,
) -> io::Result<u64> {
    fs::create_dir_all(dst.join(rel))?;
    let mut count = 0;

    for entry in root.join(rel).read_dir_utf8()? {
        let entry = entry?;
        let path = rel.join(entry.file_name());

        if !keep(&path) {
            continue;
        }

        // follows symlinks, the output has to be self-contained
        if fs::metadata(entry.path())?.is_dir() {
            count += copy_rec(root, dst, &path, keep)?;
        } else {
            fs::copy(entry.path(), dst.join(&path))?;
            count += 1;
        }
    }

    Ok(count)
}

/// Lists every file below `root` as a sorted list of relative paths.
pub(crate) fn walk_files(root: &Utf8Path) -> io::Result<Vec<Utf8PathBuf>> {
    let mut acc = Vec::new();
    walk_rec(root, Utf8Path::new(""), &mut acc)?;
    acc.sort();
    Ok(acc)
}

fn walk_rec(root: &Utf8Path, rel: &Utf8Path, acc: &mut Vec<Utf8PathBuf>) -> io::Result<()> {
    for entry in root.join(rel).read_dir_utf8()? {
        let entry = entry?;
        let path = rel.join(entry.file_name());

        if fs::metadata(entry.path())?.is_dir() {
            walk_rec(root, &path, acc)?;
        } else {
            acc.push(path);
        }
    }

    Ok(())
}

/// Makes a path absolute against the current directory and normalizes it.
pub(crate) fn absolute(path: &Utf8Path) -> io::Result<Utf8PathBuf> {
    if path.is_absolute() {
        return Ok(normalize_path(path));
    }

    let cwd = std::env::current_dir()?;
    let cwd = Utf8PathBuf::try_from(cwd).map_err(|e| io::Error::other(e.to_string()))?;
    Ok(normalize_path(&cwd.join(path)))
}

/// Normalize a path, removing things like `.` and `..`.
///
/// CAUTION: This does not resolve symlinks (unlike [`std::fs::canonicalize`]).
/// Trace entries are resolved lexically, the same way the framework wrote them.
///
/// Adapted from
/// <https://github.com/rust-lang/cargo/blob/f7acf448fc127df9a77c52cc2bba027790ac4931/crates/cargo-util/src/paths.rs#L76-L116>
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => unreachable!(),
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}
