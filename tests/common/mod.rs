#![allow(dead_code)]

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

pub fn tempdir() -> (TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
    (dir, path)
}

pub fn write(path: impl AsRef<Utf8Path>, content: &str) {
    let path = path.as_ref();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub fn read(path: impl AsRef<Utf8Path>) -> String {
    fs::read_to_string(path.as_ref()).unwrap()
}

/// Every file below `root`, relative and sorted.
pub fn files(root: impl AsRef<Utf8Path>) -> Vec<String> {
    fn rec(root: &Utf8Path, dir: &Utf8Path, acc: &mut Vec<String>) {
        for entry in dir.read_dir_utf8().unwrap() {
            let entry = entry.unwrap();
            if entry.file_type().unwrap().is_dir() {
                rec(root, entry.path(), acc);
            } else {
                acc.push(entry.path().strip_prefix(root).unwrap().to_string());
            }
        }
    }

    let root = root.as_ref();
    let mut acc = Vec::new();
    rec(root, root, &mut acc);
    acc.sort();
    acc
}

/// Standalone output with one page traced to a single dependency.
///
/// `route` is relative to the server app directory, empty for the root page.
pub fn standalone(root: &Utf8Path, route: &str) {
    let server = if route.is_empty() {
        Utf8PathBuf::from(".next/server/app")
    } else {
        Utf8Path::new(".next/server/app").join(route)
    };
    let ups = "../".repeat(server.components().count());

    write(root.join(&server).join("page.js"), "module.exports = 'page';");
    write(
        root.join(&server).join("page.js.nft.json"),
        &format!(r#"{{"version":1,"files":["{ups}node_modules/dep/index.js"]}}"#),
    );
    write(root.join("node_modules/dep/index.js"), "module.exports = 'dep';");
    write(root.join("node_modules/dep/package.json"), r#"{"name":"dep","main":"index.js"}"#);
    write(root.join("server.js"), "require('next');");
    write(root.join(".next/BUILD_ID"), "build-1");
}
