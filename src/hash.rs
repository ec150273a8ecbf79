use std::fs;
use std::io;

use camino::Utf8Path;

use crate::io::walk_files;

/// 32 bytes length BLAKE3 hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex()[..12])
    }
}

/// Content fingerprint of a directory tree.
///
/// Relative paths and file contents are fed in sorted path order, so two
/// trees with identical files hash equal regardless of where they live or
/// in which order they were written. Filesystem metadata is ignored.
pub fn fingerprint(root: impl AsRef<Utf8Path>) -> io::Result<Hash32> {
    let root = root.as_ref();
    let mut hasher = blake3::Hasher::new();

    for path in walk_files(root)? {
        let data = fs::read(root.join(&path))?;
        hasher.update(path.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(&(data.len() as u64).to_le_bytes());
        hasher.update(&data);
    }

    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_location() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        for name in ["a", "b"] {
            fs::create_dir_all(root.join(name).join("x")).unwrap();
            fs::write(root.join(name).join("x/1.js"), "one").unwrap();
            fs::write(root.join(name).join("2.js"), "two").unwrap();
        }

        let a = fingerprint(root.join("a")).unwrap();
        let b = fingerprint(root.join("b")).unwrap();
        assert_eq!(a, b);

        fs::write(root.join("b/2.js"), "three").unwrap();
        assert_ne!(a, fingerprint(root.join("b")).unwrap());
    }

    #[test]
    fn test_hex() {
        let hash = Hash32::from([0xabu8; 32]);
        assert_eq!(hash.to_hex(), "ab".repeat(32));
        assert_eq!(hash.to_string(), "abababababab");
    }
}
