//! Content hashing for suite cache validation.
//!
//! Mirrors `original_source/utils.py`'s `hash_file`: md5 over the file in
//! fixed-size blocks, hex-encoded.

use std::io::Read;
use std::path::Path;

const BLOCK_SIZE: usize = 65536;

/// Compute the hex-encoded md5 digest of a file's contents.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

/// Whether a cached file's hash matches the task's declared hash.
pub fn matches(path: &Path, expected_hex: &str) -> bool {
    match hash_file(path) {
        Ok(actual) => actual.eq_ignore_ascii_case(expected_hex),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hashes_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.zip");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"hello world").unwrap();
        drop(f);

        let digest = hash_file(&path).unwrap();
        assert_eq!(digest, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn matches_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.zip");
        std::fs::write(&path, b"hello world").unwrap();

        assert!(matches(&path, "5EB63BBBE01EEED093CB22BB8F5ACDC3"));
        assert!(!matches(&path, "deadbeef"));
    }

    #[test]
    fn missing_file_never_matches() {
        let path = Path::new("/nonexistent/suite.zip");
        assert!(!matches(path, "5eb63bbbe01eeed093cb22bb8f5acdc3"));
    }
}
