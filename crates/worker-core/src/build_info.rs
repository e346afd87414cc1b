//! Build-time metadata embedded by the build script.
//!
//! Used in startup logging so a given worker process's logs can be tied
//! back to the exact commit and profile that produced the binary.

/// The git commit hash at build time (short form).
pub const GIT_HASH: &str = env!("WORKER_GIT_HASH");

/// The build timestamp as a Unix epoch string.
pub const BUILD_TIMESTAMP: &str = env!("WORKER_BUILD_TIMESTAMP");

/// The build profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("WORKER_BUILD_PROFILE");

/// The crate version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Formatted version string, e.g. `"0.1.0 (abc1234, debug)"`.
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_contains_crate_version() {
        let v = version_string();
        assert!(v.contains(VERSION));
    }

    #[test]
    fn git_hash_is_not_empty() {
        assert!(!GIT_HASH.is_empty());
    }
}
