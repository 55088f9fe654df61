//! Directory layout helpers.
//!
//! Several applications may share one machine-wide base directory. Each gets
//! its own subdirectory named by a SHA-256 of `"{user}@{executable}"`, so two
//! unrelated programs never drain each other's telemetry.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Base directory used when none is configured.
pub fn default_storage_base() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("telespool")
}

/// Identity string for the running application.
pub fn application_identity() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let exe = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}@{}", user, exe)
}

/// Hex SHA-256 of an identity string.
pub fn identity_hash(identity: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    hex::encode(hasher.finalize())
}

/// Per-application subdirectory of `base` for the running process.
pub fn application_subdirectory(base: &Path) -> PathBuf {
    base.join(identity_hash(&application_identity()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_hash_is_stable_hex() {
        let a = identity_hash("alice@/usr/bin/app");
        let b = identity_hash("alice@/usr/bin/app");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.bytes().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identity_hash_differs_by_user_and_exe() {
        assert_ne!(
            identity_hash("alice@/usr/bin/app"),
            identity_hash("bob@/usr/bin/app")
        );
        assert_ne!(
            identity_hash("alice@/usr/bin/app"),
            identity_hash("alice@/usr/bin/other")
        );
    }

    #[test]
    fn test_application_subdirectory_is_child_of_base() {
        let base = PathBuf::from("/tmp/telespool-test");
        let sub = application_subdirectory(&base);
        assert_eq!(sub.parent(), Some(base.as_path()));
        assert_eq!(sub.file_name().unwrap().len(), 64);
    }

    #[test]
    fn test_default_base_mentions_project() {
        assert!(default_storage_base()
            .to_string_lossy()
            .contains("telespool"));
    }
}
