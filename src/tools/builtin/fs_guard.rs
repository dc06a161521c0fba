//! The filesystem allowlist + blocked-pattern validator every built-in
//! tool that touches disk is constructed with.
//!
//! New module — the teacher has no filesystem layer to generalize, so
//! this is grounded in how `coinmoles-langchain-rust`'s document loaders
//! use `regex` to gate which paths get read.

use regex::Regex;
use std::path::{Path, PathBuf};

/// Patterns that are always blocked regardless of allowlist membership:
/// credential/secret files and VCS internals.
fn default_blocked_patterns() -> Vec<Regex> {
    [
        r"(^|/)\.env($|\.)",
        r"(^|/)\.git(/|$)",
        r"(^|/)id_rsa$",
        r"(^|/)id_ed25519$",
        r"\.pem$",
        r"(^|/)\.aws(/|$)",
        r"(^|/)\.ssh(/|$)",
        r"(^|/)secrets?\.ya?ml$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("built-in blocked pattern is valid regex"))
    .collect()
}

#[derive(Clone)]
pub struct FsGuard {
    allowlist: Vec<PathBuf>,
    blocked_patterns: Vec<Regex>,
}

impl FsGuard {
    pub fn new(allowlist: Vec<PathBuf>) -> Self {
        Self { allowlist, blocked_patterns: default_blocked_patterns() }
    }

    pub fn with_extra_blocked_patterns(mut self, patterns: &[&str]) -> Self {
        for p in patterns {
            if let Ok(re) = Regex::new(p) {
                self.blocked_patterns.push(re);
            }
        }
        self
    }

    /// `Ok(())` when `path` may be read/written/deleted/listed; `Err` with
    /// a human-readable reason otherwise. Does not touch the filesystem —
    /// lexical checks only, so a tool can reject before doing any I/O.
    pub fn check(&self, path: &Path) -> Result<(), String> {
        let path_str = path.to_string_lossy();

        for pattern in &self.blocked_patterns {
            if pattern.is_match(&path_str) {
                return Err(format!("path '{path_str}' matches a blocked pattern"));
            }
        }

        if self.allowlist.is_empty() {
            return Ok(());
        }

        let within = self
            .allowlist
            .iter()
            .any(|root| path.starts_with(root));
        if !within {
            return Err(format!("path '{path_str}' is outside the allowlisted roots"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_dotenv_regardless_of_allowlist() {
        let guard = FsGuard::new(vec![PathBuf::from("/tmp")]);
        assert!(guard.check(Path::new("/tmp/.env")).is_err());
    }

    #[test]
    fn rejects_path_outside_allowlist() {
        let guard = FsGuard::new(vec![PathBuf::from("/tmp/project")]);
        assert!(guard.check(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn empty_allowlist_permits_any_non_blocked_path() {
        let guard = FsGuard::new(vec![]);
        assert!(guard.check(Path::new("/anywhere/file.txt")).is_ok());
    }

    #[test]
    fn allows_path_within_allowlisted_root() {
        let guard = FsGuard::new(vec![PathBuf::from("/tmp/project")]);
        assert!(guard.check(Path::new("/tmp/project/src/main.rs")).is_ok());
    }
}
