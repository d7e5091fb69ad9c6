//! Process-wide configuration directory handling

use std::path::PathBuf;

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("podjump")
}

/// Directory holding lock files for a given workspace identity.
///
/// Derived deterministically from the identity so every process on the
/// machine contends on the same path.
pub fn locks_dir(workspace: &str) -> PathBuf {
    default_config_dir().join(workspace).join("locks")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_dir_is_per_workspace() {
        let a = locks_dir("web");
        let b = locks_dir("api");
        assert_ne!(a, b);
        assert!(a.ends_with("web/locks"));
    }
}
