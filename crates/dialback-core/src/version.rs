//! Version information
//!
//! The version string doubles as the compatibility token: the hub rejects
//! any peer whose `X-Client-Version` header differs from its own version.

/// Crate version, injected by cargo at build time
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit hash, injected via `DIALBACK_GIT_COMMIT` at build time
pub const GIT_COMMIT: Option<&str> = option_env!("DIALBACK_GIT_COMMIT");

/// Get the current version
pub fn version() -> &'static str {
    VERSION
}

/// Get the git commit hash, if known
pub fn git_commit() -> Option<&'static str> {
    GIT_COMMIT
}

/// Version with commit appended, for display
pub fn full_version() -> String {
    match GIT_COMMIT {
        Some(commit) => format!("{}-{}", VERSION, commit),
        None => VERSION.to_string(),
    }
}
