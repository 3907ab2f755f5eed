//! Authenticated session state.
//!
//! Sessions are acquired out of band (a manual login in a real browser) and
//! saved as a storage-state JSON file holding the site cookies. A run refuses
//! to start without one.

use crate::error::{HarvestError, HarvestResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A cookie as written by browser storage-state exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Seconds since epoch, `-1` for session cookies.
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

fn default_path() -> String {
    "/".to_string()
}

/// Storage-state document. Only cookies are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
}

impl StorageState {
    /// Load and validate a storage-state file.
    pub fn load(path: &Path) -> HarvestResult<Self> {
        if !path.exists() {
            return Err(HarvestError::Precondition(format!(
                "session state not found at {}; log in and save the session first",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::Precondition(format!("cannot read {}: {e}", path.display()))
        })?;
        let state: StorageState = serde_json::from_str(&raw).map_err(|e| {
            HarvestError::Precondition(format!("malformed session state {}: {e}", path.display()))
        })?;
        if state.cookies.is_empty() {
            return Err(HarvestError::Precondition(format!(
                "session state {} holds no cookies",
                path.display()
            )));
        }
        Ok(state)
    }

    /// Cookies that apply to `host` (exact or parent-domain match).
    pub fn cookies_for(&self, host: &str) -> Vec<&StoredCookie> {
        self.cookies
            .iter()
            .filter(|c| {
                let domain = c.domain.trim_start_matches('.');
                host == domain || host.ends_with(&format!(".{domain}"))
            })
            .collect()
    }
}

/// Resolve the storage-state path.
///
/// Priority: explicit argument, `HARVEST_AUTH_STATE`, `./playwright/.auth/my-auth.json`,
/// then `~/.harvest/auth.json`.
pub fn resolve_auth_state_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }
    if let Ok(env_path) = std::env::var("HARVEST_AUTH_STATE") {
        return PathBuf::from(env_path);
    }
    let cwd_state = PathBuf::from("playwright/.auth/my-auth.json");
    if cwd_state.exists() {
        return cwd_state;
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".harvest")
        .join("auth.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_is_precondition() {
        let err = StorageState::load(Path::new("/nonexistent/auth.json")).unwrap_err();
        assert!(matches!(err, HarvestError::Precondition(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_load_playwright_state() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"cookies":[{{"name":"li_at","value":"abc","domain":".linkedin.com","path":"/","expires":-1,"httpOnly":true,"secure":true,"sameSite":"None"}}],"origins":[]}}"#
        )
        .unwrap();

        let state = StorageState::load(file.path()).unwrap();
        assert_eq!(state.cookies.len(), 1);
        assert!(state.cookies[0].http_only);
        assert_eq!(state.cookies_for("www.linkedin.com").len(), 1);
        assert!(state.cookies_for("example.com").is_empty());
    }

    #[test]
    fn test_empty_cookie_jar_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cookies":[]}}"#).unwrap();
        assert!(matches!(
            StorageState::load(file.path()),
            Err(HarvestError::Precondition(_))
        ));
    }
}
