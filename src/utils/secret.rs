//! Connection secret loading: settings → env var → .env in dir → secure prompt.

use anyhow::{Context, Result};
use colored::Colorize;
use log::info;
use std::path::Path;

use crate::connector::AuthMode;
use crate::utils::config::PackagePaths;

fn try_env_then_dotenv(dir: &Path) -> Option<String> {
    let key = PackagePaths::get().secret_env_key();
    if let Ok(s) = std::env::var(key) {
        let s = s.trim().to_string();
        if !s.is_empty() {
            return Some(s);
        }
    }
    let env_path = dir.join(".env");
    if env_path.is_file() {
        let _ = dotenvy::from_path(&env_path);
        if let Ok(s) = std::env::var(key) {
            let s = s.trim().to_string();
            if !s.is_empty() {
                return Some(s);
            }
        }
    }
    None
}

/// Resolve the secret for `principal`. `configured` (from the settings file) wins, then
/// `RECSWEEP_SECRET` / `.env` in `dir`. Prompts only when the auth mode needs a secret and a
/// principal is set; otherwise returns `None`.
pub fn resolve_secret(
    dir: &Path,
    auth_mode: AuthMode,
    principal: Option<&str>,
    configured: Option<&str>,
) -> Result<Option<String>> {
    if let Some(s) = configured.map(str::trim).filter(|s| !s.is_empty()) {
        return Ok(Some(s.to_string()));
    }
    if let Some(s) = try_env_then_dotenv(dir) {
        info!("Connection secret found in environment");
        return Ok(Some(s));
    }
    let Some(principal) = principal else {
        return Ok(None);
    };
    if !auth_mode.needs_secret() {
        return Ok(None);
    }
    let label = format!("[{}]", env!("CARGO_PKG_NAME")).cyan().bold();
    let secret = rpassword::prompt_password(format!("{label} Secret for {principal}: "))
        .context("read connection secret")?;
    Ok(Some(secret.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_secret_wins() {
        let dir = tempfile::tempdir().unwrap();
        let s = resolve_secret(dir.path(), AuthMode::Password, Some("svc"), Some(" pw ")).unwrap();
        assert_eq!(s.as_deref(), Some("pw"));
    }

    #[test]
    fn test_no_principal_needs_no_secret() {
        let dir = tempfile::tempdir().unwrap();
        if std::env::var(PackagePaths::get().secret_env_key()).is_err() {
            assert_eq!(resolve_secret(dir.path(), AuthMode::OAuth, None, None).unwrap(), None);
        }
    }
}
