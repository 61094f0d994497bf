//! Home directory bootstrap
//!
//! Resolves where the core keeps on-disk state. Only the cookie jar lives
//! there today: `{home}/cookies/jar.json`.

use crate::config;
use std::path::{Path, PathBuf};

/// Overrides the platform data directory
pub const DATA_HOME_ENV: &str = "CLOUD_DESKTOP_DATA_HOME";

const COOKIE_DIR: &str = "cookies";
const COOKIE_JAR_FILE: &str = "jar.json";

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("no platform data directory and {DATA_HOME_ENV} is not set")]
    NoDataDir,
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolve the home path without creating it
pub fn resolve_home_path() -> Result<PathBuf, BootstrapError> {
    resolve_from(std::env::var_os(DATA_HOME_ENV).map(PathBuf::from), dirs::data_dir())
}

fn resolve_from(
    override_home: Option<PathBuf>,
    data_dir: Option<PathBuf>,
) -> Result<PathBuf, BootstrapError> {
    if let Some(home) = override_home.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(home);
    }
    data_dir
        .map(|dir| dir.join(config::home_folder()))
        .ok_or(BootstrapError::NoDataDir)
}

/// Path of the persistent cookie jar under `home`
pub fn cookie_jar_path(home: &Path) -> PathBuf {
    home.join(COOKIE_DIR).join(COOKIE_JAR_FILE)
}

/// Resolve home, create the cookie directory and return the jar path
pub fn initialize_cookie_jar_path() -> Result<PathBuf, BootstrapError> {
    let home = resolve_home_path()?;
    let jar = cookie_jar_path(&home);
    if let Some(dir) = jar.parent() {
        std::fs::create_dir_all(dir).map_err(|source| BootstrapError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    Ok(jar)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let home = resolve_from(Some(PathBuf::from("/tmp/cd-home")), Some(PathBuf::from("/data")));
        assert_eq!(home.unwrap(), PathBuf::from("/tmp/cd-home"));
    }

    #[test]
    fn test_empty_override_ignored() {
        let home = resolve_from(Some(PathBuf::new()), Some(PathBuf::from("/data"))).unwrap();
        assert_eq!(home, PathBuf::from("/data").join(config::home_folder()));
    }

    #[test]
    fn test_no_data_dir() {
        assert!(matches!(resolve_from(None, None), Err(BootstrapError::NoDataDir)));
    }

    #[test]
    fn test_cookie_jar_path() {
        assert_eq!(
            cookie_jar_path(Path::new("/h")),
            PathBuf::from("/h").join("cookies").join("jar.json")
        );
    }
}
