//! Cookie Jar
//!
//! Process-wide cookie store shared by every relay call.
//!
//! Storage layout:
//! ```text
//! {CLOUD_DESKTOP_HOME}/cookies/
//!   jar.json    # Persistent cookies (those with an expiration date)
//! ```
//!
//! Session cookies are held in memory only and disappear with the process.
//! Writes are serialized by the jar lock; concurrent upserts are last-writer-wins.

use crate::cookie::CookieRecord;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fs;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use url::Url;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Store seam used by the relay
pub trait CookieStore: Send + Sync {
    /// All live cookies in scope for `url`, in send order
    fn get(&self, url: &Url) -> Result<Vec<CookieRecord>, CookieStoreError>;

    /// Insert or replace a cookie received from `url`
    fn upsert(&self, url: &Url, record: CookieRecord) -> Result<(), CookieStoreError>;

    /// Drop every cookie, returning how many were removed
    fn clear(&self) -> Result<usize, CookieStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CookieStoreError {
    #[error("URL has no host: {0}")]
    NoHost(String),
    #[error("cookie domain '{domain}' does not match request host '{host}'")]
    DomainMismatch { domain: String, host: String },
    #[error("cookie jar lock poisoned")]
    LockPoisoned,
    #[error("unsupported cookie jar version: {0}")]
    UnsupportedVersion(u8),
    #[error("cookie jar I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cookie jar encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Cookie as held by the jar, with its scope resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCookie {
    name: String,
    value: String,
    domain: String,
    host_only: bool,
    path: String,
    secure: bool,
    http_only: bool,
    expiration_date: Option<i64>,
    /// Creation order, preserved across replacement
    seq: u64,
}

impl StoredCookie {
    fn is_session(&self) -> bool {
        self.expiration_date.is_none()
    }

    fn is_expired_at(&self, now: i64) -> bool {
        matches!(self.expiration_date, Some(exp) if exp <= now)
    }

    fn matches_url(&self, host: &str, path: &str, secure_scheme: bool) -> bool {
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_matches(host, &self.domain)
        };
        domain_ok && path_matches(path, &self.path) && (!self.secure || secure_scheme)
    }

    fn to_record(&self) -> CookieRecord {
        CookieRecord {
            name: self.name.clone(),
            value: self.value.clone(),
            domain: Some(self.domain.clone()),
            path: self.path.clone(),
            secure: self.secure,
            http_only: self.http_only,
            expiration_date: self.expiration_date,
        }
    }
}

/// On-disk envelope
#[derive(Debug, Serialize, Deserialize)]
struct JarFile {
    /// Version for future format changes
    v: u8,
    cookies: Vec<StoredCookie>,
}

impl JarFile {
    const CURRENT_VERSION: u8 = 1;
}

#[derive(Debug, Default)]
struct JarState {
    cookies: Vec<StoredCookie>,
    next_seq: u64,
}

/// RFC 6265-style cookie jar, optionally backed by a file
pub struct CookieJar {
    state: RwLock<JarState>,
    file: Option<PathBuf>,
}

impl CookieJar {
    /// Jar that never touches disk
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(JarState::default()),
            file: None,
        }
    }

    /// Open (or start) the persistent jar at `file`
    ///
    /// Expired entries are dropped while loading.
    pub fn open(file: impl Into<PathBuf>) -> Result<Self, CookieStoreError> {
        let file = file.into();
        let mut state = JarState::default();

        if file.exists() {
            let content = fs::read_to_string(&file)?;
            let jar: JarFile = serde_json::from_str(&content)?;
            if jar.v != JarFile::CURRENT_VERSION {
                return Err(CookieStoreError::UnsupportedVersion(jar.v));
            }

            let now = Utc::now().timestamp();
            state.cookies = jar
                .cookies
                .into_iter()
                .filter(|c| !c.is_session() && !c.is_expired_at(now))
                .collect();
            state.next_seq = state.cookies.iter().map(|c| c.seq + 1).max().unwrap_or(0);
        }

        tracing::info!(
            op = "core.cookie_jar.open",
            path = %file.display(),
            loaded = state.cookies.len(),
            "Cookie jar opened"
        );

        Ok(Self {
            state: RwLock::new(state),
            file: Some(file),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.file.is_some()
    }

    fn get_at(&self, url: &Url, now: i64) -> Result<Vec<CookieRecord>, CookieStoreError> {
        let host = request_host(url)?;
        let secure_scheme = url.scheme() == "https";
        let path = url.path();

        let state = self.state.read().map_err(|_| CookieStoreError::LockPoisoned)?;
        let mut matched: Vec<&StoredCookie> = state
            .cookies
            .iter()
            .filter(|c| !c.is_expired_at(now) && c.matches_url(&host, path, secure_scheme))
            .collect();

        // Longer paths first, then oldest first
        matched.sort_by_key(|c| (Reverse(c.path.len()), c.seq));

        Ok(matched.into_iter().map(StoredCookie::to_record).collect())
    }

    fn upsert_at(
        &self,
        url: &Url,
        record: CookieRecord,
        now: i64,
    ) -> Result<(), CookieStoreError> {
        let host = request_host(url)?;

        let (domain, host_only) = match record.domain.as_deref() {
            Some(raw) => {
                let domain = raw.trim_start_matches('.').to_ascii_lowercase();
                if !domain_matches(&host, &domain) {
                    return Err(CookieStoreError::DomainMismatch { domain, host });
                }
                (domain, false)
            }
            None => (host, true),
        };

        let path = if record.path.starts_with('/') {
            record.path.clone()
        } else {
            "/".to_string()
        };

        let mut state = self.state.write().map_err(|_| CookieStoreError::LockPoisoned)?;
        let existing = state
            .cookies
            .iter()
            .position(|c| c.domain == domain && c.path == path && c.name == record.name);

        let mut touched_persistent = !record.is_session();

        if record.is_expired_at(now) {
            // An already-expired cookie is a deletion
            if let Some(idx) = existing {
                state.cookies.remove(idx);
            }
        } else {
            let seq = match existing {
                Some(idx) => state.cookies[idx].seq,
                None => {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    seq
                }
            };
            let stored = StoredCookie {
                name: record.name,
                value: record.value,
                domain,
                host_only,
                path,
                secure: record.secure,
                http_only: record.http_only,
                expiration_date: record.expiration_date,
                seq,
            };
            match existing {
                Some(idx) => {
                    touched_persistent |= !state.cookies[idx].is_session();
                    state.cookies[idx] = stored;
                }
                None => state.cookies.push(stored),
            }
        }

        if touched_persistent {
            self.persist(&state)?;
        }
        Ok(())
    }

    /// Write persistent cookies atomically (temp file + rename)
    fn persist(&self, state: &JarState) -> Result<(), CookieStoreError> {
        let Some(final_path) = self.file.as_deref() else {
            return Ok(());
        };
        ensure_parent_dir(final_path)?;

        let jar = JarFile {
            v: JarFile::CURRENT_VERSION,
            cookies: state
                .cookies
                .iter()
                .filter(|c| !c.is_session())
                .cloned()
                .collect(),
        };
        let json = serde_json::to_string_pretty(&jar)?;

        let temp_path = final_path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;

            #[cfg(unix)]
            {
                let perms = fs::Permissions::from_mode(0o600);
                fs::set_permissions(&temp_path, perms)?;
            }
        }
        fs::rename(&temp_path, final_path)?;

        tracing::debug!(
            op = "core.cookie_jar.persist",
            persisted = jar.cookies.len(),
            "Cookie jar written"
        );
        Ok(())
    }
}

impl CookieStore for CookieJar {
    fn get(&self, url: &Url) -> Result<Vec<CookieRecord>, CookieStoreError> {
        self.get_at(url, Utc::now().timestamp())
    }

    fn upsert(&self, url: &Url, record: CookieRecord) -> Result<(), CookieStoreError> {
        self.upsert_at(url, record, Utc::now().timestamp())
    }

    fn clear(&self) -> Result<usize, CookieStoreError> {
        let mut state = self.state.write().map_err(|_| CookieStoreError::LockPoisoned)?;
        let removed = state.cookies.len();
        state.cookies.clear();
        self.persist(&state)?;

        tracing::info!(op = "core.cookie_jar.clear", removed = removed, "Cookie jar cleared");
        Ok(removed)
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), CookieStoreError> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir)?;

            #[cfg(unix)]
            {
                fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
            }
        }
    }
    Ok(())
}

fn request_host(url: &Url) -> Result<String, CookieStoreError> {
    url.host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase())
        .ok_or_else(|| CookieStoreError::NoHost(url.to_string()))
}

/// RFC 6265 §5.1.3 domain-match
fn domain_matches(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    if domain.is_empty() || host.parse::<IpAddr>().is_ok() {
        return false;
    }
    host.len() > domain.len()
        && host.ends_with(domain)
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
}

/// RFC 6265 §5.1.4 path-match
fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}
