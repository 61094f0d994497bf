//! External links
//!
//! Only absolute `http`/`https` URLs are handed to the OS opener; anything
//! else (`javascript:`, `file:`, relative paths) is dropped.

use tauri::AppHandle;
use tauri_plugin_opener::OpenerExt;
use url::Url;

/// Parse `raw` and keep it only if it is an absolute http(s) URL
pub fn external_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw.trim()).ok()?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Some(url),
        _ => None,
    }
}

/// Open `raw` in the default browser; silently ignores disallowed URLs
pub fn open(app: &AppHandle, raw: &str) {
    let Some(url) = external_url(raw) else {
        tracing::warn!(op = "desktop.external.rejected", "Ignoring non-http(s) external URL");
        return;
    };

    match app.opener().open_url(url.as_str(), None::<&str>) {
        Ok(()) => tracing::info!(op = "desktop.external.opened", host = ?url.host_str(), "Opened external URL"),
        Err(e) => tracing::warn!(op = "desktop.external.failed", error = %e, "Failed to open external URL"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_and_https_allowed() {
        assert!(external_url("https://yun.haodeyun.cn/help").is_some());
        assert!(external_url("http://10.0.0.1:8080/").is_some());
        assert!(external_url("  https://example.com ").is_some());
    }

    #[test]
    fn test_other_schemes_rejected() {
        assert!(external_url("javascript:alert(1)").is_none());
        assert!(external_url("file:///C:/Windows/System32/calc.exe").is_none());
        assert!(external_url("mailto:support@example.com").is_none());
        assert!(external_url("/relative/path").is_none());
        assert!(external_url("").is_none());
    }
}
