//! Set-Cookie parsing
//!
//! Turns one raw `Set-Cookie` header value into a [`CookieRecord`].
//!
//! # Rules
//!
//! - First `;`-segment is `name=value`, split on the first `=`; the cookie is
//!   skipped if name or value is empty after trimming
//! - Attributes are matched case-insensitively: `expires`, `max-age`,
//!   `domain`, `path`, `secure`, `httponly`; anything else is ignored
//! - `expires` and `max-age` write the same field, so the last one parsed wins
//! - `path` defaults to `/`

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single cookie as captured from a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    /// Unix seconds. `None` means a session cookie.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<i64>,
}

impl CookieRecord {
    pub fn is_session(&self) -> bool {
        self.expiration_date.is_none()
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        matches!(self.expiration_date, Some(exp) if exp <= now)
    }
}

/// Parse one `Set-Cookie` header value.
///
/// Returns `None` when the cookie must be skipped (missing `=`, empty name or
/// empty value).
pub fn parse_set_cookie(raw: &str, now: DateTime<Utc>) -> Option<CookieRecord> {
    let mut segments = raw.split(';');

    let (name, value) = segments.next()?.split_once('=')?;
    let name = name.trim();
    let value = value.trim();
    if name.is_empty() || value.is_empty() {
        return None;
    }

    let mut record = CookieRecord {
        name: name.to_string(),
        value: value.to_string(),
        domain: None,
        path: "/".to_string(),
        secure: false,
        http_only: false,
        expiration_date: None,
    };

    for segment in segments {
        let attr = segment.trim();
        let lower = attr.to_ascii_lowercase();

        if lower.starts_with("expires=") {
            if let Some(ts) = parse_http_date(attribute_value(attr)) {
                record.expiration_date = Some(ts);
            }
        } else if lower.starts_with("max-age=") {
            if let Ok(secs) = attribute_value(attr).parse::<i64>() {
                record.expiration_date = Some(now.timestamp().saturating_add(secs));
            }
        } else if lower.starts_with("domain=") {
            let domain = attribute_value(attr);
            if !domain.is_empty() {
                record.domain = Some(domain.to_string());
            }
        } else if lower.starts_with("path=") {
            let path = attribute_value(attr);
            record.path = if path.is_empty() { "/".to_string() } else { path.to_string() };
        } else if lower == "secure" {
            record.secure = true;
        } else if lower == "httponly" {
            record.http_only = true;
        }
    }

    Some(record)
}

/// Value part of an `attr=value` segment, trimmed
fn attribute_value(attr: &str) -> &str {
    attr.split_once('=').map(|(_, v)| v.trim()).unwrap_or("")
}

/// Parse an HTTP date into Unix seconds
///
/// Accepts RFC 1123, the Netscape dashed form, RFC 850 and asctime.
pub fn parse_http_date(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.timestamp());
    }

    // asctime pads single-digit days with an extra space
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");

    const FORMATS: &[&str] = &[
        "%a, %d-%b-%Y %H:%M:%S GMT",
        "%A, %d-%b-%y %H:%M:%S GMT",
        "%a, %d %b %Y %H:%M:%S GMT",
        "%a %b %d %H:%M:%S %Y",
    ];

    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&normalized, fmt).ok())
        .map(|naive| naive.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_basic_cookie() {
        let record = parse_set_cookie("a=1; Path=/; HttpOnly", now()).unwrap();
        assert_eq!(record.name, "a");
        assert_eq!(record.value, "1");
        assert_eq!(record.path, "/");
        assert!(record.http_only);
        assert!(!record.secure);
        assert!(record.is_session());
    }

    #[test]
    fn test_value_splits_on_first_equals() {
        let record = parse_set_cookie("token=abc==; Secure", now()).unwrap();
        assert_eq!(record.value, "abc==");
        assert!(record.secure);
    }

    #[test]
    fn test_empty_name_or_value_skipped() {
        assert!(parse_set_cookie("=1; Path=/", now()).is_none());
        assert!(parse_set_cookie("a=; Path=/", now()).is_none());
        assert!(parse_set_cookie("a=   ", now()).is_none());
        assert!(parse_set_cookie("novalue", now()).is_none());
        assert!(parse_set_cookie("", now()).is_none());
    }

    #[test]
    fn test_max_age_after_expires_wins() {
        let record = parse_set_cookie(
            "a=1; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=3600",
            now(),
        )
        .unwrap();
        assert_eq!(record.expiration_date, Some(now().timestamp() + 3600));
    }

    #[test]
    fn test_expires_after_max_age_wins() {
        let record = parse_set_cookie(
            "a=1; Max-Age=3600; Expires=Wed, 21 Oct 2015 07:28:00 GMT",
            now(),
        )
        .unwrap();
        assert_eq!(record.expiration_date, Some(1445412480));
    }

    #[test]
    fn test_attributes_case_insensitive() {
        let record =
            parse_set_cookie("sid=x; DOMAIN=example.com; PATH=/api; SECURE; HTTPONLY", now())
                .unwrap();
        assert_eq!(record.domain.as_deref(), Some("example.com"));
        assert_eq!(record.path, "/api");
        assert!(record.secure);
        assert!(record.http_only);
    }

    #[test]
    fn test_unknown_and_bad_attributes_ignored() {
        let record = parse_set_cookie(
            "a=1; SameSite=Lax; Max-Age=soon; Expires=whenever; Domain=; Priority=High",
            now(),
        )
        .unwrap();
        assert_eq!(record.domain, None);
        assert_eq!(record.expiration_date, None);
        assert_eq!(record.path, "/");
    }

    #[test]
    fn test_negative_max_age_is_expired() {
        let record = parse_set_cookie("a=1; Max-Age=-1", now()).unwrap();
        assert!(record.is_expired_at(now().timestamp()));
    }

    #[test]
    fn test_parse_http_date_formats() {
        let expected = Some(1445412480);
        assert_eq!(parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT"), expected);
        assert_eq!(parse_http_date("Wed, 21-Oct-2015 07:28:00 GMT"), expected);
        assert_eq!(parse_http_date("Wednesday, 21-Oct-15 07:28:00 GMT"), expected);
        assert_eq!(parse_http_date("Wed Oct 21 07:28:00 2015"), expected);
        assert_eq!(parse_http_date("not a date"), None);
        assert_eq!(parse_http_date(""), None);
    }
}
