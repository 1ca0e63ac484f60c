//! Cache-header parsing and conditional revalidation headers.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, NaiveDateTime, Utc};

use super::CacheEntry;
use crate::network::{header, Headers, NetworkResponse};

/// Charset assumed when Content-Type names none.
pub const DEFAULT_CHARSET: &str = "ISO-8859-1";

const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
const RFC850_DATE: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME_DATE: &str = "%a %b %e %H:%M:%S %Y";

/// Build a cache entry from a response's caching headers.
///
/// Returns `None` when the response forbids caching.
pub fn parse_cache_headers(response: &NetworkResponse) -> Option<CacheEntry> {
    parse_cache_headers_at(response, SystemTime::now())
}

/// [`parse_cache_headers`] against an explicit clock.
pub fn parse_cache_headers_at(response: &NetworkResponse, now: SystemTime) -> Option<CacheEntry> {
    let headers = &response.headers;

    let server_date = header(headers, "Date").and_then(parse_http_date);

    let mut has_cache_control = false;
    let mut max_age = 0u64;
    let mut stale_while_revalidate = 0u64;
    let mut must_revalidate = false;
    if let Some(value) = header(headers, "Cache-Control") {
        has_cache_control = true;
        for token in value.split(',').map(str::trim) {
            if token == "no-cache" || token == "no-store" {
                return None;
            } else if let Some(secs) = token.strip_prefix("max-age=") {
                max_age = secs.parse().unwrap_or(0);
            } else if let Some(secs) = token.strip_prefix("stale-while-revalidate=") {
                stale_while_revalidate = secs.parse().unwrap_or(0);
            } else if token == "must-revalidate" || token == "proxy-revalidate" {
                must_revalidate = true;
            }
        }
    }

    let server_expires = header(headers, "Expires").and_then(parse_http_date);

    let soft_ttl = if has_cache_control {
        if must_revalidate {
            now
        } else {
            add_secs(now, max_age)
        }
    } else {
        match (server_date, server_expires) {
            (Some(date), Some(expires)) if expires >= date => {
                now + expires.duration_since(date).unwrap_or_default()
            }
            _ => SystemTime::UNIX_EPOCH,
        }
    };

    let ttl = if must_revalidate {
        soft_ttl
    } else {
        add_secs(soft_ttl, stale_while_revalidate)
    };

    Some(CacheEntry {
        data: response.data.clone(),
        etag: header(headers, "ETag").map(str::to_owned),
        server_date,
        ttl,
        soft_ttl,
        response_headers: Arc::new(headers.clone()),
    })
}

fn add_secs(time: SystemTime, secs: u64) -> SystemTime {
    time.checked_add(Duration::from_secs(secs)).unwrap_or(time)
}

/// Conditional request headers for revalidating `entry`.
pub fn conditional_headers(entry: &CacheEntry) -> Headers {
    let mut headers = Headers::new();
    if let Some(etag) = &entry.etag {
        headers.insert("If-None-Match".to_string(), etag.clone());
    }
    if let Some(date) = entry.server_date.filter(|d| *d > SystemTime::UNIX_EPOCH) {
        headers.insert("If-Modified-Since".to_string(), format_http_date(date));
    }
    headers
}

/// Parse an HTTP-date (IMF-fixdate, RFC 850 or asctime).
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    let value = value.trim();
    for format in [IMF_FIXDATE, RFC850_DATE, ASCTIME_DATE] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(SystemTime::from(naive.and_utc()));
        }
    }
    DateTime::parse_from_rfc2822(value).ok().map(SystemTime::from)
}

/// Format an instant as IMF-fixdate.
pub fn format_http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(IMF_FIXDATE).to_string()
}

/// Charset named by the Content-Type header, or [`DEFAULT_CHARSET`].
pub fn parse_charset(headers: &Headers) -> String {
    header(headers, "Content-Type")
        .and_then(|content_type| {
            content_type.split(';').skip(1).find_map(|param| {
                let (name, value) = param.trim().split_once('=')?;
                (name == "charset").then(|| value.to_string())
            })
        })
        .unwrap_or_else(|| DEFAULT_CHARSET.to_string())
}
