//! Cookies: the [`Cookie`] value type, the [`CookieStore`] and [`CookiePolicy`]
//! collaborators, and the implementations shipped with the crate.
//!
//! The dispatcher never serializes access to the store; implementations must
//! tolerate concurrent calls from several workers.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use url::Url;

/// A cookie parsed from a `Set-Cookie` response header
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// `Domain` attribute, lower-cased and without a leading dot
    pub domain: Option<String>,
    /// `Path` attribute
    pub path: Option<String>,
    /// `Max-Age` attribute in seconds
    pub max_age: Option<i64>,
    /// `Expires` attribute
    pub expires: Option<DateTime<Utc>>,
    /// `Secure` flag
    pub secure: bool,
    /// `HttpOnly` flag
    pub http_only: bool,
}

impl Cookie {
    /// Create a session cookie with no attributes
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            max_age: None,
            expires: None,
            secure: false,
            http_only: false,
        }
    }

    /// Parse a single `Set-Cookie` header value
    ///
    /// Returns `None` when the header has no `name=value` pair or an empty name.
    /// Unknown attributes and malformed attribute values are ignored.
    pub fn parse(header: &str) -> Option<Self> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Cookie::new(name, value.trim().trim_matches('"'));

        for attribute in parts {
            let (key, val) = match attribute.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (attribute.trim(), ""),
            };

            match key.to_ascii_lowercase().as_str() {
                "domain" if !val.is_empty() => {
                    cookie.domain = Some(val.trim_start_matches('.').to_ascii_lowercase());
                }
                "path" if val.starts_with('/') => cookie.path = Some(val.to_string()),
                "max-age" => cookie.max_age = val.parse().ok(),
                "expires" => {
                    cookie.expires = DateTime::parse_from_rfc2822(val)
                        .ok()
                        .map(|d| d.with_timezone(&Utc));
                }
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                _ => {}
            }
        }

        Some(cookie)
    }

    /// Whether the cookie is expired at `now`
    ///
    /// `Max-Age` takes precedence over `Expires`; `created` is when the cookie
    /// was received.
    pub fn is_expired(&self, created: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if let Some(max_age) = self.max_age {
            if max_age <= 0 {
                return true;
            }
            // Lifetimes past the representable range never expire.
            return ChronoDuration::try_seconds(max_age)
                .and_then(|lifetime| created.checked_add_signed(lifetime))
                .is_some_and(|deadline| deadline <= now);
        }
        self.expires.is_some_and(|expires| expires <= now)
    }

    /// `name=value` form used in a `Cookie` request header
    pub fn pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Domain matching as used for cookies: exact host or a dot-separated suffix
pub fn domain_matches(host: &str, domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let domain = domain.trim_start_matches('.').to_ascii_lowercase();
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(&domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    request_path == cookie_path
        || (request_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/')
                || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/')))
}

/// Default cookie path for a response URL (directory of the request path)
fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Decides whether a cookie received from `origin` should be kept
pub trait CookiePolicy: Send + Sync {
    /// Return true to add the cookie to the store
    fn should_accept(&self, origin: &Url, cookie: &Cookie) -> bool;
}

/// Reject every cookie (dispatcher default)
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptNone;

impl CookiePolicy for AcceptNone {
    fn should_accept(&self, _origin: &Url, _cookie: &Cookie) -> bool {
        false
    }
}

/// Accept every cookie
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl CookiePolicy for AcceptAll {
    fn should_accept(&self, _origin: &Url, _cookie: &Cookie) -> bool {
        true
    }
}

/// Accept cookies only when their domain matches the server that sent them
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptOriginalServer;

impl CookiePolicy for AcceptOriginalServer {
    fn should_accept(&self, origin: &Url, cookie: &Cookie) -> bool {
        let Some(host) = origin.host_str() else {
            return false;
        };
        match &cookie.domain {
            Some(domain) => domain_matches(host, domain),
            None => true,
        }
    }
}

/// Storage for accepted cookies
pub trait CookieStore: Send + Sync {
    /// Store a cookie received from `origin`
    fn add(&self, origin: &Url, cookie: Cookie);

    /// All non-expired cookies that should be sent with a request to `url`
    fn get(&self, url: &Url) -> Vec<Cookie>;
}

#[derive(Clone, Debug)]
struct StoredCookie {
    cookie: Cookie,
    /// Domain the cookie applies to
    domain: String,
    /// True when the cookie had no Domain attribute (exact host only)
    host_only: bool,
    path: String,
    created: DateTime<Utc>,
}

impl StoredCookie {
    fn same_slot(&self, other: &StoredCookie) -> bool {
        self.cookie.name == other.cookie.name
            && self.domain == other.domain
            && self.path == other.path
    }

    fn applies_to(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host_ok = if self.host_only {
            host.eq_ignore_ascii_case(&self.domain)
        } else {
            domain_matches(host, &self.domain)
        };
        host_ok
            && path_matches(url.path(), &self.path)
            && (!self.cookie.secure || url.scheme() == "https")
    }
}

/// Thread-safe in-memory [`CookieStore`]
///
/// A cookie replaces any stored cookie with the same name, domain and path.
/// Expired cookies are dropped on insertion and never returned.
#[derive(Debug, Default)]
pub struct InMemoryCookieStore {
    cookies: RwLock<Vec<StoredCookie>>,
}

impl InMemoryCookieStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cookies currently held (including not yet purged expired ones)
    pub fn len(&self) -> usize {
        self.cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored cookies, in insertion order
    pub fn all(&self) -> Vec<Cookie> {
        self.cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|c| c.cookie.clone())
            .collect()
    }
}

impl CookieStore for InMemoryCookieStore {
    fn add(&self, origin: &Url, cookie: Cookie) {
        let Some(host) = origin.host_str() else {
            tracing::debug!(url = %origin, "Ignoring cookie for URL without host");
            return;
        };

        let now = Utc::now();
        let stored = StoredCookie {
            domain: cookie
                .domain
                .clone()
                .unwrap_or_else(|| host.to_ascii_lowercase()),
            host_only: cookie.domain.is_none(),
            path: cookie.path.clone().unwrap_or_else(|| default_path(origin)),
            created: now,
            cookie,
        };

        let mut cookies = self.cookies.write().unwrap_or_else(PoisonError::into_inner);
        cookies.retain(|c| !c.same_slot(&stored) && !c.cookie.is_expired(c.created, now));
        if !stored.cookie.is_expired(stored.created, now) {
            cookies.push(stored);
        }
    }

    fn get(&self, url: &Url) -> Vec<Cookie> {
        let now = Utc::now();
        self.cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| !c.cookie.is_expired(c.created, now) && c.applies_to(url))
            .map(|c| c.cookie.clone())
            .collect()
    }
}
