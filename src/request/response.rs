//! Responses handed to the success callback

use crate::cookie::Cookie;
use std::collections::BTreeMap;
use url::Url;

/// Response headers: lower-cased name to values in the order received
pub type HeaderMap = BTreeMap<String, Vec<String>>;

/// Status line and headers of a response, before the body is read
#[derive(Clone, Debug)]
pub struct ResponseHead {
    /// Final URL (after redirects, if followed)
    pub url: Url,
    /// Numeric status code
    pub status: u16,
    /// Reason phrase
    pub message: String,
    /// Headers, names lower-cased
    pub headers: HeaderMap,
    /// Announced body length, if any
    pub content_length: Option<u64>,
}

impl ResponseHead {
    /// Values of `Set-Cookie` headers, parsed; unparseable headers are skipped
    pub fn cookies(&self) -> Vec<Cookie> {
        parse_set_cookies(&self.headers)
    }
}

/// A fully received response with its parsed payload
#[derive(Clone, Debug)]
pub struct Response<T> {
    url: Url,
    code: u16,
    message: String,
    headers: HeaderMap,
    payload: T,
}

impl<T> Response<T> {
    pub(crate) fn new(head: ResponseHead, payload: T) -> Self {
        Self {
            url: head.url,
            code: head.status,
            message: head.message,
            headers: head.headers,
            payload,
        }
    }

    /// URL the response was received from
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Numeric status code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Reason phrase
    pub fn message(&self) -> &str {
        &self.message
    }

    /// All headers (lower-cased names)
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Values of a single header, looked up case-insensitively
    pub fn header(&self, name: &str) -> Option<&[String]> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_slice())
    }

    /// Parsed payload
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Consume the response and return the payload
    pub fn into_payload(self) -> T {
        self.payload
    }

    /// All cookies sent with `Set-Cookie` headers
    pub fn cookies(&self) -> Vec<Cookie> {
        parse_set_cookies(&self.headers)
    }

    /// The cookie with the given name, if the server set one
    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        self.cookies().into_iter().find(|c| c.name == name)
    }
}

fn parse_set_cookies(headers: &HeaderMap) -> Vec<Cookie> {
    headers
        .get("set-cookie")
        .map(|values| {
            values
                .iter()
                .filter_map(|v| {
                    let parsed = Cookie::parse(v);
                    if parsed.is_none() {
                        tracing::debug!(header = %v, "Skipping unparseable Set-Cookie header");
                    }
                    parsed
                })
                .collect()
        })
        .unwrap_or_default()
}
