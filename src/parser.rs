//! Response body parsers
//!
//! A parser runs once, on the worker, after the whole body was received.
//! Callers pass a constructed parser to the request builders; there is no
//! lookup by type.

use crate::error::ParseError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use url::Url;

/// Turns a fully received response body into a typed payload
pub trait Parser: Send + Sync + 'static {
    /// Payload type handed to the success callback
    type Output: Send + 'static;

    /// Parse the body received from `url`
    fn parse(&self, url: &Url, body: Bytes) -> Result<Self::Output, ParseError>;
}

/// UTF-8 text payload
#[derive(Clone, Copy, Debug, Default)]
pub struct Text;

impl Parser for Text {
    type Output = String;

    fn parse(&self, _url: &Url, body: Bytes) -> Result<String, ParseError> {
        Ok(String::from_utf8(body.to_vec())?)
    }
}

/// Raw bytes payload
#[derive(Clone, Copy, Debug, Default)]
pub struct Raw;

impl Parser for Raw {
    type Output = Bytes;

    fn parse(&self, _url: &Url, body: Bytes) -> Result<Bytes, ParseError> {
        Ok(body)
    }
}

/// Discard the body
#[derive(Clone, Copy, Debug, Default)]
pub struct Ignore;

impl Parser for Ignore {
    type Output = ();

    fn parse(&self, _url: &Url, _body: Bytes) -> Result<(), ParseError> {
        Ok(())
    }
}

/// Deserialize a JSON body into `T`
pub struct Json<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Json<T> {
    /// Create a JSON parser for `T`
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for Json<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Json<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Json")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Parser for Json<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn parse(&self, _url: &Url, body: Bytes) -> Result<T, ParseError> {
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Parser built from a closure, for one-off payload types
pub struct FnParser<F>(pub F);

impl<F, T> Parser for FnParser<F>
where
    F: Fn(&Url, Bytes) -> Result<T, ParseError> + Send + Sync + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn parse(&self, url: &Url, body: Bytes) -> Result<T, ParseError> {
        (self.0)(url, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn url() -> Url {
        Url::parse("http://example.com/resource").unwrap()
    }

    #[test]
    fn text_decodes_utf8_and_rejects_invalid_bytes() {
        let text = Text.parse(&url(), Bytes::from_static("grüße".as_bytes())).unwrap();
        assert_eq!(text, "grüße");

        let err = Text
            .parse(&url(), Bytes::from_static(&[0xff, 0xfe]))
            .unwrap_err();
        assert!(matches!(err, ParseError::Utf8(_)));
    }

    #[test]
    fn raw_and_ignore_pass_through() {
        let body = Bytes::from_static(b"\x00\x01\x02");
        assert_eq!(Raw.parse(&url(), body.clone()).unwrap(), body);
        Ignore.parse(&url(), body).unwrap();
    }

    #[test]
    fn json_deserializes_into_target_type() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Item {
            id: u32,
            name: String,
        }

        let parser = Json::<Item>::new();
        let item = parser
            .parse(&url(), Bytes::from_static(br#"{"id": 3, "name": "widget"}"#))
            .unwrap();
        assert_eq!(
            item,
            Item {
                id: 3,
                name: "widget".to_string()
            }
        );

        assert!(matches!(
            parser.parse(&url(), Bytes::from_static(b"not json")),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn fn_parser_receives_url() {
        let parser = FnParser(|url: &Url, body: Bytes| {
            Ok::<_, ParseError>((url.path().to_string(), body.len()))
        });
        let (path, len) = parser.parse(&url(), Bytes::from_static(b"1234")).unwrap();
        assert_eq!(path, "/resource");
        assert_eq!(len, 4);
    }
}
