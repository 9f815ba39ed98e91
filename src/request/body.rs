//! Request bodies

use crate::error::{Error, Result};
use bytes::Bytes;
use serde::Serialize;
use tokio::io::AsyncRead;

/// Boxed body source streamed to the transport chunk by chunk
pub(crate) type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

pub(crate) enum BodyContent {
    Bytes(Bytes),
    Reader {
        reader: BodyReader,
        length: Option<u64>,
    },
}

/// Payload sent with POST, PUT or DELETE requests
///
/// Bodies built from memory have a known length. Bodies built from a reader
/// may declare one; without it the transfer is chunked and progress totals
/// are reported as unknown.
pub struct RequestBody {
    pub(crate) content: BodyContent,
    pub(crate) content_type: Option<String>,
}

impl RequestBody {
    /// Body from raw bytes
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self {
            content: BodyContent::Bytes(data.into()),
            content_type: None,
        }
    }

    /// UTF-8 text body (`text/plain; charset=utf-8`)
    pub fn text(text: impl Into<String>) -> Self {
        Self::bytes(text.into()).with_content_type("text/plain; charset=utf-8")
    }

    /// URL-encoded form body (`application/x-www-form-urlencoded`)
    pub fn form<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let encoded = pairs
            .into_iter()
            .map(|(k, v)| {
                format!(
                    "{}={}",
                    urlencoding::encode(k.as_ref()),
                    urlencoding::encode(v.as_ref())
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        Self::bytes(encoded).with_content_type("application/x-www-form-urlencoded")
    }

    /// JSON body (`application/json`)
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let data = serde_json::to_vec(value).map_err(|e| Error::InvalidConfiguration {
            message: format!("request body could not be serialized: {}", e),
            key: Some("body".to_string()),
        })?;
        Ok(Self::bytes(data).with_content_type("application/json"))
    }

    /// Body streamed from an async reader, with an optional declared length
    pub fn reader<R>(reader: R, length: Option<u64>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            content: BodyContent::Reader {
                reader: Box::new(reader),
                length,
            },
            content_type: None,
        }
    }

    /// Set the `Content-Type` sent with this body
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Content type, if any
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Body length, if known
    pub fn length(&self) -> Option<u64> {
        match &self.content {
            BodyContent::Bytes(b) => Some(b.len() as u64),
            BodyContent::Reader { length, .. } => *length,
        }
    }

    pub(crate) fn into_reader(self) -> BodyReader {
        match self.content {
            BodyContent::Bytes(b) => Box::new(std::io::Cursor::new(b)),
            BodyContent::Reader { reader, .. } => reader,
        }
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.content {
            BodyContent::Bytes(_) => "bytes",
            BodyContent::Reader { .. } => "reader",
        };
        f.debug_struct("RequestBody")
            .field("kind", &kind)
            .field("length", &self.length())
            .field("content_type", &self.content_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn form_body_is_url_encoded() {
        let body = RequestBody::form([("q", "rust lang"), ("page", "1&2")]);
        assert_eq!(body.content_type(), Some("application/x-www-form-urlencoded"));
        match &body.content {
            BodyContent::Bytes(b) => assert_eq!(&b[..], b"q=rust%20lang&page=1%262"),
            BodyContent::Reader { .. } => panic!("form body should be in memory"),
        }
    }

    #[test]
    fn json_body_sets_content_type_and_length() {
        let body = RequestBody::json(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(body.content_type(), Some("application/json"));
        assert_eq!(body.length(), Some(7));
    }

    #[test]
    fn reader_body_may_have_unknown_length() {
        let body = RequestBody::reader(tokio::io::empty(), None);
        assert_eq!(body.length(), None);
        assert!(body.content_type().is_none());
    }

    #[tokio::test]
    async fn bytes_body_reads_back_through_reader() {
        let mut reader = RequestBody::text("hello").into_reader();
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello");
    }
}
