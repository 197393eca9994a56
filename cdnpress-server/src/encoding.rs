//! Content negotiation and compression of response bodies.

use std::fmt;

use async_compression::tokio::bufread::{BrotliEncoder, GzipEncoder};
use bytes::Bytes;
use tokio::io::AsyncReadExt;

/// A content coding the server can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentCoding {
    /// Brotli compression.
    Brotli,
    /// Gzip compression.
    Gzip,
    /// No compression.
    Identity,
}

impl ContentCoding {
    /// Picks a coding from an `Accept-Encoding` value.
    ///
    /// Matching is by substring with brotli preferred over gzip. Quality values are not evaluated.
    pub fn negotiate(accept_encoding: Option<&str>) -> Self {
        match accept_encoding {
            Some(value) if value.contains("br") => Self::Brotli,
            Some(value) if value.contains("gzip") => Self::Gzip,
            _ => Self::Identity,
        }
    }

    /// Returns the `Content-Encoding` token.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Brotli => "br",
            Self::Gzip => "gzip",
            Self::Identity => "identity",
        }
    }

    /// Encodes a complete body.
    pub async fn encode(self, body: Bytes) -> std::io::Result<Bytes> {
        let mut encoded = Vec::new();
        match self {
            Self::Identity => return Ok(body),
            Self::Brotli => {
                BrotliEncoder::new(&body[..])
                    .read_to_end(&mut encoded)
                    .await?
            }
            Self::Gzip => GzipEncoder::new(&body[..]).read_to_end(&mut encoded).await?,
        };
        Ok(encoded.into())
    }
}

impl fmt::Display for ContentCoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
