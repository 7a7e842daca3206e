//! Request and response bodies.
//!
//! Status pages and XML reports are built in memory; GET streams the
//! resource content straight from the store.

use std::io;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::StreamExt;
use http::header::HeaderMap;
use http_body::{Body as HttpBody, SizeHint};

use crate::store::ContentStream;

/// Body of a response produced by the handler. Implements
/// `http_body::Body`, so it can be handed to hyper as is.
pub struct Body {
    kind: Kind,
}

enum Kind {
    Empty,
    Full(Bytes),
    Content {
        stream: ContentStream<'static>,
        length: Option<u64>,
    },
}

impl Body {
    /// A body without data.
    pub fn empty() -> Body {
        Body { kind: Kind::Empty }
    }

    /// Stream the content of a resource. `length`, when known, is
    /// reported as the exact size of the body.
    pub fn content(stream: ContentStream<'static>, length: Option<u64>) -> Body {
        Body {
            kind: Kind::Content { stream, length },
        }
    }

    /// Read the whole body into one buffer.
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        match self.kind {
            Kind::Empty => Ok(Bytes::new()),
            Kind::Full(bytes) => Ok(bytes),
            Kind::Content { mut stream, .. } => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        let this = self.get_mut();
        if let Kind::Content { stream, .. } = &mut this.kind {
            return stream.poll_next_unpin(cx);
        }
        // a buffer goes out in one piece.
        match mem::replace(&mut this.kind, Kind::Empty) {
            Kind::Full(bytes) => Poll::Ready(Some(Ok(bytes))),
            _ => Poll::Ready(None),
        }
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _cx: &mut Context,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        Poll::Ready(Ok(None))
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.kind, Kind::Empty)
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            Kind::Empty => SizeHint::with_exact(0),
            Kind::Full(bytes) => SizeHint::with_exact(bytes.len() as u64),
            Kind::Content {
                length: Some(len), ..
            } => SizeHint::with_exact(*len),
            Kind::Content { length: None, .. } => SizeHint::default(),
        }
    }
}

impl From<String> for Body {
    fn from(t: String) -> Body {
        Body::from(Bytes::from(t))
    }
}

impl From<&str> for Body {
    fn from(t: &str) -> Body {
        Body::from(Bytes::copy_from_slice(t.as_bytes()))
    }
}

impl From<Bytes> for Body {
    fn from(t: Bytes) -> Body {
        if t.is_empty() {
            Body::empty()
        } else {
            Body {
                kind: Kind::Full(t),
            }
        }
    }
}
