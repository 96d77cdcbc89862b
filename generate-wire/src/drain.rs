use bytes::Buf;
use hyper::body::Body;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Upper bound on a drained body unless overridden with [`DrainBodyFuture::with_limit`].
pub const DEFAULT_BODY_LIMIT: usize = 16 * 1024 * 1024;

pin_project! {
    /// Collects every data frame of a body into one contiguous buffer.
    ///
    /// Frame errors are wrapped with `anyhow` while keeping the underlying error as the
    /// source, so callers can walk the chain to find e.g. a `hyper::Error`.
    pub struct DrainBodyFuture<B: Body> {
        #[pin]
        body: B,
        buf: Vec<u8>,
        limit: usize,
    }
}

impl<B> DrainBodyFuture<B>
where
    B: Body,
{
    #[inline]
    #[must_use]
    pub fn new_trusted_length(body: B, content_length: usize) -> Self {
        Self {
            body,
            buf: Vec::with_capacity(content_length.min(DEFAULT_BODY_LIMIT)),
            limit: DEFAULT_BODY_LIMIT,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

impl<B> Future for DrainBodyFuture<B>
where
    B: Body,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    type Output = Result<Vec<u8>, anyhow::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slf = self.project();
        loop {
            let Some(next_res) = ready!(slf.body.as_mut().poll_frame(cx)) else {
                return Poll::Ready(Ok(std::mem::take(slf.buf)));
            };
            let frame = match next_res {
                Ok(frame) => frame,
                Err(e) => {
                    return Poll::Ready(Err(
                        anyhow::Error::new(e).context("Failed to poll next frame")
                    ));
                }
            };
            // Trailers carry nothing we keep.
            if let Ok(mut data) = frame.into_data() {
                if slf.buf.len() + data.remaining() > *slf.limit {
                    return Poll::Ready(Err(anyhow::anyhow!(
                        "Body exceeded limit of {} bytes",
                        slf.limit
                    )));
                }
                while data.has_remaining() {
                    let chunk = data.chunk();
                    let len = chunk.len();
                    slf.buf.extend_from_slice(chunk);
                    data.advance(len);
                }
            }
            if slf.body.is_end_stream() {
                return Poll::Ready(Ok(std::mem::take(slf.buf)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_body;

    #[tokio::test]
    async fn drains_full_body() {
        let body = byte_body(&b"{\"text\":[\"hello\"]}"[..]);
        let bytes = DrainBodyFuture::new_trusted_length(body, 4).await.unwrap();
        assert_eq!(bytes, b"{\"text\":[\"hello\"]}");
    }

    #[tokio::test]
    async fn drains_empty_body() {
        let bytes = DrainBodyFuture::new_trusted_length(byte_body(Vec::new()), 0)
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn rejects_body_over_limit() {
        let body = byte_body(vec![b'x'; 64]);
        let err = DrainBodyFuture::new_trusted_length(body, 64)
            .with_limit(16)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("limit of 16 bytes"));
    }
}
