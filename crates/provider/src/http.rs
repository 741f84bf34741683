//! Shared request plumbing: cancellable sends, status mapping, line streams.

use futures::{Stream, StreamExt};
use reqwest::{RequestBuilder, Response};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::{CallContext, ConnectorError, ProviderKind, Result};

/// Send a request, racing it against cancellation.
pub(crate) async fn send(ctx: &CallContext, request: RequestBuilder) -> Result<Response> {
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(ConnectorError::Cancelled),
        response = request.send() => Ok(response?),
    }
}

/// Map a non-success status onto the error taxonomy.
pub(crate) async fn check_status(provider: ProviderKind, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    warn!(provider = %provider, status = status.as_u16(), message = %message, "request rejected");

    match status.as_u16() {
        401 | 403 => Err(ConnectorError::forbidden(provider)),
        429 => Err(ConnectorError::RateLimited),
        code => Err(ConnectorError::Api {
            status: code,
            message,
        }),
    }
}

/// Best-effort extraction of a provider error message
pub(crate) fn error_message(body: &str) -> String {
    const MAX_LEN: usize = 300;
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let candidates = [
            json.pointer("/error/message"),
            json.get("error"),
            json.get("message"),
            json.get("Message"),
        ];
        for candidate in candidates.into_iter().flatten() {
            if let Some(text) = candidate.as_str() {
                return text.to_string();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "UNKNOWN ERROR".to_string();
    }
    trimmed.chars().take(MAX_LEN).collect()
}

/// Read a whole JSON body, racing it against cancellation.
pub(crate) async fn read_json(ctx: &CallContext, response: Response) -> Result<Value> {
    let bytes = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(ConnectorError::Cancelled),
        bytes = response.bytes() => bytes?,
    };
    serde_json::from_slice(&bytes).map_err(|e| ConnectorError::malformed(format!("invalid JSON body: {}", e)))
}

/// Strip the `data:` prefix of a server-sent-events line.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Splits a byte stream into text lines. Bytes are buffered so multi-byte
/// characters split across chunks decode intact.
pub(crate) struct LineReader<S> {
    stream: S,
    buffer: Vec<u8>,
    finished: bool,
}

impl<S, B> LineReader<S>
where
    S: Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    pub(crate) fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            finished: false,
        }
    }

    /// Next line without its terminator, or `None` at end of stream.
    pub(crate) async fn next_line(&mut self, cancel: &CancellationToken) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line);
                return Ok(Some(text.trim_end_matches(&['\n', '\r'][..]).to_string()));
            }
            if self.finished {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let rest = std::mem::take(&mut self.buffer);
                return Ok(Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string()));
            }

            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(ConnectorError::Cancelled),
                next = self.stream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    trace!(bytes = chunk.as_ref().len(), "stream chunk");
                    self.buffer.extend_from_slice(chunk.as_ref());
                }
                Some(Err(e)) => return Err(ConnectorError::Transport(e)),
                None => self.finished = true,
            }
        }
    }
}

/// Wrap a response body for line-by-line reading.
pub(crate) fn lines(
    response: Response,
) -> LineReader<impl Stream<Item = reqwest::Result<impl AsRef<[u8]>>> + Unpin + Send> {
    LineReader::new(Box::pin(response.bytes_stream()))
}
