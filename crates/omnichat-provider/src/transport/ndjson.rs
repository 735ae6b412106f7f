//! Newline-delimited JSON over a chunked HTTP response.
//!
//! Network chunks do not respect line boundaries, so the body is read through
//! a buffered line reader that carries a partial line over to the next chunk.

use futures::StreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::Flow;
use crate::error::{ProviderError, ProviderResult};

/// Deliver each non-empty line of `response` to `on_line`.
pub async fn for_each_line<F>(
    response: reqwest::Response,
    abort: &CancellationToken,
    on_line: F,
) -> ProviderResult<()>
where
    F: FnMut(&str) -> ProviderResult<Flow>,
{
    let reader = StreamReader::new(
        response
            .bytes_stream()
            .map(|r| r.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))),
    );
    for_each_line_in(reader, abort, on_line).await
}

/// Deliver each non-empty line read from `reader` to `on_line`.
pub async fn for_each_line_in<R, F>(
    reader: R,
    abort: &CancellationToken,
    mut on_line: F,
) -> ProviderResult<()>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(&str) -> ProviderResult<Flow>,
{
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(ProviderError::Cancelled),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        trace!(line, "NDJSON line");
        if on_line(line)? == Flow::Stop {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, BufReader};

    async fn collect(reader: impl AsyncBufRead + Unpin) -> Vec<String> {
        let mut lines = Vec::new();
        for_each_line_in(reader, &CancellationToken::new(), |line| {
            lines.push(line.to_string());
            Ok(Flow::Continue)
        })
        .await
        .unwrap();
        lines
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        // Three reads whose boundaries fall inside JSON objects.
        let chunks: [&[u8]; 3] = [b"{\"a\":", b"1}\n{\"b\"", b":2}\n\n{\"c\":3}"];
        let reader = BufReader::new(chunks[0].chain(chunks[1]).chain(chunks[2]));
        assert_eq!(
            collect(reader).await,
            vec![r#"{"a":1}"#, r#"{"b":2}"#, r#"{"c":3}"#]
        );
    }

    #[tokio::test]
    async fn test_crlf_and_blank_lines() {
        let reader = BufReader::new(&b"\r\n{\"x\":1}\r\n\r\n"[..]);
        assert_eq!(collect(reader).await, vec![r#"{"x":1}"#]);
    }

    #[tokio::test]
    async fn test_stop() {
        let reader = BufReader::new(&b"a\nb\nc\n"[..]);
        let mut seen = Vec::new();
        for_each_line_in(reader, &CancellationToken::new(), |line| {
            seen.push(line.to_string());
            Ok(if line == "b" { Flow::Stop } else { Flow::Continue })
        })
        .await
        .unwrap();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let err = for_each_line_in(BufReader::new(&b"a\n"[..]), &token, |_| Ok(Flow::Continue))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_callback_error_stops() {
        let err = for_each_line_in(
            BufReader::new(&b"not json\n"[..]),
            &CancellationToken::new(),
            |line| Err(ProviderError::malformed(line)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::MalformedFragment { .. }));
    }
}
