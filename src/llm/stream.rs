//! Streaming helpers
//!
//! Server-sent-event decoding for HTTP backends and the normalizer that turns
//! delta or cumulative chunks into plain deltas.

use crate::error::{AssistantError, Result};
use crate::llm::provider::StreamChunk;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tracing::warn;

/// Extract the payload of an SSE `data:` line.
pub fn parse_sse_line(line: &str) -> Option<String> {
    let line = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.is_empty() {
        None
    } else {
        Some(data.to_string())
    }
}

/// Split a byte stream into SSE `data:` payloads. Lines are reassembled across
/// chunk boundaries before UTF-8 decoding.
pub fn sse_data<S, B, E>(body: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| AssistantError::Stream(e.to_string()))?;
            buffer.extend_from_slice(chunk.as_ref());
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if let Some(data) = parse_sse_line(&String::from_utf8_lossy(&line)) {
                    yield data;
                }
            }
        }
        if let Some(data) = parse_sse_line(&String::from_utf8_lossy(&buffer)) {
            yield data;
        }
    })
}

/// Tracks what has already been emitted so cumulative snapshots can be diffed.
#[derive(Debug, Default)]
pub struct DeltaNormalizer {
    emitted: String,
}

impl DeltaNormalizer {
    pub fn push(&mut self, chunk: StreamChunk) -> Option<String> {
        let delta = match chunk {
            StreamChunk::Delta(delta) => {
                self.emitted.push_str(&delta);
                delta
            }
            StreamChunk::Snapshot(full) => {
                let delta = match full.strip_prefix(self.emitted.as_str()) {
                    Some(rest) => rest.to_string(),
                    None => {
                        // Already-sent text cannot be retracted; keep whatever extends past it.
                        warn!(
                            "Cumulative chunk diverged from emitted text ({} vs {} bytes)",
                            full.len(),
                            self.emitted.len()
                        );
                        full.get(self.emitted.len()..).unwrap_or_default().to_string()
                    }
                };
                self.emitted = full;
                delta
            }
        };
        if delta.is_empty() {
            None
        } else {
            Some(delta)
        }
    }

    pub fn emitted(&self) -> &str {
        &self.emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(parse_sse_line("data: {\"a\":1}\n"), Some("{\"a\":1}".to_string()));
        assert_eq!(parse_sse_line("data:[DONE]"), Some("[DONE]".to_string()));
        assert_eq!(parse_sse_line("event: message_start"), None);
        assert_eq!(parse_sse_line("data: "), None);
        assert_eq!(parse_sse_line(""), None);
    }

    #[test]
    fn test_cumulative_snapshots_are_diffed() {
        let mut normalizer = DeltaNormalizer::default();
        assert_eq!(normalizer.push(StreamChunk::Snapshot("Hel".into())), Some("Hel".into()));
        assert_eq!(normalizer.push(StreamChunk::Snapshot("Hello".into())), Some("lo".into()));
        assert_eq!(normalizer.push(StreamChunk::Snapshot("Hello".into())), None);
        assert_eq!(normalizer.push(StreamChunk::Snapshot("Hello!".into())), Some("!".into()));
        assert_eq!(normalizer.emitted(), "Hello!");
    }

    #[test]
    fn test_deltas_pass_through() {
        let mut normalizer = DeltaNormalizer::default();
        assert_eq!(normalizer.push(StreamChunk::Delta("a".into())), Some("a".into()));
        assert_eq!(normalizer.push(StreamChunk::Delta(String::new())), None);
        assert_eq!(normalizer.push(StreamChunk::Delta("b".into())), Some("b".into()));
        assert_eq!(normalizer.emitted(), "ab");
    }

    #[tokio::test]
    async fn test_sse_lines_split_across_chunks() {
        let chunks: Vec<std::result::Result<Vec<u8>, String>> = vec![
            Ok(b"data: one\n\nda".to_vec()),
            Ok(b"ta: two\n".to_vec()),
            Ok(b"data: three".to_vec()),
        ];
        let events: Vec<String> = sse_data(futures::stream::iter(chunks))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(events, vec!["one", "two", "three"]);
    }
}
