//! HTTP access to a running server for the task board.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use reqwest::Client;

use crate::{
    board::{BoardError, TaskSource},
    events::ChangeEvent,
    models::Task,
};

/// Largest incomplete event the parser will hold before giving up on the feed.
const MAX_PENDING_BYTES: usize = 64 * 1024;

pub type ChangeStream = Pin<Box<dyn Stream<Item = ChangeEvent> + Send>>;

pub struct HttpTaskSource {
    client: Client,
    base_url: String,
}

impl HttpTaskSource {
    pub fn new(base_url: &str) -> Self {
        HttpTaskSource {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Subscribes to `/api/events` and yields each change notification.
    /// The stream ends when the server closes the connection.
    pub async fn changes(&self) -> Result<ChangeStream, BoardError> {
        let url = format!("{}/api/events", self.base_url);
        let response = self.client.get(&url).send().await?;
        let response = check_status(response).await?;

        let chunks = Box::pin(response.bytes_stream());
        let events = stream::unfold(
            (chunks, SseBuffer::default()),
            |(mut chunks, mut buffer)| async move {
                loop {
                    if let Some(event) = buffer.next_event() {
                        return Some((event, (chunks, buffer)));
                    }
                    if buffer.overflowed() {
                        tracing::warn!("Change feed sent over {} bytes without an event boundary", MAX_PENDING_BYTES);
                        return None;
                    }
                    match chunks.next().await {
                        Some(Ok(bytes)) => buffer.push(&bytes),
                        Some(Err(e)) => {
                            tracing::warn!("Change feed interrupted: {}", e);
                            return None;
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(Box::pin(events))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BoardError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    Err(BoardError::Status { status, message })
}

#[async_trait]
impl TaskSource for HttpTaskSource {
    async fn list_tasks(&self) -> Result<Vec<Task>, BoardError> {
        let url = format!("{}/api/tasks", self.base_url);
        let response = self.client.get(&url).send().await?;
        let response = check_status(response).await?;
        Ok(response.json::<Vec<Task>>().await?)
    }
}

/// Incremental parser for a `text/event-stream` body. Only `data:` lines
/// that decode as a [`ChangeEvent`] are surfaced; comments and keep-alives
/// are skipped.
#[derive(Debug, Default)]
struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
    }

    /// True once the unparsed tail is larger than any sane event.
    fn overflowed(&self) -> bool {
        self.pending.len() > MAX_PENDING_BYTES
    }

    fn next_event(&mut self) -> Option<ChangeEvent> {
        while let Some(end) = self.pending.windows(2).position(|w| w == b"\n\n") {
            let raw: Vec<u8> = self.pending.drain(..end + 2).collect();
            let block = String::from_utf8_lossy(&raw);
            let data: Vec<&str> = block
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(str::trim_start)
                .collect();
            if data.is_empty() {
                continue;
            }
            match serde_json::from_str(&data.join("\n")) {
                Ok(event) => return Some(event),
                Err(e) => tracing::warn!("Ignoring malformed change event: {}", e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChangeKind, Table};

    #[test]
    fn test_sse_split_across_chunks() {
        let mut buf = SseBuffer::default();
        buf.push(b"event: change\ndata: {\"table\":\"tasks\",\"kind\":\"ins");
        assert!(buf.next_event().is_none());
        buf.push(b"ert\",\"id\":\"t1\",\"user_id\":null}\n\n");

        let event = buf.next_event().unwrap();
        assert_eq!(event.table, Table::Tasks);
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.id, "t1");
        assert!(buf.next_event().is_none());
    }

    #[test]
    fn test_sse_skips_comments_and_garbage() {
        let mut buf = SseBuffer::default();
        buf.push(b":lagged\r\n\r\ndata: not json\n\n");
        buf.push(b"data: {\"table\":\"posts\",\"kind\":\"delete\",\"id\":\"p\",\"user_id\":\"a\"}\n\n");

        let event = buf.next_event().unwrap();
        assert_eq!(event.table, Table::Posts);
        assert_eq!(event.user_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_unterminated_event_overflows() {
        let mut buf = SseBuffer::default();
        buf.push(b"data: ");
        let filler = vec![b'x'; MAX_PENDING_BYTES];
        buf.push(&filler);
        assert!(buf.next_event().is_none());
        assert!(buf.overflowed());
    }

    #[test]
    fn test_many_complete_events_do_not_overflow() {
        let mut buf = SseBuffer::default();
        let event = b"data: {\"table\":\"tasks\",\"kind\":\"update\",\"id\":\"t\",\"user_id\":null}\n\n";
        for _ in 0..(MAX_PENDING_BYTES / event.len() + 10) {
            buf.push(event);
        }
        let mut seen = 0;
        while buf.next_event().is_some() {
            seen += 1;
        }
        assert!(seen > 0);
        assert!(!buf.overflowed());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let source = HttpTaskSource::new("http://localhost:3001/");
        assert_eq!(source.base_url, "http://localhost:3001");
    }
}
