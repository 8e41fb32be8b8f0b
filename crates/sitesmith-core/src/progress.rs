//! Line-buffered streaming of agent progress
//!
//! The completion engine emits text in arbitrary-sized deltas. Forwarding
//! every delta to the UI produces noisy partial-token events, so deltas are
//! buffered and flushed on line boundaries. Lines that start with a
//! recognized tool-call or step marker bypass the buffer entirely: those are
//! the events a UI wants the instant they appear, complete or not.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Prefixes that flush immediately without waiting for a newline.
pub const FLUSH_MARKERS: [&str; 2] = ["TOOL:", "STEP:"];

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, session_id: &str, line: &str);
}

/// Sink that drops everything. Used for background variant runs and tests
/// that don't assert on progress.
pub struct NullProgress;

#[async_trait]
impl ProgressSink for NullProgress {
    async fn emit(&self, _session_id: &str, _line: &str) {}
}

/// Accumulates streamed text and decides what is ready to flush.
#[derive(Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a delta and returns the lines now ready for the sink.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.pending.push_str(delta);
        let mut ready = Vec::new();

        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            if !line.is_empty() {
                ready.push(line.to_string());
            }
        }

        // Partial lines normally wait for their newline, but marker lines
        // are surfaced the moment the marker is recognizable.
        if FLUSH_MARKERS
            .iter()
            .any(|marker| self.pending.starts_with(marker))
        {
            ready.push(std::mem::take(&mut self.pending));
        }

        ready
    }

    /// Drains whatever is left at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let rest = rest.trim_end();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}

/// Pumps engine text deltas from a bounded channel into the sink, applying
/// the line-buffering policy. Runs as its own task for the duration of one
/// turn; ends when the sender side is dropped.
pub async fn pump(
    session_id: String,
    mut rx: mpsc::Receiver<String>,
    sink: Arc<dyn ProgressSink>,
) {
    let mut buffer = LineBuffer::new();
    while let Some(delta) = rx.recv().await {
        for line in buffer.push(&delta) {
            sink.emit(&session_id, &line).await;
        }
    }
    if let Some(rest) = buffer.finish() {
        sink.emit(&session_id, &rest).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct CollectingSink {
        lines: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProgressSink for CollectingSink {
        async fn emit(&self, _session_id: &str, line: &str) {
            self.lines.lock().await.push(line.to_string());
        }
    }

    #[test]
    fn buffers_until_newline() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push("Adding a hero ").is_empty());
        assert_eq!(buffer.push("section\nNext"), vec!["Adding a hero section"]);
        assert_eq!(buffer.finish(), Some("Next".to_string()));
    }

    #[test]
    fn marker_lines_flush_unbuffered() {
        let mut buffer = LineBuffer::new();
        let ready = buffer.push("TOOL: edit_file styles.css");
        assert_eq!(ready, vec!["TOOL: edit_file styles.css"]);
        assert_eq!(buffer.finish(), None);

        let ready = buffer.push("STEP: 3");
        assert_eq!(ready, vec!["STEP: 3"]);
    }

    #[test]
    fn multiple_lines_in_one_delta() {
        let mut buffer = LineBuffer::new();
        let ready = buffer.push("one\ntwo\nthree");
        assert_eq!(ready, vec!["one", "two"]);
        assert_eq!(buffer.finish(), Some("three".to_string()));
    }

    #[test]
    fn blank_lines_are_dropped() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push("\n\n").is_empty());
        assert_eq!(buffer.finish(), None);
    }

    #[tokio::test]
    async fn pump_applies_line_policy() {
        let sink = Arc::new(CollectingSink {
            lines: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::channel(8);

        let task = tokio::spawn(pump(
            "session-1".to_string(),
            rx,
            sink.clone() as Arc<dyn ProgressSink>,
        ));

        tx.send("Working on ".to_string()).await.unwrap();
        tx.send("the header\nTOOL: edit_file".to_string())
            .await
            .unwrap();
        drop(tx);
        task.await.unwrap();

        let lines = sink.lines.lock().await;
        assert_eq!(*lines, vec!["Working on the header", "TOOL: edit_file"]);
    }
}
