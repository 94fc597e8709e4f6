//! Fan-out: split one session into two independent event cursors.
//!
//! The cursors share the underlying session and a buffer of events one side
//! has seen but the other has not. Whichever cursor runs ahead pumps the
//! session; the other replays from the buffer. Nothing is re-requested
//! upstream and every event reaches both sides exactly once.

use super::events::StreamEvent;
use super::ChatCompletionStream;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

struct TeeShared {
    session: ChatCompletionStream,
    buffer: VecDeque<StreamEvent>,
    /// Absolute event offset of `buffer`'s front.
    base: u64,
    /// Absolute read offset of each cursor.
    offsets: [u64; 2],
    exhausted: bool,
}

impl TeeShared {
    /// Drop buffered events both cursors have consumed.
    fn trim(&mut self) {
        let slowest = self.offsets[0].min(self.offsets[1]);
        while self.base < slowest && !self.buffer.is_empty() {
            self.buffer.pop_front();
            self.base += 1;
        }
    }
}

/// One side of a [`tee`](ChatCompletionStream::tee).
pub struct StreamCursor {
    shared: Arc<Mutex<TeeShared>>,
    slot: usize,
    cancel: CancellationToken,
}

pub(super) fn split(session: ChatCompletionStream) -> (StreamCursor, StreamCursor) {
    let cancel = session.cancellation_token();
    let shared = Arc::new(Mutex::new(TeeShared {
        session,
        buffer: VecDeque::new(),
        base: 0,
        offsets: [0, 0],
        exhausted: false,
    }));
    (
        StreamCursor {
            shared: shared.clone(),
            slot: 0,
            cancel: cancel.clone(),
        },
        StreamCursor {
            shared,
            slot: 1,
            cancel,
        },
    )
}

impl StreamCursor {
    /// Next event for this cursor, or `None` once the session is drained.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        // The lock is held across the session poll; the lagging cursor
        // waits for the leader rather than polling the transport twice.
        let mut shared = self.shared.lock().await;
        loop {
            let offset = shared.offsets[self.slot];
            let buffered = shared.base + shared.buffer.len() as u64;
            if offset < buffered {
                let event = shared.buffer[(offset - shared.base) as usize].clone();
                shared.offsets[self.slot] += 1;
                shared.trim();
                return Some(event);
            }
            if shared.exhausted {
                return None;
            }
            match shared.session.next_event().await {
                Some(event) => shared.buffer.push_back(event),
                None => shared.exhausted = true,
            }
        }
    }

    /// Cancel the shared session; both cursors observe the abort.
    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{byte_stream, hello_chunks, sse_body};
    use super::*;
    use crate::options::RequestOptions;

    fn hello_tee() -> (StreamCursor, StreamCursor) {
        let body = sse_body(&hello_chunks(), true);
        ChatCompletionStream::new(byte_stream(body, 8), RequestOptions::default()).tee()
    }

    async fn drain(cursor: &mut StreamCursor) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        while let Some(event) = cursor.next_event().await {
            kinds.push(event.kind());
        }
        kinds
    }

    #[tokio::test]
    async fn test_both_cursors_see_the_full_sequence() {
        let (mut left, mut right) = hello_tee();
        let left_kinds = drain(&mut left).await;
        let right_kinds = drain(&mut right).await;
        assert_eq!(left_kinds, right_kinds);
        assert_eq!(left_kinds.first(), Some(&"connect"));
        assert_eq!(left_kinds.last(), Some(&"end"));
    }

    #[tokio::test]
    async fn test_interleaved_consumption_no_loss_no_duplication() {
        let (mut left, mut right) = hello_tee();
        let mut left_kinds = Vec::new();
        let mut right_kinds = Vec::new();
        loop {
            let mut progressed = false;
            if let Some(event) = left.next_event().await {
                left_kinds.push(event.kind());
                progressed = true;
            }
            // Right reads two at a time so the cursors keep crossing over.
            for _ in 0..2 {
                if let Some(event) = right.next_event().await {
                    right_kinds.push(event.kind());
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        assert_eq!(left_kinds, right_kinds);
    }

    #[tokio::test]
    async fn test_buffer_trims_once_both_sides_catch_up() {
        let (mut left, mut right) = hello_tee();
        while left.next_event().await.is_some() {}
        {
            let shared = left.shared.lock().await;
            // Right has read nothing; everything is still buffered.
            assert_eq!(shared.buffer.len() as u64, shared.offsets[0]);
        }
        while right.next_event().await.is_some() {}
        let shared = left.shared.lock().await;
        assert!(shared.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_abort_through_cursor_reaches_both_sides() {
        let (mut left, mut right) = hello_tee();
        let first = left.next_event().await;
        assert!(first.is_some());
        left.abort();
        let left_rest = drain(&mut left).await;
        assert_eq!(&left_rest[left_rest.len() - 2..], ["abort", "end"]);
        let right_kinds = drain(&mut right).await;
        assert_eq!(right_kinds.first(), Some(&"connect"));
        assert_eq!(right_kinds.last(), Some(&"end"));
        assert!(right_kinds.contains(&"abort"));
    }
}
