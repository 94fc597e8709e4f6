//! Capture a session as a replayable byte stream.
//!
//! The capture format is newline-delimited JSON: every decoded chunk
//! re-serialized on its own line. Unknown provider fields survive through
//! the flattened extra maps, so a capture replayed with
//! [`ChatCompletionStream::from_byte_stream`] reproduces the same snapshots
//! and events as the live stream did.

use crate::error::StreamError;
use crate::session::events::StreamEvent;
use crate::session::ChatCompletionStream;
use bytes::Bytes;
use futures_util::{stream, Stream};

impl ChatCompletionStream {
    /// Consume the session, yielding one serialized chunk per line.
    ///
    /// Terminal failures surface as the final `Err` item; an abort ends the
    /// byte stream without one.
    pub fn into_byte_stream(self) -> impl Stream<Item = Result<Bytes, StreamError>> + Send {
        stream::unfold(self, |mut session| async move {
            loop {
                match session.next_event().await {
                    Some(StreamEvent::Chunk { chunk, .. }) => {
                        let item = match serde_json::to_vec(&chunk) {
                            Ok(mut line) => {
                                line.push(b'\n');
                                Ok(Bytes::from(line))
                            }
                            Err(err) => Err(StreamError::Payload(format!(
                                "could not serialize chunk: {err}"
                            ))),
                        };
                        return Some((item, session));
                    }
                    Some(StreamEvent::Error(err)) => return Some((Err(err), session)),
                    Some(_) => {}
                    None => return None,
                }
            }
        })
    }
}
