//! Streaming chat-completion accumulation.
//!
//! Takes the raw byte stream of a chat-completions SSE response and turns it
//! into typed events, an incrementally updated snapshot, and finally a value
//! shaped exactly like a non-streaming response. The pipeline is:
//!
//! bytes -> lines ([`framer::LineDecoder`]) -> SSE records
//! ([`sse::SseRecordDecoder`]) -> chunks ([`types::ChatCompletionChunk`]) ->
//! snapshot ([`accumulator`]) -> completion ([`finalize`]), all driven by a
//! [`ChatCompletionStream`] session.
//!
//! ```
//! use bytes::Bytes;
//! use deltafuse::{ChatCompletionStream, RequestOptions, TransportError};
//! use futures_util::stream;
//!
//! let body = "data: {\"id\":\"c\",\"created\":1,\"model\":\"m\",\"choices\":\
//!     [{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hi\"},\
//!     \"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n";
//! let transport = stream::iter([Ok::<_, TransportError>(Bytes::from_static(body.as_bytes()))]);
//! let mut session = ChatCompletionStream::new(transport, RequestOptions::default());
//!
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! assert_eq!(rt.block_on(session.final_content()).unwrap(), "Hi");
//! ```

pub mod accumulator;
pub mod error;
pub mod finalize;
pub mod framer;
pub mod options;
pub mod partial_json;
pub mod replay;
pub mod session;
pub mod snapshot;
pub mod sse;
pub mod types;

pub use error::{StreamError, TransportError};
pub use options::{RequestOptions, ResponseFormat, ToolSpec};
pub use session::events::StreamEvent;
pub use session::tee::StreamCursor;
pub use session::{ChatCompletionStream, ListenerId};
pub use snapshot::CompletionSnapshot;
pub use types::{ChatCompletion, ChatCompletionChunk, ChatMessage, Usage};
