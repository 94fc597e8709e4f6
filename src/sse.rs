/// Server-sent-event record decoder and encoding helpers.
///
/// Operates on the logical lines produced by [`crate::framer::LineDecoder`];
/// one record per blank-line separator, `data:` fields joined with `\n`.

/// One decoded SSE record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventRecord {
    /// Value of the last `event:` field, if any.
    pub event: Option<String>,
    /// All `data:` field values joined with `\n`.
    pub data: String,
    /// Every non-blank line of the record verbatim, comments included.
    pub raw: Vec<String>,
}

/// Payload prefix that terminates an event stream.
pub const DONE_DATA: &str = "[DONE]";

/// Whether a record's data announces end-of-stream. Matched as a prefix so
/// providers appending trailers after `[DONE]` still terminate cleanly.
#[must_use]
pub fn is_done_data(data: &str) -> bool {
    data.starts_with(DONE_DATA)
}

/// Incremental SSE record decoder.
///
/// Feed lines one at a time; a blank line closes the pending record and
/// returns it. A record left dangling when the transport ends (fields seen
/// but no blank line) is dropped, mirroring what browsers do with a
/// truncated event stream.
#[derive(Debug, Default)]
pub struct SseRecordDecoder {
    event: Option<String>,
    data: Vec<String>,
    raw: Vec<String>,
}

impl SseRecordDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one line; returns a completed record on a blank separator
    /// line, `None` otherwise.
    pub fn decode(&mut self, line: &str) -> Option<EventRecord> {
        // A stray \r surviving upstream framing still counts as blank.
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            if self.event.is_none() && self.data.is_empty() {
                // No fields accumulated, e.g. keep-alive blanks or a
                // comment-only block; buffered comment lines carry into the
                // next real record.
                return None;
            }
            let record = EventRecord {
                event: self.event.take(),
                data: std::mem::take(&mut self.data).join("\n"),
                raw: std::mem::take(&mut self.raw),
            };
            return Some(record);
        }

        self.raw.push(line.to_string());

        if line.starts_with(':') {
            // Comment line; kept in raw only.
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id, retry, and anything nonstandard: recorded in raw, ignored.
            _ => {}
        }
        None
    }

    /// Whether any fields are buffered for an unclosed record.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.event.is_some() || !self.data.is_empty() || !self.raw.is_empty()
    }
}

// --- encoding helpers ---------------------------------------------------

/// Encode a payload as a `data:` frame, splitting embedded newlines into
/// multiple `data:` lines so the record decodes back to the same payload.
#[must_use]
pub fn data_frame(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len() + 16);
    for line in payload.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Encode a named event with a payload.
#[must_use]
pub fn event_frame(event: &str, payload: &str) -> String {
    let mut out = String::with_capacity(event.len() + payload.len() + 24);
    out.push_str("event: ");
    out.push_str(event);
    out.push('\n');
    for line in payload.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// The terminal frame.
#[must_use]
pub fn done_frame() -> String {
    data_frame(DONE_DATA)
}
