use crate::error::StreamError;
use tokio_util::bytes::Bytes;

/// Lifecycle events emitted by a process stream, in the order guaranteed by
/// the event sequencer:
///
/// - a clean run emits `Readable`/`Data` interleaved, then `End`, then `Close`
/// - an abnormal run emits `Error` then `Close`, and never `End`
/// - `Close` fires exactly once and nothing follows it
#[derive(Debug)]
pub enum StreamEvent {
    /// Output has started flowing; fired once, before the first `Data`
    Readable,
    /// A chunk of process output
    Data(Bytes),
    /// Output finished and the process exited cleanly
    End,
    /// The process terminated abnormally, or one of its channels failed
    Error(StreamError),
    /// Terminal event; the stream is permanently inert afterwards
    Close,
}

/// Discriminant of a [`StreamEvent`], for ordering assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Readable,
    Data,
    End,
    Error,
    Close,
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StreamEvent::Readable => EventKind::Readable,
            StreamEvent::Data(_) => EventKind::Data,
            StreamEvent::End => EventKind::End,
            StreamEvent::Error(_) => EventKind::Error,
            StreamEvent::Close => EventKind::Close,
        }
    }
}
