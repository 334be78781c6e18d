use crate::error::StreamError;
use crate::event::StreamEvent;
use crate::process::{ExitDisposition, KillSignal};
use tokio_util::bytes::{Bytes, BytesMut};
use tracing::debug;

/// Lifecycle state of a process stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No process bound yet; writes are queued
    Unbound,
    /// Process bound, output flowing
    Running,
    /// Output channel closed, awaiting the exit disposition
    Draining,
    /// Terminal; no events fire after this
    Closed,
}

/// Raw signals observed from the process and the caller.
///
/// These can arrive in any interleaving; the sequencer alone decides which
/// public events they produce and in what order.
#[derive(Debug)]
pub enum ProcessSignal {
    /// The output channel produced bytes
    OutputChunk(Bytes),
    /// The output channel reached end-of-stream
    OutputClosed,
    /// The error-output channel produced bytes
    ErrorOutput(Bytes),
    /// The process exited with the given disposition
    Exited(ExitDisposition),
    /// The caller requested destroy
    Destroy,
    /// The caller requested a kill without destroy semantics
    Kill(KillSignal),
    /// Reading or writing one of the process's channels failed
    ChannelFailed(std::io::Error),
}

/// Effects the stream must carry out in response to a signal
#[derive(Debug)]
pub enum Action {
    /// Deliver a lifecycle event to the consumer
    Emit(StreamEvent),
    /// Forward a kill signal to the process handle owner
    ForwardKill(KillSignal),
    /// Release every handle the stream still holds
    Reap,
}

/// The event-sequencer state machine.
///
/// Pure and synchronous: it never touches I/O, which keeps the ordering
/// contract testable without a process. The crux is that `OutputClosed` is
/// buffered as a flag instead of emitting `End` speculatively; terminal
/// resolution happens only once both the output EOF and the exit disposition
/// are known, so the end-vs-error race settles deterministically.
#[derive(Debug)]
pub struct Sequencer {
    state: StreamState,
    output_done: bool,
    exit: Option<ExitDisposition>,
    destroy_requested: bool,
    output_started: bool,
    error_buffer: BytesMut,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequencer {
    pub fn new() -> Self {
        Self {
            state: StreamState::Unbound,
            output_done: false,
            exit: None,
            destroy_requested: false,
            output_started: false,
            error_buffer: BytesMut::new(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// Transition `Unbound -> Running`. Raises no events; the binder flushes
    /// queued writes itself before feeding any signals.
    pub fn bind(&mut self) {
        debug_assert_eq!(self.state, StreamState::Unbound);
        self.state = StreamState::Running;
        debug!("stream bound, now running");
    }

    /// Feed one raw signal and get back the effects to carry out, in order
    pub fn on_signal(&mut self, signal: ProcessSignal) -> Vec<Action> {
        if self.state == StreamState::Closed {
            // Terminal state: every later signal is inert
            return Vec::new();
        }

        match signal {
            ProcessSignal::OutputChunk(chunk) => {
                let mut actions = Vec::new();
                if !self.output_started {
                    self.output_started = true;
                    actions.push(Action::Emit(StreamEvent::Readable));
                }
                actions.push(Action::Emit(StreamEvent::Data(chunk)));
                actions
            }

            ProcessSignal::OutputClosed => {
                self.output_done = true;
                if self.state == StreamState::Running {
                    self.state = StreamState::Draining;
                    debug!("output closed, draining until exit is known");
                }
                self.try_resolve()
            }

            ProcessSignal::ErrorOutput(chunk) => {
                self.error_buffer.extend_from_slice(&chunk);
                Vec::new()
            }

            ProcessSignal::Exited(disposition) => {
                self.exit = Some(disposition);
                self.try_resolve()
            }

            ProcessSignal::Destroy => match self.state {
                StreamState::Unbound => {
                    // Destroyed before a process ever existed: straight to
                    // closed, with no output-related events
                    self.state = StreamState::Closed;
                    debug!("unbound stream destroyed");
                    vec![Action::Emit(StreamEvent::Close), Action::Reap]
                }
                _ => {
                    self.destroy_requested = true;
                    vec![Action::ForwardKill(KillSignal::Kill)]
                }
            },

            ProcessSignal::Kill(kill) => match self.state {
                StreamState::Unbound => Vec::new(),
                _ => vec![Action::ForwardKill(kill)],
            },

            ProcessSignal::ChannelFailed(err) => {
                self.state = StreamState::Closed;
                debug!("channel failure, closing: {err}");
                vec![
                    Action::Emit(StreamEvent::Error(StreamError::Io(err))),
                    Action::Emit(StreamEvent::Close),
                    Action::ForwardKill(KillSignal::Kill),
                    Action::Reap,
                ]
            }
        }
    }

    /// Resolve the terminal events once both the output EOF and the exit
    /// disposition have been observed.
    fn try_resolve(&mut self) -> Vec<Action> {
        let Some(disposition) = self.exit else {
            return Vec::new();
        };
        if !self.output_done {
            return Vec::new();
        }

        self.state = StreamState::Closed;
        debug!(%disposition, destroy = self.destroy_requested, "stream resolved");

        let mut actions = Vec::new();
        match disposition {
            ExitDisposition::Clean => actions.push(Action::Emit(StreamEvent::End)),
            ExitDisposition::Signal(_) if self.destroy_requested => {
                // Signal death after a destroy request is attributed to the
                // destroy itself: plain close, no error
            }
            abnormal => {
                actions.push(Action::Emit(StreamEvent::Error(StreamError::abnormal(
                    abnormal,
                    &self.error_buffer,
                ))));
            }
        }
        actions.push(Action::Emit(StreamEvent::Close));
        actions.push(Action::Reap);
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn kinds(actions: &[Action]) -> Vec<EventKind> {
        actions
            .iter()
            .filter_map(|action| match action {
                Action::Emit(event) => Some(event.kind()),
                _ => None,
            })
            .collect()
    }

    fn bound() -> Sequencer {
        let mut sequencer = Sequencer::new();
        sequencer.bind();
        sequencer
    }

    #[test]
    fn test_clean_run_emits_end_then_close() {
        let mut sequencer = bound();

        let actions = sequencer.on_signal(ProcessSignal::OutputChunk(Bytes::from_static(b"JPEG")));
        assert_eq!(kinds(&actions), vec![EventKind::Readable, EventKind::Data]);

        let actions = sequencer.on_signal(ProcessSignal::OutputClosed);
        assert!(kinds(&actions).is_empty());
        assert_eq!(sequencer.state(), StreamState::Draining);

        let actions = sequencer.on_signal(ProcessSignal::Exited(ExitDisposition::Clean));
        assert_eq!(kinds(&actions), vec![EventKind::End, EventKind::Close]);
        assert!(matches!(actions.last(), Some(Action::Reap)));
        assert!(sequencer.is_closed());
    }

    #[test]
    fn test_readable_fires_once() {
        let mut sequencer = bound();

        let first = sequencer.on_signal(ProcessSignal::OutputChunk(Bytes::from_static(b"a")));
        assert_eq!(kinds(&first), vec![EventKind::Readable, EventKind::Data]);

        let second = sequencer.on_signal(ProcessSignal::OutputChunk(Bytes::from_static(b"b")));
        assert_eq!(kinds(&second), vec![EventKind::Data]);
    }

    #[test]
    fn test_exit_before_output_eof_defers_resolution() {
        let mut sequencer = bound();

        // Exit is known first, but buffered output may still be in flight
        let actions = sequencer.on_signal(ProcessSignal::Exited(ExitDisposition::Clean));
        assert!(kinds(&actions).is_empty());
        assert_eq!(sequencer.state(), StreamState::Running);

        let actions = sequencer.on_signal(ProcessSignal::OutputChunk(Bytes::from_static(b"late")));
        assert_eq!(kinds(&actions), vec![EventKind::Readable, EventKind::Data]);

        let actions = sequencer.on_signal(ProcessSignal::OutputClosed);
        assert_eq!(kinds(&actions), vec![EventKind::End, EventKind::Close]);
    }

    #[test]
    fn test_abnormal_exit_suppresses_end() {
        let mut sequencer = bound();
        sequencer.on_signal(ProcessSignal::OutputChunk(Bytes::from_static(b"partial")));
        sequencer.on_signal(ProcessSignal::OutputClosed);

        let actions = sequencer.on_signal(ProcessSignal::Exited(ExitDisposition::Code(3)));
        assert_eq!(kinds(&actions), vec![EventKind::Error, EventKind::Close]);
    }

    #[test]
    fn test_signal_kill_emits_error_then_close() {
        let mut sequencer = bound();
        sequencer.on_signal(ProcessSignal::OutputClosed);

        let actions = sequencer.on_signal(ProcessSignal::Exited(ExitDisposition::Signal(9)));
        assert_eq!(kinds(&actions), vec![EventKind::Error, EventKind::Close]);

        let Some(Action::Emit(StreamEvent::Error(err))) = actions.first() else {
            panic!("expected an error event");
        };
        assert_eq!(err.disposition(), Some(ExitDisposition::Signal(9)));
    }

    #[test]
    fn test_error_buffer_feeds_abnormal_message() {
        let mut sequencer = bound();
        sequencer.on_signal(ProcessSignal::ErrorOutput(Bytes::from_static(
            b"boom: no such file\n",
        )));
        sequencer.on_signal(ProcessSignal::OutputClosed);

        let actions = sequencer.on_signal(ProcessSignal::Exited(ExitDisposition::Code(1)));
        let Some(Action::Emit(StreamEvent::Error(err))) = actions.first() else {
            panic!("expected an error event");
        };
        assert!(format!("{err}").contains("boom: no such file"));
    }

    #[test]
    fn test_error_output_ignored_on_clean_exit() {
        let mut sequencer = bound();
        sequencer.on_signal(ProcessSignal::ErrorOutput(Bytes::from_static(b"noise\n")));
        sequencer.on_signal(ProcessSignal::OutputClosed);

        let actions = sequencer.on_signal(ProcessSignal::Exited(ExitDisposition::Clean));
        assert_eq!(kinds(&actions), vec![EventKind::End, EventKind::Close]);
    }

    #[test]
    fn test_destroy_unbound_closes_immediately() {
        let mut sequencer = Sequencer::new();

        let actions = sequencer.on_signal(ProcessSignal::Destroy);
        assert_eq!(kinds(&actions), vec![EventKind::Close]);
        assert!(matches!(actions.last(), Some(Action::Reap)));
        assert!(sequencer.is_closed());
    }

    #[test]
    fn test_destroy_running_forwards_kill_without_events() {
        let mut sequencer = bound();

        let actions = sequencer.on_signal(ProcessSignal::Destroy);
        assert!(kinds(&actions).is_empty());
        assert!(matches!(
            actions.as_slice(),
            [Action::ForwardKill(KillSignal::Kill)]
        ));
    }

    #[test]
    fn test_destroy_suppresses_error_on_signal_death() {
        let mut sequencer = bound();
        sequencer.on_signal(ProcessSignal::Destroy);
        sequencer.on_signal(ProcessSignal::OutputClosed);

        let actions = sequencer.on_signal(ProcessSignal::Exited(ExitDisposition::Signal(9)));
        assert_eq!(kinds(&actions), vec![EventKind::Close]);
    }

    #[test]
    fn test_destroy_then_nonzero_exit_still_errors() {
        let mut sequencer = bound();
        sequencer.on_signal(ProcessSignal::Destroy);
        sequencer.on_signal(ProcessSignal::OutputClosed);

        // The process beat the kill to the finish line with its own failure
        let actions = sequencer.on_signal(ProcessSignal::Exited(ExitDisposition::Code(2)));
        assert_eq!(kinds(&actions), vec![EventKind::Error, EventKind::Close]);
    }

    #[test]
    fn test_destroy_then_clean_exit_still_ends() {
        let mut sequencer = bound();
        sequencer.on_signal(ProcessSignal::Destroy);
        sequencer.on_signal(ProcessSignal::OutputClosed);

        let actions = sequencer.on_signal(ProcessSignal::Exited(ExitDisposition::Clean));
        assert_eq!(kinds(&actions), vec![EventKind::End, EventKind::Close]);
    }

    #[test]
    fn test_external_kill_does_not_suppress_error() {
        let mut sequencer = bound();

        let actions = sequencer.on_signal(ProcessSignal::Kill(KillSignal::Kill));
        assert!(matches!(
            actions.as_slice(),
            [Action::ForwardKill(KillSignal::Kill)]
        ));

        sequencer.on_signal(ProcessSignal::OutputClosed);
        let actions = sequencer.on_signal(ProcessSignal::Exited(ExitDisposition::Signal(9)));
        assert_eq!(kinds(&actions), vec![EventKind::Error, EventKind::Close]);
    }

    #[test]
    fn test_kill_while_unbound_is_inert() {
        let mut sequencer = Sequencer::new();
        let actions = sequencer.on_signal(ProcessSignal::Kill(KillSignal::Term));
        assert!(actions.is_empty());
        assert_eq!(sequencer.state(), StreamState::Unbound);
    }

    #[test]
    fn test_signals_after_close_are_inert() {
        let mut sequencer = bound();
        sequencer.on_signal(ProcessSignal::OutputClosed);
        sequencer.on_signal(ProcessSignal::Exited(ExitDisposition::Clean));
        assert!(sequencer.is_closed());

        // No event may ever fire after close
        assert!(
            sequencer
                .on_signal(ProcessSignal::OutputChunk(Bytes::from_static(b"x")))
                .is_empty()
        );
        assert!(sequencer.on_signal(ProcessSignal::OutputClosed).is_empty());
        assert!(
            sequencer
                .on_signal(ProcessSignal::Exited(ExitDisposition::Code(1)))
                .is_empty()
        );
        assert!(sequencer.on_signal(ProcessSignal::Destroy).is_empty());
        assert!(
            sequencer
                .on_signal(ProcessSignal::Kill(KillSignal::Kill))
                .is_empty()
        );
    }

    #[test]
    fn test_channel_failure_errors_and_closes() {
        let mut sequencer = bound();

        let err = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        let actions = sequencer.on_signal(ProcessSignal::ChannelFailed(err));
        assert_eq!(kinds(&actions), vec![EventKind::Error, EventKind::Close]);
        assert!(matches!(actions.last(), Some(Action::Reap)));
        assert!(sequencer.is_closed());
    }

    #[test]
    fn test_data_interleaves_until_output_closed() {
        let mut sequencer = bound();
        sequencer.on_signal(ProcessSignal::OutputChunk(Bytes::from_static(b"a")));
        sequencer.on_signal(ProcessSignal::ErrorOutput(Bytes::from_static(b"warn\n")));
        let actions = sequencer.on_signal(ProcessSignal::OutputChunk(Bytes::from_static(b"b")));
        assert_eq!(kinds(&actions), vec![EventKind::Data]);
        assert_eq!(sequencer.state(), StreamState::Running);
    }
}
