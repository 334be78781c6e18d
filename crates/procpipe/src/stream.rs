use crate::pipe;
use crate::platform;
use crate::pump;
use procpipe_core::{
    Action, ChannelConfig, EventKind, KillSignal, ProcessId, ProcessSignal, ProcessSpawner,
    Sequencer, SpawnConfig, SpawnedProcess, StreamError, StreamEvent, StreamState,
};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

/// Duplex byte endpoint over a spawned process.
///
/// Writes become the process's input; process output and lifecycle events are
/// delivered through the [`EventReceiver`]. The stream may be constructed
/// bare and bound to a process later: bytes written before binding are queued
/// and flushed, in order, the moment a process exists.
///
/// Cloning is shallow; all clones observe the same underlying stream.
#[derive(Clone)]
pub struct ProcessStream {
    inner: Arc<Inner>,
}

/// Caller-side write state. `Pending` queues bytes until a process is bound;
/// the reaper moves any variant to `Gone` once the stream closes.
enum WriteSide {
    Pending { queue: Vec<Bytes>, ended: bool },
    Bound(Box<dyn AsyncWrite + Send + Unpin>),
    Gone,
}

struct Inner {
    spawner: Arc<dyn ProcessSpawner>,
    /// Authoritative state machine for event ordering decisions
    sequencer: StdMutex<Sequencer>,
    write_side: Mutex<WriteSide>,
    kill_tx: StdMutex<Option<mpsc::UnboundedSender<KillSignal>>>,
    event_tx: mpsc::Sender<StreamEvent>,
    events: StdMutex<Option<mpsc::Receiver<StreamEvent>>>,
    closed_tx: watch::Sender<bool>,
    pid: StdMutex<Option<ProcessId>>,
}

impl std::fmt::Debug for ProcessStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessStream").finish_non_exhaustive()
    }
}

impl Default for ProcessStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessStream {
    /// Create an unbound stream using the platform-default spawner.
    ///
    /// The stream is a valid write target and pipe source immediately; bind
    /// it to a process with [`ProcessStream::bind`] when ready.
    pub fn new() -> Self {
        Self::with_parts(platform::default_spawner(), ChannelConfig::default())
    }

    /// Create an unbound stream with a specific spawner implementation
    pub fn with_spawner(spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self::with_parts(spawner, ChannelConfig::default())
    }

    /// Create an unbound stream with explicit channel buffering
    pub fn with_channels(channels: ChannelConfig) -> Result<Self, StreamError> {
        validated(&channels)?;
        Ok(Self::with_parts(platform::default_spawner(), channels))
    }

    fn with_parts(spawner: Arc<dyn ProcessSpawner>, channels: ChannelConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(channels.event_capacity);
        let (closed_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                spawner,
                sequencer: StdMutex::new(Sequencer::new()),
                write_side: Mutex::new(WriteSide::Pending {
                    queue: Vec::new(),
                    ended: false,
                }),
                kill_tx: StdMutex::new(None),
                event_tx,
                events: StdMutex::new(Some(event_rx)),
                closed_tx,
                pid: StdMutex::new(None),
            }),
        }
    }

    /// Construct a stream and bind it to a process in one step
    pub async fn spawn<S: ToString, I: IntoIterator<Item = S>>(
        command: impl Into<String>,
        args: I,
    ) -> Result<Self, StreamError> {
        Self::spawn_config(SpawnConfig::new(command, args)).await
    }

    /// Construct a stream from a full spawn configuration
    pub async fn spawn_config(config: SpawnConfig) -> Result<Self, StreamError> {
        validated(&config.channels)?;
        let stream = Self::with_parts(platform::default_spawner(), config.channels.clone());
        stream.bind_config(config).await?;
        Ok(stream)
    }

    /// Bind this stream to a freshly spawned process.
    ///
    /// May be called at most once: a second call fails with
    /// [`StreamError::AlreadyBound`], and a call after the terminal event
    /// fails with [`StreamError::BindAfterClose`]. On success, bytes queued
    /// before binding are flushed into the process input in enqueue order
    /// before anything else reaches it.
    pub async fn bind<S: ToString, I: IntoIterator<Item = S>>(
        &self,
        command: impl Into<String>,
        args: I,
    ) -> Result<(), StreamError> {
        self.bind_config(SpawnConfig::new(command, args)).await
    }

    /// Bind with a full spawn configuration.
    ///
    /// `config.channels` governs the buffers created at bind time (the
    /// internal signal channel and the read chunk size); the capacity of the
    /// public event channel was fixed when the stream was constructed, by
    /// [`ProcessStream::with_channels`] or [`ProcessStream::spawn_config`].
    pub async fn bind_config(&self, config: SpawnConfig) -> Result<(), StreamError> {
        validated(&config.channels)?;

        // The write-side lock is held for the whole bind, so concurrent bind
        // attempts serialize and the second one sees the updated state.
        let mut side = self.inner.write_side.lock().await;

        self.check_bindable()?;

        info!(command = %config.command, "binding stream to process");
        let spawned = self.inner.spawner.spawn(&config).await?;
        let SpawnedProcess {
            mut input,
            output,
            error_output,
            handle,
            killer,
        } = spawned;

        // Flush queued writes in enqueue order before anything else. A flush
        // failure aborts the bind, so the fresh process must not be leaked.
        let flushed = async {
            let ended = match std::mem::replace(&mut *side, WriteSide::Gone) {
                WriteSide::Pending { queue, ended } => {
                    for chunk in &queue {
                        input.write_all(chunk).await?;
                    }
                    input.flush().await?;
                    if !queue.is_empty() {
                        debug!(chunks = queue.len(), "flushed queued pre-bind writes");
                    }
                    ended
                }
                // check_bindable ruled the other variants out
                _ => false,
            };

            if ended {
                input.shutdown().await?;
            } else {
                *side = WriteSide::Bound(input);
            }
            Ok::<_, StreamError>(())
        }
        .await;
        if let Err(err) = flushed {
            warn!(command = %config.command, "pre-bind flush failed, killing process");
            let _ = killer.kill(KillSignal::Kill).await;
            return Err(err);
        }

        let (signal_tx, signal_rx) = mpsc::channel(config.channels.event_capacity);
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        *self.inner.kill_tx.lock().unwrap() = Some(kill_tx);
        *self.inner.pid.lock().unwrap() = handle.pid();

        // Commit under the sequencer lock: a destroy may have closed the
        // stream while the spawn was in flight, and the fresh process must
        // not outlive that decision.
        {
            let mut sequencer = self.inner.sequencer.lock().unwrap();
            if sequencer.is_closed() {
                drop(sequencer);
                warn!(command = %config.command, "stream destroyed during bind, killing process");
                *self.inner.kill_tx.lock().unwrap() = None;
                *self.inner.pid.lock().unwrap() = None;
                let _ = killer.kill(KillSignal::Kill).await;
                return Err(StreamError::BindAfterClose);
            }
            sequencer.bind();
        }

        let chunk_bytes = config.channels.read_chunk_bytes;
        tokio::spawn(pump::pump_output(output, chunk_bytes, signal_tx.clone()));
        tokio::spawn(pump::pump_error_output(
            error_output,
            chunk_bytes,
            signal_tx.clone(),
        ));
        tokio::spawn(pump::pump_exit(handle, signal_tx));
        tokio::spawn(pump::pump_kill(killer, kill_rx));

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.drive(signal_rx).await });

        Ok(())
    }

    fn check_bindable(&self) -> Result<(), StreamError> {
        match self.inner.sequencer.lock().unwrap().state() {
            StreamState::Unbound => Ok(()),
            StreamState::Closed => Err(StreamError::BindAfterClose),
            _ => Err(StreamError::AlreadyBound),
        }
    }

    /// Write bytes to the process input. Before binding, bytes are queued
    /// and flushed on bind; after the stream has closed, writing fails.
    pub async fn write(&self, bytes: impl Into<Bytes>) -> Result<(), StreamError> {
        let bytes = bytes.into();
        let mut side = self.inner.write_side.lock().await;
        match &mut *side {
            WriteSide::Pending { ended: true, .. } => Err(input_closed()),
            WriteSide::Pending { queue, .. } => {
                queue.push(bytes);
                Ok(())
            }
            WriteSide::Bound(input) => {
                input.write_all(&bytes).await?;
                input.flush().await?;
                Ok(())
            }
            WriteSide::Gone => Err(input_closed()),
        }
    }

    /// Signal end-of-input: the process sees EOF on its input channel.
    /// Idempotent; before binding it takes effect at bind time.
    pub async fn end_input(&self) -> Result<(), StreamError> {
        let mut side = self.inner.write_side.lock().await;
        match std::mem::replace(&mut *side, WriteSide::Gone) {
            WriteSide::Pending { queue, .. } => {
                *side = WriteSide::Pending { queue, ended: true };
                Ok(())
            }
            WriteSide::Bound(mut input) => {
                input.shutdown().await?;
                Ok(())
            }
            WriteSide::Gone => Ok(()),
        }
    }

    /// Take the event consumer. There is exactly one; returns `None` if it
    /// was already taken (for example by [`ProcessStream::pipe_into`]).
    pub fn events(&self) -> Option<EventReceiver> {
        self.inner
            .events
            .lock()
            .unwrap()
            .take()
            .map(|rx| EventReceiver { rx })
    }

    /// Wire this stream's output into `downstream`'s input, with
    /// backpressure. `End` upstream ends the downstream input; an upstream
    /// `Error` also ends it but is not forged into a downstream error.
    ///
    /// Returns `None` if this stream's event consumer was already taken.
    pub fn pipe_into(&self, downstream: &ProcessStream) -> Option<JoinHandle<()>> {
        let events = self.events()?;
        Some(pipe::run(events, downstream.clone()))
    }

    /// Forcibly terminate the bound process, or finalize immediately if no
    /// process was ever bound. Safe in any state, idempotent, and never an
    /// error by itself: `close` still fires, without `error`, unless the
    /// process independently fails. Await [`ProcessStream::closed`] to
    /// observe the terminal event.
    pub async fn destroy(&self) {
        let actions = {
            self.inner
                .sequencer
                .lock()
                .unwrap()
                .on_signal(ProcessSignal::Destroy)
        };
        self.inner.run_actions(actions).await;
    }

    /// Forward a kill signal to the bound process without destroy semantics:
    /// a resulting signal death surfaces as `error` then `close`.
    pub async fn kill(&self, signal: KillSignal) {
        let actions = {
            self.inner
                .sequencer
                .lock()
                .unwrap()
                .on_signal(ProcessSignal::Kill(signal))
        };
        self.inner.run_actions(actions).await;
    }

    /// Wait until the terminal `close` event has fired and the stream has
    /// been reaped. Resolves immediately if that already happened.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        // wait_for covers the already-closed case; the sender lives as long
        // as the stream, so this cannot fail while `self` exists
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Current lifecycle state
    pub fn state(&self) -> StreamState {
        self.inner.sequencer.lock().unwrap().state()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.sequencer.lock().unwrap().is_closed()
    }

    /// PID of the bound process; `None` before binding and after the reaper
    /// has released the handles.
    pub fn pid(&self) -> Option<ProcessId> {
        *self.inner.pid.lock().unwrap()
    }
}

fn validated(channels: &ChannelConfig) -> Result<(), StreamError> {
    channels
        .validate()
        .map_err(|err| StreamError::Config(err.to_string()))
}

fn input_closed() -> StreamError {
    StreamError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "process input is closed",
    ))
}

impl Inner {
    /// Sequencer driver: funnels pump signals through the state machine and
    /// carries out the resulting effects in order.
    async fn drive(self: Arc<Self>, mut signals: mpsc::Receiver<ProcessSignal>) {
        while let Some(signal) = signals.recv().await {
            let actions = { self.sequencer.lock().unwrap().on_signal(signal) };
            if self.run_actions(actions).await {
                break;
            }
        }
    }

    /// Execute actions in order; returns true once the stream was reaped
    async fn run_actions(&self, actions: Vec<Action>) -> bool {
        let mut reaped = false;
        for action in actions {
            match action {
                Action::Emit(event) => {
                    debug!(event = ?event.kind(), "emitting lifecycle event");
                    if self.event_tx.send(event).await.is_err() {
                        // Consumer dropped; ordering is still settled by the
                        // sequencer, so later actions proceed as usual
                    }
                }
                Action::ForwardKill(signal) => {
                    let tx = self.kill_tx.lock().unwrap().clone();
                    match tx {
                        Some(tx) => {
                            let _ = tx.send(signal);
                        }
                        None => debug!("no process to forward {signal:?} to"),
                    }
                }
                Action::Reap => {
                    self.reap().await;
                    reaped = true;
                }
            }
        }
        reaped
    }

    /// Release every handle the stream held. Runs exactly once, after the
    /// terminal event, deferred by one scheduling tick so close listeners in
    /// the same turn run before teardown.
    async fn reap(&self) {
        tokio::task::yield_now().await;

        {
            let mut side = self.write_side.lock().await;
            *side = WriteSide::Gone;
        }
        *self.kill_tx.lock().unwrap() = None;
        *self.pid.lock().unwrap() = None;

        let _ = self.closed_tx.send(true);
        debug!("stream reaped");
    }
}

/// Single consumer of a stream's lifecycle events
pub struct EventReceiver {
    rx: mpsc::Receiver<StreamEvent>,
}

impl EventReceiver {
    /// Receive the next lifecycle event. Returns `None` after `Close` has
    /// been consumed and the stream torn down.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Drain the stream to completion, concatenating `Data` chunks.
    ///
    /// Resolves once `end` fires (clean run) or with the `error` the stream
    /// emitted. A `close` without `end` (destroyed stream) yields whatever
    /// output was collected up to that point.
    pub async fn collect_output(&mut self) -> Result<Bytes, StreamError> {
        let mut out = BytesMut::new();
        while let Some(event) = self.recv().await {
            match event {
                StreamEvent::Readable => {}
                StreamEvent::Data(chunk) => out.extend_from_slice(&chunk),
                StreamEvent::End => return Ok(out.freeze()),
                StreamEvent::Error(err) => return Err(err),
                StreamEvent::Close => break,
            }
        }
        Ok(out.freeze())
    }

    /// Collect every event through `Close`, for ordering assertions
    pub async fn collect_to_close(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            let kind = event.kind();
            events.push(event);
            if kind == EventKind::Close {
                break;
            }
        }
        events
    }
}
