//! Signal pumps: small tasks that translate the raw process channels into
//! sequencer signals. The shared signal channel is bounded, so a slow
//! consumer stops the output pump, which in turn lets the OS pipe throttle
//! the process.

use procpipe_core::{KillSignal, ProcessHandle, ProcessKiller, ProcessSignal};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::bytes::BytesMut;
use tracing::{debug, warn};

/// Read process output in chunks and forward it as sequencer signals
pub(crate) async fn pump_output(
    mut output: Box<dyn AsyncRead + Send + Unpin>,
    chunk_bytes: usize,
    signals: mpsc::Sender<ProcessSignal>,
) {
    loop {
        let mut buf = BytesMut::with_capacity(chunk_bytes);
        match output.read_buf(&mut buf).await {
            Ok(0) => {
                let _ = signals.send(ProcessSignal::OutputClosed).await;
                return;
            }
            Ok(_) => {
                if signals
                    .send(ProcessSignal::OutputChunk(buf.freeze()))
                    .await
                    .is_err()
                {
                    // Sequencer gone: the stream already closed
                    return;
                }
            }
            Err(err) => {
                let _ = signals.send(ProcessSignal::ChannelFailed(err)).await;
                return;
            }
        }
    }
}

/// Accumulate error-output for the abnormal-termination message.
///
/// EOF on this channel needs no signal of its own; only the exit disposition
/// settles the run.
pub(crate) async fn pump_error_output(
    mut error_output: Box<dyn AsyncRead + Send + Unpin>,
    chunk_bytes: usize,
    signals: mpsc::Sender<ProcessSignal>,
) {
    loop {
        let mut buf = BytesMut::with_capacity(chunk_bytes);
        match error_output.read_buf(&mut buf).await {
            Ok(0) => return,
            Ok(_) => {
                if signals
                    .send(ProcessSignal::ErrorOutput(buf.freeze()))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Err(err) => {
                let _ = signals.send(ProcessSignal::ChannelFailed(err)).await;
                return;
            }
        }
    }
}

/// Own the process handle: report the exit disposition when the process
/// terminates
pub(crate) async fn pump_exit(
    mut handle: Box<dyn ProcessHandle>,
    signals: mpsc::Sender<ProcessSignal>,
) {
    match handle.wait().await {
        Ok(disposition) => {
            debug!(%disposition, command = handle.command(), "process exited");
            let _ = signals.send(ProcessSignal::Exited(disposition)).await;
        }
        Err(err) => {
            let _ = signals.send(ProcessSignal::ChannelFailed(err)).await;
        }
    }
}

/// Deliver forwarded kill requests to the process. Runs alongside the exit
/// pump so a kill can land while the wait is in flight.
pub(crate) async fn pump_kill(
    killer: Box<dyn ProcessKiller>,
    mut kills: mpsc::UnboundedReceiver<KillSignal>,
) {
    while let Some(kill) = kills.recv().await {
        if let Err(err) = killer.kill(kill).await {
            warn!("failed to forward {kill:?} to process: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe)))
        }
    }

    #[tokio::test]
    async fn test_output_read_failure_surfaces() {
        let (tx, mut rx) = mpsc::channel(4);
        pump_output(Box::new(FailingReader), 64, tx).await;
        assert!(matches!(
            rx.recv().await,
            Some(ProcessSignal::ChannelFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_error_output_read_failure_surfaces() {
        let (tx, mut rx) = mpsc::channel(4);
        pump_error_output(Box::new(FailingReader), 64, tx).await;
        assert!(matches!(
            rx.recv().await,
            Some(ProcessSignal::ChannelFailed(_))
        ));
    }
}
