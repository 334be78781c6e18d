//! Chaining collaborator: forwards one stream's output push into another
//! stream's input pull.
//!
//! Both sides may still be unbound when wired up; pre-bind writes queue on
//! the downstream side, so whole pipelines can be assembled first and bound
//! stage by stage. Because the upstream only emits `End` once its exit
//! disposition is known, a downstream stage can never resolve ahead of the
//! upstream.

use crate::stream::{EventReceiver, ProcessStream};
use procpipe_core::StreamEvent;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub(crate) fn run(mut events: EventReceiver, downstream: ProcessStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Readable => {}
                StreamEvent::Data(chunk) => {
                    // Awaiting the downstream write is the backpressure path:
                    // a slow stage holds up the upstream pump, not a buffer
                    if let Err(err) = downstream.write(chunk).await {
                        warn!("pipe write failed, abandoning forwarding: {err}");
                        break;
                    }
                }
                StreamEvent::End => {
                    if let Err(err) = downstream.end_input().await {
                        warn!("failed to end downstream input: {err}");
                    }
                }
                StreamEvent::Error(err) => {
                    // The upstream failed; the downstream sees EOF, not a
                    // manufactured error of its own
                    warn!("upstream failed, ending downstream input: {err}");
                    if let Err(err) = downstream.end_input().await {
                        warn!("failed to end downstream input: {err}");
                    }
                }
                StreamEvent::Close => break,
            }
        }
        debug!("pipe forwarding finished");
    })
}
