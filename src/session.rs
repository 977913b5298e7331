use std::any::Any;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use futures_util::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::frame::FrameView;
use crate::router::{PullResult, Router};
use crate::sink::SinkRouter;
use crate::stage::PacketSink;

pub type FrameSender = tokio::sync::broadcast::Sender<FrameCmd>;
pub type FrameReceiver = tokio::sync::broadcast::Receiver<FrameCmd>;

#[derive(Clone)]
pub enum FrameCmd {
    Data(FrameView),
    EOF,
}

/// Shared hardware device or context handle. Owned by the session and
/// released only after every chain referencing it has been torn down.
pub type DeviceHandle = Arc<dyn Any + Send + Sync>;

pub type LiveFrameStream = Pin<Box<dyn Stream<Item = Option<FrameView>> + Send + Sync>>;

/// One running pipeline: a single cooperative task that pulls the router in a
/// loop, fans decoded frames out to subscribers and routes encoded packets to
/// the sink. Independent sessions share nothing mutable.
pub struct PipeSession {
    id: String,
    cancel: CancellationToken,
    frames: FrameSender,
}

impl PipeSession {
    pub fn spawn<S>(id: &str, router: Router, sink: S, devices: Vec<DeviceHandle>) -> Self
    where
        S: PacketSink + 'static,
    {
        let id = id.to_string();
        let cancel = CancellationToken::new();
        let (frames, _) = tokio::sync::broadcast::channel(1024);

        let loop_id = id.clone();
        let loop_cancel = cancel.clone();
        let loop_frames = frames.clone();
        tokio::spawn(async move {
            Self::inner_loop(loop_id, loop_cancel, router, SinkRouter::new(sink), loop_frames, devices)
                .await
        });

        Self { id, cancel, frames }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subscribe(&self) -> FrameReceiver {
        self.frames.subscribe()
    }

    /// Frame fan-out as a stream; `None` marks end of session.
    pub fn frame_stream(&self) -> LiveFrameStream {
        let stream = BroadcastStream::new(self.frames.subscribe()).filter_map(|cmd| async move {
            match cmd {
                Ok(FrameCmd::Data(view)) => Some(Some(view)),
                Ok(FrameCmd::EOF) => Some(None),
                Err(_) => None,
            }
        });
        Box::pin(stream)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn inner_loop<S: PacketSink>(
        id: String,
        cancel: CancellationToken,
        mut router: Router,
        mut sink: SinkRouter<S>,
        frames: FrameSender,
        devices: Vec<DeviceHandle>,
    ) {
        loop {
            // Cancellation is observed between pulls only. An in-flight pull
            // always runs to completion, so a buffer sitting inside a stage
            // call still comes back through the normal release path.
            if cancel.is_cancelled() {
                break;
            }
            match router.pull().await {
                Ok(PullResult::Frame { index: _, frame }) => {
                    let view = FrameView::from(&frame);
                    frame.release();
                    let _ = frames.send(FrameCmd::Data(view));
                }
                Ok(PullResult::Packet { index: _, packet }) => {
                    if let Err(e) = sink.write(packet).await {
                        log::error!("session {id}: sink write failed: {e}");
                        break;
                    }
                }
                Ok(PullResult::Empty) => {
                    // Nothing ready; the source paces us inside next().
                    continue;
                }
                Ok(PullResult::Closed) => {
                    log::info!("session {id}: source closed");
                    break;
                }
                Err(PipelineError::Stream { index, source }) => {
                    log::warn!("session {id}: stream {index} disabled: {source}");
                }
                Err(e) => {
                    log::error!("session {id}: {e}");
                    break;
                }
            }
        }

        // Chains go down in reverse creation order, their queued buffers
        // through the release stack; the device handles outlive all of them.
        router.close();
        drop(router);
        drop(devices);
        let _ = frames.send(FrameCmd::EOF);
        log::info!("session {id} finished");
    }
}

impl Drop for PipeSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
