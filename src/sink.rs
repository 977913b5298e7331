use std::collections::HashMap;

use crate::error::StageError;
use crate::packet::RawPacket;
use crate::stage::{PacketSink, SinkStreamId};

/// Maps read-side stream identities to destination stream handles, creating
/// each destination lazily from the first packet produced for that identity.
/// Exactly one handle per identity; writes are append-only and happen in
/// production order.
pub struct SinkRouter<S: PacketSink> {
    sink: S,
    routes: HashMap<usize, SinkStreamId>,
}

impl<S: PacketSink> SinkRouter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            routes: HashMap::new(),
        }
    }

    /// Number of destination streams opened so far.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn route(&self, source_index: usize) -> Option<SinkStreamId> {
        self.routes.get(&source_index).copied()
    }

    /// Write one finished packet, opening its destination stream first if
    /// this identity has never produced output before. A sink handing the
    /// same handle to two identities would silently interleave streams, so
    /// that is rejected rather than assumed away.
    pub async fn write(&mut self, packet: RawPacket) -> Result<(), StageError> {
        let index = packet.index();
        let id = match self.routes.get(&index) {
            Some(id) => *id,
            None => {
                let id = self.sink.add_stream(&packet).await?;
                if self.routes.values().any(|existing| *existing == id) {
                    packet.release();
                    return Err(StageError::SourceLost(format!(
                        "sink returned handle {id:?} for source stream {index}, already in use"
                    )));
                }
                log::debug!("sink stream {id:?} opened for source stream {index}");
                self.routes.insert(index, id);
                id
            }
        };
        self.sink.write(id, packet).await
    }

    pub fn into_inner(self) -> S {
        self.sink
    }
}

#[cfg(test)]
#[path = "sink_test.rs"]
mod sink_test;
