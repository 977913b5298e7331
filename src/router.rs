use crate::chain::{ChainOutput, ChainSpec, StageChain};
use crate::error::{PipelineError, StageError};
use crate::frame::RawFrame;
use crate::guard::ScopeGuard;
use crate::packet::RawPacket;
use crate::stage::{PacketSource, SourceItem, Submit};

/// What to do with a unit that has no live chain to process it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawUnitPolicy {
    /// Hand the unit to the caller untouched, as a packet result.
    Passthrough,
    /// Release the unit and report an empty pull.
    Drop,
}

#[derive(Clone, Copy, Debug)]
pub struct RouterConfig {
    /// Policy for units of streams that were never selected for processing.
    pub unrouted: RawUnitPolicy,
    /// Policy for units of streams whose chain has been disabled by a fatal
    /// error.
    pub failed: RawUnitPolicy,
    /// Consecutive resource-exhaustion retries tolerated per chain before the
    /// chain is treated as lost.
    pub exhaust_budget: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            unrouted: RawUnitPolicy::Passthrough,
            failed: RawUnitPolicy::Drop,
            exhaust_budget: 8,
        }
    }
}

/// Exactly one of these per pull.
#[derive(Debug)]
pub enum PullResult {
    /// A decoded (and possibly filtered) frame from the given stream.
    Frame { index: usize, frame: RawFrame },
    /// An encoded packet, tagged with the read-side stream it came from.
    /// Also carries units passed through for unprocessed streams.
    Packet { index: usize, packet: RawPacket },
    /// Nothing ready; pull again.
    Empty,
    /// The source or session is closed; no further output will ever come.
    Closed,
}

/// The pipeline scheduler. Each pull drains pending per-chain work first
/// (buffered outputs, back-pressured retries), then feeds one fresh unit from
/// the source into its stream's chain and advances decode → filter → encode
/// as far as data allows. Never blocks beyond awaiting the stages themselves.
pub struct Router {
    source: Box<dyn PacketSource>,
    chains: Vec<StageChain>,
    config: RouterConfig,
    closed: bool,
}

impl Router {
    pub fn new(source: Box<dyn PacketSource>, config: RouterConfig) -> Self {
        Self {
            source,
            chains: Vec::new(),
            config,
            closed: false,
        }
    }

    /// Select a source stream for processing. Chains are visited in
    /// registration order on every pull, which keeps per-stream output order
    /// predictable.
    pub fn add_chain(&mut self, stream_index: usize, spec: ChainSpec) -> Result<(), StageError> {
        let stream = self
            .source
            .streams()
            .iter()
            .find(|s| s.index() == stream_index)
            .cloned()
            .ok_or_else(|| {
                StageError::StreamLost(format!("source has no stream {stream_index}"))
            })?;
        if self.chains.iter().any(|c| c.index() == stream_index) {
            return Err(StageError::StreamLost(format!(
                "stream {stream_index} already has a chain"
            )));
        }
        self.chains.push(StageChain::new(stream, spec));
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Tear down every chain (newest registration first, each chain encoder →
    /// filter → decoder) and release all buffered data. Subsequent pulls
    /// return `Closed`.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for chain in self.chains.iter_mut().rev() {
            chain.close();
        }
        log::debug!("router closed, {} chains torn down", self.chains.len());
    }

    /// Produce the next pipeline output. See the module doc for the priority
    /// order; per-unit errors and back-pressure are absorbed here and never
    /// surface.
    pub async fn pull(&mut self) -> Result<PullResult, PipelineError> {
        if self.closed {
            return Ok(PullResult::Closed);
        }

        // Pending work first: a chain holding output is always drained before
        // fresh input is pulled, bounding queue growth.
        for i in 0..self.chains.len() {
            if let Some(out) = self.service(i).await? {
                return Ok(out);
            }
        }

        let mut guard = ScopeGuard::new();
        match self.source.next().await {
            Ok(SourceItem::Unit(packet)) => guard.push_packet(packet),
            Ok(SourceItem::Pending) => return Ok(PullResult::Empty),
            Ok(SourceItem::Closed) => {
                self.close();
                return Ok(PullResult::Closed);
            }
            Err(e) => {
                self.close();
                return Err(PipelineError::Session(e));
            }
        }

        let index = match guard.top_packet() {
            Some(p) => p.index(),
            None => return Ok(PullResult::Empty),
        };
        let Some(i) = self.chains.iter().position(|c| c.index() == index) else {
            return Ok(self.raw_unit(guard, self.config.unrouted));
        };
        if self.chains[i].is_disabled() {
            return Ok(self.raw_unit(guard, self.config.failed));
        }

        let Some(packet) = guard.pop_packet() else {
            return Ok(PullResult::Empty);
        };
        if self.chains[i].has_stalled_packets() {
            // Earlier refusals are still queued; the fresh unit waits its
            // turn behind them so decode order never inverts.
            self.chains[i].stall_packet(packet);
            return Ok(PullResult::Empty);
        }
        match self.chains[i].decoder_submit(packet).await {
            Ok(Submit::Accepted) => {}
            Ok(Submit::Rejected(packet)) => {
                // Decoder saturated; retry the same packet before new input.
                self.chains[i].stall_packet(packet);
                return Ok(PullResult::Empty);
            }
            Err(e) => {
                self.fail(i, e)?;
                return Ok(PullResult::Empty);
            }
        }

        match self.service(i).await? {
            Some(out) => Ok(out),
            None => Ok(PullResult::Empty),
        }
    }

    fn raw_unit(&self, mut guard: ScopeGuard, policy: RawUnitPolicy) -> PullResult {
        match (policy, guard.pop_packet()) {
            (RawUnitPolicy::Passthrough, Some(packet)) => PullResult::Packet {
                index: packet.index(),
                packet,
            },
            (RawUnitPolicy::Drop, Some(packet)) => {
                packet.release();
                PullResult::Empty
            }
            (_, None) => PullResult::Empty,
        }
    }

    /// Advance one chain and return its next output, if any.
    async fn service(&mut self, i: usize) -> Result<Option<PullResult>, PipelineError> {
        if self.chains[i].is_disabled() {
            return Ok(None);
        }
        if let Some(out) = self.chains[i].pop_ready() {
            return Ok(Some(self.into_result(i, out)));
        }
        match advance_chain(&mut self.chains[i]).await {
            Ok(()) => {
                self.chains[i].reset_exhausted();
                match self.chains[i].pop_ready() {
                    Some(out) => Ok(Some(self.into_result(i, out))),
                    None => Ok(None),
                }
            }
            Err(e) => self.fail(i, e).map(|_| None),
        }
    }

    fn into_result(&self, i: usize, out: ChainOutput) -> PullResult {
        let index = self.chains[i].index();
        match out {
            ChainOutput::Frame(frame) => PullResult::Frame { index, frame },
            ChainOutput::Packet(packet) => PullResult::Packet { index, packet },
        }
    }

    /// Classify a stage failure for one chain. Corrupt units and in-budget
    /// exhaustion are absorbed; anything worse disables the chain or ends
    /// the session.
    fn fail(&mut self, i: usize, err: StageError) -> Result<(), PipelineError> {
        let index = self.chains[i].index();
        match err {
            StageError::Corrupt(msg) => {
                log::warn!("stream {index}: skipping corrupt unit: {msg}");
                Ok(())
            }
            StageError::Exhausted(msg) => {
                if self.chains[i].note_exhausted(self.config.exhaust_budget) {
                    log::debug!("stream {index}: resources exhausted, will retry: {msg}");
                    Ok(())
                } else {
                    let source = StageError::StreamLost(format!(
                        "resource exhaustion persisted past {} retries: {msg}",
                        self.config.exhaust_budget
                    ));
                    self.chains[i].close();
                    log::error!("stream {index} disabled: {source}");
                    Err(PipelineError::Stream { index, source })
                }
            }
            source @ StageError::StreamLost(_) => {
                self.chains[i].close();
                log::error!("stream {index} disabled: {source}");
                Err(PipelineError::Stream { index, source })
            }
            source @ StageError::SourceLost(_) => {
                self.close();
                Err(PipelineError::Session(source))
            }
        }
    }
}

/// Walk one chain's stages as far as data allows, moving produced outputs
/// into the chain's ready queue. Every transient buffer lives on the scope
/// guard between stages, so an error releases exactly what this walk
/// acquired and nothing twice.
async fn advance_chain(chain: &mut StageChain) -> Result<(), StageError> {
    let mut guard = ScopeGuard::new();

    // A temporal filter may still hold output from earlier inputs.
    flush_filter(chain, &mut guard).await?;

    // Units the decoder previously refused are retried oldest-first; the
    // first refusal stops the retry run with that unit back at the front.
    while let Some(packet) = chain.take_stalled_packet() {
        match chain.decoder_submit(packet).await? {
            Submit::Accepted => {}
            Submit::Rejected(packet) => {
                chain.restall_packet(packet);
                break;
            }
        }
    }

    while let Some(frame) = chain.decoder_drain().await? {
        guard.push_frame(frame);
        feed_forward(chain, &mut guard).await?;
    }

    flush_encoder(chain, &mut guard).await?;
    Ok(())
}

/// Route the frame on top of the guard through the rest of its chain.
async fn feed_forward(chain: &mut StageChain, guard: &mut ScopeGuard) -> Result<(), StageError> {
    let has_filter = match guard.top_frame() {
        Some(sample) => chain.ensure_filter(sample)?,
        None => return Ok(()),
    };
    if has_filter {
        if let Some(frame) = guard.pop_frame() {
            chain.note_geometry(&frame);
            chain.filter_add(frame, 0).await?;
        }
        flush_filter(chain, guard).await?;
    } else {
        queue_for_encode(chain, guard).await?;
    }
    Ok(())
}

/// Pull everything the filter has ready and route it onwards.
async fn flush_filter(chain: &mut StageChain, guard: &mut ScopeGuard) -> Result<(), StageError> {
    if !chain.has_filter() {
        return Ok(());
    }
    while let Some(frame) = chain.filter_take(0).await? {
        guard.push_frame(frame);
        queue_for_encode(chain, guard).await?;
    }
    Ok(())
}

/// Hand the frame on top of the guard to the encoder path, or straight to the
/// ready queue for decode/filter-only chains.
async fn queue_for_encode(chain: &mut StageChain, guard: &mut ScopeGuard) -> Result<(), StageError> {
    let has_encoder = match guard.top_frame() {
        Some(sample) => chain.ensure_encoder(sample)?,
        None => return Ok(()),
    };
    let Some(frame) = guard.pop_frame() else {
        return Ok(());
    };
    if has_encoder {
        chain.note_geometry(&frame);
        chain.queue_frame(frame);
        flush_encoder(chain, guard).await?;
    } else {
        chain.push_ready_frame(frame);
    }
    Ok(())
}

/// Two-phase encoder handshake: offer queued frames until the encoder pushes
/// back (a rejected frame goes back to the head of the queue, never dropped),
/// then drain whatever it produced.
async fn flush_encoder(chain: &mut StageChain, _guard: &mut ScopeGuard) -> Result<(), StageError> {
    if !chain.has_encoder() {
        return Ok(());
    }
    while let Some(frame) = chain.next_queued_frame() {
        match chain.encoder_submit(frame).await? {
            Submit::Accepted => {}
            Submit::Rejected(frame) => {
                chain.requeue_frame(frame);
                break;
            }
        }
    }
    while let Some(packet) = chain.encoder_drain().await? {
        chain.push_ready_packet(packet);
    }
    Ok(())
}

#[cfg(test)]
#[path = "router_test.rs"]
mod router_test;
