use async_trait::async_trait;

use crate::error::StageError;
use crate::frame::RawFrame;
use crate::packet::RawPacket;
use crate::stream::StreamInfo;

/// Outcome of offering an input to a stage. A rejected input comes back to
/// the caller untouched: rejection is back-pressure, not failure, and the
/// caller retries the same input on a later pull. Accepted inputs belong to
/// the stage, lease included.
#[derive(Debug)]
pub enum Submit<T> {
    Accepted,
    Rejected(T),
}

impl<T> Submit<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Submit::Accepted)
    }
}

/// One read from the input cursor.
#[derive(Debug)]
pub enum SourceItem {
    Unit(RawPacket),
    /// Nothing ready right now; the caller retries on the next pull.
    Pending,
    /// The source has been closed; no further units will ever arrive.
    Closed,
}

/// Ordered source of interleaved encoded units, e.g. a demuxer over an RTSP
/// session. Stream descriptors are enumerated once at open and stay fixed.
#[async_trait]
pub trait PacketSource: Send {
    fn streams(&self) -> &[StreamInfo];

    async fn next(&mut self) -> Result<SourceItem, StageError>;
}

/// Decoder for one stream. `submit`/`drain` follow the usual codec push/pull
/// contract: a drain returning `None` means the decoder needs more input.
#[async_trait]
pub trait FrameDecoder: Send {
    async fn submit(&mut self, packet: RawPacket) -> Result<Submit<RawPacket>, StageError>;

    async fn drain(&mut self) -> Result<Option<RawFrame>, StageError>;
}

/// Frame filter with numbered input and output ports. Most filters are
/// unary; N-ary graphs (e.g. blending two streams) expose further ports. A
/// temporal filter may take several inputs before producing one output.
#[async_trait]
pub trait FrameFilter: Send {
    async fn add_input(&mut self, frame: RawFrame, port: usize) -> Result<(), StageError>;

    async fn take_output(&mut self, port: usize) -> Result<Option<RawFrame>, StageError>;
}

/// Encoder for one stream, same push/pull contract as the decoder. `submit`
/// rejecting a frame is saturation; the frame must be offered again later.
#[async_trait]
pub trait FrameEncoder: Send {
    async fn submit(&mut self, frame: RawFrame) -> Result<Submit<RawFrame>, StageError>;

    async fn drain(&mut self) -> Result<Option<RawPacket>, StageError>;
}

/// Handle to one destination stream of a sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SinkStreamId(pub usize);

/// Destination for finished packets, e.g. a muxer. Destination streams are
/// created from the first packet written for a stream identity, because
/// destination parameters usually require an encoded unit to exist.
#[async_trait]
pub trait PacketSink: Send {
    async fn add_stream(&mut self, first: &RawPacket) -> Result<SinkStreamId, StageError>;

    async fn write(&mut self, stream: SinkStreamId, packet: RawPacket) -> Result<(), StageError>;
}

/// Builds a stream's filter from the first frame that reveals geometry and
/// format. Called at most once per chain.
pub trait FilterBuilder: Send {
    fn build(
        &mut self,
        stream: &StreamInfo,
        sample: &RawFrame,
    ) -> Result<Box<dyn FrameFilter>, StageError>;
}

/// Builds a stream's encoder from the first frame to reach it. Called at
/// most once per chain; encoders are never rebuilt mid-stream.
pub trait EncoderBuilder: Send {
    fn build(
        &mut self,
        stream: &StreamInfo,
        sample: &RawFrame,
    ) -> Result<Box<dyn FrameEncoder>, StageError>;
}
