use anyhow::Result;
use bytes::Bytes;

pub type StreamId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadChunk {
    pub data: Bytes,
    pub fin: bool,
}

/// What the session needs from the underlying stream-multiplexed
/// transport (WebTransport or equivalent).
///
/// The embedder owns the event loop and forwards transport events into
/// the session's `on_*` methods; the session calls back into this trait
/// to open streams and move bytes. Streams are addressed by id.
///
/// `writev` must accept the whole write when `can_write` returned true
/// for the stream; a hard error from it poisons the session.
pub trait TransportSession: 'static {
    fn open_outgoing_bidirectional_stream(&mut self) -> Option<StreamId>;
    fn open_outgoing_unidirectional_stream(&mut self) -> Option<StreamId>;
    fn accept_incoming_bidirectional_stream(&mut self) -> Option<StreamId>;
    fn accept_incoming_unidirectional_stream(&mut self) -> Option<StreamId>;
    fn can_open_next_outgoing_unidirectional_stream(&self) -> bool;
    fn close_session(&mut self, error_code: u64, reason: &str);
    fn send_or_queue_datagram(&mut self, datagram: Bytes);

    fn can_write(&self, stream_id: StreamId) -> bool;
    fn writev(&mut self, stream_id: StreamId, slices: &[&[u8]], fin: bool) -> Result<()>;
    /// Returns `None` when nothing is readable right now.
    fn read_chunk(&mut self, stream_id: StreamId) -> Option<ReadChunk>;
    fn set_priority(&mut self, stream_id: StreamId, send_group_id: u64, send_order: u64);
    fn send_fin(&mut self, stream_id: StreamId) -> bool;
    fn reset_with_user_code(&mut self, stream_id: StreamId, error_code: u64);
    fn send_stop_sending(&mut self, stream_id: StreamId, error_code: u64);
}
