use bytes::BytesMut;

use crate::modules::error::{SessionError, SessionResult};
use crate::modules::transport::{StreamId, TransportSession};

/// Cap on buffered outgoing control messages. Exceeding it terminates
/// the session rather than growing without bound.
pub(crate) const MAX_BUFFERED_CONTROL_BYTES: usize = 16 * 1024 * 1024;

/// I/O state of the bidirectional control stream: an accumulation buffer
/// for inbound bytes awaiting a full message, and an outbound buffer for
/// messages written while the transport was blocked.
pub(crate) struct ControlStream {
    pub(crate) stream_id: StreamId,
    pub(crate) recv_buffer: BytesMut,
    send_buffer: BytesMut,
}

impl ControlStream {
    pub(crate) fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            recv_buffer: BytesMut::new(),
            send_buffer: BytesMut::new(),
        }
    }

    pub(crate) fn buffer_message(&mut self, message: &[u8]) -> SessionResult {
        if self.send_buffer.len() + message.len() > MAX_BUFFERED_CONTROL_BYTES {
            return Err(SessionError::internal("Control stream buffer overflow"));
        }
        self.send_buffer.extend_from_slice(message);
        Ok(())
    }

    pub(crate) fn flush<T: TransportSession>(&mut self, transport: &mut T) -> SessionResult {
        if self.send_buffer.is_empty() || !transport.can_write(self.stream_id) {
            return Ok(());
        }
        transport
            .writev(self.stream_id, &[&self.send_buffer[..]], false)
            .map_err(|_| SessionError::internal("Failed to write a control message"))?;
        self.send_buffer.clear();
        Ok(())
    }
}
