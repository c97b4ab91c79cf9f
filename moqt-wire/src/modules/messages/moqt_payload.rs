use std::io::Cursor;

use bytes::BytesMut;

use crate::modules::parse_error::ParseError;

/// Message body that can be read from and written to the wire.
///
/// `depacketize` only advances the cursor when it succeeds against a
/// complete message; on `NeedMoreData` the caller keeps the buffer and
/// retries with more input.
pub trait MoqtPayload: Sized {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError>;
    fn packetize(&self, buf: &mut BytesMut);
}
