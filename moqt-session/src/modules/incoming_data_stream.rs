use bytes::BytesMut;

use moqt_wire::data_stream_parser::DataStreamParser;

use crate::modules::remote_track::StreamKey;
use crate::modules::transport::StreamId;

/// Read-side state of one incoming unidirectional data stream.
pub(crate) struct IncomingDataStream {
    pub(crate) stream_id: StreamId,
    pub(crate) parser: DataStreamParser,
    /// Unparsed input.
    pub(crate) buffer: BytesMut,
    /// Reassembly scratch used when partial objects are not delivered.
    pub(crate) partial_object: BytesMut,
    /// Remembered from the first object; revalidated against the track
    /// maps on every use so a torn-down track is caught.
    pub(crate) resolved_key: Option<StreamKey>,
}

impl IncomingDataStream {
    pub(crate) fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            parser: DataStreamParser::new(),
            buffer: BytesMut::new(),
            partial_object: BytesMut::new(),
            resolved_key: None,
        }
    }
}
