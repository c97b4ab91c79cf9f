pub mod object_status;

use bytes::BytesMut;
use serde::Serialize;

use crate::modules::data_stream_type::DataStreamType;
use crate::modules::full_sequence::FullSequence;
use crate::modules::messages::data_streams::object_status::ObjectStatus;
use crate::modules::variable_integer::write_variable_integer;

/// Metadata for one object on a data stream or in a datagram.
///
/// On fetch streams the `track_alias` field carries the fetch's subscribe
/// id; the stream type tells the two apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectHeader {
    pub track_alias: u64,
    pub group_id: u64,
    pub subgroup_id: Option<u64>,
    pub object_id: u64,
    pub publisher_priority: u8,
    pub object_status: ObjectStatus,
    pub payload_length: u64,
}

impl ObjectHeader {
    pub fn sequence(&self) -> FullSequence {
        FullSequence::with_subgroup(self.group_id, self.subgroup_id.unwrap_or(0), self.object_id)
    }
}

/// Serializes the per-object part of a stream, preceded by the stream
/// type and per-stream header when this is the first object written.
pub fn serialize_object_header(
    header: &ObjectHeader,
    stream_type: DataStreamType,
    is_first_on_stream: bool,
) -> BytesMut {
    let mut buf = BytesMut::new();
    if is_first_on_stream {
        buf.extend(write_variable_integer(u8::from(stream_type) as u64));
        match stream_type {
            DataStreamType::StreamHeaderSubgroup => {
                buf.extend(write_variable_integer(header.track_alias));
                buf.extend(write_variable_integer(header.group_id));
                buf.extend(write_variable_integer(header.subgroup_id.unwrap_or(0)));
                buf.extend(header.publisher_priority.to_be_bytes());
            }
            DataStreamType::StreamHeaderTrack => {
                buf.extend(write_variable_integer(header.track_alias));
                buf.extend(header.publisher_priority.to_be_bytes());
            }
            DataStreamType::StreamHeaderFetch => {
                buf.extend(write_variable_integer(header.track_alias));
            }
            DataStreamType::ObjectDatagram => {
                unreachable!("datagrams are serialized in one piece")
            }
        }
    }
    match stream_type {
        DataStreamType::StreamHeaderSubgroup => {
            buf.extend(write_variable_integer(header.object_id));
        }
        DataStreamType::StreamHeaderTrack => {
            buf.extend(write_variable_integer(header.group_id));
            buf.extend(write_variable_integer(header.object_id));
        }
        DataStreamType::StreamHeaderFetch => {
            buf.extend(write_variable_integer(header.group_id));
            buf.extend(write_variable_integer(header.subgroup_id.unwrap_or(0)));
            buf.extend(write_variable_integer(header.object_id));
            buf.extend(header.publisher_priority.to_be_bytes());
        }
        DataStreamType::ObjectDatagram => {
            unreachable!("datagrams are serialized in one piece")
        }
    }
    buf.extend(write_variable_integer(header.payload_length));
    if header.payload_length == 0 {
        buf.extend(write_variable_integer(u64::from(header.object_status)));
    }
    buf
}

pub fn serialize_object_datagram(header: &ObjectHeader, payload: &[u8]) -> BytesMut {
    debug_assert_eq!(header.payload_length, payload.len() as u64);
    let mut buf = BytesMut::new();
    buf.extend(write_variable_integer(
        u8::from(DataStreamType::ObjectDatagram) as u64,
    ));
    buf.extend(write_variable_integer(header.track_alias));
    buf.extend(write_variable_integer(header.group_id));
    buf.extend(write_variable_integer(header.object_id));
    buf.extend(header.publisher_priority.to_be_bytes());
    buf.extend(write_variable_integer(header.payload_length));
    if header.payload_length == 0 {
        buf.extend(write_variable_integer(u64::from(header.object_status)));
    }
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod success {
    use super::*;

    #[test]
    fn serialize_subgroup_first_object() {
        let header = ObjectHeader {
            track_alias: 7,
            group_id: 5,
            subgroup_id: Some(0),
            object_id: 0,
            publisher_priority: 0x80,
            object_status: ObjectStatus::Normal,
            payload_length: 3,
        };

        let buf = serialize_object_header(&header, DataStreamType::StreamHeaderSubgroup, true);

        let expected_bytes_array = [
            4, // Stream Type (i): StreamHeaderSubgroup
            7, // Track Alias (i)
            5, // Group ID (i)
            0, // Subgroup ID (i)
            0x80, // Publisher Priority (8)
            0,    // Object ID (i)
            3,    // Payload Length (i)
        ];
        assert_eq!(buf.as_ref(), expected_bytes_array.as_slice());
    }

    #[test]
    fn serialize_status_only_object() {
        let header = ObjectHeader {
            track_alias: 7,
            group_id: 5,
            subgroup_id: Some(0),
            object_id: 9,
            publisher_priority: 0x80,
            object_status: ObjectStatus::EndOfGroup,
            payload_length: 0,
        };

        let buf = serialize_object_header(&header, DataStreamType::StreamHeaderSubgroup, false);

        let expected_bytes_array = [
            9, // Object ID (i)
            0, // Payload Length (i)
            3, // Object Status (i): EndOfGroup
        ];
        assert_eq!(buf.as_ref(), expected_bytes_array.as_slice());
    }
}
