use std::io::Cursor;

use bytes::{Buf, Bytes, BytesMut};

use crate::modules::data_stream_type::DataStreamType;
use crate::modules::messages::data_streams::object_status::ObjectStatus;
use crate::modules::messages::data_streams::ObjectHeader;
use crate::modules::parse_error::ParseError;
use crate::modules::variable_integer::{read_u8, read_variable_integer};

/// One parsed piece of an object. `end_of_message` marks the fragment
/// that completes the payload; objects with an empty payload arrive as a
/// single empty fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFragment {
    pub header: ObjectHeader,
    pub payload: Bytes,
    pub end_of_message: bool,
}

#[derive(Debug, Clone)]
struct StreamHeaderFields {
    track_alias: u64,
    group_id: Option<u64>,
    subgroup_id: Option<u64>,
    publisher_priority: Option<u8>,
}

/// Incremental parser for one unidirectional data stream.
///
/// Input arrives in arbitrary fragments; each phase (stream type, stream
/// header, object metadata) consumes bytes only once it parses whole, so
/// a short read leaves the buffer untouched for the next attempt.
#[derive(Debug, Default)]
pub struct DataStreamParser {
    stream_type: Option<DataStreamType>,
    stream_header: Option<StreamHeaderFields>,
    current_object: Option<(ObjectHeader, u64)>,
}

impl DataStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream_type(&self) -> Option<DataStreamType> {
        self.stream_type
    }

    /// True when the stream may end here without truncating an object.
    pub fn is_at_object_boundary(&self) -> bool {
        self.current_object.is_none()
    }

    pub fn next_fragment(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<ObjectFragment>, ParseError> {
        if self.stream_type.is_none() {
            let mut cur = Cursor::new(&buf[..]);
            let type_u64 = match read_variable_integer(&mut cur) {
                Ok(value) => value,
                Err(ParseError::NeedMoreData) => return Ok(None),
                Err(error) => return Err(error),
            };
            let stream_type = DataStreamType::try_from(type_u64 as u8)
                .map_err(|_| ParseError::violation("unknown data stream type"))?;
            if stream_type == DataStreamType::ObjectDatagram {
                return Err(ParseError::violation("datagram type on a data stream"));
            }
            buf.advance(cur.position() as usize);
            self.stream_type = Some(stream_type);
        }
        let stream_type = self.stream_type.unwrap();

        if self.stream_header.is_none() {
            let mut cur = Cursor::new(&buf[..]);
            match Self::parse_stream_header(&mut cur, stream_type) {
                Ok(header) => {
                    buf.advance(cur.position() as usize);
                    self.stream_header = Some(header);
                }
                Err(ParseError::NeedMoreData) => return Ok(None),
                Err(error) => return Err(error),
            }
        }

        if self.current_object.is_none() {
            let stream_header = self.stream_header.as_ref().unwrap();
            let mut cur = Cursor::new(&buf[..]);
            match Self::parse_object_metadata(&mut cur, stream_type, stream_header) {
                Ok(header) => {
                    buf.advance(cur.position() as usize);
                    let remaining = header.payload_length;
                    self.current_object = Some((header, remaining));
                }
                Err(ParseError::NeedMoreData) => return Ok(None),
                Err(error) => return Err(error),
            }
        }

        let (header, remaining) = self.current_object.as_mut().unwrap();
        if *remaining == 0 {
            let fragment = ObjectFragment {
                header: header.clone(),
                payload: Bytes::new(),
                end_of_message: true,
            };
            self.current_object = None;
            return Ok(Some(fragment));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let take = (*remaining).min(buf.len() as u64) as usize;
        let payload = buf.split_to(take).freeze();
        *remaining -= take as u64;
        let end_of_message = *remaining == 0;
        let fragment = ObjectFragment {
            header: header.clone(),
            payload,
            end_of_message,
        };
        if end_of_message {
            self.current_object = None;
        }
        Ok(Some(fragment))
    }

    fn parse_stream_header(
        cur: &mut Cursor<&[u8]>,
        stream_type: DataStreamType,
    ) -> Result<StreamHeaderFields, ParseError> {
        match stream_type {
            DataStreamType::StreamHeaderSubgroup => {
                let track_alias = read_variable_integer(cur)?;
                let group_id = read_variable_integer(cur)?;
                let subgroup_id = read_variable_integer(cur)?;
                let publisher_priority = read_u8(cur)?;
                Ok(StreamHeaderFields {
                    track_alias,
                    group_id: Some(group_id),
                    subgroup_id: Some(subgroup_id),
                    publisher_priority: Some(publisher_priority),
                })
            }
            DataStreamType::StreamHeaderTrack => {
                let track_alias = read_variable_integer(cur)?;
                let publisher_priority = read_u8(cur)?;
                Ok(StreamHeaderFields {
                    track_alias,
                    group_id: None,
                    subgroup_id: None,
                    publisher_priority: Some(publisher_priority),
                })
            }
            DataStreamType::StreamHeaderFetch => {
                // The header carries the fetch's subscribe id in the
                // alias position.
                let subscribe_id = read_variable_integer(cur)?;
                Ok(StreamHeaderFields {
                    track_alias: subscribe_id,
                    group_id: None,
                    subgroup_id: None,
                    publisher_priority: None,
                })
            }
            DataStreamType::ObjectDatagram => {
                unreachable!("rejected when the stream type was parsed")
            }
        }
    }

    fn parse_object_metadata(
        cur: &mut Cursor<&[u8]>,
        stream_type: DataStreamType,
        stream_header: &StreamHeaderFields,
    ) -> Result<ObjectHeader, ParseError> {
        let (group_id, subgroup_id, object_id, publisher_priority) = match stream_type {
            DataStreamType::StreamHeaderSubgroup => {
                let object_id = read_variable_integer(cur)?;
                (
                    stream_header.group_id.unwrap(),
                    stream_header.subgroup_id,
                    object_id,
                    stream_header.publisher_priority.unwrap(),
                )
            }
            DataStreamType::StreamHeaderTrack => {
                let group_id = read_variable_integer(cur)?;
                let object_id = read_variable_integer(cur)?;
                (
                    group_id,
                    None,
                    object_id,
                    stream_header.publisher_priority.unwrap(),
                )
            }
            DataStreamType::StreamHeaderFetch => {
                let group_id = read_variable_integer(cur)?;
                let subgroup_id = read_variable_integer(cur)?;
                let object_id = read_variable_integer(cur)?;
                let publisher_priority = read_u8(cur)?;
                (group_id, Some(subgroup_id), object_id, publisher_priority)
            }
            DataStreamType::ObjectDatagram => {
                unreachable!("rejected when the stream type was parsed")
            }
        };
        let payload_length = read_variable_integer(cur)?;
        let object_status = if payload_length == 0 {
            ObjectStatus::try_from(read_variable_integer(cur)?)
                .map_err(|_| ParseError::violation("invalid object status"))?
        } else {
            ObjectStatus::Normal
        };

        Ok(ObjectHeader {
            track_alias: stream_header.track_alias,
            group_id,
            subgroup_id,
            object_id,
            publisher_priority,
            object_status,
            payload_length,
        })
    }
}

/// Parses a datagram in one piece. The payload must run exactly to the
/// end of the datagram.
pub fn parse_datagram(data: &[u8]) -> Result<(ObjectHeader, Bytes), ParseError> {
    let mut cur = Cursor::new(data);
    let type_u64 = read_variable_integer(&mut cur)?;
    let stream_type = DataStreamType::try_from(type_u64 as u8)
        .map_err(|_| ParseError::violation("unknown datagram type"))?;
    if stream_type != DataStreamType::ObjectDatagram {
        return Err(ParseError::violation("datagram with a stream type"));
    }
    let track_alias = read_variable_integer(&mut cur)?;
    let group_id = read_variable_integer(&mut cur)?;
    let object_id = read_variable_integer(&mut cur)?;
    let publisher_priority = read_u8(&mut cur)?;
    let payload_length = read_variable_integer(&mut cur)?;
    let object_status = if payload_length == 0 {
        ObjectStatus::try_from(read_variable_integer(&mut cur)?)
            .map_err(|_| ParseError::violation("invalid object status"))?
    } else {
        ObjectStatus::Normal
    };
    if cur.remaining() as u64 != payload_length {
        return Err(ParseError::violation("datagram payload length mismatch"));
    }
    let payload = Bytes::copy_from_slice(&data[cur.position() as usize..]);

    let header = ObjectHeader {
        track_alias,
        group_id,
        subgroup_id: None,
        object_id,
        publisher_priority,
        object_status,
        payload_length,
    };
    Ok((header, payload))
}

#[cfg(test)]
mod success {
    use super::*;
    use crate::modules::messages::data_streams::serialize_object_header;
    use bytes::BytesMut;

    fn subgroup_object(object_id: u64, payload_length: u64) -> ObjectHeader {
        ObjectHeader {
            track_alias: 7,
            group_id: 5,
            subgroup_id: Some(0),
            object_id,
            publisher_priority: 0x80,
            object_status: ObjectStatus::Normal,
            payload_length,
        }
    }

    #[test]
    fn parse_two_objects_on_one_stream() {
        let mut buf = BytesMut::new();
        buf.extend(serialize_object_header(
            &subgroup_object(0, 2),
            DataStreamType::StreamHeaderSubgroup,
            true,
        ));
        buf.extend_from_slice(b"ab");
        buf.extend(serialize_object_header(
            &subgroup_object(1, 3),
            DataStreamType::StreamHeaderSubgroup,
            false,
        ));
        buf.extend_from_slice(b"cde");

        let mut parser = DataStreamParser::new();
        let first = parser.next_fragment(&mut buf).unwrap().unwrap();
        assert_eq!(first.header.object_id, 0);
        assert_eq!(first.payload.as_ref(), b"ab");
        assert!(first.end_of_message);

        let second = parser.next_fragment(&mut buf).unwrap().unwrap();
        assert_eq!(second.header.object_id, 1);
        assert_eq!(second.payload.as_ref(), b"cde");
        assert!(second.end_of_message);

        assert_eq!(parser.next_fragment(&mut buf).unwrap(), None);
        assert_eq!(parser.stream_type(), Some(DataStreamType::StreamHeaderSubgroup));
    }

    #[test]
    fn parse_fragmented_payload() {
        let mut wire = BytesMut::new();
        wire.extend(serialize_object_header(
            &subgroup_object(0, 4),
            DataStreamType::StreamHeaderSubgroup,
            true,
        ));
        wire.extend_from_slice(b"wxyz");

        let mut parser = DataStreamParser::new();
        let mut buf = BytesMut::new();

        // Deliver everything except the last payload byte.
        buf.extend_from_slice(&wire[..wire.len() - 1]);
        let first = parser.next_fragment(&mut buf).unwrap().unwrap();
        assert_eq!(first.payload.as_ref(), b"wxy");
        assert!(!first.end_of_message);
        assert_eq!(parser.next_fragment(&mut buf).unwrap(), None);
        assert!(!parser.is_at_object_boundary());

        buf.extend_from_slice(&wire[wire.len() - 1..]);
        let second = parser.next_fragment(&mut buf).unwrap().unwrap();
        assert_eq!(second.payload.as_ref(), b"z");
        assert!(second.end_of_message);
        assert!(parser.is_at_object_boundary());
    }

    #[test]
    fn datagram_round_trip() {
        let header = ObjectHeader {
            track_alias: 7,
            group_id: 1,
            subgroup_id: None,
            object_id: 2,
            publisher_priority: 0x80,
            object_status: ObjectStatus::Normal,
            payload_length: 5,
        };
        let datagram =
            crate::modules::messages::data_streams::serialize_object_datagram(&header, b"hello");

        let (parsed, payload) = parse_datagram(&datagram).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(payload.as_ref(), b"hello");
    }
}

#[cfg(test)]
mod failure {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn stream_with_datagram_type() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x1, 0x0]);

        let mut parser = DataStreamParser::new();
        assert!(matches!(
            parser.next_fragment(&mut buf),
            Err(ParseError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn datagram_with_truncated_payload() {
        let bytes_array = [
            1, // Type (i): ObjectDatagram
            7, // Track Alias (i)
            1, // Group ID (i)
            2, // Object ID (i)
            0x80, // Publisher Priority (8)
            5,    // Payload Length (i)
            104, 105, // Payload (..): two of five bytes
        ];
        assert!(parse_datagram(&bytes_array).is_err());
    }
}
