use std::io::Cursor;

use anyhow::bail;
use bytes::BytesMut;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use crate::modules::full_sequence::FullTrackName;
use crate::modules::messages::control_messages::group_order::GroupOrder;
use crate::modules::messages::control_messages::version_specific_parameters::{
    read_parameters, write_parameters, VersionSpecificParameter,
};
use crate::modules::messages::moqt_payload::MoqtPayload;
use crate::modules::parse_error::ParseError;
use crate::modules::variable_bytes::{
    read_namespace_tuple, read_variable_string, write_namespace_tuple, write_variable_bytes,
};
use crate::modules::variable_integer::{read_u8, read_variable_integer, write_variable_integer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Serialize)]
#[repr(u8)]
pub enum FilterType {
    LatestGroup = 0x1,
    LatestObject = 0x2,
    AbsoluteStart = 0x3,
    AbsoluteRange = 0x4,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscribe {
    pub subscribe_id: u64,
    pub track_namespace: Vec<String>,
    pub track_name: String,
    pub track_alias: u64,
    pub subscriber_priority: u8,
    /// `None` asks the publisher to use its own delivery order.
    pub group_order: Option<GroupOrder>,
    pub filter_type: FilterType,
    pub start_group: Option<u64>,
    pub start_object: Option<u64>,
    pub end_group: Option<u64>,
    /// `None` with `end_group` present means "until the end of that group".
    pub end_object: Option<u64>,
    pub parameters: Vec<VersionSpecificParameter>,
}

impl Subscribe {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subscribe_id: u64,
        track_alias: u64,
        full_track_name: FullTrackName,
        subscriber_priority: u8,
        group_order: Option<GroupOrder>,
        filter_type: FilterType,
        start_group: Option<u64>,
        start_object: Option<u64>,
        end_group: Option<u64>,
        end_object: Option<u64>,
        parameters: Vec<VersionSpecificParameter>,
    ) -> anyhow::Result<Subscribe> {
        match filter_type {
            FilterType::LatestGroup | FilterType::LatestObject => {
                if start_group.is_some() || start_object.is_some() {
                    bail!("start must be None for LatestGroup or LatestObject");
                }
                if end_group.is_some() || end_object.is_some() {
                    bail!("end must be None for LatestGroup or LatestObject");
                }
            }
            FilterType::AbsoluteStart => {
                if start_group.is_none() || start_object.is_none() {
                    bail!("start must be Some for AbsoluteStart");
                }
                if end_group.is_some() || end_object.is_some() {
                    bail!("end must be None for AbsoluteStart");
                }
            }
            FilterType::AbsoluteRange => {
                if start_group.is_none() || start_object.is_none() {
                    bail!("start must be Some for AbsoluteRange");
                }
                if end_group.is_none() {
                    bail!("end_group must be Some for AbsoluteRange");
                }
            }
        }

        Ok(Subscribe {
            subscribe_id,
            track_namespace: full_track_name.namespace,
            track_name: full_track_name.name,
            track_alias,
            subscriber_priority,
            group_order,
            filter_type,
            start_group,
            start_object,
            end_group,
            end_object,
            parameters,
        })
    }

    pub fn full_track_name(&self) -> FullTrackName {
        FullTrackName::new(self.track_namespace.clone(), self.track_name.clone())
    }
}

impl MoqtPayload for Subscribe {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let subscribe_id = read_variable_integer(buf)?;
        let track_alias = read_variable_integer(buf)?;
        let track_namespace = read_namespace_tuple(buf)?;
        let track_name = read_variable_string(buf)?;
        let subscriber_priority = read_u8(buf)?;

        let group_order_u8 = read_u8(buf)?;
        let group_order = match group_order_u8 {
            0x0 => None,
            value => Some(
                GroupOrder::try_from(value)
                    .map_err(|_| ParseError::violation("invalid group order in SUBSCRIBE"))?,
            ),
        };

        let filter_type_u64 = read_variable_integer(buf)?;
        let filter_type = FilterType::try_from(filter_type_u64 as u8)
            .map_err(|_| ParseError::violation("invalid filter type in SUBSCRIBE"))?;

        let (start_group, start_object) = match filter_type {
            FilterType::AbsoluteStart | FilterType::AbsoluteRange => (
                Some(read_variable_integer(buf)?),
                Some(read_variable_integer(buf)?),
            ),
            _ => (None, None),
        };

        // End object is encoded as value + 1; zero means "end of group".
        let (end_group, end_object) = match filter_type {
            FilterType::AbsoluteRange => {
                let end_group = read_variable_integer(buf)?;
                let end_object = match read_variable_integer(buf)? {
                    0 => None,
                    value => Some(value - 1),
                };
                (Some(end_group), end_object)
            }
            _ => (None, None),
        };

        let parameters = read_parameters(buf)?;

        tracing::trace!("Depacketized Subscribe message.");

        Ok(Subscribe {
            subscribe_id,
            track_namespace,
            track_name,
            track_alias,
            subscriber_priority,
            group_order,
            filter_type,
            start_group,
            start_object,
            end_group,
            end_object,
            parameters,
        })
    }

    fn packetize(&self, buf: &mut BytesMut) {
        buf.extend(write_variable_integer(self.subscribe_id));
        buf.extend(write_variable_integer(self.track_alias));
        write_namespace_tuple(buf, &self.track_namespace);
        buf.extend(write_variable_bytes(self.track_name.as_bytes()));
        buf.extend(self.subscriber_priority.to_be_bytes());
        buf.extend(self.group_order.map(u8::from).unwrap_or(0x0).to_be_bytes());
        buf.extend(write_variable_integer(u8::from(self.filter_type) as u64));
        match self.filter_type {
            FilterType::AbsoluteStart => {
                buf.extend(write_variable_integer(self.start_group.unwrap()));
                buf.extend(write_variable_integer(self.start_object.unwrap()));
            }
            FilterType::AbsoluteRange => {
                buf.extend(write_variable_integer(self.start_group.unwrap()));
                buf.extend(write_variable_integer(self.start_object.unwrap()));
                buf.extend(write_variable_integer(self.end_group.unwrap()));
                buf.extend(write_variable_integer(
                    self.end_object.map(|object| object + 1).unwrap_or(0),
                ));
            }
            _ => {}
        }
        write_parameters(buf, &self.parameters);
    }
}


#[cfg(test)]
mod failure {
    use super::*;
    use crate::modules::full_sequence::FullTrackName;
    use crate::modules::parse_error::ParseError;
    use std::io::Cursor;

    #[test]
    fn new_latest_group_with_start() {
        let subscribe = Subscribe::new(
            0,
            0,
            FullTrackName::new(vec!["test".to_string()], "track_name"),
            0,
            None,
            FilterType::LatestGroup,
            Some(0),
            Some(0),
            None,
            None,
            vec![],
        );
        assert!(subscribe.is_err());
    }

    #[test]
    fn new_absolute_range_without_end_group() {
        let subscribe = Subscribe::new(
            0,
            0,
            FullTrackName::new(vec!["test".to_string()], "track_name"),
            0,
            None,
            FilterType::AbsoluteRange,
            Some(0),
            Some(0),
            None,
            None,
            vec![],
        );
        assert!(subscribe.is_err());
    }

    #[test]
    fn depacketize_unknown_filter_type() {
        let bytes_array = [
            0, // Subscribe ID (i)
            0, // Track Alias (i)
            1, // Track Namespace (tuple): Number of elements
            4, // Track Namespace (b): Length
            116, 101, 115, 116, // Track Namespace (b): Value("test")
            1,  // Track Name (b): Length
            97, // Track Name (b): Value("a")
            0,  // Subscriber Priority (8)
            1,  // Group Order (8): Ascending
            9,  // Filter Type (i): unknown
            0,  // Number of Parameters (i)
        ];
        let mut cur = Cursor::new(&bytes_array[..]);
        assert!(matches!(
            Subscribe::depacketize(&mut cur),
            Err(ParseError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn depacketize_unknown_group_order() {
        let bytes_array = [
            0, // Subscribe ID (i)
            0, // Track Alias (i)
            1, // Track Namespace (tuple): Number of elements
            4, // Track Namespace (b): Length
            116, 101, 115, 116, // Track Namespace (b): Value("test")
            1,  // Track Name (b): Length
            97, // Track Name (b): Value("a")
            0,  // Subscriber Priority (8)
            3,  // Group Order (8): unknown
            1,  // Filter Type (i): LatestGroup
            0,  // Number of Parameters (i)
        ];
        let mut cur = Cursor::new(&bytes_array[..]);
        assert!(matches!(
            Subscribe::depacketize(&mut cur),
            Err(ParseError::ProtocolViolation(_))
        ));
    }
}
