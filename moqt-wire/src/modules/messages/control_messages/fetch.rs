use std::io::Cursor;

use bytes::BytesMut;
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

/// One-shot request for a bounded range of past objects. End object is
/// encoded as value + 1 with zero meaning "the entire end group".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fetch {
    pub subscribe_id: u64,
    pub track_namespace: Vec<String>,
    pub track_name: String,
    pub subscriber_priority: u8,
    /// `None` asks the publisher to use its own delivery order.
    pub group_order: Option<GroupOrder>,
    pub start_group: u64,
    pub start_object: u64,
    pub end_group: u64,
    pub end_object: Option<u64>,
    pub parameters: Vec<VersionSpecificParameter>,
}

impl Fetch {
    pub fn full_track_name(&self) -> FullTrackName {
        FullTrackName::new(self.track_namespace.clone(), self.track_name.clone())
    }
}

impl MoqtPayload for Fetch {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let subscribe_id = read_variable_integer(buf)?;
        let track_namespace = read_namespace_tuple(buf)?;
        let track_name = read_variable_string(buf)?;
        let subscriber_priority = read_u8(buf)?;
        let group_order = match read_u8(buf)? {
            0x0 => None,
            value => Some(
                GroupOrder::try_from(value)
                    .map_err(|_| ParseError::violation("invalid group order in FETCH"))?,
            ),
        };
        let start_group = read_variable_integer(buf)?;
        let start_object = read_variable_integer(buf)?;
        let end_group = read_variable_integer(buf)?;
        let end_object = match read_variable_integer(buf)? {
            0 => None,
            value => Some(value - 1),
        };
        let parameters = read_parameters(buf)?;

        tracing::trace!("Depacketized Fetch message.");

        Ok(Fetch {
            subscribe_id,
            track_namespace,
            track_name,
            subscriber_priority,
            group_order,
            start_group,
            start_object,
            end_group,
            end_object,
            parameters,
        })
    }

    fn packetize(&self, buf: &mut BytesMut) {
        buf.extend(write_variable_integer(self.subscribe_id));
        write_namespace_tuple(buf, &self.track_namespace);
        buf.extend(write_variable_bytes(self.track_name.as_bytes()));
        buf.extend(self.subscriber_priority.to_be_bytes());
        buf.extend(self.group_order.map(u8::from).unwrap_or(0x0).to_be_bytes());
        buf.extend(write_variable_integer(self.start_group));
        buf.extend(write_variable_integer(self.start_object));
        buf.extend(write_variable_integer(self.end_group));
        buf.extend(write_variable_integer(
            self.end_object.map(|object| object + 1).unwrap_or(0),
        ));
        write_parameters(buf, &self.parameters);
    }
}

#[cfg(test)]
mod success {
    use super::*;
    use bytes::BytesMut;
    use std::io::Cursor;

    #[test]
    fn packetize_and_depacketize() {
        let fetch = Fetch {
            subscribe_id: 2,
            track_namespace: vec!["ns".to_string()],
            track_name: "a".to_string(),
            subscriber_priority: 0x80,
            group_order: Some(GroupOrder::Ascending),
            start_group: 0,
            start_object: 0,
            end_group: 4,
            end_object: Some(7),
            parameters: vec![],
        };

        let mut buf = BytesMut::new();
        fetch.packetize(&mut buf);

        let mut cur = Cursor::new(&buf[..]);
        assert_eq!(Fetch::depacketize(&mut cur).unwrap(), fetch);
    }
}
