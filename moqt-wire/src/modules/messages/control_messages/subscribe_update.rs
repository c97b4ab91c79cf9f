use std::io::Cursor;

use bytes::BytesMut;
use serde::Serialize;

use crate::modules::messages::control_messages::version_specific_parameters::{
    read_parameters, write_parameters, VersionSpecificParameter,
};
use crate::modules::messages::moqt_payload::MoqtPayload;
use crate::modules::parse_error::ParseError;
use crate::modules::variable_integer::{read_u8, read_variable_integer, write_variable_integer};

/// Narrows a subscription's window or changes its priority. End group and
/// end object are encoded as value + 1 with zero meaning "absent".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscribeUpdate {
    pub subscribe_id: u64,
    pub start_group: u64,
    pub start_object: u64,
    pub end_group: Option<u64>,
    pub end_object: Option<u64>,
    pub subscriber_priority: u8,
    pub parameters: Vec<VersionSpecificParameter>,
}

impl MoqtPayload for SubscribeUpdate {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let subscribe_id = read_variable_integer(buf)?;
        let start_group = read_variable_integer(buf)?;
        let start_object = read_variable_integer(buf)?;
        let end_group = match read_variable_integer(buf)? {
            0 => None,
            value => Some(value - 1),
        };
        let end_object = match read_variable_integer(buf)? {
            0 => None,
            value => Some(value - 1),
        };
        let subscriber_priority = read_u8(buf)?;
        let parameters = read_parameters(buf)?;

        Ok(SubscribeUpdate {
            subscribe_id,
            start_group,
            start_object,
            end_group,
            end_object,
            subscriber_priority,
            parameters,
        })
    }

    fn packetize(&self, buf: &mut BytesMut) {
        buf.extend(write_variable_integer(self.subscribe_id));
        buf.extend(write_variable_integer(self.start_group));
        buf.extend(write_variable_integer(self.start_object));
        buf.extend(write_variable_integer(
            self.end_group.map(|group| group + 1).unwrap_or(0),
        ));
        buf.extend(write_variable_integer(
            self.end_object.map(|object| object + 1).unwrap_or(0),
        ));
        buf.extend(self.subscriber_priority.to_be_bytes());
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
        let subscribe_update = SubscribeUpdate {
            subscribe_id: 1,
            start_group: 4,
            start_object: 0,
            end_group: Some(8),
            end_object: None,
            subscriber_priority: 0x40,
            parameters: vec![],
        };

        let mut buf = BytesMut::new();
        subscribe_update.packetize(&mut buf);

        let expected_bytes_array = [
            1,    // Subscribe ID (i)
            4,    // Start Group (i)
            0,    // Start Object (i)
            9,    // End Group (i): 8, encoded as value + 1
            0,    // End Object (i): absent
            0x40, // Subscriber Priority (8)
            0,    // Number of Parameters (i)
        ];
        assert_eq!(buf.as_ref(), expected_bytes_array.as_slice());

        let mut cur = Cursor::new(&buf[..]);
        assert_eq!(
            SubscribeUpdate::depacketize(&mut cur).unwrap(),
            subscribe_update
        );
    }
}
