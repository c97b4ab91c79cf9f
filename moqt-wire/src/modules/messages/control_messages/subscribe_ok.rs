use std::io::Cursor;

use bytes::BytesMut;
use serde::Serialize;

use crate::modules::full_sequence::FullSequence;
use crate::modules::messages::control_messages::group_order::GroupOrder;
use crate::modules::messages::control_messages::version_specific_parameters::{
    read_parameters, write_parameters, VersionSpecificParameter,
};
use crate::modules::messages::moqt_payload::MoqtPayload;
use crate::modules::parse_error::ParseError;
use crate::modules::variable_integer::{read_u8, read_variable_integer, write_variable_integer};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscribeOk {
    pub subscribe_id: u64,
    /// Milliseconds; zero means the subscription never expires.
    pub expires: u64,
    pub group_order: GroupOrder,
    /// Largest object published so far, when the track has content.
    pub largest_id: Option<FullSequence>,
    pub parameters: Vec<VersionSpecificParameter>,
}

impl MoqtPayload for SubscribeOk {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let subscribe_id = read_variable_integer(buf)?;
        let expires = read_variable_integer(buf)?;
        let group_order = GroupOrder::try_from(read_u8(buf)?)
            .map_err(|_| ParseError::violation("invalid group order in SUBSCRIBE_OK"))?;
        let content_exists = read_u8(buf)?;
        let largest_id = match content_exists {
            0 => None,
            1 => {
                let group = read_variable_integer(buf)?;
                let object = read_variable_integer(buf)?;
                Some(FullSequence::new(group, object))
            }
            _ => {
                return Err(ParseError::violation(
                    "invalid ContentExists in SUBSCRIBE_OK",
                ));
            }
        };
        let parameters = read_parameters(buf)?;

        tracing::trace!("Depacketized Subscribe OK message.");

        Ok(SubscribeOk {
            subscribe_id,
            expires,
            group_order,
            largest_id,
            parameters,
        })
    }

    fn packetize(&self, buf: &mut BytesMut) {
        buf.extend(write_variable_integer(self.subscribe_id));
        buf.extend(write_variable_integer(self.expires));
        buf.extend(u8::from(self.group_order).to_be_bytes());
        match &self.largest_id {
            Some(largest_id) => {
                buf.extend(1u8.to_be_bytes());
                buf.extend(write_variable_integer(largest_id.group));
                buf.extend(write_variable_integer(largest_id.object));
            }
            None => buf.extend(0u8.to_be_bytes()),
        }
        write_parameters(buf, &self.parameters);
    }
}

#[cfg(test)]
mod success {
    use super::*;
    use bytes::BytesMut;
    use std::io::Cursor;

    #[test]
    fn packetize_with_largest_id() {
        let subscribe_ok = SubscribeOk {
            subscribe_id: 0,
            expires: 0,
            group_order: GroupOrder::Ascending,
            largest_id: Some(FullSequence::new(5, 3)),
            parameters: vec![],
        };

        let mut buf = BytesMut::new();
        subscribe_ok.packetize(&mut buf);

        let expected_bytes_array = [
            0, // Subscribe ID (i)
            0, // Expires (i)
            1, // Group Order (8): Ascending
            1, // Content Exists (8)
            5, // Largest Group ID (i)
            3, // Largest Object ID (i)
            0, // Number of Parameters (i)
        ];
        assert_eq!(buf.as_ref(), expected_bytes_array.as_slice());
    }

    #[test]
    fn depacketize_without_content() {
        let bytes_array = [
            2, // Subscribe ID (i)
            0, // Expires (i)
            2, // Group Order (8): Descending
            0, // Content Exists (8)
            0, // Number of Parameters (i)
        ];
        let mut cur = Cursor::new(&bytes_array[..]);
        let subscribe_ok = SubscribeOk::depacketize(&mut cur).unwrap();

        assert_eq!(subscribe_ok.subscribe_id, 2);
        assert_eq!(subscribe_ok.group_order, GroupOrder::Descending);
        assert_eq!(subscribe_ok.largest_id, None);
    }
}

#[cfg(test)]
mod failure {
    use super::*;
    use crate::modules::parse_error::ParseError;
    use std::io::Cursor;

    #[test]
    fn depacketize_invalid_content_exists() {
        let bytes_array = [
            2, // Subscribe ID (i)
            0, // Expires (i)
            1, // Group Order (8)
            9, // Content Exists (8): wrong
            0, // Number of Parameters (i)
        ];
        let mut cur = Cursor::new(&bytes_array[..]);
        assert!(matches!(
            SubscribeOk::depacketize(&mut cur),
            Err(ParseError::ProtocolViolation(_))
        ));
    }
}
