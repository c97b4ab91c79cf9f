use std::io::Cursor;

use bytes::BytesMut;
use serde::Serialize;

use crate::modules::messages::control_messages::setup_parameters::{Role, SetupParameter};
use crate::modules::messages::moqt_payload::MoqtPayload;
use crate::modules::parse_error::ParseError;
use crate::modules::variable_integer::{read_variable_integer, write_variable_integer};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSetup {
    pub selected_version: u64,
    pub role: Role,
    pub max_subscribe_id: Option<u64>,
    pub supports_object_ack: bool,
}

impl MoqtPayload for ServerSetup {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let selected_version = read_variable_integer(buf)?;

        let mut role = None;
        let mut max_subscribe_id = None;
        let mut supports_object_ack = false;
        let number_of_parameters = read_variable_integer(buf)?;
        for _ in 0..number_of_parameters {
            match SetupParameter::depacketize(buf)? {
                SetupParameter::Role(value) => role = Some(value),
                SetupParameter::Path(_) => {
                    return Err(ParseError::violation("SERVER_SETUP with PATH parameter"));
                }
                SetupParameter::MaxSubscribeId(value) => max_subscribe_id = Some(value),
                SetupParameter::SupportObjectAcks(value) => supports_object_ack = value,
                SetupParameter::Unknown(_) => {}
            }
        }

        let role =
            role.ok_or_else(|| ParseError::violation("SERVER_SETUP without ROLE parameter"))?;

        tracing::trace!("Depacketized Server Setup message.");

        Ok(ServerSetup {
            selected_version,
            role,
            max_subscribe_id,
            supports_object_ack,
        })
    }

    fn packetize(&self, buf: &mut BytesMut) {
        buf.extend(write_variable_integer(self.selected_version));

        let mut parameters = vec![SetupParameter::Role(self.role)];
        if let Some(max_subscribe_id) = self.max_subscribe_id {
            parameters.push(SetupParameter::MaxSubscribeId(max_subscribe_id));
        }
        if self.supports_object_ack {
            parameters.push(SetupParameter::SupportObjectAcks(true));
        }

        buf.extend(write_variable_integer(parameters.len() as u64));
        for parameter in &parameters {
            parameter.packetize(buf);
        }
    }
}

#[cfg(test)]
mod success {
    use super::*;
    use bytes::BytesMut;
    use std::io::Cursor;

    #[test]
    fn packetize_and_depacketize() {
        let server_setup = ServerSetup {
            selected_version: 0xff000007,
            role: Role::PubSub,
            max_subscribe_id: Some(50),
            supports_object_ack: false,
        };

        let mut buf = BytesMut::new();
        server_setup.packetize(&mut buf);

        let mut cur = Cursor::new(&buf[..]);
        let depacketized = ServerSetup::depacketize(&mut cur).unwrap();

        assert_eq!(depacketized, server_setup);
    }
}
