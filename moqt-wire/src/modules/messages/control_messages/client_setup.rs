use std::io::Cursor;

use bytes::BytesMut;
use serde::Serialize;

use crate::modules::messages::control_messages::setup_parameters::{Role, SetupParameter};
use crate::modules::messages::moqt_payload::MoqtPayload;
use crate::modules::parse_error::ParseError;
use crate::modules::variable_integer::{read_variable_integer, write_variable_integer};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientSetup {
    pub supported_versions: Vec<u64>,
    pub role: Role,
    /// Only sent when the session does not run over WebTransport.
    pub path: Option<String>,
    pub max_subscribe_id: Option<u64>,
    pub supports_object_ack: bool,
}

impl MoqtPayload for ClientSetup {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let number_of_versions = read_variable_integer(buf)?;
        let mut supported_versions = Vec::with_capacity(number_of_versions as usize);
        for _ in 0..number_of_versions {
            supported_versions.push(read_variable_integer(buf)?);
        }

        let mut role = None;
        let mut path = None;
        let mut max_subscribe_id = None;
        let mut supports_object_ack = false;
        let number_of_parameters = read_variable_integer(buf)?;
        for _ in 0..number_of_parameters {
            match SetupParameter::depacketize(buf)? {
                SetupParameter::Role(value) => role = Some(value),
                SetupParameter::Path(value) => path = Some(value),
                SetupParameter::MaxSubscribeId(value) => max_subscribe_id = Some(value),
                SetupParameter::SupportObjectAcks(value) => supports_object_ack = value,
                SetupParameter::Unknown(_) => {}
            }
        }

        let role =
            role.ok_or_else(|| ParseError::violation("CLIENT_SETUP without ROLE parameter"))?;

        tracing::trace!("Depacketized Client Setup message.");

        Ok(ClientSetup {
            supported_versions,
            role,
            path,
            max_subscribe_id,
            supports_object_ack,
        })
    }

    fn packetize(&self, buf: &mut BytesMut) {
        buf.extend(write_variable_integer(self.supported_versions.len() as u64));
        for version in &self.supported_versions {
            buf.extend(write_variable_integer(*version));
        }

        let mut parameters = vec![SetupParameter::Role(self.role)];
        if let Some(path) = &self.path {
            parameters.push(SetupParameter::Path(path.clone()));
        }
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
        let client_setup = ClientSetup {
            supported_versions: vec![0xff000007],
            role: Role::PubSub,
            path: None,
            max_subscribe_id: Some(100),
            supports_object_ack: true,
        };

        let mut buf = BytesMut::new();
        client_setup.packetize(&mut buf);

        let mut cur = Cursor::new(&buf[..]);
        let depacketized = ClientSetup::depacketize(&mut cur).unwrap();

        assert_eq!(depacketized, client_setup);
    }
}
