use std::io::Cursor;

use bytes::BytesMut;
use serde::Serialize;

use crate::modules::messages::control_messages::version_specific_parameters::{
    read_parameters, write_parameters, VersionSpecificParameter,
};
use crate::modules::messages::moqt_payload::MoqtPayload;
use crate::modules::parse_error::ParseError;
use crate::modules::variable_bytes::{read_namespace_tuple, write_namespace_tuple};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Announce {
    pub track_namespace: Vec<String>,
    pub parameters: Vec<VersionSpecificParameter>,
}

impl MoqtPayload for Announce {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let track_namespace = read_namespace_tuple(buf)?;
        let parameters = read_parameters(buf)?;

        tracing::trace!("Depacketized Announce message.");

        Ok(Announce {
            track_namespace,
            parameters,
        })
    }

    fn packetize(&self, buf: &mut BytesMut) {
        write_namespace_tuple(buf, &self.track_namespace);
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
        let announce = Announce {
            track_namespace: vec!["test".to_string(), "test".to_string()],
            parameters: vec![VersionSpecificParameter::AuthorizationInfo(
                "test".to_string(),
            )],
        };

        let mut buf = BytesMut::new();
        announce.packetize(&mut buf);

        let mut cur = Cursor::new(&buf[..]);
        assert_eq!(Announce::depacketize(&mut cur).unwrap(), announce);
    }
}
