use std::io::Cursor;

use bytes::BytesMut;
use serde::Serialize;

use crate::modules::messages::moqt_payload::MoqtPayload;
use crate::modules::parse_error::ParseError;
use crate::modules::variable_bytes::{read_namespace_tuple, write_namespace_tuple};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnounceOk {
    pub track_namespace: Vec<String>,
}

impl MoqtPayload for AnnounceOk {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let track_namespace = read_namespace_tuple(buf)?;
        Ok(AnnounceOk { track_namespace })
    }

    fn packetize(&self, buf: &mut BytesMut) {
        write_namespace_tuple(buf, &self.track_namespace);
    }
}
