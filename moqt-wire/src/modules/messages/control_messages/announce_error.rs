use std::io::Cursor;

use bytes::BytesMut;
use serde::Serialize;

use crate::modules::constants::AnnounceErrorCode;
use crate::modules::messages::moqt_payload::MoqtPayload;
use crate::modules::parse_error::ParseError;
use crate::modules::variable_bytes::{
    read_namespace_tuple, read_variable_string, write_namespace_tuple, write_variable_bytes,
};
use crate::modules::variable_integer::{read_variable_integer, write_variable_integer};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnounceError {
    pub track_namespace: Vec<String>,
    pub error_code: AnnounceErrorCode,
    pub reason_phrase: String,
}

impl MoqtPayload for AnnounceError {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let track_namespace = read_namespace_tuple(buf)?;
        let error_code = AnnounceErrorCode::try_from(read_variable_integer(buf)?)
            .map_err(|_| ParseError::violation("invalid error code in ANNOUNCE_ERROR"))?;
        let reason_phrase = read_variable_string(buf)?;

        Ok(AnnounceError {
            track_namespace,
            error_code,
            reason_phrase,
        })
    }

    fn packetize(&self, buf: &mut BytesMut) {
        write_namespace_tuple(buf, &self.track_namespace);
        buf.extend(write_variable_integer(u64::from(self.error_code)));
        buf.extend(write_variable_bytes(self.reason_phrase.as_bytes()));
    }
}
