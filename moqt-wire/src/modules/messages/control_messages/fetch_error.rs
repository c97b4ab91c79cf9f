use std::io::Cursor;

use bytes::BytesMut;
use serde::Serialize;

use crate::modules::constants::SubscribeErrorCode;
use crate::modules::messages::moqt_payload::MoqtPayload;
use crate::modules::parse_error::ParseError;
use crate::modules::variable_bytes::{read_variable_string, write_variable_bytes};
use crate::modules::variable_integer::{read_variable_integer, write_variable_integer};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchError {
    pub subscribe_id: u64,
    pub error_code: SubscribeErrorCode,
    pub reason_phrase: String,
}

impl MoqtPayload for FetchError {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let subscribe_id = read_variable_integer(buf)?;
        let error_code = SubscribeErrorCode::try_from(read_variable_integer(buf)?)
            .map_err(|_| ParseError::violation("invalid error code in FETCH_ERROR"))?;
        let reason_phrase = read_variable_string(buf)?;

        Ok(FetchError {
            subscribe_id,
            error_code,
            reason_phrase,
        })
    }

    fn packetize(&self, buf: &mut BytesMut) {
        buf.extend(write_variable_integer(self.subscribe_id));
        buf.extend(write_variable_integer(u64::from(self.error_code)));
        buf.extend(write_variable_bytes(self.reason_phrase.as_bytes()));
    }
}
