use std::io::Cursor;

use bytes::BytesMut;
use serde::Serialize;

use crate::modules::constants::SubscribeErrorCode;
use crate::modules::messages::moqt_payload::MoqtPayload;
use crate::modules::parse_error::ParseError;
use crate::modules::variable_bytes::{
    read_variable_string, write_variable_bytes,
};
use crate::modules::variable_integer::{read_variable_integer, write_variable_integer};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscribeError {
    pub subscribe_id: u64,
    pub error_code: SubscribeErrorCode,
    pub reason_phrase: String,
    /// On `RetryTrackAlias`, the alias the subscriber should retry with.
    pub track_alias: u64,
}

impl MoqtPayload for SubscribeError {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let subscribe_id = read_variable_integer(buf)?;
        let error_code = SubscribeErrorCode::try_from(read_variable_integer(buf)?)
            .map_err(|_| ParseError::violation("invalid error code in SUBSCRIBE_ERROR"))?;
        let reason_phrase = read_variable_string(buf)?;
        let track_alias = read_variable_integer(buf)?;

        Ok(SubscribeError {
            subscribe_id,
            error_code,
            reason_phrase,
            track_alias,
        })
    }

    fn packetize(&self, buf: &mut BytesMut) {
        buf.extend(write_variable_integer(self.subscribe_id));
        buf.extend(write_variable_integer(u64::from(self.error_code)));
        buf.extend(write_variable_bytes(self.reason_phrase.as_bytes()));
        buf.extend(write_variable_integer(self.track_alias));
    }
}

#[cfg(test)]
mod success {
    use super::*;
    use bytes::BytesMut;
    use std::io::Cursor;

    #[test]
    fn packetize_and_depacketize() {
        let subscribe_error = SubscribeError {
            subscribe_id: 4,
            error_code: SubscribeErrorCode::RetryTrackAlias,
            reason_phrase: "alias in use".to_string(),
            track_alias: 9,
        };

        let mut buf = BytesMut::new();
        subscribe_error.packetize(&mut buf);

        let mut cur = Cursor::new(&buf[..]);
        assert_eq!(
            SubscribeError::depacketize(&mut cur).unwrap(),
            subscribe_error
        );
    }
}
