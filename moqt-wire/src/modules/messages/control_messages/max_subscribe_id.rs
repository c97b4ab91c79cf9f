use std::io::Cursor;

use bytes::BytesMut;
use serde::Serialize;

use crate::modules::messages::moqt_payload::MoqtPayload;
use crate::modules::parse_error::ParseError;
use crate::modules::variable_integer::{read_variable_integer, write_variable_integer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaxSubscribeId {
    pub max_subscribe_id: u64,
}

impl MoqtPayload for MaxSubscribeId {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let max_subscribe_id = read_variable_integer(buf)?;
        Ok(MaxSubscribeId { max_subscribe_id })
    }

    fn packetize(&self, buf: &mut BytesMut) {
        buf.extend(write_variable_integer(self.max_subscribe_id));
    }
}
