use std::io::Cursor;

use bytes::BytesMut;
use serde::Serialize;

use crate::modules::constants::SubscribeDoneCode;
use crate::modules::full_sequence::FullSequence;
use crate::modules::messages::moqt_payload::MoqtPayload;
use crate::modules::parse_error::ParseError;
use crate::modules::variable_bytes::{read_variable_string, write_variable_bytes};
use crate::modules::variable_integer::{read_u8, read_variable_integer, write_variable_integer};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscribeDone {
    pub subscribe_id: u64,
    pub status_code: SubscribeDoneCode,
    pub reason_phrase: String,
    /// Largest object sent on the subscription, when any was sent.
    pub final_id: Option<FullSequence>,
}

impl MoqtPayload for SubscribeDone {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let subscribe_id = read_variable_integer(buf)?;
        let status_code = SubscribeDoneCode::try_from(read_variable_integer(buf)?)
            .map_err(|_| ParseError::violation("invalid status code in SUBSCRIBE_DONE"))?;
        let reason_phrase = read_variable_string(buf)?;
        let content_exists = read_u8(buf)?;
        let final_id = match content_exists {
            0 => None,
            1 => {
                let group = read_variable_integer(buf)?;
                let object = read_variable_integer(buf)?;
                Some(FullSequence::new(group, object))
            }
            _ => {
                return Err(ParseError::violation(
                    "invalid ContentExists in SUBSCRIBE_DONE",
                ));
            }
        };

        Ok(SubscribeDone {
            subscribe_id,
            status_code,
            reason_phrase,
            final_id,
        })
    }

    fn packetize(&self, buf: &mut BytesMut) {
        buf.extend(write_variable_integer(self.subscribe_id));
        buf.extend(write_variable_integer(u64::from(self.status_code)));
        buf.extend(write_variable_bytes(self.reason_phrase.as_bytes()));
        match &self.final_id {
            Some(final_id) => {
                buf.extend(1u8.to_be_bytes());
                buf.extend(write_variable_integer(final_id.group));
                buf.extend(write_variable_integer(final_id.object));
            }
            None => buf.extend(0u8.to_be_bytes()),
        }
    }
}
