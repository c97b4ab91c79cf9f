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
pub struct FetchOk {
    pub subscribe_id: u64,
    pub group_order: GroupOrder,
    pub largest_id: FullSequence,
    pub parameters: Vec<VersionSpecificParameter>,
}

impl MoqtPayload for FetchOk {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let subscribe_id = read_variable_integer(buf)?;
        let group_order = GroupOrder::try_from(read_u8(buf)?)
            .map_err(|_| ParseError::violation("invalid group order in FETCH_OK"))?;
        let group = read_variable_integer(buf)?;
        let object = read_variable_integer(buf)?;
        let parameters = read_parameters(buf)?;

        Ok(FetchOk {
            subscribe_id,
            group_order,
            largest_id: FullSequence::new(group, object),
            parameters,
        })
    }

    fn packetize(&self, buf: &mut BytesMut) {
        buf.extend(write_variable_integer(self.subscribe_id));
        buf.extend(u8::from(self.group_order).to_be_bytes());
        buf.extend(write_variable_integer(self.largest_id.group));
        buf.extend(write_variable_integer(self.largest_id.object));
        write_parameters(buf, &self.parameters);
    }
}
