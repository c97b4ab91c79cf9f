use std::io::Cursor;

use bytes::BytesMut;
use serde::Serialize;

use crate::modules::messages::moqt_payload::MoqtPayload;
use crate::modules::parse_error::ParseError;
use crate::modules::variable_bytes::{read_fixed_length_bytes, write_variable_bytes};
use crate::modules::variable_integer::{read_variable_integer, write_variable_integer};

const PARAMETER_AUTHORIZATION_INFO: u64 = 0x02;
const PARAMETER_DELIVERY_TIMEOUT: u64 = 0x03;
const PARAMETER_OBJECT_ACK_WINDOW: u64 = 0xbbf1438b;

/// Parameters carried on SUBSCRIBE and FETCH.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum VersionSpecificParameter {
    AuthorizationInfo(String),
    /// Milliseconds.
    DeliveryTimeout(u64),
    /// Microseconds.
    ObjectAckWindow(u64),
    Unknown(u64),
}

impl MoqtPayload for VersionSpecificParameter {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let key = read_variable_integer(buf)?;
        let length = read_variable_integer(buf)? as usize;
        let value = read_fixed_length_bytes(buf, length)?;
        let mut value_cur = Cursor::new(&value[..]);

        match key {
            PARAMETER_AUTHORIZATION_INFO => {
                let info = String::from_utf8(value).map_err(|_| {
                    ParseError::violation("AUTHORIZATION_INFO parameter is not valid UTF-8")
                })?;
                Ok(VersionSpecificParameter::AuthorizationInfo(info))
            }
            PARAMETER_DELIVERY_TIMEOUT => {
                let timeout = read_variable_integer(&mut value_cur).map_err(|_| {
                    ParseError::violation("invalid value in DELIVERY_TIMEOUT parameter")
                })?;
                Ok(VersionSpecificParameter::DeliveryTimeout(timeout))
            }
            PARAMETER_OBJECT_ACK_WINDOW => {
                let window = read_variable_integer(&mut value_cur).map_err(|_| {
                    ParseError::violation("invalid value in OBJECT_ACK_WINDOW parameter")
                })?;
                Ok(VersionSpecificParameter::ObjectAckWindow(window))
            }
            _ => {
                tracing::warn!("unknown track request parameter {}", key);
                Ok(VersionSpecificParameter::Unknown(key))
            }
        }
    }

    fn packetize(&self, buf: &mut BytesMut) {
        match self {
            VersionSpecificParameter::AuthorizationInfo(info) => {
                buf.extend(write_variable_integer(PARAMETER_AUTHORIZATION_INFO));
                buf.extend(write_variable_bytes(info.as_bytes()));
            }
            VersionSpecificParameter::DeliveryTimeout(timeout) => {
                buf.extend(write_variable_integer(PARAMETER_DELIVERY_TIMEOUT));
                buf.extend(write_variable_bytes(&write_variable_integer(*timeout)));
            }
            VersionSpecificParameter::ObjectAckWindow(window) => {
                buf.extend(write_variable_integer(PARAMETER_OBJECT_ACK_WINDOW));
                buf.extend(write_variable_bytes(&write_variable_integer(*window)));
            }
            VersionSpecificParameter::Unknown(_) => {
                unreachable!("Unknown version specific parameter")
            }
        }
    }
}

/// Reads a parameter list, dropping parameters this implementation does
/// not understand.
pub fn read_parameters(
    buf: &mut Cursor<&[u8]>,
) -> Result<Vec<VersionSpecificParameter>, ParseError> {
    let count = read_variable_integer(buf)?;
    let mut parameters = Vec::new();
    for _ in 0..count {
        let parameter = VersionSpecificParameter::depacketize(buf)?;
        if !matches!(parameter, VersionSpecificParameter::Unknown(_)) {
            parameters.push(parameter);
        }
    }
    Ok(parameters)
}

pub fn write_parameters(buf: &mut BytesMut, parameters: &[VersionSpecificParameter]) {
    buf.extend(write_variable_integer(parameters.len() as u64));
    for parameter in parameters {
        parameter.packetize(buf);
    }
}

#[cfg(test)]
mod success {
    use super::*;
    use bytes::BytesMut;
    use std::io::Cursor;

    #[test]
    fn packetize_authorization_info() {
        let parameter = VersionSpecificParameter::AuthorizationInfo("test".to_string());

        let mut buf = BytesMut::new();
        parameter.packetize(&mut buf);

        let expected_bytes_array = [
            2, // Parameter Type (i): AuthorizationInfo
            4, // Parameter Length (i)
            116, 101, 115, 116, // Parameter Value (..): test
        ];
        assert_eq!(buf.as_ref(), expected_bytes_array);
    }

    #[test]
    fn depacketize_authorization_info() {
        let bytes_array = [
            2, // Parameter Type (i): AuthorizationInfo
            4, // Parameter Length (i)
            116, 101, 115, 116, // Parameter Value (..): test
        ];
        let mut cur = Cursor::new(&bytes_array[..]);
        let parameter = VersionSpecificParameter::depacketize(&mut cur).unwrap();

        assert_eq!(
            parameter,
            VersionSpecificParameter::AuthorizationInfo("test".to_string())
        );
    }
}
