use std::io::Cursor;

use bytes::BytesMut;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use crate::modules::messages::moqt_payload::MoqtPayload;
use crate::modules::parse_error::ParseError;
use crate::modules::variable_bytes::{read_fixed_length_bytes, write_variable_bytes};
use crate::modules::variable_integer::{read_variable_integer, write_variable_integer};

const SETUP_PARAMETER_ROLE: u64 = 0x00;
const SETUP_PARAMETER_PATH: u64 = 0x01;
const SETUP_PARAMETER_MAX_SUBSCRIBE_ID: u64 = 0x02;
const SETUP_PARAMETER_SUPPORT_OBJECT_ACKS: u64 = 0xbbf1438b;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Serialize)]
#[repr(u8)]
pub enum Role {
    Publisher = 0x1,
    Subscriber = 0x2,
    PubSub = 0x3,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SetupParameter {
    Role(Role),
    Path(String),
    MaxSubscribeId(u64),
    SupportObjectAcks(bool),
    Unknown(u64),
}

impl MoqtPayload for SetupParameter {
    fn depacketize(buf: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let key = read_variable_integer(buf)?;
        let length = read_variable_integer(buf)? as usize;
        let value = read_fixed_length_bytes(buf, length)?;
        let mut value_cur = Cursor::new(&value[..]);

        match key {
            SETUP_PARAMETER_ROLE => {
                if value.len() != 1 {
                    return Err(ParseError::violation("invalid length in ROLE parameter"));
                }
                let role = Role::try_from(value[0])
                    .map_err(|_| ParseError::violation("invalid value in ROLE parameter"))?;
                Ok(SetupParameter::Role(role))
            }
            SETUP_PARAMETER_PATH => {
                let path = String::from_utf8(value)
                    .map_err(|_| ParseError::violation("PATH parameter is not valid UTF-8"))?;
                Ok(SetupParameter::Path(path))
            }
            SETUP_PARAMETER_MAX_SUBSCRIBE_ID => {
                let id = read_variable_integer(&mut value_cur).map_err(|_| {
                    ParseError::violation("invalid value in MAX_SUBSCRIBE_ID parameter")
                })?;
                Ok(SetupParameter::MaxSubscribeId(id))
            }
            SETUP_PARAMETER_SUPPORT_OBJECT_ACKS => {
                let flag = read_variable_integer(&mut value_cur).map_err(|_| {
                    ParseError::violation("invalid value in SUPPORT_OBJECT_ACKS parameter")
                })?;
                Ok(SetupParameter::SupportObjectAcks(flag != 0))
            }
            _ => {
                tracing::warn!("Unknown SETUP parameter {:#x}", key);
                Ok(SetupParameter::Unknown(key))
            }
        }
    }

    fn packetize(&self, buf: &mut BytesMut) {
        match self {
            SetupParameter::Role(role) => {
                buf.extend(write_variable_integer(SETUP_PARAMETER_ROLE));
                buf.extend(write_variable_bytes(&[u8::from(*role)]));
            }
            SetupParameter::Path(path) => {
                buf.extend(write_variable_integer(SETUP_PARAMETER_PATH));
                buf.extend(write_variable_bytes(path.as_bytes()));
            }
            SetupParameter::MaxSubscribeId(id) => {
                buf.extend(write_variable_integer(SETUP_PARAMETER_MAX_SUBSCRIBE_ID));
                buf.extend(write_variable_bytes(&write_variable_integer(*id)));
            }
            SetupParameter::SupportObjectAcks(flag) => {
                buf.extend(write_variable_integer(SETUP_PARAMETER_SUPPORT_OBJECT_ACKS));
                buf.extend(write_variable_bytes(&write_variable_integer(*flag as u64)));
            }
            SetupParameter::Unknown(_) => unreachable!("Unknown SETUP parameter"),
        }
    }
}

#[cfg(test)]
mod success {
    use super::*;
    use bytes::BytesMut;
    use std::io::Cursor;

    #[test]
    fn packetize_role() {
        let parameter = SetupParameter::Role(Role::Publisher);

        let mut buf = BytesMut::new();
        parameter.packetize(&mut buf);

        let expected_bytes_array = [
            0, // Parameter Type (i): Role
            1, // Parameter Length (i)
            1, // Parameter Value (..): Role(Publisher)
        ];
        assert_eq!(buf.as_ref(), expected_bytes_array);
    }

    #[test]
    fn depacketize_role() {
        let bytes_array = [
            0, // Parameter Type (i): Role
            1, // Parameter Length (i)
            2, // Parameter Value (..): Role(Subscriber)
        ];
        let mut cur = Cursor::new(&bytes_array[..]);
        let parameter = SetupParameter::depacketize(&mut cur).unwrap();

        assert_eq!(parameter, SetupParameter::Role(Role::Subscriber));
    }

    #[test]
    fn depacketize_max_subscribe_id() {
        let bytes_array = [
            2,   // Parameter Type (i): MaxSubscribeId
            2,   // Parameter Length (i)
            71,  // Parameter Value (..): Length(01 of 2MSB)
            208, // Parameter Value (..): Value(2000) in 62bit
        ];
        let mut cur = Cursor::new(&bytes_array[..]);
        let parameter = SetupParameter::depacketize(&mut cur).unwrap();

        assert_eq!(parameter, SetupParameter::MaxSubscribeId(2000));
    }

    #[test]
    fn depacketize_unknown_is_skipped() {
        let bytes_array = [
            3, // Parameter Type (i): Unknown
            1, // Parameter Length (i)
            9, // Parameter Value (..)
        ];
        let mut cur = Cursor::new(&bytes_array[..]);
        let parameter = SetupParameter::depacketize(&mut cur).unwrap();

        assert_eq!(parameter, SetupParameter::Unknown(3));
    }
}

#[cfg(test)]
mod failure {
    use super::*;
    use crate::modules::parse_error::ParseError;
    use std::io::Cursor;

    #[test]
    fn depacketize_role_invalid_length() {
        let bytes_array = [
            0, // Parameter Type (i): Role
            2, // Parameter Length (i): wrong
            1, 1, // Parameter Value (..)
        ];
        let mut cur = Cursor::new(&bytes_array[..]);
        assert!(matches!(
            SetupParameter::depacketize(&mut cur),
            Err(ParseError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn depacketize_role_invalid_value() {
        let bytes_array = [
            0,  // Parameter Type (i): Role
            1,  // Parameter Length (i)
            99, // Parameter Value (..): wrong
        ];
        let mut cur = Cursor::new(&bytes_array[..]);
        assert!(matches!(
            SetupParameter::depacketize(&mut cur),
            Err(ParseError::ProtocolViolation(_))
        ));
    }
}
