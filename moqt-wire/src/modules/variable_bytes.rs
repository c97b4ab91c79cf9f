use std::io::Cursor;

use bytes::{Buf, BytesMut};

use crate::modules::parse_error::ParseError;
use crate::modules::variable_integer::{read_variable_integer, write_variable_integer};

/// Reads a length-prefixed byte string.
pub fn read_variable_bytes(buf: &mut Cursor<&[u8]>) -> Result<Vec<u8>, ParseError> {
    let len = read_variable_integer(buf)? as usize;
    read_fixed_length_bytes(buf, len)
}

pub fn read_fixed_length_bytes(buf: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>, ParseError> {
    if buf.remaining() < len {
        return Err(ParseError::NeedMoreData);
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

/// Reads a length-prefixed UTF-8 string.
pub fn read_variable_string(buf: &mut Cursor<&[u8]>) -> Result<String, ParseError> {
    let bytes = read_variable_bytes(buf)?;
    String::from_utf8(bytes).map_err(|_| ParseError::violation("string is not valid UTF-8"))
}

pub fn write_variable_bytes(value: &[u8]) -> BytesMut {
    let mut buf = write_variable_integer(value.len() as u64);
    buf.extend_from_slice(value);
    buf
}

/// Reads a namespace tuple: an element count followed by that many byte
/// strings.
pub fn read_namespace_tuple(buf: &mut Cursor<&[u8]>) -> Result<Vec<String>, ParseError> {
    let count = read_variable_integer(buf)?;
    if count > 32 {
        return Err(ParseError::violation("track namespace tuple too long"));
    }
    let mut tuple = Vec::with_capacity(count as usize);
    for _ in 0..count {
        tuple.push(read_variable_string(buf)?);
    }
    Ok(tuple)
}

pub fn write_namespace_tuple(buf: &mut BytesMut, tuple: &[String]) {
    buf.extend(write_variable_integer(tuple.len() as u64));
    for element in tuple {
        buf.extend(write_variable_bytes(element.as_bytes()));
    }
}

#[cfg(test)]
mod success {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip_bytes() {
        let buf = write_variable_bytes(b"track_name");
        let mut cur = Cursor::new(&buf[..]);
        assert_eq!(read_variable_bytes(&mut cur).unwrap(), b"track_name");
    }

    #[test]
    fn round_trip_namespace_tuple() {
        let tuple = vec!["test".to_string(), "test".to_string()];
        let mut buf = bytes::BytesMut::new();
        write_namespace_tuple(&mut buf, &tuple);
        let mut cur = Cursor::new(&buf[..]);
        assert_eq!(read_namespace_tuple(&mut cur).unwrap(), tuple);
    }
}

#[cfg(test)]
mod failure {
    use super::*;
    use crate::modules::parse_error::ParseError;
    use std::io::Cursor;

    #[test]
    fn truncated_bytes() {
        let bytes_array = [
            4, // Length (i)
            116, 101, // Value, two of four bytes
        ];
        let mut cur = Cursor::new(&bytes_array[..]);
        assert_eq!(read_variable_bytes(&mut cur), Err(ParseError::NeedMoreData));
    }

    #[test]
    fn invalid_utf8() {
        let bytes_array = [
            2, // Length (i)
            0xff, 0xfe,
        ];
        let mut cur = Cursor::new(&bytes_array[..]);
        assert!(matches!(
            read_variable_string(&mut cur),
            Err(ParseError::ProtocolViolation(_))
        ));
    }
}
