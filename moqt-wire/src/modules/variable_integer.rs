use std::io::Cursor;

use bytes::{Buf, BufMut, BytesMut};

use crate::modules::parse_error::ParseError;

/// Reads an RFC 9000 variable-length integer, advancing the cursor.
pub fn read_variable_integer(buf: &mut Cursor<&[u8]>) -> Result<u64, ParseError> {
    if buf.remaining() == 0 {
        return Err(ParseError::NeedMoreData);
    }

    let first_byte = buf.get_u8();
    let msb2 = first_byte >> 6;
    let mut value: u64 = (first_byte & 0x3f).into();

    let rest_len = (1usize << msb2) - 1;
    if buf.remaining() < rest_len {
        return Err(ParseError::NeedMoreData);
    }

    for _ in 0..rest_len {
        let next_byte = buf.get_u8();
        value = (value << 8) | next_byte as u64;
    }

    Ok(value)
}

pub fn write_variable_integer(value: u64) -> BytesMut {
    let mut buf = BytesMut::with_capacity(8);

    if value < 0x40 {
        buf.put_u8(value as u8);
    } else if value < 0x4000 {
        buf.put_u16(value as u16 | 0x4000);
    } else if value < 0x4000_0000 {
        buf.put_u32(value as u32 | 0x8000_0000);
    } else if value < 0x4000_0000_0000_0000 {
        buf.put_u64(value | 0xc000_0000_0000_0000);
    } else {
        unreachable!("Invalid use of `write_variable_integer` with {}", value);
    }

    buf
}

pub fn read_u8(buf: &mut Cursor<&[u8]>) -> Result<u8, ParseError> {
    if buf.remaining() < 1 {
        return Err(ParseError::NeedMoreData);
    }
    Ok(buf.get_u8())
}

#[cfg(test)]
mod decoder {
    use super::read_variable_integer;
    use crate::modules::parse_error::ParseError;
    use bytes::{Buf, BufMut, BytesMut};
    use std::io::Cursor;

    #[test]
    fn decode_single_byte() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x3f);
        buf.put_u32(0xdeadbeef);

        let mut cur = Cursor::new(&buf[..]);
        let decoded_value = read_variable_integer(&mut cur).unwrap();

        assert_eq!(decoded_value, 0x3f);
        assert_eq!(cur.remaining(), 4);
    }

    #[test]
    fn decode_two_bytes() {
        let mut buf = BytesMut::new();
        buf.put_u16(0x7fec);
        buf.put_u8(0x05);

        let mut cur = Cursor::new(&buf[..]);
        let decoded_value = read_variable_integer(&mut cur).unwrap();

        assert_eq!(decoded_value, 0x3fec);
        assert_eq!(cur.remaining(), 1);
    }

    #[test]
    fn decode_four_bytes() {
        let mut buf = BytesMut::new();
        buf.put_u32(0xbaaaaaad);

        let mut cur = Cursor::new(&buf[..]);
        let decoded_value = read_variable_integer(&mut cur).unwrap();

        assert_eq!(decoded_value, 0x3aaaaaad);
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn decode_eight_bytes() {
        let mut buf = BytesMut::new();
        buf.put_u64(0xdeadbeefbaaaaaad);

        let mut cur = Cursor::new(&buf[..]);
        let decoded_value = read_variable_integer(&mut cur).unwrap();

        assert_eq!(decoded_value, 0x1eadbeefbaaaaaad);
    }

    #[test]
    fn decode_empty_buffer() {
        let buf = BytesMut::new();

        let mut cur = Cursor::new(&buf[..]);
        let result = read_variable_integer(&mut cur);

        assert_eq!(result, Err(ParseError::NeedMoreData));
    }

    #[test]
    fn decode_truncated_multi_byte() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x80);

        let mut cur = Cursor::new(&buf[..]);
        let result = read_variable_integer(&mut cur);

        assert_eq!(result, Err(ParseError::NeedMoreData));
    }
}

#[cfg(test)]
mod encoder {
    use super::write_variable_integer;
    use bytes::Buf;

    #[test]
    fn encode_single_byte() {
        let mut buf = write_variable_integer(0x05);
        assert_eq!(buf.get_u8(), 0x05);
    }

    #[test]
    fn encode_two_bytes() {
        let mut buf = write_variable_integer(0x3fec);
        assert_eq!(buf.get_u16(), 0x7fec);
    }

    #[test]
    fn encode_four_bytes() {
        let mut buf = write_variable_integer(0x3aaaaaad);
        assert_eq!(buf.get_u32(), 0xbaaaaaad);
    }

    #[test]
    fn encode_eight_bytes() {
        let mut buf = write_variable_integer(0x1eadbeefbaaaaaad);
        assert_eq!(buf.get_u64(), 0xdeadbeefbaaaaaad);
    }
}
