use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Serialize)]
#[repr(u8)]
pub enum DataStreamType {
    ObjectDatagram = 0x1,
    StreamHeaderTrack = 0x2,
    StreamHeaderSubgroup = 0x4,
    StreamHeaderFetch = 0x5,
}
