use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

/// Status delivered in place of a payload for objects that do not exist
/// or that mark the end of a group or track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Serialize)]
#[repr(u64)]
pub enum ObjectStatus {
    Normal = 0x0,
    ObjectDoesNotExist = 0x1,
    GroupDoesNotExist = 0x2,
    EndOfGroup = 0x3,
    EndOfTrackAndGroup = 0x4,
    EndOfTrack = 0x5,
}
