use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

pub const MOQ_TRANSPORT_VERSION: u64 = 0xff000007;

// WebTransport allows splitting a session into several send groups with
// equal scheduling weight. The session never needs more than one.
pub const MOQT_SEND_GROUP_ID: u64 = 0;

// The control stream outranks every data stream.
pub const CONTROL_STREAM_SEND_ORDER: u64 = u64::MAX;

pub const DEFAULT_SUBSCRIBER_PRIORITY: u8 = 0x80;

// Stream reset codes carried in RESET_STREAM / STOP_SENDING.
pub const RESET_CODE_SUBSCRIPTION_GONE: u64 = 0x0;
pub const RESET_CODE_TIMED_OUT: u64 = 0x1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u64)]
pub enum TerminationErrorCode {
    NoError = 0x0,
    InternalError = 0x1,
    Unauthorized = 0x2,
    ProtocolViolation = 0x3,
    DuplicateTrackAlias = 0x4,
    ParameterLengthMismatch = 0x5,
    TooManySubscribes = 0x6,
    GoawayTimeout = 0x10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u64)]
pub enum SubscribeErrorCode {
    InternalError = 0x0,
    InvalidRange = 0x1,
    RetryTrackAlias = 0x2,
    TrackDoesNotExist = 0x3,
    Unauthorized = 0x4,
    Timeout = 0x5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u64)]
pub enum SubscribeDoneCode {
    Unsubscribed = 0x0,
    InternalError = 0x1,
    Unauthorized = 0x2,
    TrackEnded = 0x3,
    SubscriptionEnded = 0x4,
    GoingAway = 0x5,
    Expired = 0x6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u64)]
pub enum AnnounceErrorCode {
    InternalError = 0x0,
    Unauthorized = 0x1,
    Timeout = 0x2,
    NotSupported = 0x3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnderlayType {
    Quic,
    WebTransport,
}
