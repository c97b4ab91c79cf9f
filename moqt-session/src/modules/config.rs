use moqt_wire::constants::{UnderlayType, MOQ_TRANSPORT_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    Client,
    Server,
}

/// Knobs fixed for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct SessionParameters {
    pub perspective: Perspective,
    pub underlay: UnderlayType,
    /// Only sent in CLIENT_SETUP when the underlay is raw QUIC.
    pub path: String,
    pub version: u64,
    /// How many incoming subscribes and fetches this endpoint accepts.
    pub max_subscribe_id: u64,
    pub support_object_acks: bool,
    /// Deliver object payload fragments to the application as they
    /// arrive instead of reassembling whole objects first.
    pub deliver_partial_objects: bool,
}

impl SessionParameters {
    pub fn new(perspective: Perspective) -> Self {
        SessionParameters {
            perspective,
            underlay: UnderlayType::WebTransport,
            path: String::new(),
            version: MOQ_TRANSPORT_VERSION,
            max_subscribe_id: 100,
            support_object_acks: false,
            deliver_partial_objects: false,
        }
    }
}
