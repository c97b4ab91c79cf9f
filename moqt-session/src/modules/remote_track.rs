use std::cell::RefCell;
use std::rc::Rc;

use moqt_wire::data_stream_type::DataStreamType;
use moqt_wire::full_sequence::{FullSequence, FullTrackName};
use moqt_wire::messages::control_messages::subscribe::Subscribe;
use moqt_wire::messages::data_streams::object_status::ObjectStatus;

use crate::modules::subscribe_window::SubscribeWindow;

/// How an incoming data stream names its track: subgroup and track
/// streams carry a track alias, fetch streams reuse the field for the
/// fetch's subscribe id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamKey {
    ByAlias(u64),
    ByFetchId(u64),
}

/// Application-side observer of one upstream subscription.
///
/// Callbacks must not re-enter the session; act on the session after the
/// current turn completes.
pub trait TrackVisitor {
    /// SUBSCRIBE_OK (with the publisher's largest sequence, if any) or a
    /// terminal SUBSCRIBE_ERROR.
    fn on_reply(
        &mut self,
        full_track_name: &FullTrackName,
        largest_id: Option<FullSequence>,
        error_reason: Option<&str>,
    );

    #[allow(clippy::too_many_arguments)]
    fn on_object_fragment(
        &mut self,
        full_track_name: &FullTrackName,
        sequence: FullSequence,
        publisher_priority: u8,
        object_status: ObjectStatus,
        payload: &[u8],
        end_of_message: bool,
    );
}

/// State for one subscription this endpoint sent to its peer.
pub(crate) struct SubscribeRemoteTrack {
    subscribe: Subscribe,
    full_track_name: FullTrackName,
    visitor: Option<Rc<RefCell<dyn TrackVisitor>>>,
    window: SubscribeWindow,
    /// Locked in by the first data stream or datagram for the track.
    data_stream_type: Option<DataStreamType>,
    received_ok_or_object: bool,
}

impl SubscribeRemoteTrack {
    pub(crate) fn new(
        subscribe: Subscribe,
        visitor: Option<Rc<RefCell<dyn TrackVisitor>>>,
    ) -> Self {
        let window = SubscribeWindow::from_filter(
            subscribe.filter_type,
            subscribe.start_group,
            subscribe.start_object,
            subscribe.end_group,
            subscribe.end_object,
            FullSequence::new(0, 0),
        );
        let full_track_name = subscribe.full_track_name();
        Self {
            subscribe,
            full_track_name,
            visitor,
            window,
            data_stream_type: None,
            received_ok_or_object: false,
        }
    }

    pub(crate) fn subscribe_id(&self) -> u64 {
        self.subscribe.subscribe_id
    }

    pub(crate) fn track_alias(&self) -> u64 {
        self.subscribe.track_alias
    }

    pub(crate) fn full_track_name(&self) -> &FullTrackName {
        &self.full_track_name
    }

    pub(crate) fn visitor(&self) -> Option<Rc<RefCell<dyn TrackVisitor>>> {
        self.visitor.clone()
    }

    /// Recovers the original SUBSCRIBE and visitor, for the automatic
    /// retry after SUBSCRIBE_ERROR(RetryTrackAlias).
    pub(crate) fn into_subscribe(self) -> (Subscribe, Option<Rc<RefCell<dyn TrackVisitor>>>) {
        (self.subscribe, self.visitor)
    }

    pub(crate) fn in_window(&self, sequence: FullSequence) -> bool {
        self.window.in_window(sequence)
    }

    /// The first stream type seen is binding for the rest of the track.
    pub(crate) fn check_data_stream_type(&mut self, stream_type: DataStreamType) -> bool {
        match self.data_stream_type {
            None => {
                self.data_stream_type = Some(stream_type);
                true
            }
            Some(locked_in) => locked_in == stream_type,
        }
    }

    pub(crate) fn on_object_or_ok(&mut self) {
        self.received_ok_or_object = true;
    }

    /// SUBSCRIBE_ERROR is only acceptable before any SUBSCRIBE_OK or
    /// object has arrived.
    pub(crate) fn error_is_allowed(&self) -> bool {
        !self.received_ok_or_object
    }
}

#[cfg(test)]
mod success {
    use super::*;
    use moqt_wire::full_sequence::FullTrackName;
    use moqt_wire::messages::control_messages::subscribe::FilterType;

    fn test_subscribe() -> Subscribe {
        Subscribe::new(
            1,
            7,
            FullTrackName::new(vec!["ns".to_string()], "a"),
            0x80,
            None,
            FilterType::AbsoluteStart,
            Some(2),
            Some(0),
            None,
            None,
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn stream_type_locks_in() {
        let mut track = SubscribeRemoteTrack::new(test_subscribe(), None);

        assert!(track.check_data_stream_type(DataStreamType::StreamHeaderSubgroup));
        assert!(track.check_data_stream_type(DataStreamType::StreamHeaderSubgroup));
        assert!(!track.check_data_stream_type(DataStreamType::ObjectDatagram));
    }

    #[test]
    fn error_allowed_until_ok_or_object() {
        let mut track = SubscribeRemoteTrack::new(test_subscribe(), None);

        assert!(track.error_is_allowed());
        track.on_object_or_ok();
        assert!(!track.error_is_allowed());
    }

    #[test]
    fn window_follows_filter() {
        let track = SubscribeRemoteTrack::new(test_subscribe(), None);

        assert!(!track.in_window(FullSequence::new(1, 5)));
        assert!(track.in_window(FullSequence::new(2, 0)));
    }
}
