use std::collections::BTreeMap;
use std::rc::Rc;

use moqt_wire::full_sequence::{FullSequence, FullTrackName};
use moqt_wire::messages::control_messages::group_order::GroupOrder;
use moqt_wire::messages::control_messages::subscribe::Subscribe;

use crate::modules::priority::{
    send_order_for_stream, update_send_order_for_subscriber_priority, SendOrder,
};
use crate::modules::publisher::{
    track_status_implies_having_data, ForwardingPreference, ObjectListener, TrackPublisher,
};
use crate::modules::send_stream_map::SendStreamMap;
use crate::modules::subscribe_window::SubscribeWindow;
use crate::modules::transport::StreamId;

/// A change to this subscription's entry in the session's queue of
/// subscriptions waiting for stream capacity: remove `old`, insert
/// `new`. Send orders are finalized (subscriber priority applied).
pub(crate) type QueuedSendOrderUpdate = (Option<SendOrder>, Option<SendOrder>);

/// State for one subscription the peer holds on a local track.
///
/// Owns the subscription window, the stream map, and the queue of data
/// streams waiting for transport capacity. The session drives it; it
/// never touches the transport itself.
pub(crate) struct PublishedSubscription {
    track_alias: u64,
    track_name: FullTrackName,
    track_publisher: Rc<dyn TrackPublisher>,
    window: SubscribeWindow,
    subscriber_priority: u8,
    subscriber_delivery_order: Option<GroupOrder>,
    // Lazily initialized; the forwarding preference is unknown until the
    // publisher has data.
    stream_map: Option<SendStreamMap>,
    // Keyed by send order with the subscriber-priority bits zeroed so
    // entries stay put when the subscriber priority changes. Keeps the
    // earliest queued coordinate per mapping unit.
    queued_outgoing_data_streams: BTreeMap<SendOrder, FullSequence>,
    largest_sent: Option<FullSequence>,
    listener: Option<Rc<dyn ObjectListener>>,
}

impl PublishedSubscription {
    pub(crate) fn new(
        subscribe: &Subscribe,
        track_publisher: Rc<dyn TrackPublisher>,
        largest: FullSequence,
    ) -> Self {
        let window = SubscribeWindow::from_filter(
            subscribe.filter_type,
            subscribe.start_group,
            subscribe.start_object,
            subscribe.end_group,
            subscribe.end_object,
            largest,
        );
        Self {
            track_alias: subscribe.track_alias,
            track_name: subscribe.full_track_name(),
            track_publisher,
            window,
            subscriber_priority: subscribe.subscriber_priority,
            subscriber_delivery_order: subscribe.group_order,
            stream_map: None,
            queued_outgoing_data_streams: BTreeMap::new(),
            largest_sent: None,
            listener: None,
        }
    }

    pub(crate) fn track_alias(&self) -> u64 {
        self.track_alias
    }

    pub(crate) fn track_name(&self) -> &FullTrackName {
        &self.track_name
    }

    pub(crate) fn publisher(&self) -> &Rc<dyn TrackPublisher> {
        &self.track_publisher
    }

    pub(crate) fn set_listener(&mut self, listener: Rc<dyn ObjectListener>) {
        self.listener = Some(listener);
    }

    pub(crate) fn listener(&self) -> Option<&Rc<dyn ObjectListener>> {
        self.listener.as_ref()
    }

    pub(crate) fn in_window(&self, sequence: FullSequence) -> bool {
        self.window.in_window(sequence)
    }

    pub(crate) fn window_start(&self) -> FullSequence {
        self.window.start()
    }

    fn stream_map(&mut self) -> &mut SendStreamMap {
        if self.stream_map.is_none() {
            debug_assert!(self
                .track_publisher
                .track_status()
                .map(track_status_implies_having_data)
                .unwrap_or(false));
            self.stream_map = Some(SendStreamMap::new(
                self.track_publisher.forwarding_preference(),
            ));
        }
        self.stream_map.as_mut().unwrap()
    }

    pub(crate) fn get_stream_for_sequence(&mut self, sequence: FullSequence) -> Option<StreamId> {
        self.stream_map().get_stream_for_sequence(sequence)
    }

    pub(crate) fn on_data_stream_created(
        &mut self,
        stream_id: StreamId,
        start_sequence: FullSequence,
    ) {
        self.stream_map().add_stream(start_sequence, stream_id);
    }

    pub(crate) fn on_data_stream_destroyed(
        &mut self,
        stream_id: StreamId,
        end_sequence: FullSequence,
    ) {
        self.stream_map().remove_stream(end_sequence, stream_id);
    }

    pub(crate) fn streams_for_group(&mut self, group_id: u64) -> Vec<StreamId> {
        self.stream_map().get_streams_for_group(group_id)
    }

    pub(crate) fn all_streams(&self) -> Vec<StreamId> {
        match &self.stream_map {
            None => Vec::new(),
            Some(map) => map.all_streams(),
        }
    }

    pub(crate) fn get_send_order(&self, sequence: FullSequence) -> SendOrder {
        let publisher_priority = self.track_publisher.publisher_priority();
        let delivery_order = self
            .subscriber_delivery_order
            .unwrap_or_else(|| self.track_publisher.delivery_order());
        if self.track_publisher.forwarding_preference() == ForwardingPreference::Datagram {
            tracing::error!("datagram track requesting a send order");
            return 0;
        }
        send_order_for_stream(
            self.subscriber_priority,
            publisher_priority,
            sequence.group,
            sequence.subgroup,
            delivery_order,
        )
    }

    pub(crate) fn finalize_send_order(&self, send_order: SendOrder) -> SendOrder {
        update_send_order_for_subscriber_priority(send_order, self.subscriber_priority)
    }

    fn queued_head(&self) -> Option<SendOrder> {
        self.queued_outgoing_data_streams
            .last_key_value()
            .map(|(send_order, _)| *send_order)
    }

    pub(crate) fn queued_head_finalized(&self) -> Option<SendOrder> {
        self.queued_head()
            .map(|send_order| self.finalize_send_order(send_order))
    }

    pub(crate) fn has_queued_streams(&self) -> bool {
        !self.queued_outgoing_data_streams.is_empty()
    }

    /// Remembers that a stream for the mapping unit starting at
    /// `first_object` is wanted once the transport allows one. Returns
    /// the session-queue update when the head changed.
    pub(crate) fn add_queued_outgoing_data_stream(
        &mut self,
        first_object: FullSequence,
    ) -> Option<QueuedSendOrderUpdate> {
        let old_head = self.queued_head();
        let masked =
            update_send_order_for_subscriber_priority(self.get_send_order(first_object), 0);
        // A mapping unit already in the queue keeps its earliest object.
        self.queued_outgoing_data_streams
            .entry(masked)
            .or_insert(first_object);
        let new_head = self.queued_head();
        if old_head == new_head {
            return None;
        }
        Some((
            old_head.map(|send_order| self.finalize_send_order(send_order)),
            new_head.map(|send_order| self.finalize_send_order(send_order)),
        ))
    }

    /// Pops the highest-send-order queued stream. Returns its first
    /// object and the session-queue update.
    pub(crate) fn next_queued_outgoing_data_stream(
        &mut self,
    ) -> Option<(FullSequence, QueuedSendOrderUpdate)> {
        let (send_order, first_object) = self.queued_outgoing_data_streams.pop_last()?;
        let old = self.finalize_send_order(send_order);
        let new = self.queued_head_finalized();
        Some((first_object, (Some(old), new)))
    }

    pub(crate) fn set_subscriber_priority(&mut self, priority: u8) -> Option<QueuedSendOrderUpdate> {
        if priority == self.subscriber_priority {
            return None;
        }
        if self.queued_outgoing_data_streams.is_empty() {
            self.subscriber_priority = priority;
            return None;
        }
        let head = self.queued_head().unwrap();
        let old = self.finalize_send_order(head);
        self.subscriber_priority = priority;
        let new = self.finalize_send_order(head);
        Some((Some(old), Some(new)))
    }

    /// Applies SUBSCRIBE_UPDATE. Open streams pick the narrowed window
    /// up on their next write.
    pub(crate) fn update(
        &mut self,
        start: FullSequence,
        end: Option<FullSequence>,
        subscriber_priority: u8,
    ) -> Option<QueuedSendOrderUpdate> {
        self.window.update_start_end(start, end);
        self.set_subscriber_priority(subscriber_priority)
    }

    pub(crate) fn on_object_sent(&mut self, sequence: FullSequence) {
        self.largest_sent = Some(match self.largest_sent {
            None => sequence,
            Some(largest) => largest.max(sequence),
        });
    }

    pub(crate) fn largest_sent(&self) -> Option<FullSequence> {
        self.largest_sent
    }
}

#[cfg(test)]
mod success {
    use super::*;
    use crate::modules::publisher::{
        FetchTask, PublishedObject, TrackStatusCode,
    };
    use anyhow::Result;
    use moqt_wire::full_sequence::FullTrackName;
    use moqt_wire::messages::control_messages::subscribe::FilterType;

    struct StubTrackPublisher;

    impl TrackPublisher for StubTrackPublisher {
        fn track_name(&self) -> FullTrackName {
            FullTrackName::new(vec!["ns".to_string()], "a")
        }
        fn track_status(&self) -> Result<TrackStatusCode> {
            Ok(TrackStatusCode::InProgress)
        }
        fn largest_sequence(&self) -> FullSequence {
            FullSequence::new(5, 3)
        }
        fn delivery_order(&self) -> GroupOrder {
            GroupOrder::Ascending
        }
        fn publisher_priority(&self) -> u8 {
            0x80
        }
        fn forwarding_preference(&self) -> ForwardingPreference {
            ForwardingPreference::Subgroup
        }
        fn cached_object(&self, _sequence: FullSequence) -> Option<PublishedObject> {
            None
        }
        fn cached_objects_in_range(
            &self,
            _start: FullSequence,
            _end: FullSequence,
        ) -> Vec<FullSequence> {
            Vec::new()
        }
        fn fetch(
            &self,
            _start: FullSequence,
            _end_group: u64,
            _end_object: Option<u64>,
            _order: GroupOrder,
        ) -> Box<dyn FetchTask> {
            unimplemented!()
        }
        fn add_object_listener(&self, _listener: Rc<dyn ObjectListener>) {}
        fn remove_object_listener(&self, _listener: &Rc<dyn ObjectListener>) {}
    }

    fn test_subscription() -> PublishedSubscription {
        let subscribe = Subscribe::new(
            0,
            7,
            FullTrackName::new(vec!["ns".to_string()], "a"),
            0x80,
            None,
            FilterType::LatestGroup,
            None,
            None,
            None,
            None,
            vec![],
        )
        .unwrap();
        PublishedSubscription::new(&subscribe, Rc::new(StubTrackPublisher), FullSequence::new(5, 3))
    }

    #[test]
    fn largest_sent_is_monotonic() {
        let mut subscription = test_subscription();

        subscription.on_object_sent(FullSequence::new(5, 2));
        subscription.on_object_sent(FullSequence::new(5, 0));

        assert_eq!(subscription.largest_sent(), Some(FullSequence::new(5, 2)));
    }

    #[test]
    fn queue_orders_by_send_order() {
        let mut subscription = test_subscription();

        // Ascending delivery: group 5 outranks group 6.
        let update = subscription.add_queued_outgoing_data_stream(FullSequence::new(6, 0));
        assert!(update.is_some());
        let update = subscription.add_queued_outgoing_data_stream(FullSequence::new(5, 0));
        assert!(update.is_some());
        // Same mapping unit again changes nothing.
        let update = subscription.add_queued_outgoing_data_stream(FullSequence::new(5, 1));
        assert!(update.is_none());

        let (first_object, _) = subscription.next_queued_outgoing_data_stream().unwrap();
        assert_eq!(first_object, FullSequence::new(5, 0));
        let (first_object, (_, new)) = subscription.next_queued_outgoing_data_stream().unwrap();
        assert_eq!(first_object, FullSequence::new(6, 0));
        assert_eq!(new, None);
        assert!(!subscription.has_queued_streams());
    }

    #[test]
    fn subscriber_priority_change_rekeys_head() {
        let mut subscription = test_subscription();
        subscription.add_queued_outgoing_data_stream(FullSequence::new(5, 0));

        let (old, new) = subscription.set_subscriber_priority(0x10).unwrap();
        assert!(new.unwrap() > old.unwrap());
        assert_eq!(
            subscription.queued_head_finalized().unwrap(),
            new.unwrap()
        );
    }

    #[test]
    fn queue_key_is_stable_across_priority_change() {
        let mut subscription = test_subscription();
        subscription.add_queued_outgoing_data_stream(FullSequence::new(5, 0));
        subscription.set_subscriber_priority(0x10);

        // The entry is still found and drained.
        let (first_object, _) = subscription.next_queued_outgoing_data_stream().unwrap();
        assert_eq!(first_object, FullSequence::new(5, 0));
    }
}
