use moqt_wire::constants::MOQT_SEND_GROUP_ID;
use moqt_wire::data_stream_type::DataStreamType;
use moqt_wire::full_sequence::FullSequence;
use moqt_wire::messages::data_streams::{serialize_object_header, ObjectHeader};

use crate::modules::error::{SessionError, SessionResult};
use crate::modules::published_subscription::PublishedSubscription;
use crate::modules::publisher::{ForwardingPreference, PublishedObject};
use crate::modules::transport::{StreamId, TransportSession};

/// Result of a drain pass over an outgoing data stream.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    /// Blocked on the transport or waiting for the publisher; the stream
    /// stays open.
    Continue,
    /// A FIN went out; the stream is done.
    Finished,
}

/// Write-side state of one outgoing data stream. The cursor
/// `next_object` is the next object this stream wants from the
/// publisher's cache.
pub(crate) struct OutgoingDataStream {
    pub(crate) stream_id: StreamId,
    pub(crate) subscription_id: u64,
    pub(crate) next_object: FullSequence,
    stream_header_written: bool,
}

impl OutgoingDataStream {
    pub(crate) fn new(
        stream_id: StreamId,
        subscription_id: u64,
        first_object: FullSequence,
    ) -> Self {
        Self {
            stream_id,
            subscription_id,
            next_object: first_object,
            stream_header_written: false,
        }
    }

    /// Writes cached objects from `next_object` on until the transport
    /// pushes back or the publisher runs dry.
    pub(crate) fn send_objects<T: TransportSession>(
        &mut self,
        subscription: &mut PublishedSubscription,
        transport: &mut T,
    ) -> SessionResult<SendOutcome> {
        let publisher = subscription.publisher().clone();
        while transport.can_write(self.stream_id) {
            let object = match publisher.cached_object(self.next_object) {
                Some(object) => object,
                // Wait for the next object notification.
                None => return Ok(SendOutcome::Continue),
            };
            if !subscription.in_window(self.next_object) {
                // A SUBSCRIBE_UPDATE narrowed the window; close out.
                if !transport.send_fin(self.stream_id) {
                    tracing::error!("writing FIN failed despite can_write");
                }
                return Ok(SendOutcome::Finished);
            }
            debug_assert!(self.next_object <= object.sequence);

            let stream_type = match publisher.forwarding_preference() {
                ForwardingPreference::Subgroup => DataStreamType::StreamHeaderSubgroup,
                ForwardingPreference::Track => DataStreamType::StreamHeaderTrack,
                ForwardingPreference::Datagram => {
                    tracing::error!("datagram track draining a data stream");
                    return Ok(SendOutcome::Continue);
                }
            };
            self.update_send_order(subscription, transport);
            self.next_object.object = object.sequence.object + 1;

            let fin = object.fin_after_this;
            write_object_to_stream(
                transport,
                self.stream_id,
                subscription.track_alias(),
                &object,
                stream_type,
                !self.stream_header_written,
                fin,
            )?;
            self.stream_header_written = true;
            subscription.on_object_sent(object.sequence);
            if fin {
                return Ok(SendOutcome::Finished);
            }
        }
        Ok(SendOutcome::Continue)
    }

    pub(crate) fn update_send_order<T: TransportSession>(
        &self,
        subscription: &PublishedSubscription,
        transport: &mut T,
    ) {
        transport.set_priority(
            self.stream_id,
            MOQT_SEND_GROUP_ID,
            subscription.get_send_order(self.next_object),
        );
    }
}

/// Serializes one object (header plus payload, vectored) onto a stream.
/// `id` is the track alias, or the subscribe id for fetch streams.
pub(crate) fn write_object_to_stream<T: TransportSession>(
    transport: &mut T,
    stream_id: StreamId,
    id: u64,
    object: &PublishedObject,
    stream_type: DataStreamType,
    is_first_on_stream: bool,
    fin: bool,
) -> SessionResult {
    debug_assert!(transport.can_write(stream_id));
    let header = ObjectHeader {
        track_alias: id,
        group_id: object.sequence.group,
        subgroup_id: Some(object.sequence.subgroup),
        object_id: object.sequence.object,
        publisher_priority: object.publisher_priority,
        object_status: object.status,
        payload_length: object.payload.len() as u64,
    };
    let serialized_header = serialize_object_header(&header, stream_type, is_first_on_stream);
    transport
        .writev(
            stream_id,
            &[&serialized_header[..], &object.payload[..]],
            fin,
        )
        .map_err(|_| SessionError::internal("Data stream write error"))?;
    tracing::trace!(
        "stream {} wrote {}, fin = {}",
        stream_id,
        object.sequence,
        fin
    );
    Ok(())
}
