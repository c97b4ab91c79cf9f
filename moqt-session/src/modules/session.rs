use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::{Rc, Weak};

use moqt_wire::constants::{
    AnnounceErrorCode, SubscribeDoneCode, SubscribeErrorCode, TerminationErrorCode,
    CONTROL_STREAM_SEND_ORDER, DEFAULT_SUBSCRIBER_PRIORITY, MOQT_SEND_GROUP_ID,
    RESET_CODE_SUBSCRIPTION_GONE, RESET_CODE_TIMED_OUT,
};
use moqt_wire::data_stream_parser::{parse_datagram, ObjectFragment};
use moqt_wire::data_stream_type::DataStreamType;
use moqt_wire::full_sequence::{FullSequence, FullTrackName};
use moqt_wire::message_framer::serialize_control_message;
use moqt_wire::message_parser::{parse_control_message, ControlMessage};
use moqt_wire::messages::control_messages::announce::Announce;
use moqt_wire::messages::control_messages::announce_cancel::AnnounceCancel;
use moqt_wire::messages::control_messages::announce_error::AnnounceError;
use moqt_wire::messages::control_messages::announce_ok::AnnounceOk;
use moqt_wire::messages::control_messages::client_setup::ClientSetup;
use moqt_wire::messages::control_messages::fetch::Fetch;
use moqt_wire::messages::control_messages::fetch_error::FetchError;
use moqt_wire::messages::control_messages::fetch_ok::FetchOk;
use moqt_wire::messages::control_messages::max_subscribe_id::MaxSubscribeId;
use moqt_wire::messages::control_messages::server_setup::ServerSetup;
use moqt_wire::messages::control_messages::setup_parameters::Role;
use moqt_wire::messages::control_messages::subscribe::{FilterType, Subscribe};
use moqt_wire::messages::control_messages::subscribe_done::SubscribeDone;
use moqt_wire::messages::control_messages::subscribe_error::SubscribeError;
use moqt_wire::messages::control_messages::subscribe_ok::SubscribeOk;
use moqt_wire::messages::control_messages::subscribe_update::SubscribeUpdate;
use moqt_wire::messages::control_messages::unsubscribe::Unsubscribe;
use moqt_wire::messages::control_messages::version_specific_parameters::VersionSpecificParameter;
use moqt_wire::messages::data_streams::object_status::ObjectStatus;
use moqt_wire::messages::data_streams::{serialize_object_datagram, ObjectHeader};
use moqt_wire::parse_error::ParseError;

use crate::modules::config::{Perspective, SessionParameters};
use crate::modules::control_stream::ControlStream;
use crate::modules::error::{SessionError, SessionResult};
use crate::modules::incoming_data_stream::IncomingDataStream;
use crate::modules::outgoing_data_stream::{
    write_object_to_stream, OutgoingDataStream, SendOutcome,
};
use crate::modules::priority::{send_order_for_stream, SendOrder};
use crate::modules::published_fetch::{FetchStream, PublishedFetch};
use crate::modules::published_subscription::PublishedSubscription;
use crate::modules::publisher::{
    track_status_implies_having_data, ForwardingPreference, GetNextObjectResult, NoPublisher,
    ObjectListener, Publisher, TrackPublisher,
};
use crate::modules::remote_track::{StreamKey, SubscribeRemoteTrack, TrackVisitor};
use crate::modules::send_stream_map::ReducedSequenceIndex;
use crate::modules::transport::{StreamId, TransportSession};

pub type SubscribeParameters = Vec<VersionSpecificParameter>;

/// Fired once per outgoing ANNOUNCE, with the error the peer returned,
/// if any.
pub type OutgoingAnnounceCallback =
    Box<dyn FnOnce(&[String], Option<(AnnounceErrorCode, String)>)>;

pub struct SessionCallbacks {
    /// Fired once when setup negotiation completes.
    pub session_established: Option<Box<dyn FnOnce()>>,
    /// Fired at most once with the reason the session died.
    pub session_terminated: Option<Box<dyn FnOnce(&str)>>,
    /// Invoked per incoming ANNOUNCE; `Some` rejects it.
    pub incoming_announce: Box<dyn FnMut(&[String]) -> Option<(AnnounceErrorCode, String)>>,
}

impl Default for SessionCallbacks {
    fn default() -> Self {
        Self {
            session_established: None,
            session_terminated: None,
            incoming_announce: Box::new(|_| None),
        }
    }
}

/// The MoQT session: a state machine between one transport session and
/// the application.
///
/// The embedder forwards transport events into the `on_*` methods; each
/// call runs to completion. The handle is cheap to clone; all state
/// lives behind it, owned by id so stream and publisher callbacks can
/// revalidate their target on every entry.
pub struct MoqtSession<T: TransportSession> {
    inner: Rc<RefCell<SessionInner<T>>>,
}

impl<T: TransportSession> Clone for MoqtSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub(crate) struct SessionInner<T: TransportSession> {
    transport: T,
    parameters: SessionParameters,
    callbacks: SessionCallbacks,
    publisher: Rc<dyn Publisher>,
    weak_self: Weak<RefCell<SessionInner<T>>>,

    control_stream: Option<ControlStream>,
    /// Non-empty once the session is poisoned; set exactly once.
    error: String,
    peer_role: Role,
    peer_supports_object_ack: bool,

    // Upstream subscription state. `subscribe_by_alias` owns the
    // tracks; the other two maps mirror it and are inserted and removed
    // together with it.
    subscribe_by_alias: HashMap<u64, SubscribeRemoteTrack>,
    upstream_by_id: HashMap<u64, u64>,
    upstream_by_name: HashMap<FullTrackName, u64>,
    next_subscribe_id: u64,
    next_remote_track_alias: u64,
    peer_max_subscribe_id: u64,

    // Downstream state.
    next_incoming_subscribe_id: u64,
    local_max_subscribe_id: u64,
    published_subscriptions: HashMap<u64, PublishedSubscription>,
    subscribed_track_names: HashSet<FullTrackName>,
    incoming_fetches: HashMap<u64, PublishedFetch>,
    /// Cross-subscription order of waiters for outgoing stream
    /// capacity; the last element is the highest send order.
    subscribes_with_queued_outgoing_data_streams: BTreeSet<(SendOrder, u64)>,

    pending_outgoing_announces: HashMap<Vec<String>, OutgoingAnnounceCallback>,

    incoming_data_streams: HashMap<StreamId, IncomingDataStream>,
    outgoing_data_streams: HashMap<StreamId, OutgoingDataStream>,
    fetch_streams: HashMap<StreamId, FetchStream>,
}

/// Object-listener handle registered with a track publisher on behalf of
/// one downstream subscription. Holds the session weakly; if the session
/// is gone the notification is dropped.
struct SubscriptionListener<T: TransportSession> {
    session: Weak<RefCell<SessionInner<T>>>,
    subscription_id: u64,
}

impl<T: TransportSession> SubscriptionListener<T> {
    fn with_session(&self, operation: impl FnOnce(&mut SessionInner<T>) -> SessionResult) {
        let Some(inner) = self.session.upgrade() else {
            return;
        };
        let mut inner = inner.borrow_mut();
        if let Err(error) = operation(&mut inner) {
            inner.fail(error);
        }
    }
}

impl<T: TransportSession> ObjectListener for SubscriptionListener<T> {
    fn on_new_object_available(&self, sequence: FullSequence) {
        let subscription_id = self.subscription_id;
        self.with_session(|inner| inner.on_new_object_available(subscription_id, sequence));
    }

    fn on_new_fin_available(&self, sequence: FullSequence) {
        let subscription_id = self.subscription_id;
        self.with_session(|inner| inner.on_new_fin_available(subscription_id, sequence));
    }

    fn on_group_abandoned(&self, group_id: u64) {
        let subscription_id = self.subscription_id;
        self.with_session(|inner| inner.on_group_abandoned(subscription_id, group_id));
    }

    fn on_track_publisher_gone(&self) {
        let subscription_id = self.subscription_id;
        self.with_session(|inner| {
            inner.subscribe_is_done(
                subscription_id,
                SubscribeDoneCode::GoingAway,
                "Publisher is gone",
            )?;
            Ok(())
        });
    }
}

fn publisher_has_data(publisher: &dyn TrackPublisher) -> bool {
    publisher
        .track_status()
        .map(track_status_implies_having_data)
        .unwrap_or(false)
}

impl<T: TransportSession> MoqtSession<T> {
    pub fn new(transport: T, parameters: SessionParameters, callbacks: SessionCallbacks) -> Self {
        let local_max_subscribe_id = parameters.max_subscribe_id;
        let inner = Rc::new_cyclic(|weak| {
            RefCell::new(SessionInner {
                transport,
                parameters,
                callbacks,
                publisher: Rc::new(NoPublisher),
                weak_self: weak.clone(),
                control_stream: None,
                error: String::new(),
                peer_role: Role::PubSub,
                peer_supports_object_ack: false,
                subscribe_by_alias: HashMap::new(),
                upstream_by_id: HashMap::new(),
                upstream_by_name: HashMap::new(),
                next_subscribe_id: 0,
                next_remote_track_alias: 0,
                peer_max_subscribe_id: 0,
                next_incoming_subscribe_id: 0,
                local_max_subscribe_id,
                published_subscriptions: HashMap::new(),
                subscribed_track_names: HashSet::new(),
                incoming_fetches: HashMap::new(),
                subscribes_with_queued_outgoing_data_streams: BTreeSet::new(),
                pending_outgoing_announces: HashMap::new(),
                incoming_data_streams: HashMap::new(),
                outgoing_data_streams: HashMap::new(),
                fetch_streams: HashMap::new(),
            })
        });
        Self { inner }
    }

    /// Installs the source of local tracks. Until called, every incoming
    /// SUBSCRIBE and FETCH is refused with `TrackDoesNotExist`.
    pub fn set_publisher(&self, publisher: Rc<dyn Publisher>) {
        self.inner.borrow_mut().publisher = publisher;
    }

    fn run(&self, operation: impl FnOnce(&mut SessionInner<T>) -> SessionResult) {
        let mut inner = self.inner.borrow_mut();
        if let Err(error) = operation(&mut inner) {
            inner.fail(error);
        }
    }

    // Transport events.

    pub fn on_session_ready(&self) {
        self.run(|inner| inner.handle_session_ready());
    }

    pub fn on_session_closed(&self, error_message: &str) {
        self.inner.borrow_mut().handle_session_closed(error_message);
    }

    pub fn on_incoming_bidirectional_stream_available(&self) {
        self.run(|inner| inner.handle_incoming_bidirectional_streams());
    }

    pub fn on_incoming_unidirectional_stream_available(&self) {
        self.run(|inner| inner.handle_incoming_unidirectional_streams());
    }

    pub fn on_datagram_received(&self, datagram: &[u8]) {
        self.run(|inner| inner.handle_datagram_received(datagram));
    }

    pub fn on_can_create_new_outgoing_unidirectional_stream(&self) {
        self.run(|inner| inner.handle_can_create_new_outgoing_unidirectional_stream());
    }

    pub fn on_can_read(&self, stream_id: StreamId) {
        self.run(|inner| inner.handle_can_read(stream_id));
    }

    pub fn on_can_write(&self, stream_id: StreamId) {
        self.run(|inner| inner.handle_can_write(stream_id));
    }

    pub fn on_reset_stream_received(&self, stream_id: StreamId, error_code: u64) {
        self.run(|inner| inner.handle_reset_or_stop_sending(stream_id, error_code));
    }

    pub fn on_stop_sending_received(&self, stream_id: StreamId, error_code: u64) {
        self.run(|inner| inner.handle_reset_or_stop_sending(stream_id, error_code));
    }

    pub fn on_stream_closed(&self, stream_id: StreamId) {
        self.inner.borrow_mut().handle_stream_closed(stream_id);
    }

    // Application surface.

    pub fn subscribe_absolute(
        &self,
        name: FullTrackName,
        start_group: u64,
        start_object: u64,
        visitor: Option<Rc<RefCell<dyn TrackVisitor>>>,
        parameters: SubscribeParameters,
    ) -> bool {
        let message = Subscribe::new(
            0,
            0,
            name,
            DEFAULT_SUBSCRIBER_PRIORITY,
            None,
            FilterType::AbsoluteStart,
            Some(start_group),
            Some(start_object),
            None,
            None,
            parameters,
        );
        self.subscribe_with(message, visitor)
    }

    pub fn subscribe_absolute_range(
        &self,
        name: FullTrackName,
        start_group: u64,
        start_object: u64,
        end_group: u64,
        end_object: Option<u64>,
        visitor: Option<Rc<RefCell<dyn TrackVisitor>>>,
        parameters: SubscribeParameters,
    ) -> bool {
        if end_group < start_group {
            tracing::error!("subscription end is before beginning");
            return false;
        }
        if end_group == start_group && end_object.is_some_and(|end| end < start_object) {
            tracing::error!("subscription end is before beginning");
            return false;
        }
        let message = Subscribe::new(
            0,
            0,
            name,
            DEFAULT_SUBSCRIBER_PRIORITY,
            None,
            FilterType::AbsoluteRange,
            Some(start_group),
            Some(start_object),
            Some(end_group),
            end_object,
            parameters,
        );
        self.subscribe_with(message, visitor)
    }

    /// Subscribes from the current object onward.
    pub fn subscribe_current_object(
        &self,
        name: FullTrackName,
        visitor: Option<Rc<RefCell<dyn TrackVisitor>>>,
        parameters: SubscribeParameters,
    ) -> bool {
        let message = Subscribe::new(
            0,
            0,
            name,
            DEFAULT_SUBSCRIBER_PRIORITY,
            None,
            FilterType::LatestObject,
            None,
            None,
            None,
            None,
            parameters,
        );
        self.subscribe_with(message, visitor)
    }

    /// Subscribes from the first object of the current group onward.
    pub fn subscribe_current_group(
        &self,
        name: FullTrackName,
        visitor: Option<Rc<RefCell<dyn TrackVisitor>>>,
        parameters: SubscribeParameters,
    ) -> bool {
        let message = Subscribe::new(
            0,
            0,
            name,
            DEFAULT_SUBSCRIBER_PRIORITY,
            None,
            FilterType::LatestGroup,
            None,
            None,
            None,
            None,
            parameters,
        );
        self.subscribe_with(message, visitor)
    }

    fn subscribe_with(
        &self,
        message: anyhow::Result<Subscribe>,
        visitor: Option<Rc<RefCell<dyn TrackVisitor>>>,
    ) -> bool {
        let message = match message {
            Ok(message) => message,
            Err(error) => {
                tracing::error!("invalid subscribe request: {error}");
                return false;
            }
        };
        self.inner.borrow_mut().subscribe(message, visitor, None)
    }

    pub fn unsubscribe(&self, name: &FullTrackName) {
        self.inner.borrow_mut().unsubscribe(name);
    }

    pub fn announce(&self, track_namespace: Vec<String>, callback: OutgoingAnnounceCallback) {
        self.inner.borrow_mut().announce(track_namespace, callback);
    }

    /// Raises the number of subscribes the peer may send and tells it so.
    pub fn grant_more_subscribes(&self, num_subscribes: u64) {
        self.run(|inner| {
            inner.local_max_subscribe_id += num_subscribes;
            let max_subscribe_id = inner.local_max_subscribe_id;
            inner.send_control_message(ControlMessage::MaxSubscribeId(MaxSubscribeId {
                max_subscribe_id,
            }))
        });
    }

    /// Terminates a downstream subscription, sending SUBSCRIBE_DONE and
    /// resetting its streams. Returns false when the id is unknown.
    pub fn subscribe_is_done(
        &self,
        subscribe_id: u64,
        code: SubscribeDoneCode,
        reason_phrase: &str,
    ) -> bool {
        let mut inner = self.inner.borrow_mut();
        match inner.subscribe_is_done(subscribe_id, code, reason_phrase) {
            Ok(done) => done,
            Err(error) => {
                inner.fail(error);
                false
            }
        }
    }
}

impl<T: TransportSession> SessionInner<T> {
    /// Single-shot poison: records the error, closes the transport and
    /// fires the termination callback. A second call is a no-op.
    fn error(&mut self, code: TerminationErrorCode, reason: &str) {
        if !self.error.is_empty() {
            return;
        }
        tracing::debug!(
            "MoQT session closed with code {:?} and message: {}",
            code,
            reason
        );
        self.error = reason.to_string();
        self.transport.close_session(u64::from(code), reason);
        if let Some(callback) = self.callbacks.session_terminated.take() {
            callback(reason);
        }
    }

    fn fail(&mut self, error: SessionError) {
        self.error(error.code, &error.reason);
    }

    fn handle_session_closed(&mut self, error_message: &str) {
        if !self.error.is_empty() {
            return;
        }
        tracing::debug!("underlying session closed with message: {}", error_message);
        self.error = error_message.to_string();
        if let Some(callback) = self.callbacks.session_terminated.take() {
            callback(error_message);
        }
    }

    fn send_control_message(&mut self, message: ControlMessage) -> SessionResult {
        let Some(control) = self.control_stream.as_mut() else {
            tracing::error!("trying to send a message while the control stream does not exist");
            return Ok(());
        };
        let serialized = serialize_control_message(&message);
        control.buffer_message(&serialized)?;
        control.flush(&mut self.transport)
    }

    fn install_control_stream(&mut self, stream_id: StreamId) {
        self.transport
            .set_priority(stream_id, MOQT_SEND_GROUP_ID, CONTROL_STREAM_SEND_ORDER);
        self.control_stream = Some(ControlStream::new(stream_id));
    }

    // Setup.

    fn handle_session_ready(&mut self) -> SessionResult {
        tracing::debug!("underlying session ready");
        if self.parameters.perspective == Perspective::Server {
            return Ok(());
        }

        let Some(stream_id) = self.transport.open_outgoing_bidirectional_stream() else {
            return Err(SessionError::internal("Unable to open a control stream"));
        };
        self.install_control_stream(stream_id);
        let setup = ClientSetup {
            supported_versions: vec![self.parameters.version],
            role: Role::PubSub,
            path: (self.parameters.underlay != moqt_wire::constants::UnderlayType::WebTransport)
                .then(|| self.parameters.path.clone()),
            max_subscribe_id: Some(self.parameters.max_subscribe_id),
            supports_object_ack: self.parameters.support_object_acks,
        };
        self.send_control_message(ControlMessage::ClientSetup(setup))?;
        tracing::debug!("sent the SETUP message");
        Ok(())
    }

    fn handle_client_setup(&mut self, message: ClientSetup) -> SessionResult {
        if self.parameters.perspective == Perspective::Client {
            return Err(SessionError::protocol_violation(
                "Received CLIENT_SETUP from server",
            ));
        }
        if !message.supported_versions.contains(&self.parameters.version) {
            return Err(SessionError::protocol_violation(format!(
                "Version mismatch: expected 0x{:x}",
                self.parameters.version
            )));
        }
        self.peer_supports_object_ack = message.supports_object_ack;
        tracing::debug!("received the SETUP message");

        let response = ServerSetup {
            selected_version: self.parameters.version,
            role: Role::PubSub,
            max_subscribe_id: Some(self.parameters.max_subscribe_id),
            supports_object_ack: self.parameters.support_object_acks,
        };
        self.send_control_message(ControlMessage::ServerSetup(response))?;
        tracing::debug!("sent the SETUP message");

        if let Some(max_subscribe_id) = message.max_subscribe_id {
            self.peer_max_subscribe_id = max_subscribe_id;
        }
        if let Some(callback) = self.callbacks.session_established.take() {
            callback();
        }
        self.peer_role = message.role;
        Ok(())
    }

    fn handle_server_setup(&mut self, message: ServerSetup) -> SessionResult {
        if self.parameters.perspective == Perspective::Server {
            return Err(SessionError::protocol_violation(
                "Received SERVER_SETUP from client",
            ));
        }
        if message.selected_version != self.parameters.version {
            return Err(SessionError::protocol_violation(format!(
                "Version mismatch: expected 0x{:x}",
                self.parameters.version
            )));
        }
        self.peer_supports_object_ack = message.supports_object_ack;
        tracing::debug!("received the SETUP message");
        if let Some(max_subscribe_id) = message.max_subscribe_id {
            self.peer_max_subscribe_id = max_subscribe_id;
        }
        if let Some(callback) = self.callbacks.session_established.take() {
            callback();
        }
        self.peer_role = message.role;
        Ok(())
    }

    // Stream plumbing.

    fn handle_incoming_bidirectional_streams(&mut self) -> SessionResult {
        while let Some(stream_id) = self.transport.accept_incoming_bidirectional_stream() {
            if self.control_stream.is_some() {
                return Err(SessionError::protocol_violation(
                    "Bidirectional stream already open",
                ));
            }
            self.install_control_stream(stream_id);
            self.process_control_stream_read()?;
        }
        Ok(())
    }

    fn handle_incoming_unidirectional_streams(&mut self) -> SessionResult {
        while let Some(stream_id) = self.transport.accept_incoming_unidirectional_stream() {
            self.incoming_data_streams
                .insert(stream_id, IncomingDataStream::new(stream_id));
            self.process_incoming_data_stream_read(stream_id)?;
        }
        Ok(())
    }

    fn handle_can_read(&mut self, stream_id: StreamId) -> SessionResult {
        if self
            .control_stream
            .as_ref()
            .is_some_and(|control| control.stream_id == stream_id)
        {
            return self.process_control_stream_read();
        }
        if self.incoming_data_streams.contains_key(&stream_id) {
            return self.process_incoming_data_stream_read(stream_id);
        }
        Ok(())
    }

    fn handle_can_write(&mut self, stream_id: StreamId) -> SessionResult {
        if self
            .control_stream
            .as_ref()
            .is_some_and(|control| control.stream_id == stream_id)
        {
            let control = self.control_stream.as_mut().unwrap();
            return control.flush(&mut self.transport);
        }
        if self.outgoing_data_streams.contains_key(&stream_id) {
            return self.send_objects_on_stream(stream_id);
        }
        if self.fetch_streams.contains_key(&stream_id) {
            return self.drive_fetch_stream(stream_id);
        }
        Ok(())
    }

    fn handle_reset_or_stop_sending(
        &mut self,
        stream_id: StreamId,
        error_code: u64,
    ) -> SessionResult {
        if self
            .control_stream
            .as_ref()
            .is_some_and(|control| control.stream_id == stream_id)
        {
            return Err(SessionError::protocol_violation(format!(
                "Control stream reset with error code {error_code}"
            )));
        }
        // A reset data stream is benign; it may be a group abandon or
        // peer-side cleanup.
        self.handle_stream_closed(stream_id);
        Ok(())
    }

    fn handle_stream_closed(&mut self, stream_id: StreamId) {
        if let Some(stream) = self.outgoing_data_streams.remove(&stream_id) {
            if let Some(subscription) =
                self.published_subscriptions.get_mut(&stream.subscription_id)
            {
                subscription.on_data_stream_destroyed(stream_id, stream.next_object);
            }
        }
        self.incoming_data_streams.remove(&stream_id);
        self.fetch_streams.remove(&stream_id);
    }

    // Control plane.

    fn process_control_stream_read(&mut self) -> SessionResult {
        let stream_id = match self.control_stream.as_ref() {
            Some(control) => control.stream_id,
            None => return Ok(()),
        };
        {
            let control = self.control_stream.as_mut().unwrap();
            while let Some(chunk) = self.transport.read_chunk(stream_id) {
                control.recv_buffer.extend_from_slice(&chunk.data);
                if chunk.fin {
                    break;
                }
            }
        }
        loop {
            let message = {
                let control = self.control_stream.as_mut().unwrap();
                match parse_control_message(&mut control.recv_buffer) {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(ParseError::ProtocolViolation(reason)) => {
                        return Err(SessionError::protocol_violation(format!(
                            "Parse error: {reason}"
                        )));
                    }
                    Err(ParseError::NeedMoreData) => unreachable!(),
                }
            };
            self.handle_control_message(message)?;
        }
        Ok(())
    }

    fn handle_control_message(&mut self, message: ControlMessage) -> SessionResult {
        match message {
            ControlMessage::ClientSetup(message) => self.handle_client_setup(message),
            ControlMessage::ServerSetup(message) => self.handle_server_setup(message),
            ControlMessage::Subscribe(message) => self.handle_subscribe(message),
            ControlMessage::SubscribeOk(message) => self.handle_subscribe_ok(message),
            ControlMessage::SubscribeError(message) => self.handle_subscribe_error(message),
            ControlMessage::SubscribeUpdate(message) => self.handle_subscribe_update(message),
            ControlMessage::Unsubscribe(message) => self.handle_unsubscribe(message),
            ControlMessage::SubscribeDone(message) => {
                tracing::debug!(
                    "received SUBSCRIBE_DONE for subscribe_id = {}",
                    message.subscribe_id
                );
                Ok(())
            }
            ControlMessage::Announce(message) => self.handle_announce(message),
            ControlMessage::AnnounceOk(message) => self.handle_announce_ok(message),
            ControlMessage::AnnounceError(message) => self.handle_announce_error(message),
            ControlMessage::AnnounceCancel(message) => self.handle_announce_cancel(message),
            ControlMessage::MaxSubscribeId(message) => self.handle_max_subscribe_id(message),
            ControlMessage::Fetch(message) => self.handle_fetch(message),
            ControlMessage::FetchOk(_) | ControlMessage::FetchError(_) => {
                Err(SessionError::protocol_violation(
                    "Received FETCH response without an outstanding FETCH",
                ))
            }
        }
    }

    fn validate_subscribe_id(&mut self, subscribe_id: u64) -> SessionResult {
        if self.peer_role == Role::Publisher {
            return Err(SessionError::protocol_violation(
                "Received SUBSCRIBE from publisher",
            ));
        }
        if subscribe_id >= self.local_max_subscribe_id {
            return Err(SessionError::too_many_subscribes(
                "Received SUBSCRIBE with too large ID",
            ));
        }
        if subscribe_id < self.next_incoming_subscribe_id {
            return Err(SessionError::protocol_violation(
                "Subscribe ID not monotonically increasing",
            ));
        }
        self.next_incoming_subscribe_id = subscribe_id + 1;
        Ok(())
    }

    fn send_subscribe_error(
        &mut self,
        message: &Subscribe,
        error_code: SubscribeErrorCode,
        reason_phrase: &str,
    ) -> SessionResult {
        let subscribe_error = SubscribeError {
            subscribe_id: message.subscribe_id,
            error_code,
            reason_phrase: reason_phrase.to_string(),
            track_alias: message.track_alias,
        };
        self.send_control_message(ControlMessage::SubscribeError(subscribe_error))
    }

    fn handle_subscribe(&mut self, message: Subscribe) -> SessionResult {
        self.validate_subscribe_id(message.subscribe_id)?;
        let track_name = message.full_track_name();
        tracing::debug!("received a SUBSCRIBE for {}", track_name);

        let track_publisher = match self.publisher.get_track(&track_name) {
            Ok(track_publisher) => track_publisher,
            Err(error) => {
                tracing::debug!(
                    "SUBSCRIBE for {} rejected by the application: {}",
                    track_name,
                    error
                );
                return self.send_subscribe_error(
                    &message,
                    SubscribeErrorCode::TrackDoesNotExist,
                    &error.to_string(),
                );
            }
        };
        let largest_id =
            publisher_has_data(track_publisher.as_ref()).then(|| track_publisher.largest_sequence());
        if let (Some(start_group), Some(largest)) = (message.start_group, largest_id) {
            if start_group < largest.group {
                return self.send_subscribe_error(
                    &message,
                    SubscribeErrorCode::InvalidRange,
                    "SUBSCRIBE starts in previous group",
                );
            }
        }
        if self.subscribed_track_names.contains(&track_name) {
            return Err(SessionError::protocol_violation(
                "Duplicate subscribe for track",
            ));
        }
        if self
            .published_subscriptions
            .contains_key(&message.subscribe_id)
        {
            return self.send_subscribe_error(
                &message,
                SubscribeErrorCode::InternalError,
                "Duplicate subscribe ID",
            );
        }

        let delivery_order = track_publisher.delivery_order();
        let mut subscription = PublishedSubscription::new(
            &message,
            track_publisher.clone(),
            largest_id.unwrap_or_default(),
        );
        let listener: Rc<dyn ObjectListener> = Rc::new(SubscriptionListener {
            session: self.weak_self.clone(),
            subscription_id: message.subscribe_id,
        });
        track_publisher.add_object_listener(listener.clone());
        subscription.set_listener(listener);
        tracing::debug!("created subscription for {}", track_name);
        self.subscribed_track_names.insert(track_name);
        self.published_subscriptions
            .insert(message.subscribe_id, subscription);

        let subscribe_ok = SubscribeOk {
            subscribe_id: message.subscribe_id,
            expires: 0,
            group_order: delivery_order,
            largest_id,
            parameters: vec![],
        };
        self.send_control_message(ControlMessage::SubscribeOk(subscribe_ok))?;

        if largest_id.is_some() {
            self.backfill(message.subscribe_id)?;
        }
        Ok(())
    }

    fn handle_subscribe_ok(&mut self, message: SubscribeOk) -> SessionResult {
        let Some(&track_alias) = self.upstream_by_id.get(&message.subscribe_id) else {
            // Subscription state may have been torn down locally already.
            tracing::debug!(
                "received SUBSCRIBE_OK for subscribe_id = {} but no track exists",
                message.subscribe_id
            );
            return Ok(());
        };
        let Some(track) = self.subscribe_by_alias.get_mut(&track_alias) else {
            return Ok(());
        };
        tracing::debug!(
            "received SUBSCRIBE_OK for subscribe_id = {} {}",
            message.subscribe_id,
            track.full_track_name()
        );
        track.on_object_or_ok();
        let name = track.full_track_name().clone();
        if let Some(visitor) = track.visitor() {
            visitor
                .borrow_mut()
                .on_reply(&name, message.largest_id, None);
        }
        Ok(())
    }

    fn handle_subscribe_error(&mut self, message: SubscribeError) -> SessionResult {
        let Some(&track_alias) = self.upstream_by_id.get(&message.subscribe_id) else {
            tracing::debug!(
                "received SUBSCRIBE_ERROR for subscribe_id = {} but no track exists",
                message.subscribe_id
            );
            return Ok(());
        };
        if let Some(track) = self.subscribe_by_alias.get(&track_alias) {
            if !track.error_is_allowed() {
                return Err(SessionError::protocol_violation(
                    "Received SUBSCRIBE_ERROR after SUBSCRIBE_OK or objects",
                ));
            }
        }
        // Tear down the mirrors first so a retry does not look like a
        // duplicate subscription.
        self.upstream_by_id.remove(&message.subscribe_id);
        let Some(track) = self.subscribe_by_alias.remove(&track_alias) else {
            return Ok(());
        };
        self.upstream_by_name.remove(track.full_track_name());
        tracing::debug!(
            "received SUBSCRIBE_ERROR for subscribe_id = {} ({}), error = {:?} ({})",
            message.subscribe_id,
            track.full_track_name(),
            message.error_code,
            message.reason_phrase
        );
        if message.error_code == SubscribeErrorCode::RetryTrackAlias {
            // Automatically resubscribe with the suggested alias.
            let (subscribe, visitor) = track.into_subscribe();
            self.subscribe(subscribe, visitor, Some(message.track_alias));
        } else if let Some(visitor) = track.visitor() {
            visitor.borrow_mut().on_reply(
                track.full_track_name(),
                None,
                Some(&message.reason_phrase),
            );
        }
        Ok(())
    }

    fn handle_unsubscribe(&mut self, message: Unsubscribe) -> SessionResult {
        self.subscribe_is_done(message.subscribe_id, SubscribeDoneCode::Unsubscribed, "")?;
        Ok(())
    }

    fn handle_subscribe_update(&mut self, message: SubscribeUpdate) -> SessionResult {
        let Some(subscription) = self.published_subscriptions.get_mut(&message.subscribe_id)
        else {
            return Ok(());
        };
        let start = FullSequence::new(message.start_group, message.start_object);
        // An absent end object with an end group present means the whole
        // of that group.
        let end = message
            .end_group
            .map(|end_group| FullSequence::new(end_group, message.end_object.unwrap_or(u64::MAX)));
        let update = subscription.update(start, end, message.subscriber_priority);
        if let Some((old, new)) = update {
            self.update_queued_send_order(message.subscribe_id, old, new);
        }
        Ok(())
    }

    fn handle_announce(&mut self, message: Announce) -> SessionResult {
        if self.peer_role == Role::Subscriber {
            return Err(SessionError::protocol_violation(
                "Received ANNOUNCE from Subscriber",
            ));
        }
        let response = (self.callbacks.incoming_announce)(&message.track_namespace);
        match response {
            Some((error_code, reason_phrase)) => {
                let reply = AnnounceError {
                    track_namespace: message.track_namespace,
                    error_code,
                    reason_phrase,
                };
                self.send_control_message(ControlMessage::AnnounceError(reply))
            }
            None => {
                let reply = AnnounceOk {
                    track_namespace: message.track_namespace,
                };
                self.send_control_message(ControlMessage::AnnounceOk(reply))
            }
        }
    }

    fn handle_announce_ok(&mut self, message: AnnounceOk) -> SessionResult {
        let Some(callback) = self
            .pending_outgoing_announces
            .remove(&message.track_namespace)
        else {
            return Err(SessionError::protocol_violation(
                "Received ANNOUNCE_OK for nonexistent announce",
            ));
        };
        callback(&message.track_namespace, None);
        Ok(())
    }

    fn handle_announce_error(&mut self, message: AnnounceError) -> SessionResult {
        let Some(callback) = self
            .pending_outgoing_announces
            .remove(&message.track_namespace)
        else {
            return Err(SessionError::protocol_violation(
                "Received ANNOUNCE_ERROR for nonexistent announce",
            ));
        };
        callback(
            &message.track_namespace,
            Some((message.error_code, message.reason_phrase)),
        );
        Ok(())
    }

    fn handle_announce_cancel(&mut self, message: AnnounceCancel) -> SessionResult {
        // Not yet surfaced to the application.
        tracing::debug!(
            "received ANNOUNCE_CANCEL for {}",
            message.track_namespace.join("/")
        );
        Ok(())
    }

    fn handle_max_subscribe_id(&mut self, message: MaxSubscribeId) -> SessionResult {
        if self.peer_role == Role::Subscriber {
            return Err(SessionError::protocol_violation(
                "Received MAX_SUBSCRIBE_ID from Subscriber",
            ));
        }
        if message.max_subscribe_id < self.peer_max_subscribe_id {
            return Err(SessionError::protocol_violation(
                "MAX_SUBSCRIBE_ID message has lower value than previous",
            ));
        }
        self.peer_max_subscribe_id = message.max_subscribe_id;
        Ok(())
    }

    fn handle_fetch(&mut self, message: Fetch) -> SessionResult {
        self.validate_subscribe_id(message.subscribe_id)?;
        let track_name = message.full_track_name();
        tracing::debug!("received a FETCH for {}", track_name);

        let track_publisher = match self.publisher.get_track(&track_name) {
            Ok(track_publisher) => track_publisher,
            Err(error) => {
                tracing::debug!(
                    "FETCH for {} rejected by the application: {}",
                    track_name,
                    error
                );
                let fetch_error = FetchError {
                    subscribe_id: message.subscribe_id,
                    error_code: SubscribeErrorCode::TrackDoesNotExist,
                    reason_phrase: error.to_string(),
                };
                return self.send_control_message(ControlMessage::FetchError(fetch_error));
            }
        };
        let group_order = message
            .group_order
            .unwrap_or_else(|| track_publisher.delivery_order());
        let fetch_task = track_publisher.fetch(
            FullSequence::new(message.start_group, message.start_object),
            message.end_group,
            message.end_object,
            group_order,
        );
        if let Err(error) = fetch_task.status() {
            tracing::debug!("FETCH for {} could not initialize the task", track_name);
            let fetch_error = FetchError {
                subscribe_id: message.subscribe_id,
                error_code: SubscribeErrorCode::InvalidRange,
                reason_phrase: error.to_string(),
            };
            return self.send_control_message(ControlMessage::FetchError(fetch_error));
        }
        let largest_id = fetch_task.largest_id().unwrap_or_default();
        self.incoming_fetches
            .insert(message.subscribe_id, PublishedFetch::new(fetch_task));

        let fetch_ok = FetchOk {
            subscribe_id: message.subscribe_id,
            group_order,
            largest_id,
            parameters: vec![],
        };
        self.send_control_message(ControlMessage::FetchOk(fetch_ok))?;

        if self
            .transport
            .can_open_next_outgoing_unidirectional_stream()
        {
            self.open_fetch_stream(message.subscribe_id)?;
        } else {
            // Queue the fetch for a stream alongside the subscriptions.
            let send_order = send_order_for_stream(
                message.subscriber_priority,
                track_publisher.publisher_priority(),
                0,
                0,
                group_order,
            );
            self.update_queued_send_order(message.subscribe_id, None, Some(send_order));
        }
        Ok(())
    }

    // Outgoing SUBSCRIBE / ANNOUNCE.

    fn supports_object_ack(&self) -> bool {
        self.parameters.support_object_acks && self.peer_supports_object_ack
    }

    fn subscribe(
        &mut self,
        mut message: Subscribe,
        visitor: Option<Rc<RefCell<dyn TrackVisitor>>>,
        provided_track_alias: Option<u64>,
    ) -> bool {
        if self.peer_role == Role::Subscriber {
            tracing::debug!("tried to send SUBSCRIBE to subscriber peer");
            return false;
        }
        if self.next_subscribe_id >= self.peer_max_subscribe_id {
            tracing::debug!(
                "tried to send SUBSCRIBE with ID {} which is greater than the maximum ID {}",
                self.next_subscribe_id,
                self.peer_max_subscribe_id
            );
            return false;
        }
        let track_name = message.full_track_name();
        if self.upstream_by_name.contains_key(&track_name) {
            tracing::debug!(
                "tried to send SUBSCRIBE for {} which is already subscribed",
                track_name
            );
            return false;
        }
        if let Some(track_alias) = provided_track_alias {
            if self.subscribe_by_alias.contains_key(&track_alias) {
                self.fail(SessionError::protocol_violation(
                    "Provided track alias already in use",
                ));
                return false;
            }
        }
        message.subscribe_id = self.next_subscribe_id;
        self.next_subscribe_id += 1;
        message.track_alias = provided_track_alias.unwrap_or_else(|| {
            let track_alias = self.next_remote_track_alias;
            self.next_remote_track_alias += 1;
            track_alias
        });
        if !self.supports_object_ack()
            && message
                .parameters
                .iter()
                .any(|parameter| matches!(parameter, VersionSpecificParameter::ObjectAckWindow(_)))
        {
            tracing::warn!(
                "attempting to set an object ack window on a connection that does not support it"
            );
            message
                .parameters
                .retain(|parameter| {
                    !matches!(parameter, VersionSpecificParameter::ObjectAckWindow(_))
                });
        }
        if let Err(error) = self.send_control_message(ControlMessage::Subscribe(message.clone())) {
            self.fail(error);
            return false;
        }
        tracing::debug!("sent SUBSCRIBE message for {}", track_name);
        let track = SubscribeRemoteTrack::new(message, visitor);
        self.upstream_by_name.insert(track_name, track.track_alias());
        self.upstream_by_id
            .insert(track.subscribe_id(), track.track_alias());
        self.subscribe_by_alias.insert(track.track_alias(), track);
        true
    }

    fn unsubscribe(&mut self, name: &FullTrackName) {
        let Some(&track_alias) = self.upstream_by_name.get(name) else {
            return;
        };
        let Some(track) = self.subscribe_by_alias.remove(&track_alias) else {
            return;
        };
        let message = Unsubscribe {
            subscribe_id: track.subscribe_id(),
        };
        if let Err(error) = self.send_control_message(ControlMessage::Unsubscribe(message)) {
            self.fail(error);
        }
        self.upstream_by_name.remove(name);
        self.upstream_by_id.remove(&track.subscribe_id());
    }

    fn announce(&mut self, track_namespace: Vec<String>, callback: OutgoingAnnounceCallback) {
        if self.peer_role == Role::Publisher {
            callback(
                &track_namespace,
                Some((
                    AnnounceErrorCode::InternalError,
                    "ANNOUNCE cannot be sent to Publisher".to_string(),
                )),
            );
            return;
        }
        if self.pending_outgoing_announces.contains_key(&track_namespace) {
            callback(
                &track_namespace,
                Some((
                    AnnounceErrorCode::InternalError,
                    "ANNOUNCE message already outstanding for namespace".to_string(),
                )),
            );
            return;
        }
        let message = Announce {
            track_namespace: track_namespace.clone(),
            parameters: vec![],
        };
        if let Err(error) = self.send_control_message(ControlMessage::Announce(message)) {
            self.fail(error);
            return;
        }
        tracing::debug!("sent ANNOUNCE message for {}", track_namespace.join("/"));
        self.pending_outgoing_announces
            .insert(track_namespace, callback);
    }

    // Downstream delivery.

    fn subscribe_is_done(
        &mut self,
        subscribe_id: u64,
        code: SubscribeDoneCode,
        reason_phrase: &str,
    ) -> SessionResult<bool> {
        let Some(subscription) = self.published_subscriptions.get(&subscribe_id) else {
            return Ok(false);
        };
        let streams_to_reset = subscription.all_streams();
        let final_id = subscription.largest_sent();
        let queued_head = subscription.queued_head_finalized();

        let subscribe_done = SubscribeDone {
            subscribe_id,
            status_code: code,
            reason_phrase: reason_phrase.to_string(),
            final_id,
        };
        self.send_control_message(ControlMessage::SubscribeDone(subscribe_done))?;
        tracing::debug!("sent SUBSCRIBE_DONE message for {}", subscribe_id);

        let subscription = self.published_subscriptions.remove(&subscribe_id).unwrap();
        self.subscribed_track_names.remove(subscription.track_name());
        if let Some(listener) = subscription.listener() {
            subscription.publisher().remove_object_listener(listener);
        }
        if let Some(send_order) = queued_head {
            self.subscribes_with_queued_outgoing_data_streams
                .remove(&(send_order, subscribe_id));
        }
        for stream_id in streams_to_reset {
            self.outgoing_data_streams.remove(&stream_id);
            self.transport
                .reset_with_user_code(stream_id, RESET_CODE_SUBSCRIPTION_GONE);
        }
        Ok(true)
    }

    fn on_new_object_available(
        &mut self,
        subscription_id: u64,
        sequence: FullSequence,
    ) -> SessionResult {
        let Some(subscription) = self.published_subscriptions.get_mut(&subscription_id) else {
            return Ok(());
        };
        if !subscription.in_window(sequence) {
            return Ok(());
        }
        if subscription.publisher().forwarding_preference() == ForwardingPreference::Datagram {
            return self.send_datagram(subscription_id, sequence);
        }
        match subscription.get_stream_for_sequence(sequence) {
            Some(stream_id) => self.send_objects_on_stream(stream_id),
            None => self.open_or_queue_data_stream(subscription_id, sequence),
        }
    }

    fn on_new_fin_available(
        &mut self,
        subscription_id: u64,
        sequence: FullSequence,
    ) -> SessionResult {
        let Some(subscription) = self.published_subscriptions.get_mut(&subscription_id) else {
            return Ok(());
        };
        if !subscription.in_window(sequence) {
            return Ok(());
        }
        let Some(stream_id) = subscription.get_stream_for_sequence(sequence) else {
            return Ok(());
        };
        let Some(stream) = self.outgoing_data_streams.get(&stream_id) else {
            return Ok(());
        };
        if stream.next_object <= sequence {
            // There is still data to send; the FIN rides the last object.
            return Ok(());
        }
        if !self.transport.send_fin(stream_id) {
            tracing::error!("writing pure FIN failed");
        }
        let next_object = stream.next_object;
        self.outgoing_data_streams.remove(&stream_id);
        if let Some(subscription) = self.published_subscriptions.get_mut(&subscription_id) {
            subscription.on_data_stream_destroyed(stream_id, next_object);
        }
        Ok(())
    }

    fn on_group_abandoned(&mut self, subscription_id: u64, group_id: u64) -> SessionResult {
        let Some(subscription) = self.published_subscriptions.get_mut(&subscription_id) else {
            return Ok(());
        };
        let streams = subscription.streams_for_group(group_id);
        for stream_id in streams {
            self.transport
                .reset_with_user_code(stream_id, RESET_CODE_TIMED_OUT);
            if let Some(stream) = self.outgoing_data_streams.remove(&stream_id) {
                if let Some(subscription) =
                    self.published_subscriptions.get_mut(&subscription_id)
                {
                    subscription.on_data_stream_destroyed(stream_id, stream.next_object);
                }
            }
        }
        Ok(())
    }

    /// After SUBSCRIBE_OK: one notification per cached mapping unit in
    /// the window; each stream pulls the rest from the cache itself.
    fn backfill(&mut self, subscription_id: u64) -> SessionResult {
        let (preference, objects) = {
            let Some(subscription) = self.published_subscriptions.get(&subscription_id) else {
                return Ok(());
            };
            let publisher = subscription.publisher().clone();
            let start = subscription.window_start();
            let end = publisher.largest_sequence();
            (
                publisher.forwarding_preference(),
                publisher.cached_objects_in_range(start, end),
            )
        };
        debug_assert!(objects.windows(2).all(|pair| pair[0] <= pair[1]));
        let mut already_opened: HashSet<ReducedSequenceIndex> = HashSet::new();
        for sequence in objects {
            if already_opened.insert(ReducedSequenceIndex::new(sequence, preference)) {
                self.on_new_object_available(subscription_id, sequence)?;
            }
        }
        Ok(())
    }

    fn send_datagram(&mut self, subscription_id: u64, sequence: FullSequence) -> SessionResult {
        let datagram = {
            let Some(subscription) = self.published_subscriptions.get_mut(&subscription_id)
            else {
                return Ok(());
            };
            let publisher = subscription.publisher().clone();
            let Some(object) = publisher.cached_object(sequence) else {
                tracing::error!("got notification about an object that is not in the cache");
                return Ok(());
            };
            let header = ObjectHeader {
                track_alias: subscription.track_alias(),
                group_id: object.sequence.group,
                subgroup_id: None,
                object_id: object.sequence.object,
                publisher_priority: publisher.publisher_priority(),
                object_status: object.status,
                payload_length: object.payload.len() as u64,
            };
            subscription.on_object_sent(object.sequence);
            serialize_object_datagram(&header, &object.payload)
        };
        self.transport.send_or_queue_datagram(datagram.freeze());
        Ok(())
    }

    fn open_or_queue_data_stream(
        &mut self,
        subscription_id: u64,
        first_object: FullSequence,
    ) -> SessionResult {
        if !self
            .transport
            .can_open_next_outgoing_unidirectional_stream()
        {
            let update = self
                .published_subscriptions
                .get_mut(&subscription_id)
                .and_then(|subscription| {
                    subscription.add_queued_outgoing_data_stream(first_object)
                });
            if let Some((old, new)) = update {
                self.update_queued_send_order(subscription_id, old, new);
            }
            return Ok(());
        }
        if let Some(stream_id) = self.open_data_stream(subscription_id, first_object) {
            self.send_objects_on_stream(stream_id)?;
        }
        Ok(())
    }

    fn open_data_stream(
        &mut self,
        subscription_id: u64,
        first_object: FullSequence,
    ) -> Option<StreamId> {
        let Some(stream_id) = self.transport.open_outgoing_unidirectional_stream() else {
            tracing::error!("opening a data stream while stream creation is blocked");
            return None;
        };
        let send_order = self
            .published_subscriptions
            .get(&subscription_id)?
            .get_send_order(first_object);
        self.transport
            .set_priority(stream_id, MOQT_SEND_GROUP_ID, send_order);
        self.published_subscriptions
            .get_mut(&subscription_id)
            .unwrap()
            .on_data_stream_created(stream_id, first_object);
        self.outgoing_data_streams.insert(
            stream_id,
            OutgoingDataStream::new(stream_id, subscription_id, first_object),
        );
        Some(stream_id)
    }

    fn send_objects_on_stream(&mut self, stream_id: StreamId) -> SessionResult {
        let Some(mut stream) = self.outgoing_data_streams.remove(&stream_id) else {
            return Ok(());
        };
        let Some(subscription) = self.published_subscriptions.get_mut(&stream.subscription_id)
        else {
            self.transport
                .reset_with_user_code(stream_id, RESET_CODE_SUBSCRIPTION_GONE);
            return Ok(());
        };
        match subscription.publisher().track_status() {
            Err(_) => {
                self.outgoing_data_streams.insert(stream_id, stream);
                return Ok(());
            }
            Ok(status) if !track_status_implies_having_data(status) => {
                return Err(SessionError::internal(
                    "Invalid track state provided by application",
                ));
            }
            Ok(_) => {}
        }
        let outcome = stream.send_objects(subscription, &mut self.transport)?;
        match outcome {
            SendOutcome::Finished => {
                subscription.on_data_stream_destroyed(stream_id, stream.next_object);
            }
            SendOutcome::Continue => {
                self.outgoing_data_streams.insert(stream_id, stream);
            }
        }
        Ok(())
    }

    fn update_queued_send_order(
        &mut self,
        subscription_id: u64,
        old_send_order: Option<SendOrder>,
        new_send_order: Option<SendOrder>,
    ) {
        if old_send_order == new_send_order {
            return;
        }
        if let Some(send_order) = old_send_order {
            self.subscribes_with_queued_outgoing_data_streams
                .remove(&(send_order, subscription_id));
        }
        if let Some(send_order) = new_send_order {
            self.subscribes_with_queued_outgoing_data_streams
                .insert((send_order, subscription_id));
        }
    }

    fn handle_can_create_new_outgoing_unidirectional_stream(&mut self) -> SessionResult {
        while self
            .transport
            .can_open_next_outgoing_unidirectional_stream()
        {
            let Some(&(send_order, subscription_id)) = self
                .subscribes_with_queued_outgoing_data_streams
                .iter()
                .next_back()
            else {
                break;
            };
            if !self.published_subscriptions.contains_key(&subscription_id) {
                // A FETCH needs only one stream; open it if the fetch is
                // still alive, then drop the entry either way. Entries
                // whose owner vanished are skipped silently.
                if self
                    .incoming_fetches
                    .get(&subscription_id)
                    .is_some_and(|fetch| fetch.stream_id().is_none())
                {
                    self.open_fetch_stream(subscription_id)?;
                }
                self.subscribes_with_queued_outgoing_data_streams
                    .remove(&(send_order, subscription_id));
                continue;
            }
            let Some((first_object, (old, new))) = self
                .published_subscriptions
                .get_mut(&subscription_id)
                .unwrap()
                .next_queued_outgoing_data_stream()
            else {
                self.subscribes_with_queued_outgoing_data_streams
                    .remove(&(send_order, subscription_id));
                continue;
            };
            self.update_queued_send_order(subscription_id, old, new);
            let Some(stream_id) = self.open_data_stream(subscription_id, first_object) else {
                return Ok(());
            };
            self.send_objects_on_stream(stream_id)?;
        }
        Ok(())
    }

    // Fetch delivery.

    fn open_fetch_stream(&mut self, fetch_id: u64) -> SessionResult {
        let Some(stream_id) = self.transport.open_outgoing_unidirectional_stream() else {
            tracing::error!("opening a fetch stream while stream creation is blocked");
            return Ok(());
        };
        if let Some(fetch) = self.incoming_fetches.get_mut(&fetch_id) {
            fetch.set_stream_id(stream_id);
        }
        self.fetch_streams
            .insert(stream_id, FetchStream::new(stream_id, fetch_id));
        if self.transport.can_write(stream_id) {
            self.drive_fetch_stream(stream_id)?;
        }
        Ok(())
    }

    /// Pulls objects out of the fetch task until the transport pushes
    /// back, the task runs dry, or the task finishes or fails.
    fn drive_fetch_stream(&mut self, stream_id: StreamId) -> SessionResult {
        let Some(stream) = self.fetch_streams.get_mut(&stream_id) else {
            return Ok(());
        };
        let fetch_id = stream.fetch_id;
        let Some(fetch) = self.incoming_fetches.get_mut(&fetch_id) else {
            self.fetch_streams.remove(&stream_id);
            return Ok(());
        };
        let mut finished = false;
        while self.transport.can_write(stream_id) {
            match fetch.fetch_task().next_object() {
                GetNextObjectResult::Object(object) => {
                    // Objects that do not exist are skipped in fetches.
                    if object.status == ObjectStatus::ObjectDoesNotExist {
                        continue;
                    }
                    write_object_to_stream(
                        &mut self.transport,
                        stream_id,
                        fetch_id,
                        &object,
                        DataStreamType::StreamHeaderFetch,
                        !stream.stream_header_written,
                        false,
                    )?;
                    stream.stream_header_written = true;
                }
                GetNextObjectResult::Pending => break,
                GetNextObjectResult::Eof => {
                    if !self.transport.send_fin(stream_id) {
                        tracing::debug!("sending FIN on stream {} failed", stream_id);
                    }
                    finished = true;
                    break;
                }
                GetNextObjectResult::Error(error_code) => {
                    self.transport.reset_with_user_code(stream_id, error_code);
                    finished = true;
                    break;
                }
            }
        }
        if finished {
            self.fetch_streams.remove(&stream_id);
            self.incoming_fetches.remove(&fetch_id);
        }
        Ok(())
    }

    // Incoming objects.

    fn process_incoming_data_stream_read(&mut self, stream_id: StreamId) -> SessionResult {
        let Some(mut stream) = self.incoming_data_streams.remove(&stream_id) else {
            return Ok(());
        };
        let finished = self.drive_incoming_data_stream(&mut stream)?;
        if !finished {
            self.incoming_data_streams.insert(stream_id, stream);
        }
        Ok(())
    }

    fn drive_incoming_data_stream(
        &mut self,
        stream: &mut IncomingDataStream,
    ) -> SessionResult<bool> {
        let mut fin = false;
        while let Some(chunk) = self.transport.read_chunk(stream.stream_id) {
            stream.buffer.extend_from_slice(&chunk.data);
            if chunk.fin {
                fin = true;
                break;
            }
        }
        loop {
            match stream.parser.next_fragment(&mut stream.buffer) {
                Ok(Some(fragment)) => self.handle_incoming_object(stream, fragment)?,
                Ok(None) => break,
                Err(ParseError::ProtocolViolation(reason)) => {
                    return Err(SessionError::protocol_violation(format!(
                        "Parse error: {reason}"
                    )));
                }
                Err(ParseError::NeedMoreData) => unreachable!(),
            }
        }
        if fin {
            if !stream.parser.is_at_object_boundary() || !stream.buffer.is_empty() {
                return Err(SessionError::protocol_violation(
                    "FIN received in the middle of an object",
                ));
            }
            return Ok(true);
        }
        Ok(false)
    }

    fn handle_incoming_object(
        &mut self,
        stream: &mut IncomingDataStream,
        fragment: ObjectFragment,
    ) -> SessionResult {
        let stream_type = stream.parser.stream_type().unwrap();
        tracing::trace!(
            "received OBJECT message on stream {} for track alias {} with sequence {}:{} priority {} length {}{}",
            stream.stream_id,
            fragment.header.track_alias,
            fragment.header.group_id,
            fragment.header.object_id,
            fragment.header.publisher_priority,
            fragment.payload.len(),
            if fragment.end_of_message { " F" } else { "" }
        );

        if !self.parameters.deliver_partial_objects {
            if !fragment.end_of_message {
                if stream.partial_object.is_empty() && fragment.header.payload_length > 0 {
                    // Reserve once so reassembly does not reallocate.
                    stream
                        .partial_object
                        .reserve(fragment.header.payload_length as usize);
                }
                stream.partial_object.extend_from_slice(&fragment.payload);
                return Ok(());
            }
            if !stream.partial_object.is_empty() {
                stream.partial_object.extend_from_slice(&fragment.payload);
            }
        }

        let key = stream.resolved_key.unwrap_or_else(|| {
            if stream_type == DataStreamType::StreamHeaderFetch {
                // The alias field carries a fetch id on fetch streams.
                StreamKey::ByFetchId(fragment.header.track_alias)
            } else {
                StreamKey::ByAlias(fragment.header.track_alias)
            }
        });
        let track_alias = match key {
            StreamKey::ByAlias(track_alias) => Some(track_alias),
            StreamKey::ByFetchId(fetch_id) => self.upstream_by_id.get(&fetch_id).copied(),
        };
        let track = track_alias.and_then(|alias| self.subscribe_by_alias.get_mut(&alias));
        let Some(track) = track else {
            // Object for a track that no longer exists.
            self.transport
                .send_stop_sending(stream.stream_id, RESET_CODE_SUBSCRIPTION_GONE);
            stream.partial_object.clear();
            return Ok(());
        };
        stream.resolved_key = Some(key);

        if !track.check_data_stream_type(stream_type) {
            return Err(SessionError::protocol_violation(
                "Received object for a track with a different stream type",
            ));
        }
        if !track.in_window(fragment.header.sequence()) {
            // Not an error; a recent SUBSCRIBE_UPDATE may have shrunk
            // the window.
            stream.partial_object.clear();
            return Ok(());
        }
        track.on_object_or_ok();
        let name = track.full_track_name().clone();
        let visitor = track.visitor();
        if let Some(visitor) = visitor {
            let deliver_partial = self.parameters.deliver_partial_objects;
            let payload: &[u8] = if !deliver_partial && !stream.partial_object.is_empty() {
                &stream.partial_object
            } else {
                &fragment.payload
            };
            let end_of_message = if deliver_partial {
                fragment.end_of_message
            } else {
                true
            };
            visitor.borrow_mut().on_object_fragment(
                &name,
                fragment.header.sequence(),
                fragment.header.publisher_priority,
                fragment.header.object_status,
                payload,
                end_of_message,
            );
        }
        stream.partial_object.clear();
        Ok(())
    }

    fn handle_datagram_received(&mut self, datagram: &[u8]) -> SessionResult {
        let Ok((header, payload)) = parse_datagram(datagram) else {
            return Err(SessionError::protocol_violation(
                "Malformed datagram received",
            ));
        };
        tracing::trace!(
            "received OBJECT datagram for track alias {} with sequence {}:{} priority {} length {}",
            header.track_alias,
            header.group_id,
            header.object_id,
            header.publisher_priority,
            payload.len()
        );
        let Some(track) = self.subscribe_by_alias.get_mut(&header.track_alias) else {
            return Ok(());
        };
        if !track.check_data_stream_type(DataStreamType::ObjectDatagram) {
            return Err(SessionError::protocol_violation(
                "Received DATAGRAM for non-datagram track",
            ));
        }
        let sequence = FullSequence::new(header.group_id, header.object_id);
        if !track.in_window(sequence) {
            return Ok(());
        }
        track.on_object_or_ok();
        let name = track.full_track_name().clone();
        if let Some(visitor) = track.visitor() {
            visitor.borrow_mut().on_object_fragment(
                &name,
                sequence,
                header.publisher_priority,
                header.object_status,
                &payload,
                true,
            );
        }
        Ok(())
    }
}
