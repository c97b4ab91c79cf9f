use std::rc::Rc;

use anyhow::{bail, Result};
use bytes::Bytes;

use moqt_wire::full_sequence::{FullSequence, FullTrackName};
use moqt_wire::messages::control_messages::group_order::GroupOrder;
use moqt_wire::messages::data_streams::object_status::ObjectStatus;

/// Per-track choice of how objects travel to subscribers. Determines the
/// stream-mapping unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingPreference {
    Track,
    Subgroup,
    Datagram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatusCode {
    InProgress,
    DoesNotExist,
    NotYetBegun,
    Finished,
}

pub fn track_status_implies_having_data(status: TrackStatusCode) -> bool {
    matches!(
        status,
        TrackStatusCode::InProgress | TrackStatusCode::Finished
    )
}

/// One object as stored by a publisher's cache.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedObject {
    pub sequence: FullSequence,
    pub status: ObjectStatus,
    pub publisher_priority: u8,
    pub payload: Bytes,
    /// The carrier stream should FIN right after this object.
    pub fin_after_this: bool,
}

/// Callbacks a track publisher fires at its registered listeners.
/// Registration is by `Rc` identity.
pub trait ObjectListener {
    fn on_new_object_available(&self, sequence: FullSequence);
    fn on_new_fin_available(&self, sequence: FullSequence);
    fn on_group_abandoned(&self, group_id: u64);
    fn on_track_publisher_gone(&self);
}

pub enum GetNextObjectResult {
    Object(PublishedObject),
    /// Nothing available right now; the caller resumes when the stream
    /// next becomes writable.
    Pending,
    Eof,
    /// Terminal failure; carries the stream reset code.
    Error(u64),
}

/// A one-shot backfill task produced by [`TrackPublisher::fetch`].
pub trait FetchTask {
    /// Whether the task initialized against a valid range.
    fn status(&self) -> Result<()>;
    fn largest_id(&self) -> Option<FullSequence>;
    fn next_object(&mut self) -> GetNextObjectResult;
}

/// Source of objects for one track.
pub trait TrackPublisher {
    fn track_name(&self) -> FullTrackName;
    fn track_status(&self) -> Result<TrackStatusCode>;
    fn largest_sequence(&self) -> FullSequence;
    fn delivery_order(&self) -> GroupOrder;
    fn publisher_priority(&self) -> u8;
    fn forwarding_preference(&self) -> ForwardingPreference;
    /// The cached object at `sequence`, or the next one after it on the
    /// same carrier when the cache has gaps.
    fn cached_object(&self, sequence: FullSequence) -> Option<PublishedObject>;
    /// Coordinates of every cached object in `[start, end]`, ascending.
    fn cached_objects_in_range(&self, start: FullSequence, end: FullSequence) -> Vec<FullSequence>;
    fn fetch(
        &self,
        start: FullSequence,
        end_group: u64,
        end_object: Option<u64>,
        order: GroupOrder,
    ) -> Box<dyn FetchTask>;
    fn add_object_listener(&self, listener: Rc<dyn ObjectListener>);
    fn remove_object_listener(&self, listener: &Rc<dyn ObjectListener>);
}

/// Namespace-level lookup from track name to its publisher.
pub trait Publisher {
    fn get_track(&self, track_name: &FullTrackName) -> Result<Rc<dyn TrackPublisher>>;
}

/// Default publisher for sessions that never publish anything.
pub struct NoPublisher;

impl Publisher for NoPublisher {
    fn get_track(&self, _track_name: &FullTrackName) -> Result<Rc<dyn TrackPublisher>> {
        bail!("No tracks published")
    }
}
