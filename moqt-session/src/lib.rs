pub mod modules;

pub use modules::config::{Perspective, SessionParameters};
pub use modules::error::SessionError;
pub use modules::publisher::{
    FetchTask, ForwardingPreference, GetNextObjectResult, NoPublisher, ObjectListener,
    PublishedObject, Publisher, TrackPublisher, TrackStatusCode,
};
pub use modules::remote_track::TrackVisitor;
pub use modules::session::{
    MoqtSession, OutgoingAnnounceCallback, SessionCallbacks, SubscribeParameters,
};
pub use modules::subscribe_window::SubscribeWindow;
pub use modules::transport::{ReadChunk, StreamId, TransportSession};
