pub mod config;
pub mod control_stream;
pub mod error;
pub mod incoming_data_stream;
pub mod outgoing_data_stream;
pub mod priority;
pub mod published_fetch;
pub mod published_subscription;
pub mod publisher;
pub mod remote_track;
pub mod send_stream_map;
pub mod session;
pub mod subscribe_window;
pub mod transport;
