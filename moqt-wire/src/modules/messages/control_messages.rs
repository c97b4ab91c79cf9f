pub mod announce;
pub mod announce_cancel;
pub mod announce_error;
pub mod announce_ok;
pub mod client_setup;
pub mod fetch;
pub mod fetch_error;
pub mod fetch_ok;
pub mod group_order;
pub mod max_subscribe_id;
pub mod server_setup;
pub mod setup_parameters;
pub mod subscribe;
pub mod subscribe_done;
pub mod subscribe_error;
pub mod subscribe_ok;
pub mod subscribe_update;
pub mod unsubscribe;
pub mod version_specific_parameters;
