pub mod control_messages;
pub mod data_streams;
pub mod moqt_payload;
