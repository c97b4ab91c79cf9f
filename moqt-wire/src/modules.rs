pub mod constants;
pub mod control_message_type;
pub mod data_stream_parser;
pub mod data_stream_type;
pub mod full_sequence;
pub mod message_framer;
pub mod message_parser;
pub mod messages;
pub mod parse_error;
pub mod variable_bytes;
pub mod variable_integer;
