use bytes::BytesMut;

use crate::modules::control_message_type::ControlMessageType;
use crate::modules::message_parser::ControlMessage;
use crate::modules::messages::moqt_payload::MoqtPayload;
use crate::modules::variable_integer::write_variable_integer;

pub fn control_message_type(message: &ControlMessage) -> ControlMessageType {
    match message {
        ControlMessage::ClientSetup(_) => ControlMessageType::ClientSetup,
        ControlMessage::ServerSetup(_) => ControlMessageType::ServerSetup,
        ControlMessage::Subscribe(_) => ControlMessageType::Subscribe,
        ControlMessage::SubscribeOk(_) => ControlMessageType::SubscribeOk,
        ControlMessage::SubscribeError(_) => ControlMessageType::SubscribeError,
        ControlMessage::SubscribeUpdate(_) => ControlMessageType::SubscribeUpdate,
        ControlMessage::Unsubscribe(_) => ControlMessageType::UnSubscribe,
        ControlMessage::SubscribeDone(_) => ControlMessageType::SubscribeDone,
        ControlMessage::Announce(_) => ControlMessageType::Announce,
        ControlMessage::AnnounceOk(_) => ControlMessageType::AnnounceOk,
        ControlMessage::AnnounceError(_) => ControlMessageType::AnnounceError,
        ControlMessage::AnnounceCancel(_) => ControlMessageType::AnnounceCancel,
        ControlMessage::MaxSubscribeId(_) => ControlMessageType::MaxSubscribeId,
        ControlMessage::Fetch(_) => ControlMessageType::Fetch,
        ControlMessage::FetchOk(_) => ControlMessageType::FetchOk,
        ControlMessage::FetchError(_) => ControlMessageType::FetchError,
    }
}

/// Serializes a control message with its type prefix.
pub fn serialize_control_message(message: &ControlMessage) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.extend(write_variable_integer(
        u8::from(control_message_type(message)) as u64,
    ));
    match message {
        ControlMessage::ClientSetup(payload) => payload.packetize(&mut buf),
        ControlMessage::ServerSetup(payload) => payload.packetize(&mut buf),
        ControlMessage::Subscribe(payload) => payload.packetize(&mut buf),
        ControlMessage::SubscribeOk(payload) => payload.packetize(&mut buf),
        ControlMessage::SubscribeError(payload) => payload.packetize(&mut buf),
        ControlMessage::SubscribeUpdate(payload) => payload.packetize(&mut buf),
        ControlMessage::Unsubscribe(payload) => payload.packetize(&mut buf),
        ControlMessage::SubscribeDone(payload) => payload.packetize(&mut buf),
        ControlMessage::Announce(payload) => payload.packetize(&mut buf),
        ControlMessage::AnnounceOk(payload) => payload.packetize(&mut buf),
        ControlMessage::AnnounceError(payload) => payload.packetize(&mut buf),
        ControlMessage::AnnounceCancel(payload) => payload.packetize(&mut buf),
        ControlMessage::MaxSubscribeId(payload) => payload.packetize(&mut buf),
        ControlMessage::Fetch(payload) => payload.packetize(&mut buf),
        ControlMessage::FetchOk(payload) => payload.packetize(&mut buf),
        ControlMessage::FetchError(payload) => payload.packetize(&mut buf),
    }
    buf
}
