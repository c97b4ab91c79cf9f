use std::io::Cursor;

use bytes::{Buf, BytesMut};

use crate::modules::control_message_type::ControlMessageType;
use crate::modules::messages::control_messages::announce::Announce;
use crate::modules::messages::control_messages::announce_cancel::AnnounceCancel;
use crate::modules::messages::control_messages::announce_error::AnnounceError;
use crate::modules::messages::control_messages::announce_ok::AnnounceOk;
use crate::modules::messages::control_messages::client_setup::ClientSetup;
use crate::modules::messages::control_messages::fetch::Fetch;
use crate::modules::messages::control_messages::fetch_error::FetchError;
use crate::modules::messages::control_messages::fetch_ok::FetchOk;
use crate::modules::messages::control_messages::max_subscribe_id::MaxSubscribeId;
use crate::modules::messages::control_messages::server_setup::ServerSetup;
use crate::modules::messages::control_messages::subscribe::Subscribe;
use crate::modules::messages::control_messages::subscribe_done::SubscribeDone;
use crate::modules::messages::control_messages::subscribe_error::SubscribeError;
use crate::modules::messages::control_messages::subscribe_ok::SubscribeOk;
use crate::modules::messages::control_messages::subscribe_update::SubscribeUpdate;
use crate::modules::messages::control_messages::unsubscribe::Unsubscribe;
use crate::modules::messages::moqt_payload::MoqtPayload;
use crate::modules::parse_error::ParseError;
use crate::modules::variable_integer::read_variable_integer;

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    ClientSetup(ClientSetup),
    ServerSetup(ServerSetup),
    Subscribe(Subscribe),
    SubscribeOk(SubscribeOk),
    SubscribeError(SubscribeError),
    SubscribeUpdate(SubscribeUpdate),
    Unsubscribe(Unsubscribe),
    SubscribeDone(SubscribeDone),
    Announce(Announce),
    AnnounceOk(AnnounceOk),
    AnnounceError(AnnounceError),
    AnnounceCancel(AnnounceCancel),
    MaxSubscribeId(MaxSubscribeId),
    Fetch(Fetch),
    FetchOk(FetchOk),
    FetchError(FetchError),
}

/// Tries to parse one control message off the front of `buf`.
///
/// Returns `None` when the buffer holds only part of a message; the
/// buffer is left untouched so the attempt can be repeated once more
/// bytes arrive.
pub fn parse_control_message(buf: &mut BytesMut) -> Result<Option<ControlMessage>, ParseError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut cur = Cursor::new(&buf[..]);
    let result = parse_one(&mut cur);
    match result {
        Ok(message) => {
            buf.advance(cur.position() as usize);
            Ok(Some(message))
        }
        Err(ParseError::NeedMoreData) => Ok(None),
        Err(error) => Err(error),
    }
}

fn parse_one(cur: &mut Cursor<&[u8]>) -> Result<ControlMessage, ParseError> {
    let type_u64 = read_variable_integer(cur)?;
    let message_type = ControlMessageType::try_from(type_u64 as u8)
        .map_err(|_| ParseError::violation(format!("unknown control message type {type_u64}")))?;

    let message = match message_type {
        ControlMessageType::ClientSetup => {
            ControlMessage::ClientSetup(ClientSetup::depacketize(cur)?)
        }
        ControlMessageType::ServerSetup => {
            ControlMessage::ServerSetup(ServerSetup::depacketize(cur)?)
        }
        ControlMessageType::Subscribe => ControlMessage::Subscribe(Subscribe::depacketize(cur)?),
        ControlMessageType::SubscribeOk => {
            ControlMessage::SubscribeOk(SubscribeOk::depacketize(cur)?)
        }
        ControlMessageType::SubscribeError => {
            ControlMessage::SubscribeError(SubscribeError::depacketize(cur)?)
        }
        ControlMessageType::SubscribeUpdate => {
            ControlMessage::SubscribeUpdate(SubscribeUpdate::depacketize(cur)?)
        }
        ControlMessageType::UnSubscribe => {
            ControlMessage::Unsubscribe(Unsubscribe::depacketize(cur)?)
        }
        ControlMessageType::SubscribeDone => {
            ControlMessage::SubscribeDone(SubscribeDone::depacketize(cur)?)
        }
        ControlMessageType::Announce => ControlMessage::Announce(Announce::depacketize(cur)?),
        ControlMessageType::AnnounceOk => {
            ControlMessage::AnnounceOk(AnnounceOk::depacketize(cur)?)
        }
        ControlMessageType::AnnounceError => {
            ControlMessage::AnnounceError(AnnounceError::depacketize(cur)?)
        }
        ControlMessageType::AnnounceCancel => {
            ControlMessage::AnnounceCancel(AnnounceCancel::depacketize(cur)?)
        }
        ControlMessageType::MaxSubscribeId => {
            ControlMessage::MaxSubscribeId(MaxSubscribeId::depacketize(cur)?)
        }
        ControlMessageType::Fetch => ControlMessage::Fetch(Fetch::depacketize(cur)?),
        ControlMessageType::FetchOk => ControlMessage::FetchOk(FetchOk::depacketize(cur)?),
        ControlMessageType::FetchError => {
            ControlMessage::FetchError(FetchError::depacketize(cur)?)
        }
    };
    Ok(message)
}

#[cfg(test)]
mod success {
    use super::*;
    use crate::modules::message_framer::serialize_control_message;

    #[test]
    fn parse_split_across_reads() {
        let unsubscribe = ControlMessage::Unsubscribe(Unsubscribe { subscribe_id: 3 });
        let wire = serialize_control_message(&unsubscribe);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&wire[..1]);
        assert_eq!(parse_control_message(&mut buf).unwrap(), None);

        buf.extend_from_slice(&wire[1..]);
        assert_eq!(parse_control_message(&mut buf).unwrap(), Some(unsubscribe));
        assert!(buf.is_empty());
    }

    #[test]
    fn parse_two_messages_in_one_read() {
        let first = ControlMessage::MaxSubscribeId(MaxSubscribeId {
            max_subscribe_id: 11,
        });
        let second = ControlMessage::Unsubscribe(Unsubscribe { subscribe_id: 0 });

        let mut buf = BytesMut::new();
        buf.extend(serialize_control_message(&first));
        buf.extend(serialize_control_message(&second));

        assert_eq!(parse_control_message(&mut buf).unwrap(), Some(first));
        assert_eq!(parse_control_message(&mut buf).unwrap(), Some(second));
        assert_eq!(parse_control_message(&mut buf).unwrap(), None);
    }
}

#[cfg(test)]
mod failure {
    use super::*;

    #[test]
    fn unknown_message_type() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x3f, 0x00]);

        assert!(matches!(
            parse_control_message(&mut buf),
            Err(ParseError::ProtocolViolation(_))
        ));
    }
}
