use std::{convert::TryFrom, num::NonZeroU16};

use ntex_bytes::{ByteString, Bytes};
use serde::de::DeserializeOwned;
use serde_json::Error as JsonError;

use crate::types::{packet_type, QoS};

/// Connect Return Code
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ConnectAckReason {
    /// Connection accepted
    ConnectionAccepted = 0,
    /// Connection Refused, unacceptable protocol version
    UnacceptableProtocolVersion = 1,
    /// Connection Refused, identifier rejected
    IdentifierRejected = 2,
    /// Connection Refused, Server unavailable
    ServiceUnavailable = 3,
    /// Connection Refused, bad user name or password
    BadUserNameOrPassword = 4,
    /// Connection Refused, not authorized
    NotAuthorized = 5,
    /// Reserved
    Reserved = 6,
}

impl ConnectAckReason {
    pub fn reason(self) -> &'static str {
        match self {
            ConnectAckReason::ConnectionAccepted => "Connection Accepted",
            ConnectAckReason::UnacceptableProtocolVersion => {
                "Connection Refused, unacceptable protocol version"
            }
            ConnectAckReason::IdentifierRejected => "Connection Refused, identifier rejected",
            ConnectAckReason::ServiceUnavailable => "Connection Refused, Server unavailable",
            ConnectAckReason::BadUserNameOrPassword => {
                "Connection Refused, bad user name or password"
            }
            ConnectAckReason::NotAuthorized => "Connection Refused, not authorized",
            ConnectAckReason::Reserved => "Connection Refused",
        }
    }
}

impl From<u8> for ConnectAckReason {
    fn from(val: u8) -> Self {
        match val {
            0 => ConnectAckReason::ConnectionAccepted,
            1 => ConnectAckReason::UnacceptableProtocolVersion,
            2 => ConnectAckReason::IdentifierRejected,
            3 => ConnectAckReason::ServiceUnavailable,
            4 => ConnectAckReason::BadUserNameOrPassword,
            5 => ConnectAckReason::NotAuthorized,
            _ => ConnectAckReason::Reserved,
        }
    }
}

#[derive(Default, Debug, PartialEq, Eq, Clone)]
/// Connect packet content
pub struct Connect {
    /// the handling of the Session state.
    pub clean_session: bool,
    /// a time interval measured in seconds.
    pub keep_alive: u16,
    /// identifies the Client to the Server.
    pub client_id: ByteString,
}

impl Connect {
    /// Set client_id value
    pub fn client_id<T>(mut self, client_id: T) -> Self
    where
        ByteString: From<T>,
    {
        self.client_id = client_id.into();
        self
    }

    /// Set clean session flag
    pub fn clean_session(mut self, val: bool) -> Self {
        self.clean_session = val;
        self
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
/// Publish message
pub struct Publish {
    /// this might be re-delivery of an earlier attempt to send the Packet.
    pub dup: bool,
    pub retain: bool,
    /// the level of assurance for delivery of an Application Message.
    pub qos: QoS,
    /// the information channel to which payload data is published.
    pub topic: ByteString,
    /// only present in PUBLISH Packets where the QoS level is 1 or 2.
    pub packet_id: Option<NonZeroU16>,
    /// the Application Message that is being published.
    pub payload: Bytes,
}

impl Publish {
    /// Create QoS 0 publish message
    pub fn new<T>(topic: T, payload: Bytes) -> Self
    where
        ByteString: From<T>,
    {
        Publish {
            payload,
            dup: false,
            retain: false,
            qos: QoS::AtMostOnce,
            topic: topic.into(),
            packet_id: None,
        }
    }

    /// Copy of the message that shares no buffers with the original.
    pub fn deep_copy(&self) -> Self {
        Publish {
            dup: self.dup,
            retain: self.retain,
            qos: self.qos,
            topic: ByteString::from(String::from(&*self.topic)),
            packet_id: self.packet_id,
            payload: Bytes::copy_from_slice(&self.payload),
        }
    }

    #[inline]
    /// Payload as utf-8 string, if it is valid
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Deserialize json payload
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, JsonError> {
        serde_json::from_slice(&self.payload)
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
/// Subscribe Return Code
pub enum SubscribeReturnCode {
    Success(QoS),
    Failure,
}

impl SubscribeReturnCode {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, SubscribeReturnCode::Success(_))
    }
}

impl From<u8> for SubscribeReturnCode {
    fn from(val: u8) -> Self {
        QoS::try_from(val)
            .map(SubscribeReturnCode::Success)
            .unwrap_or(SubscribeReturnCode::Failure)
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
/// Packets delivered by the protocol codec to the event callback
pub enum Packet {
    /// Incoming application message
    Publish(Publish),
    /// Publish acknowledgment
    PublishAck {
        /// Packet Identifier
        packet_id: NonZeroU16,
    },
    /// Publish received (assured delivery part 1)
    PublishReceived {
        /// Packet Identifier
        packet_id: NonZeroU16,
    },
    /// Publish release (assured delivery part 2)
    PublishRelease {
        /// Packet Identifier
        packet_id: NonZeroU16,
    },
    /// Publish complete (assured delivery part 3)
    PublishComplete {
        /// Packet Identifier
        packet_id: NonZeroU16,
    },
    /// Subscribe acknowledgment
    SubscribeAck {
        packet_id: NonZeroU16,
        /// corresponds to a Topic Filter in the SUBSCRIBE Packet being acknowledged.
        status: Vec<SubscribeReturnCode>,
    },
    /// Unsubscribe acknowledgment
    UnsubscribeAck {
        /// Packet Identifier
        packet_id: NonZeroU16,
    },
    /// PING response
    PingResponse,
    /// Packet type the client does not expect from a broker
    Other(u8),
}

impl Packet {
    pub fn packet_type(&self) -> u8 {
        match self {
            Packet::Publish(_) => packet_type::PUBLISH_START,
            Packet::PublishAck { .. } => packet_type::PUBACK,
            Packet::PublishReceived { .. } => packet_type::PUBREC,
            Packet::PublishRelease { .. } => packet_type::PUBREL,
            Packet::PublishComplete { .. } => packet_type::PUBCOMP,
            Packet::SubscribeAck { .. } => packet_type::SUBACK,
            Packet::UnsubscribeAck { .. } => packet_type::UNSUBACK,
            Packet::PingResponse => packet_type::PINGRESP,
            Packet::Other(tp) => *tp,
        }
    }

    pub fn packet_id(&self) -> Option<NonZeroU16> {
        match self {
            Packet::Publish(pkt) => pkt.packet_id,
            Packet::PublishAck { packet_id }
            | Packet::PublishReceived { packet_id }
            | Packet::PublishRelease { packet_id }
            | Packet::PublishComplete { packet_id }
            | Packet::SubscribeAck { packet_id, .. }
            | Packet::UnsubscribeAck { packet_id } => Some(*packet_id),
            Packet::PingResponse | Packet::Other(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_reason() {
        assert_eq!(ConnectAckReason::ConnectionAccepted.reason(), "Connection Accepted");
        assert_eq!(ConnectAckReason::from(5), ConnectAckReason::NotAuthorized);
        assert_eq!(ConnectAckReason::from(42).reason(), "Connection Refused");
    }

    #[test]
    fn test_deep_copy() {
        let pkt = Publish::new("filter/sync/1", Bytes::from_static(b"Hello World! Sync: 1"));
        let copy = pkt.deep_copy();
        assert_eq!(pkt, copy);
        assert_ne!(pkt.payload.as_ptr(), copy.payload.as_ptr());
        assert_ne!(pkt.topic.as_ptr(), copy.topic.as_ptr());
    }

    #[test]
    fn test_json_payload() {
        #[derive(serde::Deserialize)]
        struct Reading {
            temp: i32,
        }

        let pkt = Publish::new("sensors/1", Bytes::from_static(b"{\"temp\": 21}"));
        assert_eq!(pkt.json::<Reading>().unwrap().temp, 21);
        assert!(Publish::new("sensors/1", Bytes::from_static(b"21C")).json::<Reading>().is_err());
    }

    #[test]
    fn test_packet_type() {
        let id = NonZeroU16::new(7).unwrap();
        assert_eq!(Packet::PublishAck { packet_id: id }.packet_type(), packet_type::PUBACK);
        assert_eq!(Packet::UnsubscribeAck { packet_id: id }.packet_id(), Some(id));
        assert_eq!(Packet::PingResponse.packet_id(), None);
        assert_eq!(Packet::Other(0xF0).packet_type(), 0xF0);
        assert_eq!(SubscribeReturnCode::from(0x80), SubscribeReturnCode::Failure);
        assert_eq!(SubscribeReturnCode::from(1), SubscribeReturnCode::Success(QoS::AtLeastOnce));
    }
}
