use std::{fmt, io, num::NonZeroU16};

use ntex_bytes::ByteString;

use crate::packet::ConnectAckReason;
pub use crate::topic::TopicError;

/// Errors which can occur on the network transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection could not be established
    #[error("Connect failed: {0}")]
    Connect(String),
    /// Connection could not be closed cleanly
    #[error("Disconnect failed: {0}")]
    Disconnect(String),
    /// Every reconnect attempt failed
    #[error("All {attempts} connect attempts failed")]
    RetriesExhausted { attempts: u32 },
    /// Io error
    #[error("Io error: {0:?}")]
    Io(io::ErrorKind),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::Io(err.kind())
    }
}

/// Protocol level errors reported by the codec
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Packet could not be sent
    #[error("Send failed")]
    SendFailed,
    /// Packet could not be received
    #[error("Receive failed")]
    RecvFailed,
    /// Broker sent malformed or unexpected response
    #[error("Bad response from broker")]
    BadResponse,
    /// Connect ack was not received in time
    #[error("Connect ack timeout")]
    ConnectTimeout,
    /// Broker refused connection
    #[error("Connect ack failed: {}", .0.reason())]
    Refused(ConnectAckReason),
    /// Keep alive timeout
    #[error("Keep Alive timeout")]
    KeepAliveTimeout,
    /// Operation requires a connected session
    #[error("Session is not connected")]
    NotConnected,
    /// Packet does not fit into the network buffer
    #[error("Packet does not fit into network buffer")]
    NoMemory,
    /// Acknowledgement does not match the pending operation
    #[error("{message}; received packet with type `{packet_type:b}`")]
    UnexpectedPacket { packet_type: u8, message: &'static str },
}

impl ProtocolError {
    pub(crate) fn unexpected_packet(packet_type: u8, message: &'static str) -> ProtocolError {
        ProtocolError::UnexpectedPacket { packet_type, message }
    }
}

/// Bounded resources of the dispatcher
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Resource {
    AckTable,
    SubscriptionRegistry,
    CommandQueue,
    ResponseQueue,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::AckTable => f.write_str("pending acks table"),
            Resource::SubscriptionRegistry => f.write_str("subscription registry"),
            Resource::CommandQueue => f.write_str("command queue"),
            Resource::ResponseQueue => f.write_str("response queue"),
        }
    }
}

/// Result of a queued mqtt operation
///
/// Cloneable, a single status is delivered to every pending operation
/// on session reset.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MqttError {
    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    /// Protocol failure
    #[error("Mqtt protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Bounded resource is full
    #[error("No space left in {0}")]
    ResourceExhausted(Resource),
    /// Wait loop exceeded its iteration budget
    #[error("Operation timeout")]
    Timeout,
    /// Broker rejected topic filters
    #[error("Subscribe rejected for {0:?}")]
    SubscribeRejected(Vec<ByteString>),
    /// Packet id is already awaiting acknowledgment
    #[error("Packet id {0} is in use")]
    PacketIdInUse(NonZeroU16),
    /// Broker did not resume session, pending operation is lost
    #[error("Session is not present on broker, operation is lost")]
    SessionExpired,
    /// Command is missing required data
    #[error("Invalid command: {0}")]
    InvalidCommand(&'static str),
    /// Topic name or filter is invalid
    #[error("Invalid topic: {0}")]
    Topic(#[from] TopicError),
    /// Dispatcher dropped the operation without completing it
    #[error("Dispatcher is gone")]
    Disconnected,
}

impl MqttError {
    /// Broker side rejection of an operation
    pub fn is_operation_failed(&self) -> bool {
        matches!(self, MqttError::SubscribeRejected(_) | MqttError::SessionExpired)
    }

    /// Failure that requires a new network connection
    pub fn is_connection_error(&self) -> bool {
        matches!(self, MqttError::Transport(_) | MqttError::Protocol(_))
    }
}
