//! Interfaces of the external mqtt codec and network transport
use std::num::NonZeroU16;

use ntex_bytes::ByteString;
use ntex_util::time::Millis;

use crate::error::{ProtocolError, TransportError};
use crate::packet::{Connect, Packet, Publish};
use crate::types::QoS;

/// Network connection used by the protocol codec
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Open connection to the broker
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Close connection
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Receiver of inbound packets decoded by the codec
pub trait EventHandler {
    fn on_packet(&mut self, pkt: Packet);
}

impl<F> EventHandler for F
where
    F: FnMut(Packet),
{
    fn on_packet(&mut self, pkt: Packet) {
        (self)(pkt)
    }
}

/// Position in the codec's list of unacknowledged outgoing publishes
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ResendCursor(usize);

impl ResendCursor {
    pub fn new() -> Self {
        ResendCursor(0)
    }

    pub fn get(&self) -> usize {
        self.0
    }

    pub fn set(&mut self, pos: usize) {
        self.0 = pos;
    }
}

/// Mqtt v3.1.1 protocol codec
///
/// Encodes outgoing packets, decodes inbound traffic and keeps the
/// keep-alive state of a session. Inbound packets are delivered to the
/// event handler passed to `process_loop`.
#[allow(async_fn_in_trait)]
pub trait Protocol {
    /// Send `Connect` and wait for `ConnectAck`.
    ///
    /// Returns session present flag.
    async fn connect(&mut self, pkt: &Connect, timeout: Millis) -> Result<bool, ProtocolError>;

    /// Send publish packet.
    ///
    /// Publish must carry packet id for QoS 1 and 2.
    async fn publish(&mut self, pkt: &Publish) -> Result<(), ProtocolError>;

    async fn subscribe(
        &mut self,
        filters: &[(ByteString, QoS)],
        packet_id: NonZeroU16,
    ) -> Result<(), ProtocolError>;

    async fn unsubscribe(
        &mut self,
        filters: &[ByteString],
        packet_id: NonZeroU16,
    ) -> Result<(), ProtocolError>;

    async fn ping(&mut self) -> Result<(), ProtocolError>;

    async fn disconnect(&mut self) -> Result<(), ProtocolError>;

    /// Receive and dispatch inbound packets, manage keep-alive.
    ///
    /// Waits up to `timeout` for inbound data.
    async fn process_loop<H: EventHandler>(
        &mut self,
        timeout: Millis,
        handler: &mut H,
    ) -> Result<(), ProtocolError>;

    /// Allocate packet id for next outgoing packet
    fn next_packet_id(&mut self) -> NonZeroU16;

    /// Packet id of next unacknowledged publish after cursor position.
    ///
    /// Advances cursor, returns `None` when there are no more publishes.
    fn publish_to_resend(&self, cursor: &mut ResendCursor) -> Option<NonZeroU16>;

    fn is_connected(&self) -> bool;
}
