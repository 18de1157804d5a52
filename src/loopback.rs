//! In-memory broker with protocol and transport halves.
//!
//! Emulates a single client session, broker side subscriptions and the
//! codec's list of unacknowledged publishes. Faults can be injected between
//! operations.
use std::{cell::RefCell, collections::VecDeque, num::NonZeroU16, rc::Rc};

use ntex_bytes::ByteString;
use ntex_util::time::{sleep, Millis};

use crate::error::{ProtocolError, TransportError};
use crate::packet::{ConnectAckReason, Connect, Packet, Publish, SubscribeReturnCode};
use crate::protocol::{EventHandler, Protocol, ResendCursor, Transport};
use crate::{topic::TopicFilter, types::QoS};

/// Operation observed by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    TransportConnect,
    TransportDisconnect,
    Connect { clean_session: bool, session_present: bool },
    Publish { topic: ByteString, packet_id: Option<NonZeroU16>, qos: QoS, dup: bool },
    Subscribe { packet_id: NonZeroU16, filters: Vec<ByteString> },
    Unsubscribe { packet_id: NonZeroU16, filters: Vec<ByteString> },
    Ping,
    Disconnect,
}

#[derive(Default)]
struct Broker {
    network: bool,
    connected: bool,
    clean_session: bool,
    // `None` if broker keeps no session for the client
    session: Option<Vec<(TopicFilter, QoS)>>,
    inbound: VecDeque<Packet>,
    unacked: Vec<(NonZeroU16, Publish)>,
    last_id: u16,
    incoming_id: u16,
    ops: Vec<Op>,
    passed_connects: u32,
    failed_connects: u32,
    refuse: Option<ConnectAckReason>,
    fail_publish: bool,
    withhold_acks: bool,
    rejected: Vec<ByteString>,
}

impl Broker {
    fn check_connected(&self) -> Result<(), ProtocolError> {
        if !self.network {
            Err(ProtocolError::SendFailed)
        } else if !self.connected {
            Err(ProtocolError::NotConnected)
        } else {
            Ok(())
        }
    }

    fn drop_network(&mut self) {
        self.network = false;
        self.connected = false;
        if self.clean_session {
            self.session = None;
        }
    }

    fn route(&mut self, pkt: &Publish) {
        let Broker { session, inbound, incoming_id, .. } = self;
        for (filter, qos) in session.iter().flatten() {
            if filter.matches(&pkt.topic) {
                let qos = std::cmp::min(*qos, pkt.qos);
                let packet_id = if qos.needs_ack() {
                    *incoming_id = incoming_id.wrapping_add(1).max(1);
                    NonZeroU16::new(*incoming_id)
                } else {
                    None
                };
                inbound.push_back(Packet::Publish(Publish {
                    dup: false,
                    retain: false,
                    qos,
                    topic: pkt.topic.clone(),
                    packet_id,
                    payload: pkt.payload.clone(),
                }));
            }
        }
    }
}

/// Shared in-memory broker
#[derive(Clone, Default)]
pub struct Loopback(Rc<RefCell<Broker>>);

impl Loopback {
    pub fn new() -> Self {
        Loopback::default()
    }

    /// Protocol codec connected to this broker
    pub fn protocol(&self) -> LoopbackProtocol {
        LoopbackProtocol(self.clone())
    }

    /// Network transport connected to this broker
    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport(self.clone())
    }

    /// Operations observed so far
    pub fn ops(&self) -> Vec<Op> {
        self.0.borrow().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.0.borrow_mut().ops.clear();
    }

    /// Filters of broker side session
    pub fn subscriptions(&self) -> Vec<ByteString> {
        let broker = self.0.borrow();
        broker.session.iter().flatten().map(|(f, _)| f.filter().clone()).collect()
    }

    pub fn has_session(&self) -> bool {
        self.0.borrow().session.is_some()
    }

    /// Packet ids of publishes waiting for acknowledgment
    pub fn unacked(&self) -> Vec<NonZeroU16> {
        self.0.borrow().unacked.iter().map(|(id, _)| *id).collect()
    }

    /// Fail next `n` transport connects
    pub fn fail_connects(&self, n: u32) {
        self.fail_connects_after(0, n);
    }

    /// Let next `skip` transport connects through, then fail `n`
    pub fn fail_connects_after(&self, skip: u32, n: u32) {
        let mut broker = self.0.borrow_mut();
        broker.passed_connects = skip;
        broker.failed_connects = n;
    }

    /// Refuse next mqtt connect
    pub fn refuse_connect(&self, reason: ConnectAckReason) {
        self.0.borrow_mut().refuse = Some(reason);
    }

    /// Next publish fails and drops network connection
    pub fn fail_next_publish(&self) {
        self.0.borrow_mut().fail_publish = true;
    }

    /// Stop or resume acknowledging publishes
    pub fn withhold_acks(&self, val: bool) {
        self.0.borrow_mut().withhold_acks = val;
    }

    /// Reject subscriptions to the filter
    pub fn reject_filter(&self, filter: &'static str) {
        self.0.borrow_mut().rejected.push(ByteString::from_static(filter));
    }

    /// Forget persistent session
    pub fn discard_session(&self) {
        self.0.borrow_mut().session = None;
    }

    /// Drop network connection
    pub fn drop_connection(&self) {
        self.0.borrow_mut().drop_network();
    }

    /// Deliver packet on next process loop iteration
    pub fn inject(&self, pkt: Packet) {
        self.0.borrow_mut().inbound.push_back(pkt);
    }
}

pub struct LoopbackTransport(Loopback);

impl Transport for LoopbackTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut broker = (self.0).0.borrow_mut();
        if broker.passed_connects > 0 {
            broker.passed_connects -= 1;
        } else if broker.failed_connects > 0 {
            broker.failed_connects -= 1;
            return Err(TransportError::Connect("Connection refused".to_string()));
        }
        broker.network = true;
        broker.ops.push(Op::TransportConnect);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut broker = (self.0).0.borrow_mut();
        broker.drop_network();
        broker.ops.push(Op::TransportDisconnect);
        Ok(())
    }
}

pub struct LoopbackProtocol(Loopback);

impl LoopbackProtocol {
    pub fn broker(&self) -> &Loopback {
        &self.0
    }
}

impl Protocol for LoopbackProtocol {
    async fn connect(&mut self, pkt: &Connect, _: Millis) -> Result<bool, ProtocolError> {
        let mut broker = (self.0).0.borrow_mut();
        if !broker.network {
            return Err(ProtocolError::SendFailed);
        }
        if let Some(reason) = broker.refuse.take() {
            return Err(ProtocolError::Refused(reason));
        }

        let session_present = !pkt.clean_session && broker.session.is_some();
        if !session_present {
            broker.session = Some(Vec::new());
            broker.unacked.clear();
        }
        broker.inbound.clear();
        broker.clean_session = pkt.clean_session;
        broker.connected = true;
        broker.ops.push(Op::Connect { clean_session: pkt.clean_session, session_present });
        Ok(session_present)
    }

    async fn publish(&mut self, pkt: &Publish) -> Result<(), ProtocolError> {
        let mut broker = (self.0).0.borrow_mut();
        broker.check_connected()?;
        if broker.fail_publish {
            broker.fail_publish = false;
            broker.drop_network();
            return Err(ProtocolError::SendFailed);
        }
        broker.ops.push(Op::Publish {
            topic: pkt.topic.clone(),
            packet_id: pkt.packet_id,
            qos: pkt.qos,
            dup: pkt.dup,
        });

        if pkt.qos.needs_ack() {
            let packet_id = pkt.packet_id.ok_or(ProtocolError::BadResponse)?;
            if !broker.unacked.iter().any(|(id, _)| *id == packet_id) {
                broker.unacked.push((packet_id, pkt.clone()));
            }
            if !broker.withhold_acks {
                if pkt.qos == QoS::AtLeastOnce {
                    broker.inbound.push_back(Packet::PublishAck { packet_id });
                } else {
                    broker.inbound.push_back(Packet::PublishReceived { packet_id });
                    broker.inbound.push_back(Packet::PublishComplete { packet_id });
                }
            }
        }
        broker.route(pkt);
        Ok(())
    }

    async fn subscribe(
        &mut self,
        filters: &[(ByteString, QoS)],
        packet_id: NonZeroU16,
    ) -> Result<(), ProtocolError> {
        let mut broker = (self.0).0.borrow_mut();
        broker.check_connected()?;
        broker.ops.push(Op::Subscribe {
            packet_id,
            filters: filters.iter().map(|(f, _)| f.clone()).collect(),
        });

        let mut status = Vec::with_capacity(filters.len());
        for (filter, qos) in filters {
            let parsed = TopicFilter::new(filter.clone());
            match parsed {
                Ok(parsed) if !broker.rejected.contains(filter) => {
                    let subs = broker.session.get_or_insert_with(Vec::new);
                    subs.retain(|(f, _)| f.filter() != filter);
                    subs.push((parsed, *qos));
                    status.push(SubscribeReturnCode::Success(*qos));
                }
                _ => status.push(SubscribeReturnCode::Failure),
            }
        }
        broker.inbound.push_back(Packet::SubscribeAck { packet_id, status });
        Ok(())
    }

    async fn unsubscribe(
        &mut self,
        filters: &[ByteString],
        packet_id: NonZeroU16,
    ) -> Result<(), ProtocolError> {
        let mut broker = (self.0).0.borrow_mut();
        broker.check_connected()?;
        broker.ops.push(Op::Unsubscribe { packet_id, filters: filters.to_vec() });

        if let Some(subs) = broker.session.as_mut() {
            subs.retain(|(f, _)| !filters.contains(f.filter()));
        }
        broker.inbound.push_back(Packet::UnsubscribeAck { packet_id });
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), ProtocolError> {
        let mut broker = (self.0).0.borrow_mut();
        broker.check_connected()?;
        broker.ops.push(Op::Ping);
        broker.inbound.push_back(Packet::PingResponse);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ProtocolError> {
        let mut broker = (self.0).0.borrow_mut();
        broker.check_connected()?;
        broker.ops.push(Op::Disconnect);
        broker.connected = false;
        if broker.clean_session {
            broker.session = None;
        }
        Ok(())
    }

    async fn process_loop<H: EventHandler>(
        &mut self,
        timeout: Millis,
        handler: &mut H,
    ) -> Result<(), ProtocolError> {
        (self.0).0.borrow().check_connected()?;
        if !timeout.is_zero() && (self.0).0.borrow().inbound.is_empty() {
            sleep(timeout).await;
        }

        loop {
            let pkt = {
                let mut broker = (self.0).0.borrow_mut();
                if !broker.connected {
                    return Err(ProtocolError::RecvFailed);
                }
                match broker.inbound.pop_front() {
                    Some(pkt) => {
                        if let Packet::PublishAck { packet_id }
                        | Packet::PublishComplete { packet_id } = pkt
                        {
                            broker.unacked.retain(|(id, _)| *id != packet_id);
                        }
                        pkt
                    }
                    None => return Ok(()),
                }
            };
            handler.on_packet(pkt);
        }
    }

    fn next_packet_id(&mut self) -> NonZeroU16 {
        let mut broker = (self.0).0.borrow_mut();
        broker.last_id = broker.last_id.wrapping_add(1).max(1);
        NonZeroU16::new(broker.last_id).unwrap_or(NonZeroU16::MIN)
    }

    fn publish_to_resend(&self, cursor: &mut ResendCursor) -> Option<NonZeroU16> {
        let broker = (self.0).0.borrow();
        let id = broker.unacked.get(cursor.get()).map(|(id, _)| *id);
        if id.is_some() {
            cursor.set(cursor.get() + 1);
        }
        id
    }

    fn is_connected(&self) -> bool {
        let broker = (self.0).0.borrow();
        broker.network && broker.connected
    }
}
