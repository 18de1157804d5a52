use std::num::NonZeroU16;

use ntex_bytes::ByteString;

use crate::acks::{AckTable, PendingAck};
use crate::command::Command;
use crate::error::{MqttError, ProtocolError};
use crate::packet::{Packet, Publish, SubscribeReturnCode};
use crate::protocol::EventHandler;
use crate::queue::ResponseQueue;
use crate::subs::SubscriptionRegistry;
use crate::types::packet_type;

/// Routes inbound packets to subscribers and to operations waiting for acks
pub struct EventRouter<'a> {
    acks: &'a mut AckTable,
    subs: &'a mut SubscriptionRegistry,
    default_target: &'a ResponseQueue,
}

impl<'a> EventRouter<'a> {
    pub fn new(
        acks: &'a mut AckTable,
        subs: &'a mut SubscriptionRegistry,
        default_target: &'a ResponseQueue,
    ) -> Self {
        EventRouter { acks, subs, default_target }
    }

    fn publish(&mut self, pkt: Publish) {
        let targets = self.subs.matches(&pkt.topic);

        if targets.is_empty() {
            log::debug!("No subscription for {:?}, using default queue", pkt.topic);
            if self.default_target.try_push(pkt.deep_copy()).is_err() {
                log::warn!("Default queue is full, dropping publish on {:?}", pkt.topic);
            }
            return;
        }

        for target in targets {
            log::trace!("Adding publish on {:?} to response queue", pkt.topic);
            if target.try_push(pkt.deep_copy()).is_err() {
                log::error!("Response queue is full, dropping publish on {:?}", pkt.topic);
            }
        }
    }

    fn take_ack(&mut self, tp: u8, packet_id: NonZeroU16) -> Option<Command> {
        match self.acks.take(packet_id) {
            Some(PendingAck { command, .. }) => Some(command),
            None => {
                log::error!("No operation awaiting packet `{:b}` with id {}", tp, packet_id);
                None
            }
        }
    }

    fn publish_ack(&mut self, tp: u8, packet_id: NonZeroU16) {
        match self.take_ack(tp, packet_id) {
            Some(cmd @ Command::Publish { .. }) => {
                log::trace!("Publish {} is acknowledged", packet_id);
                cmd.complete(Ok(()));
            }
            Some(cmd) => {
                log::error!("Publish ack for {} operation {}", cmd.kind(), packet_id);
                cmd.complete(Err(ProtocolError::unexpected_packet(
                    tp,
                    "Publish ack for non-publish operation",
                )
                .into()));
            }
            None => (),
        }
    }

    fn subscribe_ack(&mut self, packet_id: NonZeroU16, status: Vec<SubscribeReturnCode>) {
        let cmd = match self.take_ack(packet_type::SUBACK, packet_id) {
            Some(cmd) => cmd,
            None => return,
        };
        let (filters, target, completion) = match cmd {
            Command::Subscribe { filters, target, completion } => (filters, target, completion),
            cmd => {
                log::error!("Subscribe ack for {} operation {}", cmd.kind(), packet_id);
                cmd.complete(Err(ProtocolError::unexpected_packet(
                    packet_type::SUBACK,
                    "Subscribe ack for non-subscribe operation",
                )
                .into()));
                return;
            }
        };
        if status.len() != filters.len() {
            log::warn!(
                "Subscribe ack {} carries {} codes for {} filters",
                packet_id,
                status.len(),
                filters.len()
            );
        }

        let mut rejected: Vec<ByteString> = Vec::new();
        let mut result = Ok(());
        for (idx, (filter, qos)) in filters.into_iter().enumerate() {
            match status.get(idx) {
                Some(SubscribeReturnCode::Success(granted)) => {
                    log::debug!("Subscribed to {:?} with {}", filter, granted);
                    if let Some(ref target) = target {
                        if let Err(err) = self.subs.add(filter, qos, target.clone()) {
                            result = Err(err);
                        }
                    }
                }
                _ => {
                    log::error!("Broker rejected subscription to {:?}", filter);
                    rejected.push(filter);
                }
            }
        }

        let result = if rejected.is_empty() {
            result
        } else {
            Err(MqttError::SubscribeRejected(rejected))
        };
        Command::Subscribe { filters: Vec::new(), target: None, completion }.complete(result);
    }

    fn unsubscribe_ack(&mut self, packet_id: NonZeroU16) {
        match self.take_ack(packet_type::UNSUBACK, packet_id) {
            Some(Command::Unsubscribe { filters, completion }) => {
                for filter in &filters {
                    let removed = self.subs.remove(filter);
                    log::debug!("Unsubscribed from {:?}, {} bindings removed", filter, removed);
                }
                Command::Unsubscribe { filters, completion }.complete(Ok(()));
            }
            Some(cmd) => {
                log::error!("Unsubscribe ack for {} operation {}", cmd.kind(), packet_id);
                cmd.complete(Err(ProtocolError::unexpected_packet(
                    packet_type::UNSUBACK,
                    "Unsubscribe ack for non-unsubscribe operation",
                )
                .into()));
            }
            None => (),
        }
    }
}

impl<'a> EventHandler for EventRouter<'a> {
    fn on_packet(&mut self, pkt: Packet) {
        match pkt {
            Packet::Publish(pkt) => self.publish(pkt),
            Packet::PublishAck { packet_id } => self.publish_ack(packet_type::PUBACK, packet_id),
            Packet::PublishComplete { packet_id } => {
                self.publish_ack(packet_type::PUBCOMP, packet_id)
            }
            Packet::PublishReceived { packet_id } | Packet::PublishRelease { packet_id } => {
                log::trace!("Intermediate QoS2 ack for {}", packet_id);
            }
            Packet::SubscribeAck { packet_id, status } => self.subscribe_ack(packet_id, status),
            Packet::UnsubscribeAck { packet_id } => self.unsubscribe_ack(packet_id),
            Packet::PingResponse => log::trace!("Ping response received"),
            Packet::Other(tp) => log::error!("Unexpected packet type `{:b}`, discarding", tp),
        }
    }
}

#[cfg(test)]
mod tests {
    use ntex_bytes::Bytes;
    use ntex_util::time::Millis;

    use super::*;
    use crate::command::channel;
    use crate::types::QoS;

    fn id(v: u16) -> NonZeroU16 {
        NonZeroU16::new(v).unwrap()
    }

    fn filters(f: &'static str) -> Vec<(ByteString, QoS)> {
        vec![(ByteString::from_static(f), QoS::AtLeastOnce)]
    }

    #[test]
    fn test_publish_routing() {
        let mut acks = AckTable::new(2);
        let mut subs = SubscriptionRegistry::new(4);
        let default = ResponseQueue::new(1);
        let q1 = ResponseQueue::new(4);
        let q2 = ResponseQueue::new(4);
        subs.add(ByteString::from_static("filter/+/+"), QoS::AtLeastOnce, q1.clone()).unwrap();
        subs.add(ByteString::from_static("filter/sync/#"), QoS::AtLeastOnce, q2.clone()).unwrap();

        let mut router = EventRouter::new(&mut acks, &mut subs, &default);
        let pkt = Publish::new("filter/sync/1", Bytes::from_static(b"Hello World! Sync: 1"));
        router.on_packet(Packet::Publish(pkt.clone()));
        router.on_packet(Packet::Publish(Publish::new("unknown", Bytes::from_static(b"1"))));
        // default queue is full, message is dropped
        router.on_packet(Packet::Publish(Publish::new("unknown", Bytes::from_static(b"2"))));

        let p1 = q1.try_recv().unwrap();
        let p2 = q2.try_recv().unwrap();
        assert_eq!(p1, pkt);
        assert_eq!(p2, pkt);
        assert_ne!(p1.payload.as_ptr(), p2.payload.as_ptr());
        assert!(q1.is_empty());
        assert_eq!(default.len(), 1);
        assert_eq!(default.try_recv().unwrap().payload, Bytes::from_static(b"1"));
    }

    #[ntex::test]
    async fn test_publish_ack() {
        let mut acks = AckTable::new(2);
        let mut subs = SubscriptionRegistry::new(1);
        let default = ResponseQueue::new(1);
        let (tx, rx) = channel();
        let publish = Publish::new("a/b", Bytes::new());
        acks.add(id(1), Command::Publish { publish, completion: Some(tx) }).unwrap();

        let mut router = EventRouter::new(&mut acks, &mut subs, &default);
        router.on_packet(Packet::PublishReceived { packet_id: id(1) });
        router.on_packet(Packet::PublishAck { packet_id: id(1) });
        // unknown id is ignored
        router.on_packet(Packet::PublishAck { packet_id: id(1) });
        router.on_packet(Packet::PingResponse);
        router.on_packet(Packet::Other(0xF0));

        assert_eq!(rx.wait(Millis(10), 1).await, Ok(()));
        assert!(acks.is_empty());
    }

    #[ntex::test]
    async fn test_mismatched_ack() {
        let mut acks = AckTable::new(2);
        let mut subs = SubscriptionRegistry::new(1);
        let default = ResponseQueue::new(1);
        let (tx, rx) = channel();
        acks.add(id(3), Command::Unsubscribe { filters: Vec::new(), completion: Some(tx) })
            .unwrap();

        EventRouter::new(&mut acks, &mut subs, &default)
            .on_packet(Packet::PublishAck { packet_id: id(3) });
        assert!(matches!(
            rx.wait(Millis(10), 1).await,
            Err(MqttError::Protocol(ProtocolError::UnexpectedPacket { .. }))
        ));
    }

    #[ntex::test]
    async fn test_subscribe_ack() {
        let mut acks = AckTable::new(4);
        let mut subs = SubscriptionRegistry::new(4);
        let default = ResponseQueue::new(1);
        let target = ResponseQueue::new(4);

        let (tx, rx) = channel();
        let mut fl = filters("filter/+/+");
        fl.push((ByteString::from_static("denied/#"), QoS::AtMostOnce));
        acks.add(
            id(1),
            Command::Subscribe { filters: fl, target: Some(target.clone()), completion: Some(tx) },
        )
        .unwrap();

        let mut router = EventRouter::new(&mut acks, &mut subs, &default);
        router.on_packet(Packet::SubscribeAck {
            packet_id: id(1),
            status: vec![
                SubscribeReturnCode::Success(QoS::AtLeastOnce),
                SubscribeReturnCode::Failure,
            ],
        });
        assert_eq!(
            rx.wait(Millis(10), 1).await,
            Err(MqttError::SubscribeRejected(vec![ByteString::from_static("denied/#")]))
        );
        assert_eq!(subs.filters(), filters("filter/+/+"));
        assert_eq!(subs.matches("filter/a/b"), vec![target.clone()]);

        // resubscribe without target keeps existing bindings
        acks.add(
            id(2),
            Command::Subscribe { filters: filters("filter/+/+"), target: None, completion: None },
        )
        .unwrap();
        EventRouter::new(&mut acks, &mut subs, &default).on_packet(Packet::SubscribeAck {
            packet_id: id(2),
            status: vec![SubscribeReturnCode::Success(QoS::AtLeastOnce)],
        });
        assert_eq!(subs.len(), 1);

        let (tx, rx) = channel();
        acks.add(
            id(3),
            Command::Unsubscribe {
                filters: vec![ByteString::from_static("filter/+/+")],
                completion: Some(tx),
            },
        )
        .unwrap();
        EventRouter::new(&mut acks, &mut subs, &default)
            .on_packet(Packet::UnsubscribeAck { packet_id: id(3) });
        assert_eq!(rx.wait(Millis(10), 1).await, Ok(()));
        assert!(subs.is_empty());
        assert!(acks.is_empty());
    }
}
