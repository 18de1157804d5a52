use std::fmt;

use ntex_bytes::{ByteString, Bytes};
use ntex_util::time::Millis;

use crate::command::{channel, Command, Waiter};
use crate::error::{MqttError, Resource};
use crate::packet::Publish;
use crate::queue::{CommandQueue, ResponseQueue};
use crate::topic::{validate_topic_name, TopicFilter};
use crate::types::QoS;

/// Producer side of the dispatcher command queue
pub struct MqttSink {
    queue: CommandQueue,
    timeout: Millis,
}

impl Clone for MqttSink {
    fn clone(&self) -> Self {
        MqttSink { queue: self.queue.clone(), timeout: self.timeout }
    }
}

impl MqttSink {
    /// Create sink, `timeout` bounds waiting for space in the queue
    pub fn new(queue: CommandQueue, timeout: Millis) -> Self {
        MqttSink { queue, timeout }
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    #[inline]
    /// Create publish message builder
    pub fn publish<U>(&self, topic: U, payload: Bytes) -> PublishBuilder
    where
        ByteString: From<U>,
    {
        self.publish_pkt(Publish::new(topic, payload))
    }

    #[inline]
    /// Create publish builder with publish packet
    pub fn publish_pkt(&self, packet: Publish) -> PublishBuilder {
        PublishBuilder { packet, sink: self.clone() }
    }

    #[inline]
    /// Create subscribe packet builder
    pub fn subscribe(&self) -> SubscribeBuilder {
        SubscribeBuilder { topic_filters: Vec::new(), target: None, sink: self.clone() }
    }

    #[inline]
    /// Create unsubscribe packet builder
    pub fn unsubscribe(&self) -> UnsubscribeBuilder {
        UnsubscribeBuilder { topic_filters: Vec::new(), sink: self.clone() }
    }

    /// Queue ping request
    pub async fn ping(&self) -> Result<Waiter, MqttError> {
        let (tx, rx) = channel();
        self.submit(Command::Ping { completion: Some(tx) }).await?;
        Ok(rx)
    }

    /// Queue disconnect request
    pub async fn disconnect(&self) -> Result<Waiter, MqttError> {
        let (tx, rx) = channel();
        self.submit(Command::Disconnect { completion: Some(tx) }).await?;
        Ok(rx)
    }

    /// Ask dispatcher to re-establish connection
    pub async fn reconnect(&self) -> Result<(), MqttError> {
        self.submit(Command::Reconnect).await
    }

    /// Stop dispatcher command loop
    pub async fn terminate(&self) -> Result<(), MqttError> {
        self.submit(Command::Terminate).await
    }

    /// Queue prepared command
    pub async fn submit(&self, cmd: Command) -> Result<(), MqttError> {
        self.queue.push(cmd, self.timeout).await.map_err(|cmd| {
            log::error!("Command queue is full, cannot add {} operation", cmd.kind());
            MqttError::ResourceExhausted(Resource::CommandQueue)
        })
    }
}

impl fmt::Debug for MqttSink {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("MqttSink").field("queue", &self.queue).finish()
    }
}

pub struct PublishBuilder {
    packet: Publish,
    sink: MqttSink,
}

impl PublishBuilder {
    #[inline]
    /// This might be re-delivery of an earlier attempt to send the Packet.
    pub fn dup(mut self, val: bool) -> Self {
        self.packet.dup = val;
        self
    }

    #[inline]
    /// Set retain flag
    pub fn retain(mut self) -> Self {
        self.packet.retain = true;
        self
    }

    #[inline]
    /// Set delivery qos, packet id is allocated by dispatcher
    pub fn qos(mut self, qos: QoS) -> Self {
        self.packet.qos = qos;
        self
    }

    /// Queue publish and return waiter for its result.
    ///
    /// QoS 0 publish completes once sent, QoS 1 and 2 once acknowledged.
    pub async fn send(self) -> Result<Waiter, MqttError> {
        validate_topic_name(&self.packet.topic)?;

        let (tx, rx) = channel();
        self.sink.submit(Command::Publish { publish: self.packet, completion: Some(tx) }).await?;
        Ok(rx)
    }

    /// Queue publish without waiting for its result
    pub async fn send_no_wait(self) -> Result<(), MqttError> {
        validate_topic_name(&self.packet.topic)?;
        self.sink.submit(Command::Publish { publish: self.packet, completion: None }).await
    }
}

impl fmt::Debug for PublishBuilder {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("PublishBuilder").field("packet", &self.packet).finish()
    }
}

/// Subscribe packet builder
pub struct SubscribeBuilder {
    topic_filters: Vec<(ByteString, QoS)>,
    target: Option<ResponseQueue>,
    sink: MqttSink,
}

impl SubscribeBuilder {
    /// Add topic filter
    pub fn topic_filter(mut self, filter: ByteString, qos: QoS) -> Self {
        self.topic_filters.push((filter, qos));
        self
    }

    /// Queue for messages delivered on subscribed filters.
    ///
    /// Without delivery queue only existing bindings are renewed.
    pub fn deliver_to(mut self, queue: ResponseQueue) -> Self {
        self.target = Some(queue);
        self
    }

    /// Queue subscribe request
    pub async fn send(self) -> Result<Waiter, MqttError> {
        if self.topic_filters.is_empty() {
            return Err(MqttError::InvalidCommand("Subscribe without topic filters"));
        }
        for (filter, _) in &self.topic_filters {
            TopicFilter::new(filter.clone())?;
        }

        let (tx, rx) = channel();
        self.sink
            .submit(Command::Subscribe {
                filters: self.topic_filters,
                target: self.target,
                completion: Some(tx),
            })
            .await?;
        Ok(rx)
    }
}

impl fmt::Debug for SubscribeBuilder {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("SubscribeBuilder").field("topic_filters", &self.topic_filters).finish()
    }
}

/// Unsubscribe packet builder
pub struct UnsubscribeBuilder {
    topic_filters: Vec<ByteString>,
    sink: MqttSink,
}

impl UnsubscribeBuilder {
    /// Add topic filter
    pub fn topic_filter(mut self, filter: ByteString) -> Self {
        self.topic_filters.push(filter);
        self
    }

    /// Prepare unsubscribe command without queueing it
    pub fn finish(self) -> (Command, Waiter) {
        let (tx, rx) = channel();
        (Command::Unsubscribe { filters: self.topic_filters, completion: Some(tx) }, rx)
    }

    /// Queue unsubscribe request
    pub async fn send(self) -> Result<Waiter, MqttError> {
        if self.topic_filters.is_empty() {
            return Err(MqttError::InvalidCommand("Unsubscribe without topic filters"));
        }
        let sink = self.sink.clone();
        let (cmd, rx) = self.finish();
        sink.submit(cmd).await?;
        Ok(rx)
    }
}

impl fmt::Debug for UnsubscribeBuilder {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("UnsubscribeBuilder").field("topic_filters", &self.topic_filters).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::TopicError;

    #[ntex::test]
    async fn test_publish() {
        let queue = CommandQueue::new(2);
        let sink = MqttSink::new(queue.clone(), Millis(10));

        let _rx = sink
            .publish("filter/sync/1", Bytes::from_static(b"Hello World! Sync: 1"))
            .qos(QoS::AtLeastOnce)
            .send()
            .await
            .unwrap();
        match queue.try_recv() {
            Some(Command::Publish { publish, completion }) => {
                assert_eq!(publish.qos, QoS::AtLeastOnce);
                assert_eq!(&*publish.topic, "filter/sync/1");
                assert!(publish.packet_id.is_none());
                assert!(completion.is_some());
            }
            cmd => panic!("Unexpected command {:?}", cmd),
        }

        let err = sink.publish("filter/+", Bytes::new()).send().await.unwrap_err();
        assert_eq!(err, MqttError::Topic(TopicError::WildcardInName));
    }

    #[ntex::test]
    async fn test_queue_full() {
        let queue = CommandQueue::new(1);
        let sink = MqttSink::new(queue.clone(), Millis(5));
        sink.terminate().await.unwrap();

        assert_eq!(
            sink.ping().await.unwrap_err(),
            MqttError::ResourceExhausted(Resource::CommandQueue)
        );
        assert_eq!(queue.len(), 1);
    }

    #[ntex::test]
    async fn test_subscribe() {
        let queue = CommandQueue::new(4);
        let sink = MqttSink::new(queue.clone(), Millis(10));

        assert!(matches!(sink.subscribe().send().await, Err(MqttError::InvalidCommand(_))));
        assert!(matches!(
            sink.subscribe()
                .topic_filter(ByteString::from_static("a/#/b"), QoS::AtLeastOnce)
                .send()
                .await,
            Err(MqttError::Topic(TopicError::MultiWildcardNotLast))
        ));
        assert!(queue.is_empty());

        let target = ResponseQueue::new(1);
        sink.subscribe()
            .topic_filter(ByteString::from_static("filter/+/+"), QoS::AtLeastOnce)
            .deliver_to(target.clone())
            .send()
            .await
            .unwrap();
        match queue.try_recv() {
            Some(Command::Subscribe { filters, target: Some(t), .. }) => {
                assert_eq!(filters.len(), 1);
                assert_eq!(t, target);
            }
            cmd => panic!("Unexpected command {:?}", cmd),
        }
    }

    #[ntex::test]
    async fn test_unsubscribe() {
        let queue = CommandQueue::new(4);
        let sink = MqttSink::new(queue.clone(), Millis(10));
        assert!(sink.unsubscribe().send().await.is_err());

        let (cmd, _rx) =
            sink.unsubscribe().topic_filter(ByteString::from_static("filter/+/+")).finish();
        assert!(matches!(cmd, Command::Unsubscribe { ref filters, .. } if filters.len() == 1));
        assert!(queue.is_empty());
    }
}
