use ntex_bytes::ByteString;

use crate::error::{MqttError, Resource};
use crate::{queue::ResponseQueue, topic::TopicFilter, types::QoS};

/// Active topic filter binding
#[derive(Debug, Clone)]
pub struct Subscription {
    pub filter: TopicFilter,
    pub qos: QoS,
    pub target: ResponseQueue,
}

/// Fixed size list of active subscriptions
#[derive(Debug)]
pub struct SubscriptionRegistry {
    slots: Vec<Option<Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new(cap: usize) -> Self {
        let mut slots = Vec::with_capacity(cap);
        slots.resize_with(cap, || None);
        SubscriptionRegistry { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Bind filter to delivery target.
    ///
    /// Returns `false` if the same binding already exists.
    pub fn add(
        &mut self,
        filter: ByteString,
        qos: QoS,
        target: ResponseQueue,
    ) -> Result<bool, MqttError> {
        if self.iter().any(|s| *s.filter.filter() == filter && s.target == target) {
            log::debug!("Subscription {:?} already exists", filter);
            return Ok(false);
        }
        let filter = TopicFilter::new(filter)?;

        match self.slots.iter_mut().find(|s| s.is_none()) {
            Some(slot) => {
                log::trace!("Adding subscription {:?} with {}", filter.as_str(), qos);
                *slot = Some(Subscription { filter, qos, target });
                Ok(true)
            }
            None => {
                log::error!("No space for subscription {:?}", filter.as_str());
                Err(MqttError::ResourceExhausted(Resource::SubscriptionRegistry))
            }
        }
    }

    /// Remove every binding of the filter, regardless of target.
    ///
    /// Returns number of removed bindings.
    pub fn remove(&mut self, filter: &str) -> usize {
        let mut removed = 0;
        for slot in self.slots.iter_mut() {
            if slot.as_ref().map_or(false, |s| s.filter.as_str() == filter) {
                *slot = None;
                removed += 1;
            }
        }
        if removed == 0 {
            log::debug!("No subscriptions for {:?}", filter);
        }
        removed
    }

    /// Delivery targets of every binding that matches topic name
    pub fn matches(&self, topic: &str) -> Vec<ResponseQueue> {
        self.iter().filter(|s| s.filter.matches(topic)).map(|s| s.target.clone()).collect()
    }

    /// Distinct filters of active bindings
    pub fn filters(&self) -> Vec<(ByteString, QoS)> {
        let mut filters: Vec<(ByteString, QoS)> = Vec::new();
        for sub in self.iter() {
            if !filters.iter().any(|(f, _)| f == sub.filter.filter()) {
                filters.push((sub.filter.filter().clone(), sub.qos));
            }
        }
        filters
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.slots.iter().flatten()
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }
}
