use std::num::NonZeroU16;

use crate::{command::Command, error::MqttError};

/// Operation waiting for broker acknowledgment
#[derive(Debug)]
pub struct PendingAck {
    pub packet_id: NonZeroU16,
    pub command: Command,
}

/// Fixed size table of operations waiting for acknowledgment
#[derive(Debug)]
pub struct AckTable {
    slots: Vec<Option<PendingAck>>,
}

impl AckTable {
    pub fn new(cap: usize) -> Self {
        let mut slots = Vec::with_capacity(cap);
        slots.resize_with(cap, || None);
        AckTable { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Store operation in the first free slot.
    ///
    /// Command is returned back if table is full or packet id is live.
    pub fn add(&mut self, packet_id: NonZeroU16, command: Command) -> Result<(), Command> {
        if self.position(packet_id).is_some() {
            log::error!("Packet id {} is already awaiting acknowledgment", packet_id);
            return Err(command);
        }
        match self.slots.iter_mut().find(|s| s.is_none()) {
            Some(slot) => {
                *slot = Some(PendingAck { packet_id, command });
                Ok(())
            }
            None => Err(command),
        }
    }

    pub fn contains(&self, packet_id: NonZeroU16) -> bool {
        self.position(packet_id).is_some()
    }

    pub fn get(&self, packet_id: NonZeroU16) -> Option<&PendingAck> {
        self.position(packet_id).and_then(|idx| self.slots[idx].as_ref())
    }

    pub fn get_mut(&mut self, packet_id: NonZeroU16) -> Option<&mut PendingAck> {
        self.position(packet_id).and_then(move |idx| self.slots[idx].as_mut())
    }

    /// Remove entry and free its slot
    pub fn take(&mut self, packet_id: NonZeroU16) -> Option<PendingAck> {
        self.position(packet_id).and_then(|idx| self.slots[idx].take())
    }

    /// Complete every live operation with `err` and free all slots
    pub fn clear_all_with_error(&mut self, err: MqttError) {
        for slot in self.slots.iter_mut() {
            if let Some(ack) = slot.take() {
                log::debug!("Failing operation waiting for ack {}: {}", ack.packet_id, err);
                ack.command.complete(Err(err.clone()));
            }
        }
    }

    pub fn packet_ids(&self) -> impl Iterator<Item = NonZeroU16> + '_ {
        self.slots.iter().flatten().map(|ack| ack.packet_id)
    }

    fn position(&self, packet_id: NonZeroU16) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().map_or(false, |ack| ack.packet_id == packet_id))
    }
}
