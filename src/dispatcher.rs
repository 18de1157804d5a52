use std::{future::poll_fn, num::NonZeroU16, task::Poll};

use ntex_util::time::sleep;

use crate::acks::{AckTable, PendingAck};
use crate::backoff::Backoff;
use crate::command::{Command, CommandKind};
use crate::config::MqttConfig;
use crate::error::{MqttError, Resource, TransportError};
use crate::packet::Connect;
use crate::protocol::{Protocol, ResendCursor, Transport};
use crate::queue::{CommandQueue, ResponseQueue};
use crate::router::EventRouter;
use crate::subs::SubscriptionRegistry;

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    struct Flags: u8 {
        const CONNECTED  = 0b0000_0001;
        const TERMINATED = 0b0000_0010;
    }
}

/// Dispatcher state
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    Idle,
    Connected,
    Publishing,
    Subscribing,
    Unsubscribing,
    Pinging,
    Disconnecting,
    Reconnecting,
    Terminated,
}

/// Sole owner of the mqtt session.
///
/// Executes queued commands one by one, tracks operations waiting for
/// acknowledgment and routes inbound publishes to subscribers.
pub struct Dispatcher<P, T> {
    protocol: P,
    transport: T,
    queue: CommandQueue,
    acks: AckTable,
    subs: SubscriptionRegistry,
    default_target: ResponseQueue,
    cfg: MqttConfig,
    state: State,
    flags: Flags,
    processed: usize,
}

impl<P, T> Dispatcher<P, T>
where
    P: Protocol,
    T: Transport,
{
    pub fn new(
        protocol: P,
        transport: T,
        queue: CommandQueue,
        default_target: ResponseQueue,
        cfg: MqttConfig,
    ) -> Self {
        Dispatcher {
            acks: AckTable::new(cfg.max_pending_acks),
            subs: SubscriptionRegistry::new(cfg.max_subscriptions),
            protocol,
            transport,
            queue,
            default_target,
            cfg,
            state: State::Idle,
            flags: Flags::empty(),
            processed: 0,
        }
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn default_target(&self) -> &ResponseQueue {
        &self.default_target
    }

    pub fn config(&self) -> &MqttConfig {
        &self.cfg
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn acks(&self) -> &AckTable {
        &self.acks
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subs
    }

    /// Number of processed commands
    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Check if network connection is open
    pub fn is_network_connected(&self) -> bool {
        self.flags.contains(Flags::CONNECTED)
    }

    pub fn is_terminated(&self) -> bool {
        self.flags.contains(Flags::TERMINATED)
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open network connection, retry with backoff
    pub async fn socket_connect(&mut self) -> Result<(), TransportError> {
        let mut backoff = Backoff::new(self.cfg.backoff);

        loop {
            match self.transport.connect().await {
                Ok(()) => {
                    log::info!("Network connection is established");
                    self.flags.insert(Flags::CONNECTED);
                    return Ok(());
                }
                Err(err) => {
                    log::warn!("Connection to the broker failed: {}", err);
                    match backoff.next_backoff() {
                        Some(delay) => {
                            log::info!(
                                "Retry attempt {} out of {} in {:?}",
                                backoff.attempts(),
                                self.cfg.backoff.max_attempts,
                                delay
                            );
                            sleep(delay).await;
                        }
                        None => {
                            log::error!("All retry attempts are exhausted");
                            return Err(TransportError::RetriesExhausted {
                                attempts: backoff.attempts(),
                            });
                        }
                    }
                }
            }
        }
    }

    /// Close network connection
    pub async fn socket_disconnect(&mut self) -> Result<(), TransportError> {
        self.flags.remove(Flags::CONNECTED);
        self.transport.disconnect().await
    }

    /// Open network connection and establish mqtt session
    pub async fn connect(&mut self, clean_session: bool) -> Result<bool, MqttError> {
        self.socket_connect().await?;
        self.mqtt_connect(clean_session).await
    }

    /// Establish mqtt session over open network connection.
    ///
    /// Clean session drops all operations waiting for acknowledgment and
    /// all subscriptions, persistent session is resumed.
    pub async fn mqtt_connect(&mut self, clean_session: bool) -> Result<bool, MqttError> {
        let pkt = Connect {
            clean_session,
            keep_alive: self.cfg.keep_alive.0,
            client_id: self.cfg.client_id.clone(),
        };
        log::debug!("Connecting to the broker, clean session: {}", clean_session);

        let session_present = self.protocol.connect(&pkt, self.cfg.connack_timeout).await?;
        log::info!("Session present: {}", session_present);
        self.state = State::Connected;

        if clean_session {
            self.acks.clear_all_with_error(MqttError::SessionExpired);
            self.subs.clear();
        } else {
            self.resume_session(session_present).await?;
        }
        Ok(session_present)
    }

    /// Restore operations after persistent session connect.
    ///
    /// If broker kept the session, unacknowledged publishes are sent again,
    /// otherwise pending operations fail and subscriptions are renewed
    /// before any other queued command.
    pub async fn resume_session(&mut self, session_present: bool) -> Result<(), MqttError> {
        if session_present {
            let mut cursor = ResendCursor::new();

            while let Some(packet_id) = self.protocol.publish_to_resend(&mut cursor) {
                if let Some(PendingAck { command: Command::Publish { publish, .. }, .. }) =
                    self.acks.get_mut(packet_id)
                {
                    publish.dup = true;
                    log::debug!("Resending publish {} to {:?}", packet_id, publish.topic);
                    if let Err(err) = self.protocol.publish(publish).await {
                        log::error!("Error in resending publishes: {}", err);
                        return Err(err.into());
                    }
                }
            }
        } else {
            self.acks.clear_all_with_error(MqttError::SessionExpired);

            let filters = self.subs.filters();
            if !filters.is_empty() {
                log::info!("Resubscribing to {} topic filters", filters.len());
                let cmd = Command::Subscribe { filters, target: None, completion: None };
                if self.queue.push_front(cmd, self.cfg.command_timeout).await.is_err() {
                    log::error!("Cannot add resubscribe operation to command queue");
                    return Err(MqttError::ResourceExhausted(Resource::CommandQueue));
                }
            }
        }
        Ok(())
    }

    /// Execute single command.
    ///
    /// Runs one iteration of protocol process loop afterwards if the
    /// command succeeded and session is still connected.
    pub async fn process_command(&mut self, cmd: Command) -> Result<(), MqttError> {
        let result = match cmd {
            Command::ProcessLoop => {
                log::trace!("Running process loop");
                Ok(())
            }
            Command::Publish { mut publish, completion } => {
                self.state = State::Publishing;
                publish.packet_id = if publish.qos.needs_ack() {
                    Some(self.protocol.next_packet_id())
                } else {
                    None
                };
                log::debug!("Publishing message to {:?}", publish.topic);

                let result = self.protocol.publish(&publish).await.map_err(MqttError::from);
                let packet_id = publish.packet_id;
                self.track(packet_id, Command::Publish { publish, completion }, result)
            }
            Command::Subscribe { filters, target, completion } => {
                self.state = State::Subscribing;
                let packet_id = self.protocol.next_packet_id();
                log::debug!("Subscribing to {:?}", filters);

                let result =
                    self.protocol.subscribe(&filters, packet_id).await.map_err(MqttError::from);
                let cmd = Command::Subscribe { filters, target, completion };
                self.track(Some(packet_id), cmd, result)
            }
            Command::Unsubscribe { filters, completion } => {
                self.state = State::Unsubscribing;
                let packet_id = self.protocol.next_packet_id();
                log::debug!("Unsubscribing from {:?}", filters);

                let result =
                    self.protocol.unsubscribe(&filters, packet_id).await.map_err(MqttError::from);
                self.track(Some(packet_id), Command::Unsubscribe { filters, completion }, result)
            }
            Command::Ping { completion } => {
                self.state = State::Pinging;
                let result = self.protocol.ping().await.map_err(MqttError::from);
                self.track(None, Command::Ping { completion }, result)
            }
            Command::Disconnect { completion } => {
                self.state = State::Disconnecting;
                let result = self.protocol.disconnect().await.map_err(MqttError::from);
                if result.is_ok() {
                    log::info!("Disconnected from the broker");
                }
                self.track(None, Command::Disconnect { completion }, result)
            }
            Command::Reconnect => {
                self.state = State::Reconnecting;
                self.reconnect().await
            }
            Command::Terminate => {
                log::info!("Terminating command loop");
                self.flags.insert(Flags::TERMINATED);
                Ok(())
            }
        };

        match self.state {
            State::Terminated | State::Idle => (),
            _ if self.protocol.is_connected() => self.state = State::Connected,
            _ => self.state = State::Idle,
        }

        if result.is_ok() && self.protocol.is_connected() {
            let mut router = EventRouter::new(&mut self.acks, &mut self.subs, &self.default_target);
            self.protocol.process_loop(self.cfg.process_loop_timeout, &mut router).await?;
        }
        result
    }

    /// Run command loop until `Terminate` command.
    ///
    /// Failed operations schedule reconnect, failed reconnect stops the loop.
    /// Session is disconnected after termination.
    pub async fn run(&mut self) -> Result<(), MqttError> {
        loop {
            let cmd = match self.queue.recv(self.cfg.command_timeout).await {
                Some(cmd) => cmd,
                None => {
                    log::info!("No commands in the queue, trying again");
                    if self.queue.try_push(Command::ProcessLoop).is_err() {
                        log::warn!("Command queue is full, cannot add process loop operation");
                    }
                    continue;
                }
            };
            let kind = cmd.kind();

            if let Err(err) = self.process_command(cmd).await {
                if kind == CommandKind::Reconnect {
                    log::error!("Reconnect failed: {}", err);
                    self.state = State::Terminated;
                    return Err(err);
                }
                log::error!("{} operation failed: {}", kind, err);

                let timeout = self.cfg.command_timeout;
                if self.queue.push_front(Command::Reconnect, timeout).await.is_err() {
                    log::error!("Cannot add reconnect operation to command queue");
                    self.state = State::Terminated;
                    return Err(MqttError::ResourceExhausted(Resource::CommandQueue));
                }
            }
            self.processed += 1;

            match kind {
                CommandKind::ProcessLoop => {
                    let timeout = self.cfg.command_timeout;
                    if self.queue.push(Command::ProcessLoop, timeout).await.is_err() {
                        log::error!("Cannot add process loop operation to command queue");
                        self.state = State::Terminated;
                        return Err(MqttError::ResourceExhausted(Resource::CommandQueue));
                    }
                    yield_now().await;
                }
                CommandKind::Subscribe => {
                    log::debug!("Sleeping for {:?} after subscribe", self.cfg.subscribe_settle);
                    sleep(self.cfg.subscribe_settle).await;
                }
                CommandKind::Terminate => break,
                _ => (),
            }
            log::debug!("Processed {} operations", self.processed);
        }

        log::info!("Creating disconnect operation");
        let result = self.process_command(Command::Disconnect { completion: None }).await;
        self.state = State::Terminated;
        result
    }

    /// Drop all session state, queued commands and undelivered messages.
    ///
    /// Operations waiting for acknowledgment fail with `MqttError::Disconnected`.
    pub fn reset(&mut self) {
        self.acks.clear_all_with_error(MqttError::Disconnected);
        self.subs.clear();
        self.queue.clear();
        self.default_target.clear();
        self.flags = Flags::empty();
        self.state = State::Idle;
        self.processed = 0;
    }

    /// Replace command queue.
    ///
    /// Commands left in the previous queue are dropped, producers still
    /// holding it cannot reach this dispatcher anymore.
    pub fn set_queue(&mut self, queue: CommandQueue) {
        self.queue.clear();
        self.queue = queue;
    }

    async fn reconnect(&mut self) -> Result<(), MqttError> {
        log::info!("Reconnecting to the broker");
        self.socket_disconnect().await?;
        self.socket_connect().await?;
        self.mqtt_connect(false).await.map(|_| ())
    }

    /// Complete the command or store it until acknowledgment arrives
    fn track(
        &mut self,
        packet_id: Option<NonZeroU16>,
        cmd: Command,
        result: Result<(), MqttError>,
    ) -> Result<(), MqttError> {
        match (result, packet_id) {
            (Ok(()), Some(packet_id)) => {
                if self.acks.contains(packet_id) {
                    cmd.complete(Err(MqttError::PacketIdInUse(packet_id)));
                } else if let Err(cmd) = self.acks.add(packet_id, cmd) {
                    log::error!("No memory to wait for acknowledgment for packet {}", packet_id);
                    cmd.complete(Err(MqttError::ResourceExhausted(Resource::AckTable)));
                }
                Ok(())
            }
            (Ok(()), None) => {
                cmd.complete(Ok(()));
                Ok(())
            }
            (Err(err), _) => {
                cmd.complete(Err(err.clone()));
                Err(err)
            }
        }
    }
}

/// Let other tasks run before next command loop iteration
async fn yield_now() {
    let mut yielded = false;
    poll_fn(|cx| {
        if yielded {
            Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    })
    .await
}
