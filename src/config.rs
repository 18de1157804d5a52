use ntex_bytes::ByteString;
use ntex_util::time::{Millis, Seconds};

/// Reconnect backoff parameters
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    pub(crate) base: Millis,
    pub(crate) max_delay: Millis,
    pub(crate) max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffConfig {
    pub const fn new() -> Self {
        Self { base: Millis(500), max_delay: Millis(5_000), max_attempts: 5 }
    }

    /// Set initial jitter window.
    ///
    /// By default base delay is 500 millis.
    pub fn set_base(mut self, base: Millis) -> Self {
        self.base = base;
        self
    }

    /// Set upper limit of a single delay.
    ///
    /// By default max delay is 5 seconds.
    pub fn set_max_delay(mut self, delay: Millis) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set number of connect attempts.
    ///
    /// `0` retries forever. By default 5 attempts are made.
    pub fn set_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn base(&self) -> Millis {
        self.base
    }

    pub fn max_delay(&self) -> Millis {
        self.max_delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Dispatcher configuration
#[derive(Clone, Debug)]
pub struct MqttConfig {
    pub(crate) client_id: ByteString,
    pub(crate) keep_alive: Seconds,
    pub(crate) connack_timeout: Millis,
    pub(crate) command_timeout: Millis,
    pub(crate) process_loop_timeout: Millis,
    pub(crate) subscribe_settle: Millis,
    pub(crate) max_pending_acks: usize,
    pub(crate) max_subscriptions: usize,
    pub(crate) command_queue_size: usize,
    pub(crate) max_wait_iterations: u32,
    pub(crate) backoff: BackoffConfig,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttConfig {
    pub fn new() -> Self {
        Self {
            client_id: ByteString::from_static("ntex-mqtt-mux"),
            keep_alive: Seconds(60),
            connack_timeout: Millis(1_000),
            command_timeout: Millis(1_000),
            process_loop_timeout: Millis::ZERO,
            subscribe_settle: Millis(400),
            max_pending_acks: 10,
            max_subscriptions: 4,
            command_queue_size: 12,
            max_wait_iterations: 20,
            backoff: BackoffConfig::new(),
        }
    }

    /// Set client identifier sent in `Connect` packet
    pub fn set_client_id<T>(mut self, id: T) -> Self
    where
        ByteString: From<T>,
    {
        self.client_id = id.into();
        self
    }

    /// Set keep-alive interval.
    ///
    /// By default keep-alive is 60 seconds.
    pub fn set_keep_alive(mut self, val: Seconds) -> Self {
        self.keep_alive = val;
        self
    }

    /// Set time to wait for `ConnectAck` from broker.
    ///
    /// By default connack timeout is 1 second.
    pub fn set_connack_timeout(mut self, timeout: Millis) -> Self {
        self.connack_timeout = timeout;
        self
    }

    /// Set queue timeout.
    ///
    /// Bounds blocking submit into a full queue, the dispatcher idle receive
    /// and a single iteration of a producer wait loop.
    /// By default timeout is 1 second.
    pub fn set_command_timeout(mut self, timeout: Millis) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set time a single process loop iteration may wait for inbound data.
    ///
    /// By default process loop does not wait.
    pub fn set_process_loop_timeout(mut self, timeout: Millis) -> Self {
        self.process_loop_timeout = timeout;
        self
    }

    /// Set delay after each subscribe command.
    ///
    /// Gives broker time to register subscription before following publishes.
    /// By default delay is 400 millis.
    pub fn set_subscribe_settle(mut self, delay: Millis) -> Self {
        self.subscribe_settle = delay;
        self
    }

    /// Set max number of operations waiting for acknowledgment.
    ///
    /// By default 10 operations.
    pub fn set_max_pending_acks(mut self, val: usize) -> Self {
        self.max_pending_acks = val;
        self
    }

    /// Set max number of active subscriptions.
    ///
    /// By default 4 subscriptions.
    pub fn set_max_subscriptions(mut self, val: usize) -> Self {
        self.max_subscriptions = val;
        self
    }

    /// Set command queue capacity.
    ///
    /// By default 12 commands.
    pub fn set_command_queue_size(mut self, val: usize) -> Self {
        self.command_queue_size = val;
        self
    }

    /// Set number of wait iterations before an operation wait fails.
    ///
    /// By default 20 iterations.
    pub fn set_max_wait_iterations(mut self, val: u32) -> Self {
        self.max_wait_iterations = val;
        self
    }

    /// Set reconnect backoff parameters
    pub fn set_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn client_id(&self) -> &ByteString {
        &self.client_id
    }

    pub fn keep_alive(&self) -> Seconds {
        self.keep_alive
    }

    pub fn connack_timeout(&self) -> Millis {
        self.connack_timeout
    }

    pub fn command_timeout(&self) -> Millis {
        self.command_timeout
    }

    pub fn process_loop_timeout(&self) -> Millis {
        self.process_loop_timeout
    }

    pub fn subscribe_settle(&self) -> Millis {
        self.subscribe_settle
    }

    pub fn max_pending_acks(&self) -> usize {
        self.max_pending_acks
    }

    pub fn max_subscriptions(&self) -> usize {
        self.max_subscriptions
    }

    pub fn command_queue_size(&self) -> usize {
        self.command_queue_size
    }

    pub fn max_wait_iterations(&self) -> u32 {
        self.max_wait_iterations
    }

    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }
}

/// Connection sharing demo configuration
#[derive(Clone, Debug)]
pub struct DemoConfig {
    pub(crate) iterations: u32,
    pub(crate) publish_count: u16,
    pub(crate) topic_filter: ByteString,
    pub(crate) response_queue_size: usize,
    pub(crate) default_queue_size: usize,
    pub(crate) sync_delay: Millis,
    pub(crate) async_delay: Millis,
    pub(crate) subscribe_delay: Millis,
    pub(crate) iteration_delay: Millis,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoConfig {
    pub fn new() -> Self {
        Self {
            iterations: 3,
            publish_count: 8,
            topic_filter: ByteString::from_static("filter/+/+"),
            response_queue_size: 10,
            default_queue_size: 1,
            sync_delay: Millis(100),
            async_delay: Millis(100),
            subscribe_delay: Millis(400),
            iteration_delay: Seconds(5).into(),
        }
    }

    /// Set number of demo iterations.
    ///
    /// By default 3 iterations.
    pub fn set_iterations(mut self, val: u32) -> Self {
        self.iterations = val;
        self
    }

    /// Set total number of messages published by both publishers.
    ///
    /// By default 8 messages.
    pub fn set_publish_count(mut self, val: u16) -> Self {
        self.publish_count = val;
        self
    }

    /// Set subscriber topic filter.
    ///
    /// By default `filter/+/+`.
    pub fn set_topic_filter<T>(mut self, filter: T) -> Self
    where
        ByteString: From<T>,
    {
        self.topic_filter = filter.into();
        self
    }

    /// Set subscriber response queue capacity.
    ///
    /// By default 10 messages.
    pub fn set_response_queue_size(mut self, val: usize) -> Self {
        self.response_queue_size = val;
        self
    }

    /// Set capacity of queue for messages on unmatched topics.
    ///
    /// By default 1 message.
    pub fn set_default_queue_size(mut self, val: usize) -> Self {
        self.default_queue_size = val;
        self
    }

    /// Set delay between synchronous publishes.
    pub fn set_sync_delay(mut self, delay: Millis) -> Self {
        self.sync_delay = delay;
        self
    }

    /// Set delay between asynchronous publishes.
    pub fn set_async_delay(mut self, delay: Millis) -> Self {
        self.async_delay = delay;
        self
    }

    /// Set subscriber polling delay.
    ///
    /// Also delays start of asynchronous publisher.
    pub fn set_subscribe_delay(mut self, delay: Millis) -> Self {
        self.subscribe_delay = delay;
        self
    }

    /// Set delay between demo iterations.
    ///
    /// By default 5 seconds.
    pub fn set_iteration_delay<T: Into<Millis>>(mut self, delay: T) -> Self {
        self.iteration_delay = delay.into();
        self
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn publish_count(&self) -> u16 {
        self.publish_count
    }

    pub fn topic_filter(&self) -> &ByteString {
        &self.topic_filter
    }

    pub fn response_queue_size(&self) -> usize {
        self.response_queue_size
    }

    pub fn default_queue_size(&self) -> usize {
        self.default_queue_size
    }

    pub fn sync_delay(&self) -> Millis {
        self.sync_delay
    }

    pub fn async_delay(&self) -> Millis {
        self.async_delay
    }

    pub fn subscribe_delay(&self) -> Millis {
        self.subscribe_delay
    }

    pub fn iteration_delay(&self) -> Millis {
        self.iteration_delay
    }
}
