//! Shared MQTT connection with single command dispatcher
//!
//! Producers queue commands through [`MqttSink`], one [`Dispatcher`]
//! owns the session, executes commands one at a time and routes inbound
//! publishes to subscribers' response queues.

mod acks;
mod backoff;
mod command;
mod config;
mod dispatcher;
mod error;
mod queue;
mod router;
mod sink;
mod subs;

pub mod demo;
pub mod loopback;
pub mod packet;
pub mod producer;
pub mod protocol;
pub mod topic;
pub mod types;

pub use self::acks::{AckTable, PendingAck};
pub use self::backoff::Backoff;
pub use self::command::{channel, wait_all, Command, CommandKind, Completion, Waiter};
pub use self::config::{BackoffConfig, DemoConfig, MqttConfig};
pub use self::dispatcher::{Dispatcher, State};
pub use self::error::{MqttError, ProtocolError, Resource, TransportError};
pub use self::packet::{Connect, Packet, Publish};
pub use self::protocol::{EventHandler, Protocol, ResendCursor, Transport};
pub use self::queue::{CommandQueue, Queue, ResponseQueue};
pub use self::router::EventRouter;
pub use self::sink::{MqttSink, PublishBuilder, SubscribeBuilder, UnsubscribeBuilder};
pub use self::subs::{Subscription, SubscriptionRegistry};
pub use self::topic::{TopicError, TopicFilter};
pub use self::types::QoS;
