use std::{fmt, future::poll_fn};

use ntex_bytes::ByteString;
use ntex_util::{channel::oneshot, time::timeout, time::Millis};

use crate::{error::MqttError, packet::Publish, queue::ResponseQueue, types::QoS};

/// Operation submitted to the dispatcher
#[derive(Debug)]
pub enum Command {
    /// Run single iteration of the codec process loop
    ProcessLoop,
    Publish {
        publish: Publish,
        completion: Option<Completion>,
    },
    Subscribe {
        filters: Vec<(ByteString, QoS)>,
        /// Destination of delivered messages, `None` keeps existing bindings
        target: Option<ResponseQueue>,
        completion: Option<Completion>,
    },
    Unsubscribe {
        filters: Vec<ByteString>,
        completion: Option<Completion>,
    },
    Ping {
        completion: Option<Completion>,
    },
    Disconnect {
        completion: Option<Completion>,
    },
    /// Re-establish connection and resume session
    Reconnect,
    /// Stop dispatcher
    Terminate,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommandKind {
    ProcessLoop,
    Publish,
    Subscribe,
    Unsubscribe,
    Ping,
    Disconnect,
    Reconnect,
    Terminate,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::ProcessLoop => "PROCESSLOOP",
            CommandKind::Publish => "PUBLISH",
            CommandKind::Subscribe => "SUBSCRIBE",
            CommandKind::Unsubscribe => "UNSUBSCRIBE",
            CommandKind::Ping => "PING",
            CommandKind::Disconnect => "DISCONNECT",
            CommandKind::Reconnect => "RECONNECT",
            CommandKind::Terminate => "TERMINATE",
        };
        f.write_str(name)
    }
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::ProcessLoop => CommandKind::ProcessLoop,
            Command::Publish { .. } => CommandKind::Publish,
            Command::Subscribe { .. } => CommandKind::Subscribe,
            Command::Unsubscribe { .. } => CommandKind::Unsubscribe,
            Command::Ping { .. } => CommandKind::Ping,
            Command::Disconnect { .. } => CommandKind::Disconnect,
            Command::Reconnect => CommandKind::Reconnect,
            Command::Terminate => CommandKind::Terminate,
        }
    }

    /// Deliver operation result to the submitter, if it waits for one
    pub fn complete(self, result: Result<(), MqttError>) {
        let kind = self.kind();
        match self {
            Command::Publish { completion, .. }
            | Command::Subscribe { completion, .. }
            | Command::Unsubscribe { completion, .. }
            | Command::Ping { completion }
            | Command::Disconnect { completion } => {
                if let Some(completion) = completion {
                    completion.complete(result);
                } else if let Err(err) = result {
                    log::debug!("{} operation failed: {}", kind, err);
                }
            }
            Command::ProcessLoop | Command::Reconnect | Command::Terminate => (),
        }
    }
}

/// Sending half of an operation result
pub struct Completion(oneshot::Sender<Result<(), MqttError>>);

impl Completion {
    pub fn complete(self, result: Result<(), MqttError>) {
        if self.0.send(result).is_err() {
            log::debug!("Operation waiter is gone, result is dropped");
        }
    }

    /// Check if waiter stopped waiting
    pub fn is_canceled(&self) -> bool {
        self.0.is_canceled()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish()
    }
}

/// Create operation completion and its waiter
pub fn channel() -> (Completion, Waiter) {
    let (tx, rx) = oneshot::channel();
    (Completion(tx), Waiter(rx))
}

/// Receiving half of an operation result
pub struct Waiter(oneshot::Receiver<Result<(), MqttError>>);

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter").finish()
    }
}

impl Waiter {
    /// Wait for operation result.
    ///
    /// Each iteration waits up to `interval`, operation fails with
    /// `MqttError::Timeout` after `max_iterations` empty iterations.
    pub async fn wait(self, interval: Millis, max_iterations: u32) -> Result<(), MqttError> {
        let mut budget = max_iterations;
        self.wait_budget(interval, &mut budget).await
    }

    async fn wait_budget(self, interval: Millis, budget: &mut u32) -> Result<(), MqttError> {
        loop {
            match timeout(interval, poll_fn(|cx| self.0.poll_recv(cx))).await {
                Ok(Ok(result)) => return result,
                Ok(Err(_)) => return Err(MqttError::Disconnected),
                Err(_) => {
                    *budget = budget.saturating_sub(1);
                    if *budget == 0 {
                        return Err(MqttError::Timeout);
                    }
                    log::trace!("Operation is not complete, {} wait iterations left", budget);
                }
            }
        }
    }
}

/// Wait for several operations sharing one iteration budget.
///
/// Results are returned in waiters order.
pub async fn wait_all(
    waiters: Vec<Waiter>,
    interval: Millis,
    max_iterations: u32,
) -> Vec<Result<(), MqttError>> {
    let mut budget = max_iterations;
    let mut results = Vec::with_capacity(waiters.len());
    for waiter in waiters {
        let result = if budget == 0 {
            // budget is spent, collect only already completed operations
            waiter.wait_budget(Millis(1), &mut 1).await
        } else {
            waiter.wait_budget(interval, &mut budget).await
        };
        results.push(result);
    }
    results
}

#[cfg(test)]
mod tests {
    use ntex_util::time::sleep;

    use super::*;

    #[ntex::test]
    async fn test_completion() {
        let (tx, rx) = channel();
        Command::Ping { completion: Some(tx) }.complete(Ok(()));
        assert_eq!(rx.wait(Millis(10), 1).await, Ok(()));

        let (tx, rx) = channel();
        Command::Disconnect { completion: Some(tx) }.complete(Err(MqttError::Timeout));
        assert_eq!(rx.wait(Millis(10), 1).await, Err(MqttError::Timeout));
    }

    #[ntex::test]
    async fn test_abandoned_waiter() {
        let (tx, rx) = channel();
        assert!(!tx.is_canceled());
        drop(rx);
        assert!(tx.is_canceled());
        // must not panic
        tx.complete(Ok(()));
    }

    #[ntex::test]
    async fn test_dropped_completion() {
        let (tx, rx) = channel();
        drop(Command::Unsubscribe { filters: Vec::new(), completion: Some(tx) });
        assert_eq!(rx.wait(Millis(10), 1).await, Err(MqttError::Disconnected));
    }

    #[ntex::test]
    async fn test_wait_timeout() {
        let (_tx, rx) = channel();
        assert_eq!(rx.wait(Millis(5), 3).await, Err(MqttError::Timeout));
    }

    #[ntex::test]
    async fn test_wait_all() {
        let (tx1, rx1) = channel();
        let (tx2, rx2) = channel();
        let (_tx3, rx3) = channel();

        ntex_rt::spawn(async move {
            sleep(Millis(20)).await;
            tx2.complete(Err(MqttError::SessionExpired));
            tx1.complete(Ok(()));
        });

        let results = wait_all(vec![rx1, rx2, rx3], Millis(10), 5).await;
        assert_eq!(
            results,
            vec![Ok(()), Err(MqttError::SessionExpired), Err(MqttError::Timeout)]
        );
    }

    #[test]
    fn test_kind() {
        assert_eq!(Command::ProcessLoop.kind(), CommandKind::ProcessLoop);
        assert_eq!(Command::Reconnect.kind().to_string(), "RECONNECT");
        assert_eq!(
            Command::Unsubscribe { filters: Vec::new(), completion: None }.kind(),
            CommandKind::Unsubscribe
        );
    }
}
