//! Connection sharing demo.
//!
//! Every iteration connects with a persistent session, starts a subscriber
//! and two publishers and runs the dispatcher until the subscriber
//! terminates it.
use ntex_util::time::sleep;

use crate::command::{channel, wait_all, Command};
use crate::config::{DemoConfig, MqttConfig};
use crate::dispatcher::Dispatcher;
use crate::error::MqttError;
use crate::producer::{async_publisher, subscriber, sync_publisher};
use crate::protocol::{Protocol, Transport};
use crate::queue::{CommandQueue, ResponseQueue};
use crate::sink::MqttSink;

/// Outcome of demo run
#[derive(Debug)]
pub struct DemoReport {
    /// Result of initial clean session connect
    pub cleanup: Result<(), MqttError>,
    /// Result of every iteration
    pub results: Vec<Result<(), MqttError>>,
}

impl DemoReport {
    pub fn successes(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// Demo succeeds if more than half of iterations succeed
    pub fn is_success(&self) -> bool {
        self.successes() > self.results.len() / 2
    }
}

/// Run connection sharing demo
pub async fn run<P, T>(protocol: P, transport: T, cfg: MqttConfig, demo: DemoConfig) -> DemoReport
where
    P: Protocol,
    T: Transport,
{
    let queue = CommandQueue::new(cfg.command_queue_size);
    let default_target = ResponseQueue::new(demo.default_queue_size);
    let mut disp = Dispatcher::new(protocol, transport, queue, default_target, cfg.clone());

    log::info!("Creating a clean session to clear any broker state information");
    let cleanup = clean_session(&mut disp).await;
    if let Err(ref err) = cleanup {
        log::error!("Cannot clear broker state: {}", err);
    }

    let mut results = Vec::with_capacity(demo.iterations as usize);
    for iteration in 1..=demo.iterations {
        // tasks of a failed iteration may outlive it, they keep the old queues
        disp.reset();
        disp.set_queue(CommandQueue::new(cfg.command_queue_size));
        let responses = ResponseQueue::new(demo.response_queue_size);

        let mut result = run_iteration(&mut disp, responses, &cfg, &demo).await;

        if disp.is_network_connected() {
            log::info!("Disconnecting network connection");
            if let Err(err) = disp.socket_disconnect().await {
                log::error!("Cannot close network connection: {}", err);
                result = result.and(Err(err.into()));
            }
        }

        match result {
            Ok(()) => log::info!("Demo iteration {} completed successfully", iteration),
            Err(ref err) => log::error!("Demo failed at iteration {}: {}", iteration, err),
        }
        results.push(result);

        if iteration < demo.iterations {
            log::info!("Short delay before starting the next iteration");
            sleep(demo.iteration_delay).await;
        }
    }

    let report = DemoReport { cleanup, results };
    if report.is_success() {
        log::info!(
            "Demo run is successful with {} successful loops out of total {} loops",
            report.successes(),
            demo.iterations
        );
    } else {
        log::error!(
            "Demo failed with {} successful loops out of total {} loops",
            report.successes(),
            demo.iterations
        );
    }
    report
}

async fn clean_session<P, T>(disp: &mut Dispatcher<P, T>) -> Result<(), MqttError>
where
    P: Protocol,
    T: Transport,
{
    let result = match disp.connect(true).await {
        Ok(_) => disp.process_command(Command::Disconnect { completion: None }).await,
        Err(err) => Err(err),
    };
    if disp.is_network_connected() {
        disp.socket_disconnect().await?;
    }
    result
}

async fn run_iteration<P, T>(
    disp: &mut Dispatcher<P, T>,
    responses: ResponseQueue,
    cfg: &MqttConfig,
    demo: &DemoConfig,
) -> Result<(), MqttError>
where
    P: Protocol,
    T: Transport,
{
    disp.connect(false).await?;

    let sink = MqttSink::new(disp.queue().clone(), cfg.command_timeout);
    let mut tasks = Vec::with_capacity(3);

    // subscriber goes first, its subscribe must reach the broker before any publish
    let (tx, rx) = channel();
    tasks.push(rx);
    let (s, r, c, d) = (sink.clone(), responses, cfg.clone(), demo.clone());
    ntex_rt::spawn(async move {
        tx.complete(subscriber(s, r, &c, &d).await.map(|_| ()));
    });

    let (tx, rx) = channel();
    tasks.push(rx);
    let (s, c, d) = (sink.clone(), cfg.clone(), demo.clone());
    ntex_rt::spawn(async move {
        tx.complete(sync_publisher(s, &c, &d).await);
    });

    let (tx, rx) = channel();
    tasks.push(rx);
    let (s, c, d) = (sink, cfg.clone(), demo.clone());
    ntex_rt::spawn(async move {
        tx.complete(async_publisher(s, &c, &d).await);
    });

    log::info!("Running command loop");
    let result = disp.run().await;
    if result.is_err() {
        // fail commands nobody is going to execute
        disp.queue().clear();
    }

    log::info!("Waiting for tasks to exit");
    let tasks = wait_all(tasks, cfg.command_timeout, cfg.max_wait_iterations).await;
    result?;
    tasks.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_majority() {
        let report = DemoReport {
            cleanup: Ok(()),
            results: vec![Ok(()), Err(MqttError::Timeout), Ok(())],
        };
        assert_eq!(report.successes(), 2);
        assert!(report.is_success());

        let report = DemoReport {
            cleanup: Ok(()),
            results: vec![Ok(()), Err(MqttError::Timeout), Ok(()), Err(MqttError::Timeout)],
        };
        assert!(!report.is_success());
        assert!(!DemoReport { cleanup: Ok(()), results: Vec::new() }.is_success());
    }
}
