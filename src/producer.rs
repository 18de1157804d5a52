//! Demo producers sharing one dispatcher
use ntex_bytes::{ByteString, Bytes};
use ntex_util::time::sleep;

use crate::command::wait_all;
use crate::config::{DemoConfig, MqttConfig};
use crate::{error::MqttError, queue::ResponseQueue, sink::MqttSink, types::QoS};

fn message(kind: &str, label: &str, idx: u16) -> (ByteString, Bytes) {
    let topic = ByteString::from(format!("filter/{}/{}", kind, idx));
    (topic, Bytes::from(format!("Hello World! {}: {}", label, idx)))
}

/// Publish first half of messages, waiting for each acknowledgment
pub async fn sync_publisher(
    sink: MqttSink,
    cfg: &MqttConfig,
    demo: &DemoConfig,
) -> Result<(), MqttError> {
    let count = (demo.publish_count + 1) / 2;

    for idx in 1..=count {
        let (topic, payload) = message("sync", "Sync", idx);
        log::info!("Adding publish operation for message {:?} on topic {:?}", payload, topic);

        let waiter = sink.publish(topic, payload).qos(QoS::AtLeastOnce).send().await?;
        log::info!("Waiting for publish {} to complete", idx);
        if let Err(err) = waiter.wait(cfg.command_timeout, cfg.max_wait_iterations).await {
            log::error!("Synchronous publish {} failed: {}", idx, err);
            return Err(err);
        }

        log::info!("Publish operation complete, sleeping for {:?}", demo.sync_delay);
        sleep(demo.sync_delay).await;
    }
    log::info!("Finished sync publishes");
    Ok(())
}

/// Queue second half of messages, then wait for all acknowledgments
pub async fn async_publisher(
    sink: MqttSink,
    cfg: &MqttConfig,
    demo: &DemoConfig,
) -> Result<(), MqttError> {
    sleep(demo.subscribe_delay).await;

    let count = demo.publish_count / 2;
    let mut waiters = Vec::with_capacity(count as usize);
    for idx in 1..=count {
        let (topic, payload) = message("async", "Async", idx);
        log::info!("Adding publish operation for message {:?} on topic {:?}", payload, topic);

        match sink.publish(topic, payload).qos(QoS::AtLeastOnce).send().await {
            Ok(waiter) => waiters.push(waiter),
            Err(err) => {
                log::error!("Could not enqueue publish {}: {}", idx, err);
                return Err(err);
            }
        }
        log::info!("Publish operation queued, sleeping for {:?}", demo.async_delay);
        sleep(demo.async_delay).await;
    }
    log::info!("Finished async publishes");

    let results = wait_all(waiters, cfg.command_timeout, cfg.max_wait_iterations).await;
    if let Some(Err(err)) = results.into_iter().find(Result::is_err) {
        log::error!("Asynchronous publish failed: {}", err);
        return Err(err);
    }
    Ok(())
}

/// Subscribe, receive expected number of messages, unsubscribe.
///
/// Always asks dispatcher to terminate, returns number of received messages.
pub async fn subscriber(
    sink: MqttSink,
    responses: ResponseQueue,
    cfg: &MqttConfig,
    demo: &DemoConfig,
) -> Result<usize, MqttError> {
    let (unsubscribe, unsubscribed) =
        sink.unsubscribe().topic_filter(demo.topic_filter.clone()).finish();

    let result = receive(&sink, &responses, cfg, demo).await;

    let result = match result {
        Ok(received) => {
            log::info!("Adding unsubscribe operation");
            match sink.submit(unsubscribe).await {
                Ok(()) => unsubscribed
                    .wait(cfg.command_timeout, cfg.max_wait_iterations)
                    .await
                    .map(|_| received)
                    .map_err(|err| {
                        log::error!("Unsubscribe failed: {}", err);
                        err
                    }),
                Err(err) => Err(err),
            }
        }
        Err(err) => Err(err),
    };

    log::info!("Beginning command queue termination");
    if let Err(err) = sink.terminate().await {
        log::error!("Cannot terminate command loop: {}", err);
        return Err(err);
    }
    result
}

async fn receive(
    sink: &MqttSink,
    responses: &ResponseQueue,
    cfg: &MqttConfig,
    demo: &DemoConfig,
) -> Result<usize, MqttError> {
    log::info!("Topic filter: {:?}", demo.topic_filter);
    let waiter = sink
        .subscribe()
        .topic_filter(demo.topic_filter.clone(), QoS::AtLeastOnce)
        .deliver_to(responses.clone())
        .send()
        .await?;

    log::info!("Waiting for subscribe operation to complete");
    if let Err(err) = waiter.wait(cfg.command_timeout, cfg.max_wait_iterations).await {
        log::error!("Subscribe failed: {}", err);
        return Err(err);
    }

    let expected = demo.publish_count as usize;
    let mut received = 0;
    let mut wait_counter = 0;
    loop {
        while let Some(pkt) = responses.recv(cfg.command_timeout).await {
            log::info!(
                "Received publish on topic {:?}, message payload: {:?}",
                pkt.topic,
                pkt.payload_str().unwrap_or_default()
            );
            received += 1;
            wait_counter = 0;
            if received >= expected {
                break;
            }
        }
        if received >= expected {
            log::info!("Finished receiving");
            return Ok(received);
        }

        wait_counter += 1;
        if wait_counter > cfg.max_wait_iterations {
            log::error!("Publish receive loop exceeded maximum wait time");
            return Err(MqttError::Timeout);
        }
        log::info!(
            "No messages queued, received {} publishes, sleeping for {:?}",
            received,
            demo.subscribe_delay
        );
        sleep(demo.subscribe_delay).await;
    }
}
