mod common;

use std::sync::Arc;

use scan_queue::prelude::*;
use scan_queue::{ConsumerId, ConsumerStatus, HeartbeatBean, Publisher, Queue, QueueNameMap};

use common::{fast_broker, wait_until, URI};

const TOPIC: &str = "beats.heartbeat.topic";

async fn publisher(broker: &MemoryBroker) -> Box<dyn Publisher<HeartbeatBean>> {
    broker
        .create_publisher::<HeartbeatBean>(URI, TOPIC)
        .await
        .unwrap()
}

fn beat(consumer_id: ConsumerId, sequence: u64) -> HeartbeatBean {
    let mut beat = HeartbeatBean::new(consumer_id, ConsumerStatus::Running);
    beat.sequence = sequence;
    beat
}

/// After N beats the monitor holds the newest min(N, capacity)
#[tokio::test]
async fn keeps_the_newest_beats() {
    let broker = fast_broker();
    let watched = ConsumerId::new();
    let monitor = HeartbeatMonitor::with_capacity(&broker, URI, TOPIC, watched, 4)
        .await
        .unwrap();
    let publisher = publisher(&broker).await;

    for sequence in 0..3 {
        publisher.broadcast(&beat(watched, sequence)).await.unwrap();
    }
    wait_until("three beats", || monitor.recording().len() == 3).await;

    for sequence in 3..10 {
        publisher.broadcast(&beat(watched, sequence)).await.unwrap();
    }
    wait_until("latest beat", || {
        monitor.latest().map(|beat| beat.sequence) == Some(9)
    })
    .await;

    let sequences: Vec<u64> = monitor.recording().iter().map(|beat| beat.sequence).collect();
    assert_eq!(sequences, vec![6, 7, 8, 9]);
    monitor.disconnect().await.unwrap();
}

#[tokio::test]
async fn ignores_other_consumers() {
    let broker = fast_broker();
    let watched = ConsumerId::new();
    let other = ConsumerId::new();
    let monitor = HeartbeatMonitor::new(&broker, URI, TOPIC, watched).await.unwrap();
    let publisher = publisher(&broker).await;

    publisher.broadcast(&beat(other, 0)).await.unwrap();
    publisher.broadcast(&beat(other, 1)).await.unwrap();
    publisher.broadcast(&beat(watched, 7)).await.unwrap();

    wait_until("watched beat", || monitor.latest().is_some()).await;
    let recording = monitor.recording();
    assert_eq!(recording.len(), 1);
    assert_eq!(recording[0].consumer_id, watched);
    assert_eq!(recording[0].sequence, 7);
}

#[tokio::test]
async fn shrinking_drops_the_oldest() {
    let broker = fast_broker();
    let watched = ConsumerId::new();
    let monitor = HeartbeatMonitor::with_capacity(&broker, URI, TOPIC, watched, 10)
        .await
        .unwrap();
    for sequence in 0..6 {
        assert!(monitor.accept(beat(watched, sequence)));
    }

    monitor.set_capacity(2);
    assert_eq!(monitor.capacity(), 2);
    let sequences: Vec<u64> = monitor.recording().iter().map(|beat| beat.sequence).collect();
    assert_eq!(sequences, vec![4, 5]);
}

/// Switching consumer forgets the old history; a locked monitor refuses
#[tokio::test]
async fn consumer_can_change_until_locked() {
    let broker = fast_broker();
    let first = ConsumerId::new();
    let second = ConsumerId::new();
    let monitor = HeartbeatMonitor::new(&broker, URI, TOPIC, first).await.unwrap();
    assert!(monitor.accept(beat(first, 0)));
    assert!(!monitor.accept(beat(second, 0)));

    monitor.set_consumer_id(second).unwrap();
    assert_eq!(monitor.consumer_id(), second);
    assert!(monitor.recording().is_empty());
    assert!(monitor.accept(beat(second, 1)));

    monitor.lock();
    let err = monitor.set_consumer_id(first).unwrap_err();
    assert!(matches!(err, QueueError::UnsupportedOperation(_)));
    assert_eq!(monitor.consumer_id(), second);
}

#[tokio::test]
async fn bad_uri_fails_construction() {
    let broker = fast_broker();
    let err = HeartbeatMonitor::new(&broker, "tcp://beamline:61616", TOPIC, ConsumerId::new())
        .await
        .unwrap_err();
    assert!(err.is_broker());
}

/// No beats are recorded once the monitor is disconnected
#[tokio::test]
async fn disconnect_stops_recording() {
    let broker = fast_broker();
    let watched = ConsumerId::new();
    let monitor = HeartbeatMonitor::new(&broker, URI, TOPIC, watched).await.unwrap();
    let publisher = publisher(&broker).await;

    publisher.broadcast(&beat(watched, 0)).await.unwrap();
    wait_until("first beat", || monitor.latest().is_some()).await;

    monitor.disconnect().await.unwrap();
    monitor.disconnect().await.unwrap();
    publisher.broadcast(&beat(watched, 1)).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(monitor.recording().len(), 1);
}

/// A running queue's consumer shows up on its heartbeat topic
#[tokio::test]
async fn records_a_live_consumer() {
    let broker = fast_broker();
    let queue_id = "beats.live";
    let queue: Queue<QueueAtom, MemoryBroker> = Queue::new(
        queue_id,
        URI,
        QueueNameMap::for_queue(queue_id),
        Arc::new(broker.clone()),
        Arc::new(ProcessorRegistry::new()),
        8,
    )
    .await
    .unwrap();

    let monitor = HeartbeatMonitor::for_queue(&queue, 5).await.unwrap();
    assert!(monitor.is_locked());
    assert_eq!(monitor.queue_id().as_deref(), Some(queue_id));
    assert_eq!(monitor.topic(), queue.names().heartbeat_topic_name);

    queue.start().await.unwrap();
    wait_until("a full recording", || monitor.recording().len() == 5).await;

    let recording = monitor.recording();
    assert!(recording.iter().all(|beat| beat.consumer_id == queue.consumer_id()));
    assert!(recording.windows(2).all(|pair| pair[0].sequence < pair[1].sequence));
    assert_eq!(recording[4].consumer_status, ConsumerStatus::Running);

    // The queue's own monitor sees the same consumer
    assert_eq!(queue.heartbeat_monitor().consumer_id(), queue.consumer_id());
    queue.stop(false).await.unwrap();
}
