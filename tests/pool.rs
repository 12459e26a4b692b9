mod support;

use support::{init_tracing, FakeBroker};
use warren::{
    options::*, types::FieldTable, BasicProperties, ChannelPool, ConnectionProperties,
    ConnectionState, Error, PoolConfig,
};

fn pool(broker: &FakeBroker, publisher_confirms: bool) -> ChannelPool {
    let config = PoolConfig {
        uri: broker.uri(),
        connections: 2,
        channels_per_connection: 1,
        ackable_channels_per_connection: 1,
        publisher_confirms,
        ..PoolConfig::default()
    };
    ChannelPool::new(config, ConnectionProperties::default()).expect("pool")
}

#[test]
fn exhausted_pool_opens_more_sessions() {
    init_tracing();
    let broker = FakeBroker::start();
    let pool = pool(&broker, false);
    assert_eq!(broker.accepted(), 2);
    assert_eq!(pool.idle(), (2, 2));

    let entries = (0..3)
        .map(|_| pool.checkout().expect("checkout"))
        .collect::<Vec<_>>();
    assert_eq!(pool.idle(), (0, 2));
    assert!(entries.iter().all(|entry| entry.is_alive() && !entry.is_ackable()));
    assert_ne!(entries[0].id(), entries[1].id());
    assert_ne!(entries[1].id(), entries[2].id());
    assert_ne!(entries[0].id(), entries[2].id());
    // both connections carry two auto-ack and one manual-ack session at most
    let sessions = pool
        .connections()
        .iter()
        .map(|connection| connection.open_sessions())
        .sum::<usize>();
    assert_eq!(sessions, 5);

    for entry in entries {
        pool.return_channel(entry);
    }
    assert_eq!(pool.idle(), (3, 2));
    pool.shutdown().expect("shutdown");
}

#[test]
fn dead_entries_are_evicted() {
    init_tracing();
    let broker = FakeBroker::start();
    let pool = pool(&broker, false);

    let entry = pool.checkout().expect("checkout");
    pool.flag_dead(entry.id());
    assert!(!entry.is_alive());
    let session = entry.session().clone();
    pool.return_channel(entry);
    assert!(!session.is_open());
    assert_eq!(pool.idle(), (1, 2));

    // returned to the wrong set
    let ackable = pool.checkout_ackable().expect("checkout_ackable");
    assert!(ackable.is_ackable());
    pool.return_channel(ackable);
    assert_eq!(pool.idle(), (1, 1));

    // a session closed by the server is skipped at checkout
    let broken = pool.checkout_ackable().expect("checkout_ackable");
    let broken_id = broken.id();
    assert!(broken
        .session()
        .basic_get("missing", BasicGetOptions::default())
        .is_err());
    assert!(!broken.is_alive());
    pool.return_ackable(broken);
    let replacement = pool.checkout_ackable().expect("checkout_ackable");
    assert_ne!(replacement.id(), broken_id);
    assert!(replacement.is_alive());
    pool.return_ackable(replacement);
    pool.shutdown().expect("shutdown");
}

#[test]
fn pooled_operations() {
    init_tracing();
    let broker = FakeBroker::start();
    let pool = pool(&broker, true);
    pool.execute(false, |session| {
        session
            .queue_declare("pooled", QueueDeclareOptions::default(), FieldTable::default())
            .map(|_| ())
    })
    .expect("queue_declare");

    assert!(pool
        .publish(
            "",
            "pooled",
            BasicPublishOptions::default(),
            b"first",
            BasicProperties::default(),
        )
        .expect("publish"));
    assert_eq!(broker.queue_len("pooled"), Some(1));

    let message = pool
        .get("pooled", BasicGetOptions::default())
        .expect("get")
        .expect("a message");
    assert_eq!(message.data, b"first".to_vec());
    message.ack(BasicAckOptions::default()).expect("ack");

    // failures are swallowed unless escalated, and the failing entry is replaced
    let (_, ackable) = pool.idle();
    assert_eq!(
        pool.get("missing", BasicGetOptions::default()).expect("get"),
        None
    );
    assert_eq!(pool.idle().1, ackable - 1);

    let consumer = pool
        .consume(
            "pooled",
            "pooled-consumer",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .expect("consume");
    assert!(pool
        .publish(
            "",
            "pooled",
            BasicPublishOptions::default(),
            b"second",
            BasicProperties::default(),
        )
        .expect("publish"));
    let delivery = consumer
        .clone()
        .into_iter()
        .next()
        .expect("a delivery")
        .expect("no error");
    assert_eq!(delivery.data, b"second".to_vec());
    delivery.ack(BasicAckOptions::default()).expect("ack");

    pool.shutdown().expect("shutdown");
    // the transient session went down with the pool
    assert!(consumer.into_iter().next().is_none());
}

#[test]
fn shutdown_is_final() {
    init_tracing();
    let broker = FakeBroker::start();
    let pool = pool(&broker, false);
    let entry = pool.checkout().expect("checkout");

    pool.shutdown().expect("shutdown");
    assert!(pool.is_closed());
    assert_eq!(pool.idle(), (0, 0));
    assert!(pool
        .connections()
        .iter()
        .all(|connection| connection.status().state() == ConnectionState::Closed));
    assert_eq!(pool.checkout().unwrap_err(), Error::PoolClosed);
    assert_eq!(
        pool.publish(
            "",
            "anywhere",
            BasicPublishOptions::default(),
            b"late",
            BasicProperties::default(),
        ),
        Err(Error::PoolClosed)
    );
    pool.return_channel(entry);
    assert_eq!(pool.idle(), (0, 0));
    pool.shutdown().expect("second shutdown");
}

#[test]
fn idle_dead_entries_release_their_channel() {
    init_tracing();
    let broker = FakeBroker::start();
    let pool = ChannelPool::new(
        PoolConfig {
            uri: broker.uri(),
            connections: 1,
            channels_per_connection: 1,
            ackable_channels_per_connection: 0,
            ..PoolConfig::default()
        },
        ConnectionProperties::default(),
    )
    .expect("pool");
    let connection = pool.connections()[0].clone();

    for _ in 0..5 {
        let entry = pool.checkout().expect("checkout");
        let id = entry.id();
        let session = entry.session().clone();
        pool.return_channel(entry);
        pool.flag_dead(id);
        assert!(!session.is_open());
        assert_eq!(pool.idle(), (0, 0));
        assert_eq!(connection.open_sessions(), 0);
    }

    let entry = pool.checkout().expect("checkout");
    assert!(entry.is_alive());
    assert_eq!(connection.open_sessions(), 1);
    pool.return_channel(entry);
    pool.shutdown().expect("shutdown");
}
