//! End-to-end OCC scenarios over a real TCP cluster

use basalt::cluster::LocalCluster;
use basalt::{AbortReason, Key, Mode, Value};
use basalt_client::NodeConn;
use std::time::Duration;

fn as_number(value: Option<Value>) -> u64 {
    value
        .map(|v| v.to_string().parse().unwrap_or(0))
        .unwrap_or(0)
}

#[tokio::test]
async fn occ_read_write_conflict_aborts_with_stale_read() {
    let cluster = LocalCluster::start(2).await.unwrap();
    let client = cluster.client();
    let key = Key::from("x");

    // A reads x and prepares an increment.
    let mut a = client.begin(Mode::Occ).await.unwrap();
    let seen = as_number(a.read(&key).await.unwrap());
    a.write(key.clone(), Value::from(seen + 1)).await.unwrap();

    // B reads and overwrites x, committing first.
    let mut b = client.begin(Mode::Occ).await.unwrap();
    b.read(&key).await.unwrap();
    b.write(key.clone(), Value::from(99u64)).await.unwrap();
    b.commit().await.unwrap();

    // A's read is now stale; backward validation must refuse it.
    let err = a.commit().await.unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::StaleRead));
    assert!(err.is_retryable_abort());
    assert_eq!(a.abort_reason(), Some(AbortReason::StaleRead));

    // B's value survived.
    let mut check = client.begin(Mode::Occ).await.unwrap();
    assert_eq!(as_number(check.read(&key).await.unwrap()), 99);
}

#[tokio::test]
async fn occ_disjoint_writers_both_commit() {
    let cluster = LocalCluster::start(2).await.unwrap();
    let client = cluster.client();

    let mut a = client.begin(Mode::Occ).await.unwrap();
    let mut b = client.begin(Mode::Occ).await.unwrap();
    a.write(Key::from("x"), Value::from("ax")).await.unwrap();
    b.write(Key::from("y"), Value::from("by")).await.unwrap();

    let ts_a = a.commit().await.unwrap();
    let ts_b = b.commit().await.unwrap();
    assert_ne!(ts_a, ts_b);

    let mut check = client.begin(Mode::Occ).await.unwrap();
    assert_eq!(
        check.read(&Key::from("x")).await.unwrap(),
        Some(Value::from("ax"))
    );
    assert_eq!(
        check.read(&Key::from("y")).await.unwrap(),
        Some(Value::from("by"))
    );
}

#[tokio::test]
async fn occ_blind_write_does_not_abort() {
    let cluster = LocalCluster::start(2).await.unwrap();
    let client = cluster.client();

    // A writes k without ever reading it.
    let mut a = client.begin(Mode::Occ).await.unwrap();
    a.write(Key::from("k"), Value::from("1")).await.unwrap();

    // B starts before A commits and touches different keys.
    let mut b = client.begin(Mode::Occ).await.unwrap();
    b.read(&Key::from("other")).await.unwrap();
    b.write(Key::from("other"), Value::from("2")).await.unwrap();

    a.commit().await.unwrap();
    b.commit().await.unwrap();
}

#[tokio::test]
async fn occ_read_your_own_writes_and_stable_rereads() {
    let cluster = LocalCluster::start(2).await.unwrap();
    let client = cluster.client();
    let key = Key::from("ryw");

    let mut setup = client.begin(Mode::Occ).await.unwrap();
    setup.write(key.clone(), Value::from("old")).await.unwrap();
    setup.commit().await.unwrap();

    let mut txn = client.begin(Mode::Occ).await.unwrap();
    // First read observes the committed value; re-reads stay stable even
    // if someone else commits in between.
    assert_eq!(txn.read(&key).await.unwrap(), Some(Value::from("old")));

    let mut interloper = client.begin(Mode::Occ).await.unwrap();
    interloper
        .write(key.clone(), Value::from("mid"))
        .await
        .unwrap();
    interloper.commit().await.unwrap();

    assert_eq!(txn.read(&key).await.unwrap(), Some(Value::from("old")));

    // A buffered write is visible to this transaction immediately.
    txn.write(key.clone(), Value::from("new")).await.unwrap();
    assert_eq!(txn.read(&key).await.unwrap(), Some(Value::from("new")));
}

#[tokio::test]
async fn occ_abort_discards_buffered_writes() {
    let cluster = LocalCluster::start(2).await.unwrap();
    let client = cluster.client();
    let key = Key::from("ghost");

    let mut txn = client.begin(Mode::Occ).await.unwrap();
    txn.write(key.clone(), Value::from("unseen")).await.unwrap();
    txn.abort().await.unwrap();

    // Further operations on the handle fail fast.
    let err = txn.read(&key).await.unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::ClientAbort));

    // Nothing reached any node.
    let mut check = client.begin(Mode::Occ).await.unwrap();
    assert_eq!(check.read(&key).await.unwrap(), None);
}

#[tokio::test]
async fn occ_commit_is_visible_to_later_transactions() {
    let cluster = LocalCluster::start(2).await.unwrap();
    let client = cluster.client();
    let key = Key::from("durable-ish");

    let mut writer = client.begin(Mode::Occ).await.unwrap();
    writer.write(key.clone(), Value::from("v")).await.unwrap();
    let ts_commit = writer.commit().await.unwrap();
    assert!(ts_commit > writer.tid());

    let mut reader = client.begin(Mode::Occ).await.unwrap();
    assert_eq!(reader.read(&key).await.unwrap(), Some(Value::from("v")));
}

#[tokio::test]
async fn occ_commit_timestamps_grow_across_transactions() {
    let cluster = LocalCluster::start(2).await.unwrap();
    let client = cluster.client();

    let mut last = 0;
    for i in 0..5 {
        let mut txn = client.begin(Mode::Occ).await.unwrap();
        assert!(txn.tid() > last);
        txn.write(Key::from(format!("mono-{i}")), Value::from(i as u64))
            .await
            .unwrap();
        let ts_commit = txn.commit().await.unwrap();
        assert!(ts_commit > txn.tid());
        last = ts_commit;
    }
}

#[tokio::test]
async fn cross_shard_write_phase_reaches_both_nodes() {
    let cluster = LocalCluster::start(2).await.unwrap();
    let client = cluster.client();
    let shard_map = cluster.shard_map();

    // Pick one key per shard.
    let key0 = (0..)
        .map(|i| Key::from(format!("k{i}")))
        .find(|k| shard_map.shard_of(k) == 0)
        .unwrap();
    let key1 = (0..)
        .map(|i| Key::from(format!("k{i}")))
        .find(|k| shard_map.shard_of(k) == 1)
        .unwrap();

    let mut txn = client.begin(Mode::Occ).await.unwrap();
    txn.write(key0.clone(), Value::from("zero")).await.unwrap();
    txn.write(key1.clone(), Value::from("one")).await.unwrap();
    txn.commit().await.unwrap();

    // Ask each node directly: the write phase must have PUT to both.
    let timeout = Duration::from_secs(5);
    let mut node0 = NodeConn::connect(cluster.node_addrs()[0], timeout)
        .await
        .unwrap();
    let mut node1 = NodeConn::connect(cluster.node_addrs()[1], timeout)
        .await
        .unwrap();
    assert_eq!(
        node0.get(None, key0).await.unwrap(),
        Some(Value::from("zero"))
    );
    assert_eq!(
        node1.get(None, key1).await.unwrap(),
        Some(Value::from("one"))
    );
}

#[tokio::test]
async fn occ_handle_rejects_use_after_commit() {
    let cluster = LocalCluster::start(1).await.unwrap();
    let client = cluster.client();

    let mut txn = client.begin(Mode::Occ).await.unwrap();
    txn.write(Key::from("k"), Value::from("v")).await.unwrap();
    txn.commit().await.unwrap();

    assert!(txn.read(&Key::from("k")).await.is_err());
    assert!(txn.commit().await.is_err());
}
