//! Full-stack exercises: real peer and hub drivers wired through the
//! in-memory transport.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use spoke_mem::memory_hub;
use spoke_session::{CallError, HubBuilder, PeerBuilder, Value};
use tokio::time::{sleep, timeout};

async fn within<T>(fut: impl Future<Output = T>) -> T {
    timeout(Duration::from_secs(5), fut)
        .await
        .expect("test timed out")
}

/// Poll until `check` holds; panics after a few seconds.
async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("condition never met");
}

#[tokio::test]
async fn request_round_trips_even_before_the_handshake_settles() {
    let (hub_transport, link) = memory_hub(64);
    let (_hub, hub_driver) = HubBuilder::new()
        .command("sum", |_peer, args| async move {
            let total: i64 = args.iter().filter_map(Value::as_i64).sum();
            Ok(Value::from(total))
        })
        .build(hub_transport);
    tokio::spawn(hub_driver.run());

    let (peer, peer_driver) = PeerBuilder::new().build(link.attach());
    tokio::spawn(peer_driver.run());

    // Issued without awaiting ready(): buffered, then replayed on handshake.
    let result = within(peer.request("sum", vec![json!(1), json!(2), json!(3)])).await;
    assert_eq!(result.unwrap(), json!(6));
}

#[tokio::test]
async fn unknown_commands_report_the_literal_not_found_error() {
    let (hub_transport, link) = memory_hub(64);
    let (_hub, hub_driver) = HubBuilder::new().build(hub_transport);
    tokio::spawn(hub_driver.run());

    let (peer, peer_driver) = PeerBuilder::new().build(link.attach());
    tokio::spawn(peer_driver.run());

    let error = within(peer.request("frobnicate", vec![])).await.unwrap_err();
    assert_eq!(
        error,
        CallError::Remote("function frobnicate not found".into())
    );
}

#[tokio::test]
async fn handler_failures_come_back_as_strings_not_channel_errors() {
    let (hub_transport, link) = memory_hub(64);
    let (_hub, hub_driver) = HubBuilder::new()
        .command("explode", |_peer, _args| async { Err("kaboom".to_string()) })
        .build(hub_transport);
    tokio::spawn(hub_driver.run());

    let (peer, peer_driver) = PeerBuilder::new().build(link.attach());
    tokio::spawn(peer_driver.run());

    let error = within(peer.request("explode", vec![])).await.unwrap_err();
    assert_eq!(error, CallError::Remote("kaboom".into()));

    // The channel survives a failing handler.
    let error = within(peer.request("still-missing", vec![])).await.unwrap_err();
    assert_eq!(
        error,
        CallError::Remote("function still-missing not found".into())
    );
}

#[tokio::test]
async fn hub_handlers_see_the_calling_peer_id() {
    let (hub_transport, link) = memory_hub(64);
    let (_hub, hub_driver) = HubBuilder::new()
        .command("whoami", |peer, _args| async move {
            Ok(Value::from(peer.to_string()))
        })
        .build(hub_transport);
    tokio::spawn(hub_driver.run());

    let (peer, peer_driver) = PeerBuilder::new().build(link.attach());
    tokio::spawn(peer_driver.run());

    let result = within(peer.request("whoami", vec![])).await.unwrap();
    assert_eq!(result, Value::from(peer.peer_id().to_string()));
}

#[tokio::test]
async fn hub_can_request_a_connected_peer() {
    let (hub_transport, link) = memory_hub(64);
    let (hub, hub_driver) = HubBuilder::new().build(hub_transport);
    tokio::spawn(hub_driver.run());

    let (peer, peer_driver) = PeerBuilder::new()
        .command("double", |args| async move {
            let n = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(Value::from(n * 2))
        })
        .build(link.attach());
    tokio::spawn(peer_driver.run());
    within(peer.ready()).await.unwrap();

    let result = within(hub.request(peer.peer_id(), "double", vec![json!(21)]))
        .await
        .unwrap();
    assert_eq!(result, json!(42));
}

#[tokio::test]
async fn requests_to_unknown_peers_fail_immediately() {
    let (hub_transport, _link) = memory_hub(64);
    let (hub, hub_driver) = HubBuilder::new().build(hub_transport);
    tokio::spawn(hub_driver.run());

    let stranger = spoke_session::PeerId::new();
    let error = within(hub.request(stranger, "anything", vec![]))
        .await
        .unwrap_err();
    assert_eq!(error, CallError::NotRegistered);
}

#[tokio::test]
async fn ping_listener_fires_until_interest_is_withdrawn() {
    let (hub_transport, link) = memory_hub(64);
    let (hub, hub_driver) = HubBuilder::new().build(hub_transport);
    tokio::spawn(hub_driver.run());

    let (peer, peer_driver) = PeerBuilder::new().build(link.attach());
    tokio::spawn(peer_driver.run());
    within(peer.ready()).await.unwrap();

    let hits: Arc<Mutex<Vec<Value>>> = Arc::default();
    let sink = hits.clone();
    let listener = within(peer.on("ping", move |args| {
        sink.lock().unwrap().extend(args.to_vec());
    }))
    .await
    .unwrap();

    // Let the interest change reach the hub before emitting.
    sleep(Duration::from_millis(100)).await;
    within(hub.emit(peer.peer_id(), "ping", vec![json!(42)]))
        .await
        .unwrap();
    eventually(|| *hits.lock().unwrap() == vec![json!(42)]).await;

    within(peer.off("ping", listener)).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    within(hub.emit(peer.peer_id(), "ping", vec![json!(43)]))
        .await
        .unwrap();
    sleep(Duration::from_millis(150)).await;
    assert_eq!(*hits.lock().unwrap(), vec![json!(42)]);
}

#[tokio::test]
async fn peer_emits_reach_hub_listeners_registered_at_build_time() {
    let (hub_transport, link) = memory_hub(64);
    let seen: Arc<Mutex<Vec<(String, Vec<Value>)>>> = Arc::default();
    let sink = seen.clone();
    let mut builder = HubBuilder::new();
    builder.on("report", move |peer, args| {
        sink.lock().unwrap().push((peer.to_string(), args.to_vec()));
    });
    let (_hub, hub_driver) = builder.build(hub_transport);
    tokio::spawn(hub_driver.run());

    let (peer, peer_driver) = PeerBuilder::new().build(link.attach());
    tokio::spawn(peer_driver.run());
    within(peer.ready()).await.unwrap();

    // The handshake reply advertised "report", so the gate is already open.
    within(peer.emit("report", vec![json!(7)])).await.unwrap();
    eventually(|| !seen.lock().unwrap().is_empty()).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].0, peer.peer_id().to_string());
    assert_eq!(seen[0].1, vec![json!(7)]);
}

#[tokio::test]
async fn late_hub_subscriptions_open_the_peer_gate() {
    let (hub_transport, link) = memory_hub(64);
    let (hub, hub_driver) = HubBuilder::new().build(hub_transport);
    tokio::spawn(hub_driver.run());

    let (peer, peer_driver) = PeerBuilder::new().build(link.attach());
    tokio::spawn(peer_driver.run());
    within(peer.ready()).await.unwrap();

    // Nothing listens yet, so this emit is a silent no-op.
    within(peer.emit("late", vec![json!(1)])).await.unwrap();

    let hits = Arc::new(Mutex::new(0usize));
    let sink = hits.clone();
    within(hub.on("late", move |_peer, _args| {
        *sink.lock().unwrap() += 1;
    }))
    .await
    .unwrap();

    // The change-event push has to reach the peer before its gate opens.
    sleep(Duration::from_millis(100)).await;
    within(peer.emit("late", vec![json!(2)])).await.unwrap();
    eventually(|| *hits.lock().unwrap() == 1).await;
}

#[tokio::test]
async fn broadcast_settles_every_peer_independently() {
    let (hub_transport, link) = memory_hub(64);
    let (hub, hub_driver) = HubBuilder::new().build(hub_transport);
    tokio::spawn(hub_driver.run());

    let counters: Vec<Arc<Mutex<usize>>> = (0..2).map(|_| Arc::default()).collect();
    let mut peers = Vec::new();
    for counter in &counters {
        let (peer, peer_driver) = PeerBuilder::new().build(link.attach());
        tokio::spawn(peer_driver.run());
        within(peer.ready()).await.unwrap();
        let sink = counter.clone();
        within(peer.on("tick", move |_args| {
            *sink.lock().unwrap() += 1;
        }))
        .await
        .unwrap();
        peers.push(peer);
    }

    sleep(Duration::from_millis(100)).await;
    let outcomes = within(hub.broadcast("tick", vec![json!(1)])).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    for (_, outcome) in &outcomes {
        assert_eq!(outcome, &Ok(()));
    }
    for counter in &counters {
        let counter = counter.clone();
        eventually(move || *counter.lock().unwrap() == 1).await;
    }
}

#[tokio::test]
async fn destroy_rejects_every_pending_request() {
    let (hub_transport, link) = memory_hub(64);
    let (_hub, hub_driver) = HubBuilder::new()
        .command("stall", |_peer, _args| async {
            std::future::pending::<()>().await;
            Ok(Value::Null)
        })
        .build(hub_transport);
    tokio::spawn(hub_driver.run());

    let (peer, peer_driver) = PeerBuilder::new().build(link.attach());
    tokio::spawn(peer_driver.run());
    within(peer.ready()).await.unwrap();

    let mut inflight = Vec::new();
    for _ in 0..3 {
        let handle = peer.clone();
        inflight.push(tokio::spawn(async move {
            handle.request("stall", vec![]).await
        }));
    }
    sleep(Duration::from_millis(100)).await;

    within(peer.destroy()).await.unwrap();
    for task in inflight {
        let outcome = within(task).await.unwrap();
        assert_eq!(outcome.unwrap_err(), CallError::ChannelClosed);
    }

    // The driver is gone; nothing sends anymore.
    let error = within(peer.request("stall", vec![])).await.unwrap_err();
    assert!(matches!(
        error,
        CallError::DriverGone | CallError::ChannelClosed
    ));
}

#[tokio::test]
async fn peer_destroy_unregisters_it_from_the_hub() {
    let (hub_transport, link) = memory_hub(64);
    let (hub, hub_driver) = HubBuilder::new().build(hub_transport);
    tokio::spawn(hub_driver.run());

    let (peer, peer_driver) = PeerBuilder::new().build(link.attach());
    tokio::spawn(peer_driver.run());
    within(peer.ready()).await.unwrap();

    let id = peer.peer_id();
    assert_eq!(within(hub.peers()).await.unwrap(), vec![id]);

    within(peer.destroy()).await.unwrap();
    within(async {
        while !hub.peers().await.unwrap().is_empty() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
}

#[tokio::test]
async fn hub_destroy_notifies_connected_peers() {
    let (hub_transport, link) = memory_hub(64);
    let (hub, hub_driver) = HubBuilder::new().build(hub_transport);
    tokio::spawn(hub_driver.run());

    let (peer, peer_driver) = PeerBuilder::new().build(link.attach());
    tokio::spawn(peer_driver.run());
    within(peer.ready()).await.unwrap();

    within(hub.destroy()).await.unwrap();

    // The peer's driver winds down once the destroy action arrives.
    eventually(|| !peer.is_connected()).await;
    let error = within(peer.request("anything", vec![])).await.unwrap_err();
    assert!(matches!(
        error,
        CallError::DriverGone | CallError::ChannelClosed
    ));
}
