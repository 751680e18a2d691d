use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use spoke_wire::{ActionKind, PeerId, RequestId, Value};

use super::*;
use crate::command::response_parts;
use crate::correlate::PendingCalls;

// ============================================================================
// Interest set
// ============================================================================

#[test]
fn interest_set_reset_replaces_everything() {
    let mut interest = InterestSet::new();
    interest.reset(vec!["a".to_string(), "b".to_string()]);
    assert!(interest.contains("a"));
    assert!(interest.contains("b"));

    interest.reset(vec!["c".to_string()]);
    assert!(!interest.contains("a"));
    assert!(interest.contains("c"));
}

#[test]
fn interest_set_applies_incremental_changes() {
    let mut interest = InterestSet::new();
    assert!(interest.is_empty());

    interest.apply(true, "tick");
    assert!(interest.contains("tick"));

    interest.apply(false, "tick");
    assert!(!interest.contains("tick"));

    // Disabling an unknown name is a no-op.
    interest.apply(false, "never-registered");
    assert!(interest.is_empty());
}

// ============================================================================
// Listeners
// ============================================================================

#[test]
fn listeners_fire_in_registration_order() {
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut listeners: Listeners<()> = Listeners::new();

    let first = order.clone();
    listeners.on("tick", move |_, _| first.lock().unwrap().push(1));
    let second = order.clone();
    listeners.on("tick", move |_, _| second.lock().unwrap().push(2));

    assert_eq!(listeners.fire("tick", (), &[]), 2);
    assert_eq!(*order.lock().unwrap(), vec![1, 2]);
}

#[test]
fn listeners_off_removes_only_the_given_registration() {
    let hits = Arc::new(AtomicUsize::new(0));
    let mut listeners: Listeners<()> = Listeners::new();

    let a = {
        let hits = hits.clone();
        listeners.on("tick", move |_, _| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    };
    let hits_b = hits.clone();
    listeners.on("tick", move |_, _| {
        hits_b.fetch_add(10, Ordering::SeqCst);
    });

    assert!(listeners.off("tick", a));
    assert!(!listeners.off("tick", a));
    listeners.fire("tick", (), &[]);
    assert_eq!(hits.load(Ordering::SeqCst), 10);
}

#[test]
fn listener_names_are_sorted_and_deduplicated_by_event() {
    let mut listeners: Listeners<()> = Listeners::new();
    listeners.on("zebra", |_, _| {});
    listeners.on("apple", |_, _| {});
    listeners.on("apple", |_, _| {});
    assert_eq!(listeners.names(), vec!["apple".to_string(), "zebra".to_string()]);
}

#[test]
fn listeners_receive_the_context_and_args() {
    let seen: Arc<std::sync::Mutex<Vec<(PeerId, Vec<Value>)>>> = Arc::default();
    let mut listeners: Listeners<PeerId> = Listeners::new();
    let sink = seen.clone();
    listeners.on("tick", move |peer, args| {
        sink.lock().unwrap().push((peer, args.to_vec()));
    });

    let peer = PeerId::new();
    listeners.fire("tick", peer, &[Value::from(42)]);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, peer);
    assert_eq!(seen[0].1, vec![Value::from(42)]);
}

#[test]
fn reserved_event_names_are_rejected() {
    assert!(!is_event_name_allowed("handshake"));
    assert!(!is_event_name_allowed("destroy"));
    assert!(is_event_name_allowed("tick"));
}

// ============================================================================
// Correlation
// ============================================================================

#[tokio::test]
async fn pending_calls_settle_by_id() {
    let mut pending = PendingCalls::new();
    let (tx_a, rx_a) = tokio::sync::oneshot::channel();
    let (tx_b, rx_b) = tokio::sync::oneshot::channel();

    let a = pending.insert_next(tx_a);
    let b = pending.insert_next(tx_b);
    assert_ne!(a, b);

    assert!(pending.settle(b, Ok(Value::from("second"))));
    assert!(pending.settle(a, Ok(Value::from("first"))));
    assert_eq!(rx_a.await.unwrap().unwrap(), Value::from("first"));
    assert_eq!(rx_b.await.unwrap().unwrap(), Value::from("second"));
}

#[tokio::test]
async fn pending_calls_fail_all_rejects_with_channel_closed() {
    let mut pending = PendingCalls::new();
    let mut receivers = Vec::new();
    for _ in 0..3 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        pending.insert_next(tx);
        receivers.push(rx);
    }

    pending.fail_all(CallError::ChannelClosed);
    assert_eq!(pending.len(), 0);
    for rx in receivers {
        assert_eq!(rx.await.unwrap(), Err(CallError::ChannelClosed));
    }
}

#[test]
fn settling_an_unknown_id_is_ignored() {
    let mut pending = PendingCalls::new();
    assert!(!pending.settle(RequestId::new(999), Ok(Value::Null)));
}

// ============================================================================
// Command registry
// ============================================================================

#[tokio::test]
async fn registry_invokes_handlers_with_context() {
    let mut registry: CommandRegistry<PeerId> = CommandRegistry::new();
    registry.register("whoami", |peer: PeerId, _args| async move {
        Ok(Value::from(peer.to_string()))
    });

    let peer = PeerId::new();
    let (fut, transfers) = registry.invoke("whoami", peer, vec![]).unwrap();
    assert!(!transfers);
    let output = fut.await.unwrap();
    assert_eq!(output.value, Value::from(peer.to_string()));
}

#[tokio::test]
async fn registry_reports_missing_commands() {
    let registry: CommandRegistry<()> = CommandRegistry::new();
    assert!(registry.invoke("nope", (), vec![]).is_none());
    assert_eq!(not_found_error("nope"), "function nope not found");
}

#[tokio::test]
async fn handler_errors_become_strings() {
    let mut registry: CommandRegistry<()> = CommandRegistry::new();
    registry.register("explode", |_, _| async { Err("kaboom".to_string()) });

    let (fut, _) = registry.invoke("explode", (), vec![]).unwrap();
    assert_eq!(fut.await.unwrap_err(), "kaboom");
}

#[tokio::test]
async fn transferring_commands_keep_their_flag() {
    let mut registry: CommandRegistry<()> = CommandRegistry::new();
    registry.register_with_ports("open", |_, _| async {
        let (_retained, shipped) = crate::port_pair();
        Ok(CommandOutput {
            value: Value::Null,
            ports: vec![shipped],
        })
    });

    let (fut, transfers) = registry.invoke("open", (), vec![]).unwrap();
    assert!(transfers);
    assert_eq!(fut.await.unwrap().ports.len(), 1);
}

#[test]
fn response_parts_forward_ports_only_when_transferring() {
    let (_retained, shipped) = crate::port_pair();
    let output = CommandOutput {
        value: Value::from(1),
        ports: vec![shipped],
    };
    let (kind, ports) = response_parts(RequestId::new(1), Ok(output), false);
    assert!(ports.is_empty());
    match kind {
        ActionKind::Response { result, error, .. } => {
            assert_eq!(result, Some(Value::from(1)));
            assert_eq!(error, None);
        }
        other => panic!("unexpected kind: {other:?}"),
    }

    let (kind, _) = response_parts(RequestId::new(2), Err("bad".into()), false);
    match kind {
        ActionKind::Response { result, error, .. } => {
            assert_eq!(result, None);
            assert_eq!(error, Some("bad".to_string()));
        }
        other => panic!("unexpected kind: {other:?}"),
    }
}

// ============================================================================
// Port pairing
// ============================================================================

#[tokio::test]
async fn port_pair_is_duplex() {
    let (mut a, mut b) = port_pair();
    let envelope = Envelope::new(DEFAULT_SCOPE, Action::from_hub(ActionKind::Port));

    a.send(Delivery::bare(envelope.clone())).await.unwrap();
    let delivery = b.recv().await.unwrap();
    assert_eq!(delivery.envelope, envelope);

    b.send(Delivery::bare(envelope.clone())).await.unwrap();
    let delivery = a.recv().await.unwrap();
    assert_eq!(delivery.envelope, envelope);
}

#[tokio::test]
async fn dropped_port_half_closes_the_pair() {
    let (a, mut b) = port_pair();
    drop(a);
    assert!(b.recv().await.is_none());

    let (a, b) = port_pair();
    drop(b);
    let envelope = Envelope::new(DEFAULT_SCOPE, Action::from_hub(ActionKind::Port));
    assert_eq!(
        a.send(Delivery::bare(envelope)).await,
        Err(PortClosed)
    );
}

#[tokio::test]
async fn buffered_deliveries_survive_the_sender_drop() {
    let (a, mut b) = port_pair();
    let envelope = Envelope::new(DEFAULT_SCOPE, Action::from_hub(ActionKind::Destroy));
    a.send(Delivery::bare(envelope.clone())).await.unwrap();
    drop(a);

    let delivery = b.recv().await.unwrap();
    assert_eq!(delivery.envelope, envelope);
    assert!(b.recv().await.is_none());
}
