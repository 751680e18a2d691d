//! Minimal end-to-end demo: one hub, one peer, in-memory transport.
//!
//! Usage:
//! - `cargo run -p spoke-session --example ping`
//! - `RUST_LOG=spoke_session=trace cargo run -p spoke-session --example ping`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use spoke_mem::memory_hub;
use spoke_session::{HubBuilder, PeerBuilder, Value};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (hub_transport, link) = memory_hub(64);

    let (hub, hub_driver) = HubBuilder::new()
        .command("sum", |peer, args| async move {
            let total: i64 = args.iter().filter_map(Value::as_i64).sum();
            println!("hub: {peer} asked for a sum, answering {total}");
            Ok(Value::from(total))
        })
        .on_handshake(|peer| println!("hub: {peer} connected"))
        .build(hub_transport);
    tokio::spawn(hub_driver.run());

    let ticks: Arc<Mutex<Vec<Value>>> = Arc::default();
    let sink = ticks.clone();
    let mut builder = PeerBuilder::new();
    builder.on("tick", move |args| {
        sink.lock().unwrap().extend(args.to_vec());
    });
    let (peer, peer_driver) = builder.build(link.attach());
    tokio::spawn(peer_driver.run());

    peer.ready().await?;
    println!("peer: connected as {}", peer.peer_id());

    let answer = peer.request("sum", vec![json!(19), json!(23)]).await?;
    println!("peer: sum came back as {answer}");

    hub.emit(peer.peer_id(), "tick", vec![json!(1)]).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("peer: ticks so far {:?}", ticks.lock().unwrap());

    peer.destroy().await?;
    hub.destroy().await?;
    Ok(())
}
