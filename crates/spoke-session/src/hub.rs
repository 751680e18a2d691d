//! The accepting role: one hub, any number of concurrently connected peers.
//!
//! The hub never sends at the transport level. Each peer attaches a freshly
//! paired endpoint to everything it sends; the hub banks those per
//! connection and spends one per hub-originated message. A send with an
//! empty pool queues as a waiter and goes out the moment the peer's next
//! message (any message, including a bare `port` keep-alive) supplies an
//! endpoint, oldest waiter first.
//!
//! Emits to a peer are not sent one by one. They accumulate on the
//! connection record and leave as a single ordered batch once an endpoint is
//! available, so bursts cost one endpoint and stay in call order. Callers
//! that emitted into the same batch all settle when it goes out.
//!
//! A message from a peer id with no connection record gets an `unexpected`
//! reply over the endpoint it arrived with, which sends the peer back into
//! its handshake. This is how sessions recover when the hub restarts and
//! loses its in-memory records.

use std::collections::{HashMap, VecDeque};
use std::io;

use spoke_wire::{Action, ActionKind, Envelope, PeerId, RequestId, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::command::{not_found_error, response_parts, CommandOutput, CommandRegistry};
use crate::correlate::{Completion, PendingCalls};
use crate::errors::CallError;
use crate::events::{guard_event_name, BoxedListener, InterestSet, ListenerId, Listeners};
use crate::port::PortEndpoint;
use crate::transport::{Delivery, HubTransport};
use crate::ChannelConfig;

type EmitDone = oneshot::Sender<Result<(), CallError>>;

/// Builder for the hub role.
///
/// Hub command handlers and listeners receive the calling [`PeerId`] as
/// their context, so they can tell connections apart.
pub struct HubBuilder {
    config: ChannelConfig,
    commands: CommandRegistry<PeerId>,
    listeners: Listeners<PeerId>,
    handshake_hooks: Vec<Box<dyn Fn(PeerId) + Send + Sync>>,
}

impl HubBuilder {
    pub fn new() -> Self {
        Self::with_config(ChannelConfig::default())
    }

    pub fn with_config(config: ChannelConfig) -> Self {
        Self {
            config,
            commands: CommandRegistry::new(),
            listeners: Listeners::new(),
            handshake_hooks: Vec::new(),
        }
    }

    /// Register a command peers can invoke. The handler's first argument is
    /// the calling peer's id.
    pub fn command<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(PeerId, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, String>> + Send + 'static,
    {
        self.commands.register(name, f);
        self
    }

    /// Register a command whose result transfers sub-channel endpoints.
    pub fn command_with_ports<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(PeerId, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CommandOutput, String>> + Send + 'static,
    {
        self.commands.register_with_ports(name, f);
        self
    }

    /// Register an initial event listener. Its name is advertised to every
    /// peer in handshake replies.
    pub fn on<F>(&mut self, event: impl Into<String>, f: F) -> ListenerId
    where
        F: Fn(PeerId, &[Value]) + Send + Sync + 'static,
    {
        let event = event.into();
        if !guard_event_name(&event) {
            return ListenerId::invalid();
        }
        self.listeners.on(event, f)
    }

    /// Register a callback fired whenever a peer completes a handshake.
    pub fn on_handshake<F>(mut self, f: F) -> Self
    where
        F: Fn(PeerId) + Send + Sync + 'static,
    {
        self.handshake_hooks.push(Box::new(f));
        self
    }

    /// Split into a handle and the driver that must be spawned.
    pub fn build<T: HubTransport>(self, transport: T) -> (HubHandle, HubDriver<T>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.buffer);
        let handle = HubHandle { tx: cmd_tx.clone() };
        let driver = HubDriver {
            transport,
            config: self.config,
            pending: PendingCalls::new(),
            commands: self.commands,
            listeners: self.listeners,
            handshake_hooks: self.handshake_hooks,
            peers: HashMap::new(),
            cmd_rx,
            self_tx: cmd_tx,
        };
        (handle, driver)
    }
}

impl Default for HubBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable client-side API for the hub.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Invoke a command on one connected peer and await its typed result.
    ///
    /// Fails immediately with [`CallError::NotRegistered`] if the peer id
    /// has no connection record.
    pub async fn request(
        &self,
        peer: PeerId,
        name: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Value, CallError> {
        self.request_with_ports(peer, name, args, Vec::new()).await
    }

    /// Like [`request`](Self::request), transferring endpoints alongside.
    pub async fn request_with_ports(
        &self,
        peer: PeerId,
        name: impl Into<String>,
        args: Vec<Value>,
        ports: Vec<PortEndpoint>,
    ) -> Result<Value, CallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Request {
                peer,
                name: name.into(),
                args,
                ports,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CallError::DriverGone)?;
        reply_rx.await.map_err(|_| CallError::ChannelClosed)?
    }

    /// Fire-and-forget notification to one peer.
    ///
    /// A no-op unless the peer declared interest in `name`. Bursts coalesce:
    /// emits issued while a flush is outstanding join that flush and all
    /// settle together when the batch goes out.
    pub async fn emit(
        &self,
        peer: PeerId,
        name: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<(), CallError> {
        self.emit_with_ports(peer, name, args, Vec::new()).await
    }

    /// Like [`emit`](Self::emit), transferring endpoints alongside.
    pub async fn emit_with_ports(
        &self,
        peer: PeerId,
        name: impl Into<String>,
        args: Vec<Value>,
        ports: Vec<PortEndpoint>,
    ) -> Result<(), CallError> {
        let name = name.into();
        if !guard_event_name(&name) {
            return Ok(());
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Emit {
                peer,
                name,
                args,
                ports,
                done: done_tx,
            })
            .await
            .map_err(|_| CallError::DriverGone)?;
        done_rx.await.map_err(|_| CallError::ChannelClosed)?
    }

    /// Emit to every connected peer.
    ///
    /// Every per-peer emit settles independently; one peer failing does not
    /// hide the others' outcomes.
    pub async fn broadcast(
        &self,
        name: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Vec<(PeerId, Result<(), CallError>)>, CallError> {
        let name = name.into();
        if !guard_event_name(&name) {
            return Ok(Vec::new());
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Broadcast {
                name,
                args,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CallError::DriverGone)?;
        let receivers = reply_rx.await.map_err(|_| CallError::ChannelClosed)?;
        let settled = futures_util::future::join_all(receivers.into_iter().map(
            |(peer, done)| async move {
                (
                    peer,
                    done.await.unwrap_or(Err(CallError::ChannelClosed)),
                )
            },
        ))
        .await;
        Ok(settled)
    }

    /// Start listening for `event`. Every connected peer is told, so peer
    /// emit gates open.
    pub async fn on<F>(&self, event: impl Into<String>, f: F) -> Result<ListenerId, CallError>
    where
        F: Fn(PeerId, &[Value]) + Send + Sync + 'static,
    {
        let event = event.into();
        if !guard_event_name(&event) {
            return Ok(ListenerId::invalid());
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Subscribe {
                event,
                listener: Box::new(f),
                reply: reply_tx,
            })
            .await
            .map_err(|_| CallError::DriverGone)?;
        reply_rx.await.map_err(|_| CallError::DriverGone)
    }

    /// Stop one listener, telling every connected peer.
    pub async fn off(&self, event: impl Into<String>, id: ListenerId) -> Result<(), CallError> {
        let event = event.into();
        if !guard_event_name(&event) {
            return Ok(());
        }
        self.tx
            .send(HubCommand::Unsubscribe { event, id })
            .await
            .map_err(|_| CallError::DriverGone)
    }

    /// Ids of the currently connected peers.
    pub async fn peers(&self) -> Result<Vec<PeerId>, CallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Peers { reply: reply_tx })
            .await
            .map_err(|_| CallError::DriverGone)?;
        reply_rx.await.map_err(|_| CallError::DriverGone)
    }

    /// Tear the hub down: pending hub-initiated requests are rejected with
    /// [`CallError::ChannelClosed`] and every connected peer is notified
    /// best-effort. Idempotent.
    pub async fn destroy(&self) -> Result<(), CallError> {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .tx
            .send(HubCommand::Destroy { done: done_tx })
            .await
            .is_err()
        {
            return Ok(());
        }
        let _ = done_rx.await;
        Ok(())
    }
}

/// Mailbox messages for the hub driver.
pub(crate) enum HubCommand {
    Request {
        peer: PeerId,
        name: String,
        args: Vec<Value>,
        ports: Vec<PortEndpoint>,
        reply: Completion,
    },
    Emit {
        peer: PeerId,
        name: String,
        args: Vec<Value>,
        ports: Vec<PortEndpoint>,
        done: EmitDone,
    },
    Broadcast {
        name: String,
        args: Vec<Value>,
        reply: oneshot::Sender<Vec<(PeerId, oneshot::Receiver<Result<(), CallError>>)>>,
    },
    Subscribe {
        event: String,
        listener: BoxedListener<PeerId>,
        reply: oneshot::Sender<ListenerId>,
    },
    Unsubscribe {
        event: String,
        id: ListenerId,
    },
    Peers {
        reply: oneshot::Sender<Vec<PeerId>>,
    },
    /// A spawned command handler finished; send its response.
    Respond {
        peer: PeerId,
        id: RequestId,
        outcome: Result<CommandOutput, String>,
        transfers: bool,
    },
    Destroy {
        done: oneshot::Sender<()>,
    },
}

/// A hub-originated message waiting for an endpoint from its peer.
enum OutboundSend {
    Action {
        kind: ActionKind,
        ports: Vec<PortEndpoint>,
    },
    /// Placeholder for the outstanding emit flush; the batch is drained from
    /// the record at the moment this reaches an endpoint.
    EmitFlush,
}

/// Per-peer connection state, created on handshake.
struct PeerRecord {
    /// Event names this peer wants delivered; gates emits to it.
    interest: InterestSet,
    /// Endpoints banked for future hub-originated sends.
    pool: VecDeque<PortEndpoint>,
    /// Sends waiting for an endpoint, oldest first.
    sendq: VecDeque<OutboundSend>,
    /// Emit batch accumulating until an endpoint is available.
    pending_emits: Vec<(String, Vec<Value>)>,
    /// Endpoints transferred by emit callers, shipped with the batch.
    emit_ports: Vec<PortEndpoint>,
    /// Callers settled when the outstanding batch goes out. Non-empty means
    /// a flush is in progress and later emits join it.
    flush_waiters: Vec<EmitDone>,
}

impl PeerRecord {
    fn new(interest: InterestSet) -> Self {
        Self {
            interest,
            pool: VecDeque::new(),
            sendq: VecDeque::new(),
            pending_emits: Vec::new(),
            emit_ports: Vec::new(),
            flush_waiters: Vec::new(),
        }
    }
}

enum Turn {
    Command(Option<HubCommand>),
    Wire(Option<Delivery>),
}

/// The hub's connection driver. Spawn [`run`](Self::run) to start accepting
/// peers.
pub struct HubDriver<T> {
    transport: T,
    config: ChannelConfig,
    pending: PendingCalls,
    commands: CommandRegistry<PeerId>,
    listeners: Listeners<PeerId>,
    handshake_hooks: Vec<Box<dyn Fn(PeerId) + Send + Sync>>,
    peers: HashMap<PeerId, PeerRecord>,
    cmd_rx: mpsc::Receiver<HubCommand>,
    self_tx: mpsc::Sender<HubCommand>,
}

impl<T: HubTransport> HubDriver<T> {
    /// Run the hub until it is destroyed, the transport closes, or the
    /// transport fails.
    pub async fn run(mut self) -> io::Result<()> {
        let result = self.drive().await;
        self.pending.fail_all(CallError::ChannelClosed);
        result
    }

    async fn drive(&mut self) -> io::Result<()> {
        loop {
            let turn = tokio::select! {
                cmd = self.cmd_rx.recv() => Turn::Command(cmd),
                inbound = self.transport.recv() => Turn::Wire(inbound?),
            };
            match turn {
                Turn::Command(Some(cmd)) => {
                    if self.handle_command(cmd).await {
                        return Ok(());
                    }
                }
                Turn::Command(None) => {
                    // Every handle is gone; nobody can use the hub anymore.
                    self.shutdown().await;
                    return Ok(());
                }
                Turn::Wire(Some(delivery)) => self.dispatch(delivery).await,
                Turn::Wire(None) => {
                    debug!("transport closed");
                    return Ok(());
                }
            }
        }
    }

    /// Returns true when the hub is shutting down.
    async fn handle_command(&mut self, cmd: HubCommand) -> bool {
        match cmd {
            HubCommand::Request {
                peer,
                name,
                args,
                ports,
                reply,
            } => {
                if !self.peers.contains_key(&peer) {
                    let _ = reply.send(Err(CallError::NotRegistered));
                    return false;
                }
                let id = self.pending.insert_next(reply);
                let kind = ActionKind::Request { id, name, args };
                self.send_to_peer(peer, OutboundSend::Action { kind, ports })
                    .await;
            }
            HubCommand::Emit {
                peer,
                name,
                args,
                ports,
                done,
            } => {
                self.emit_to_peer(peer, name, args, ports, done).await;
            }
            HubCommand::Broadcast { name, args, reply } => {
                let mut targets: Vec<PeerId> = self.peers.keys().copied().collect();
                targets.sort();
                let mut receivers = Vec::with_capacity(targets.len());
                for peer in targets {
                    let (done_tx, done_rx) = oneshot::channel();
                    self.emit_to_peer(peer, name.clone(), args.clone(), Vec::new(), done_tx)
                        .await;
                    receivers.push((peer, done_rx));
                }
                let _ = reply.send(receivers);
            }
            HubCommand::Subscribe {
                event,
                listener,
                reply,
            } => {
                let id = self.listeners.on_boxed(event.clone(), listener);
                let _ = reply.send(id);
                self.push_change_event(true, &event).await;
            }
            HubCommand::Unsubscribe { event, id } => {
                self.listeners.off(&event, id);
                self.push_change_event(false, &event).await;
            }
            HubCommand::Peers { reply } => {
                let mut ids: Vec<PeerId> = self.peers.keys().copied().collect();
                ids.sort();
                let _ = reply.send(ids);
            }
            HubCommand::Respond {
                peer,
                id,
                outcome,
                transfers,
            } => {
                let (kind, ports) = response_parts(id, outcome, transfers);
                self.send_to_peer(peer, OutboundSend::Action { kind, ports })
                    .await;
            }
            HubCommand::Destroy { done } => {
                self.shutdown().await;
                let _ = done.send(());
                return true;
            }
        }
        false
    }

    /// Route one inbound envelope.
    async fn dispatch(&mut self, delivery: Delivery) {
        let Delivery { envelope, ports } = delivery;
        if !envelope.matches_scope(&self.config.scope) {
            trace!(scope = %envelope.scope, "ignoring envelope from foreign scope");
            return;
        }
        let Action { kind, peer_id } = envelope.action;
        let Some(peer) = peer_id else {
            debug!("peer action without a peer id");
            self.send_unexpected(Action { kind, peer_id: None }, ports)
                .await;
            return;
        };
        match kind {
            ActionKind::Handshake { events } => self.on_handshake(peer, events, ports).await,
            kind if !self.peers.contains_key(&peer) => {
                debug!(%peer, "action from unregistered peer");
                self.send_unexpected(Action::from_peer(peer, kind), ports)
                    .await;
            }
            kind => {
                self.intake_ports(peer, ports).await;
                self.route(peer, kind).await;
            }
        }
    }

    async fn route(&mut self, peer: PeerId, kind: ActionKind) {
        match kind {
            ActionKind::Request { id, name, args } => {
                self.on_request(peer, id, name, args).await;
            }
            ActionKind::Response { id, result, error } => {
                let outcome = match error {
                    Some(message) => Err(CallError::Remote(message)),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                if !self.pending.settle(id, outcome) {
                    trace!(%id, "response for unknown correlation");
                }
            }
            ActionKind::Emit { events } => {
                for (name, args) in events {
                    self.listeners.fire(&name, peer, &args);
                }
            }
            ActionKind::ChangeEvent { enable, name } => {
                if let Some(record) = self.peers.get_mut(&peer) {
                    record.interest.apply(enable, &name);
                }
            }
            ActionKind::Destroy => {
                debug!(%peer, "peer destroyed its session");
                self.remove_peer(peer);
            }
            // The keep-alive's endpoint was already taken in.
            ActionKind::Port => {}
            // Handshakes are routed before endpoint intake; peers never send
            // unexpected signals.
            ActionKind::Handshake { .. } | ActionKind::Unexpected { .. } => {}
        }
    }

    async fn on_handshake(&mut self, peer: PeerId, events: Vec<String>, ports: Vec<PortEndpoint>) {
        debug!(%peer, ?events, "peer handshake");
        if self.peers.contains_key(&peer) {
            debug!(%peer, "replacing existing connection record");
            self.remove_peer(peer);
        }
        let mut interest = InterestSet::new();
        interest.reset(events);
        self.peers.insert(peer, PeerRecord::new(interest));
        self.intake_ports(peer, ports).await;
        let reply = ActionKind::Handshake {
            events: self.listeners.names(),
        };
        self.send_to_peer(
            peer,
            OutboundSend::Action {
                kind: reply,
                ports: Vec::new(),
            },
        )
        .await;
        for hook in &self.handshake_hooks {
            hook(peer);
        }
    }

    async fn on_request(&mut self, peer: PeerId, id: RequestId, name: String, args: Vec<Value>) {
        match self.commands.invoke(&name, peer, args) {
            None => {
                let (kind, ports) = response_parts(id, Err(not_found_error(&name)), false);
                self.send_to_peer(peer, OutboundSend::Action { kind, ports })
                    .await;
            }
            Some((fut, transfers)) => {
                // Run the handler off the dispatch path; the response comes
                // back through the mailbox.
                let tx = self.self_tx.clone();
                tokio::spawn(async move {
                    let outcome = fut.await;
                    let _ = tx
                        .send(HubCommand::Respond {
                            peer,
                            id,
                            outcome,
                            transfers,
                        })
                        .await;
                });
            }
        }
    }

    /// Bank endpoints arriving from a known peer, serving queued sends first
    /// in FIFO order.
    async fn intake_ports(&mut self, peer: PeerId, ports: Vec<PortEndpoint>) {
        for port in ports {
            let Some(record) = self.peers.get_mut(&peer) else {
                return;
            };
            match record.sendq.pop_front() {
                Some(send) => self.dispatch_send(peer, port, send).await,
                None => record.pool.push_back(port),
            }
        }
    }

    /// Send one hub-originated message, spending a pooled endpoint or
    /// queueing until the peer supplies one.
    async fn send_to_peer(&mut self, peer: PeerId, send: OutboundSend) {
        let Some(record) = self.peers.get_mut(&peer) else {
            return;
        };
        match record.pool.pop_front() {
            Some(port) => self.dispatch_send(peer, port, send).await,
            None => record.sendq.push_back(send),
        }
    }

    async fn dispatch_send(&mut self, peer: PeerId, port: PortEndpoint, send: OutboundSend) {
        match send {
            OutboundSend::Action { kind, ports } => {
                let _ = self.deliver(port, kind, ports).await;
            }
            OutboundSend::EmitFlush => self.flush_emits(peer, port).await,
        }
    }

    /// Write one envelope to a peer-supplied endpoint. The endpoint is spent
    /// either way.
    async fn deliver(
        &mut self,
        port: PortEndpoint,
        kind: ActionKind,
        ports: Vec<PortEndpoint>,
    ) -> Result<(), CallError> {
        let request_id = match &kind {
            ActionKind::Request { id, .. } => Some(*id),
            _ => None,
        };
        let envelope = Envelope::new(self.config.scope.clone(), Action::from_hub(kind));
        match port.send(Delivery { envelope, ports }).await {
            Ok(()) => Ok(()),
            Err(_) => {
                debug!("peer endpoint closed before delivery");
                if let Some(id) = request_id {
                    self.pending.settle(id, Err(CallError::ChannelClosed));
                }
                Err(CallError::ChannelClosed)
            }
        }
    }

    async fn emit_to_peer(
        &mut self,
        peer: PeerId,
        name: String,
        args: Vec<Value>,
        ports: Vec<PortEndpoint>,
        done: EmitDone,
    ) {
        let Some(record) = self.peers.get_mut(&peer) else {
            let _ = done.send(Err(CallError::NotRegistered));
            return;
        };
        if !record.interest.contains(&name) {
            trace!(%peer, event = %name, "peer not interested, dropping emit");
            let _ = done.send(Ok(()));
            return;
        }
        record.pending_emits.push((name, args));
        record.emit_ports.extend(ports);
        record.flush_waiters.push(done);
        if record.flush_waiters.len() > 1 {
            // A flush is already outstanding; this emit rides along with it.
            return;
        }
        if let Some(port) = record.pool.pop_front() {
            self.flush_emits(peer, port).await;
        } else {
            record.sendq.push_back(OutboundSend::EmitFlush);
        }
    }

    /// Send the accumulated emit batch as one envelope and settle everyone
    /// who joined it.
    async fn flush_emits(&mut self, peer: PeerId, port: PortEndpoint) {
        let Some(record) = self.peers.get_mut(&peer) else {
            return;
        };
        let events = std::mem::take(&mut record.pending_emits);
        let ports = std::mem::take(&mut record.emit_ports);
        let waiters = std::mem::take(&mut record.flush_waiters);
        let outcome = self.deliver(port, ActionKind::Emit { events }, ports).await;
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Reply over the sender's own endpoint that we have no session for it.
    async fn send_unexpected(&mut self, original: Action, ports: Vec<PortEndpoint>) {
        let Some(port) = ports.into_iter().next() else {
            trace!("no endpoint to reply unexpected on, dropping");
            return;
        };
        let kind = ActionKind::Unexpected {
            original: Box::new(original),
        };
        let envelope = Envelope::new(self.config.scope.clone(), Action::from_hub(kind));
        if port.send(Delivery::bare(envelope)).await.is_err() {
            trace!("unexpected reply endpoint already closed");
        }
    }

    async fn push_change_event(&mut self, enable: bool, name: &str) {
        let targets: Vec<PeerId> = self.peers.keys().copied().collect();
        for peer in targets {
            let kind = ActionKind::ChangeEvent {
                enable,
                name: name.to_string(),
            };
            self.send_to_peer(
                peer,
                OutboundSend::Action {
                    kind,
                    ports: Vec::new(),
                },
            )
            .await;
        }
    }

    fn remove_peer(&mut self, peer: PeerId) {
        let Some(record) = self.peers.remove(&peer) else {
            return;
        };
        for send in record.sendq {
            if let OutboundSend::Action {
                kind: ActionKind::Request { id, .. },
                ..
            } = send
            {
                self.pending.settle(id, Err(CallError::NotRegistered));
            }
        }
        for waiter in record.flush_waiters {
            let _ = waiter.send(Err(CallError::NotRegistered));
        }
    }

    async fn shutdown(&mut self) {
        self.pending.fail_all(CallError::ChannelClosed);
        let targets: Vec<PeerId> = self.peers.keys().copied().collect();
        for peer in targets {
            // Only endpoints already pooled can carry the notification;
            // waiting for fresh ones during teardown would never finish.
            let port = self
                .peers
                .get_mut(&peer)
                .and_then(|record| record.pool.pop_front());
            if let Some(port) = port {
                let _ = self.deliver(port, ActionKind::Destroy, Vec::new()).await;
            }
            self.remove_peer(peer);
        }
        self.listeners.clear();
    }
}
