//! The initiating role: a single outbound session to the hub.
//!
//! A peer is built once (commands and initial listeners registered up front),
//! split into a cheap cloneable [`PeerHandle`] and a [`PeerDriver`] future the
//! caller spawns. The driver is the exclusive owner of all session state and
//! processes one message at a time; handles reach it only through its mailbox,
//! so nothing here needs a lock.
//!
//! Lifecycle: the driver handshakes on start and re-sends the handshake on a
//! fixed interval until the hub acknowledges. Requests issued before that are
//! buffered and replayed in order. If the hub later answers with an
//! `unexpected` signal (it restarted and lost the session), the driver drops
//! back to handshaking and recovers on its own.

use std::io;

use spoke_wire::{Action, ActionKind, Envelope, PeerId, RequestId, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::command::{not_found_error, response_parts, CommandOutput, CommandRegistry};
use crate::correlate::{Completion, PendingCalls};
use crate::errors::CallError;
use crate::events::{guard_event_name, BoxedListener, InterestSet, ListenerId, Listeners};
use crate::port::{port_pair, PortEndpoint};
use crate::transport::{Delivery, PeerTransport};
use crate::ChannelConfig;

/// Where the session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Handshake sent, not yet acknowledged. Also re-entered on recovery.
    Handshaking,
    /// Handshake acknowledged; sends go out immediately.
    Connected,
}

/// Builder for the peer role.
pub struct PeerBuilder {
    config: ChannelConfig,
    commands: CommandRegistry<()>,
    listeners: Listeners<()>,
    handshake_hooks: Vec<Box<dyn Fn() + Send + Sync>>,
}

impl PeerBuilder {
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

    /// Register a command the hub can invoke on this peer.
    pub fn command<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, String>> + Send + 'static,
    {
        self.commands.register(name, move |_ctx: (), args| f(args));
        self
    }

    /// Register a command whose result transfers sub-channel endpoints.
    pub fn command_with_ports<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CommandOutput, String>> + Send + 'static,
    {
        self.commands
            .register_with_ports(name, move |_ctx: (), args| f(args));
        self
    }

    /// Register an initial event listener. Its name is advertised in the
    /// handshake payload.
    pub fn on<F>(&mut self, event: impl Into<String>, f: F) -> ListenerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let event = event.into();
        if !guard_event_name(&event) {
            return ListenerId::invalid();
        }
        self.listeners.on(event, move |_ctx: (), args| f(args))
    }

    /// Register a callback fired every time a handshake completes, including
    /// re-handshakes after recovery.
    pub fn on_handshake<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handshake_hooks.push(Box::new(f));
        self
    }

    /// Split into a handle and the driver that must be spawned.
    pub fn build<T: PeerTransport>(self, transport: T) -> (PeerHandle, PeerDriver<T>) {
        let peer_id = PeerId::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.buffer);
        let (ports_tx, ports_rx) = mpsc::channel(self.config.buffer);
        let (ready_tx, ready_rx) = watch::channel(false);

        let handle = PeerHandle {
            peer_id,
            tx: cmd_tx.clone(),
            ready: ready_rx,
        };
        let driver = PeerDriver {
            transport,
            config: self.config,
            peer_id,
            phase: Phase::Handshaking,
            pending: PendingCalls::new(),
            commands: self.commands,
            listeners: self.listeners,
            interest: InterestSet::new(),
            handshake_hooks: self.handshake_hooks,
            queue: Vec::new(),
            cmd_rx,
            self_tx: cmd_tx,
            ports_tx,
            ports_rx,
            ready_tx,
        };
        (handle, driver)
    }
}

impl Default for PeerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable client-side API for one peer session.
///
/// All methods go through the driver's mailbox; the driver must be running
/// for them to make progress.
#[derive(Clone)]
pub struct PeerHandle {
    peer_id: PeerId,
    tx: mpsc::Sender<PeerCommand>,
    ready: watch::Receiver<bool>,
}

impl PeerHandle {
    /// The id this peer introduces itself with.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Whether the handshake is currently acknowledged.
    pub fn is_connected(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until the handshake completes.
    pub async fn ready(&self) -> Result<(), CallError> {
        let mut ready = self.ready.clone();
        ready
            .wait_for(|connected| *connected)
            .await
            .map(|_| ())
            .map_err(|_| CallError::DriverGone)
    }

    /// Invoke a command on the hub and await its typed result.
    ///
    /// Issued before the handshake completes, the request is buffered and
    /// sent verbatim once it does; the returned future is the same either
    /// way.
    pub async fn request(
        &self,
        name: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Value, CallError> {
        self.request_with_ports(name, args, Vec::new()).await
    }

    /// Like [`request`](Self::request), transferring endpoints alongside.
    pub async fn request_with_ports(
        &self,
        name: impl Into<String>,
        args: Vec<Value>,
        ports: Vec<PortEndpoint>,
    ) -> Result<Value, CallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PeerCommand::Request {
                name: name.into(),
                args,
                ports,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CallError::DriverGone)?;
        reply_rx.await.map_err(|_| CallError::ChannelClosed)?
    }

    /// Fire-and-forget notification to the hub.
    ///
    /// A no-op unless the hub has declared interest in `name`.
    pub async fn emit(
        &self,
        name: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<(), CallError> {
        self.emit_with_ports(name, args, Vec::new()).await
    }

    /// Like [`emit`](Self::emit), transferring endpoints alongside.
    pub async fn emit_with_ports(
        &self,
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
            .send(PeerCommand::Emit {
                name,
                args,
                ports,
                done: done_tx,
            })
            .await
            .map_err(|_| CallError::DriverGone)?;
        done_rx.await.map_err(|_| CallError::ChannelClosed)?
    }

    /// Start listening for `event`, notifying the hub so its emit gate opens.
    pub async fn on<F>(&self, event: impl Into<String>, f: F) -> Result<ListenerId, CallError>
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let event = event.into();
        if !guard_event_name(&event) {
            return Ok(ListenerId::invalid());
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PeerCommand::Subscribe {
                event,
                listener: Box::new(move |_ctx: (), args| f(args)),
                reply: reply_tx,
            })
            .await
            .map_err(|_| CallError::DriverGone)?;
        reply_rx.await.map_err(|_| CallError::DriverGone)
    }

    /// Stop one listener, notifying the hub.
    pub async fn off(&self, event: impl Into<String>, id: ListenerId) -> Result<(), CallError> {
        let event = event.into();
        if !guard_event_name(&event) {
            return Ok(());
        }
        self.tx
            .send(PeerCommand::Unsubscribe { event, id })
            .await
            .map_err(|_| CallError::DriverGone)
    }

    /// Tear the session down: pending requests are rejected with
    /// [`CallError::ChannelClosed`] and, if connected, the hub is notified.
    /// Idempotent.
    pub async fn destroy(&self) -> Result<(), CallError> {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .tx
            .send(PeerCommand::Destroy { done: done_tx })
            .await
            .is_err()
        {
            return Ok(());
        }
        let _ = done_rx.await;
        Ok(())
    }
}

/// Mailbox messages for the peer driver.
pub(crate) enum PeerCommand {
    Request {
        name: String,
        args: Vec<Value>,
        ports: Vec<PortEndpoint>,
        reply: Completion,
    },
    Emit {
        name: String,
        args: Vec<Value>,
        ports: Vec<PortEndpoint>,
        done: oneshot::Sender<Result<(), CallError>>,
    },
    Subscribe {
        event: String,
        listener: BoxedListener<()>,
        reply: oneshot::Sender<ListenerId>,
    },
    Unsubscribe {
        event: String,
        id: ListenerId,
    },
    /// A spawned command handler finished; send its response.
    Respond {
        id: RequestId,
        outcome: Result<CommandOutput, String>,
        transfers: bool,
    },
    Destroy {
        done: oneshot::Sender<()>,
    },
}

/// An action buffered while the handshake is outstanding.
struct QueuedSend {
    kind: ActionKind,
    ports: Vec<PortEndpoint>,
}

enum Turn {
    Command(Option<PeerCommand>),
    Wire(Option<Delivery>),
    Ported(Option<Delivery>),
    Retry,
}

/// The peer's connection driver. Spawn [`run`](Self::run) to bring the
/// session up.
pub struct PeerDriver<T> {
    transport: T,
    config: ChannelConfig,
    peer_id: PeerId,
    phase: Phase,
    pending: PendingCalls,
    commands: CommandRegistry<()>,
    listeners: Listeners<()>,
    /// Mirror of the hub's interest set; gates outgoing emits.
    interest: InterestSet,
    handshake_hooks: Vec<Box<dyn Fn() + Send + Sync>>,
    queue: Vec<QueuedSend>,
    cmd_rx: mpsc::Receiver<PeerCommand>,
    self_tx: mpsc::Sender<PeerCommand>,
    /// Deliveries arriving on retained port halves merge into this stream.
    ports_tx: mpsc::Sender<Delivery>,
    ports_rx: mpsc::Receiver<Delivery>,
    ready_tx: watch::Sender<bool>,
}

impl<T: PeerTransport> PeerDriver<T> {
    /// Run the session until it is destroyed, the transport closes, or the
    /// transport fails.
    pub async fn run(mut self) -> io::Result<()> {
        let result = self.drive().await;
        self.pending.fail_all(CallError::ChannelClosed);
        result
    }

    async fn drive(&mut self) -> io::Result<()> {
        self.send_handshake().await?;
        let mut retry = tokio::time::interval(self.config.handshake_retry);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        retry.reset();

        loop {
            let turn = tokio::select! {
                cmd = self.cmd_rx.recv() => Turn::Command(cmd),
                inbound = self.transport.recv() => Turn::Wire(inbound?),
                ported = self.ports_rx.recv() => Turn::Ported(ported),
                _ = retry.tick(), if self.phase == Phase::Handshaking => Turn::Retry,
            };
            match turn {
                Turn::Command(Some(cmd)) => {
                    if self.handle_command(cmd).await? {
                        return Ok(());
                    }
                }
                Turn::Command(None) => {
                    // Every handle is gone; nobody can use the session anymore.
                    self.shutdown().await;
                    return Ok(());
                }
                Turn::Wire(Some(delivery)) | Turn::Ported(Some(delivery)) => {
                    if self.dispatch(delivery).await? {
                        return Ok(());
                    }
                }
                Turn::Wire(None) => {
                    debug!("transport closed");
                    return Ok(());
                }
                // The driver holds a sender for its own merged port stream,
                // so it never closes.
                Turn::Ported(None) => {}
                Turn::Retry => {
                    debug!("handshake unacknowledged, re-sending");
                    self.send_handshake().await?;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: PeerCommand) -> io::Result<bool> {
        match cmd {
            PeerCommand::Request {
                name,
                args,
                ports,
                reply,
            } => {
                let id = self.pending.insert_next(reply);
                let kind = ActionKind::Request { id, name, args };
                if self.phase == Phase::Connected {
                    self.send_with_port(kind, ports).await?;
                } else {
                    trace!(%id, "buffering request until handshake completes");
                    self.queue.push(QueuedSend { kind, ports });
                }
            }
            PeerCommand::Emit {
                name,
                args,
                ports,
                done,
            } => {
                if !self.interest.contains(&name) {
                    trace!(event = %name, "hub not interested, dropping emit");
                    let _ = done.send(Ok(()));
                } else {
                    let kind = ActionKind::Emit {
                        events: vec![(name, args)],
                    };
                    self.send_with_port(kind, ports).await?;
                    let _ = done.send(Ok(()));
                }
            }
            PeerCommand::Subscribe {
                event,
                listener,
                reply,
            } => {
                let id = self.listeners.on_boxed(event.clone(), listener);
                let _ = reply.send(id);
                self.notify_change_event(true, event).await?;
            }
            PeerCommand::Unsubscribe { event, id } => {
                self.listeners.off(&event, id);
                self.notify_change_event(false, event).await?;
            }
            PeerCommand::Respond {
                id,
                outcome,
                transfers,
            } => {
                let (kind, ports) = response_parts(id, outcome, transfers);
                self.send_with_port(kind, ports).await?;
            }
            PeerCommand::Destroy { done } => {
                self.shutdown().await;
                let _ = done.send(());
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Route one inbound envelope. Returns true when the session is over.
    async fn dispatch(&mut self, delivery: Delivery) -> io::Result<bool> {
        let Delivery { envelope, ports } = delivery;
        if !envelope.matches_scope(&self.config.scope) {
            trace!(scope = %envelope.scope, "ignoring envelope from foreign scope");
            return Ok(false);
        }
        if !ports.is_empty() {
            // Endpoints only multiplex hub-bound traffic; inbound ones have
            // no further routing on this side.
            trace!(count = ports.len(), "dropping endpoints attached to hub traffic");
        }
        match envelope.action.kind {
            ActionKind::Handshake { events } => self.on_handshake_ack(events).await?,
            ActionKind::Request { id, name, args } => self.on_request(id, name, args).await?,
            ActionKind::Response { id, result, error } => self.on_response(id, result, error),
            ActionKind::Emit { events } => self.on_emit(events).await?,
            ActionKind::ChangeEvent { enable, name } => self.interest.apply(enable, &name),
            ActionKind::Destroy => {
                debug!("hub destroyed the session");
                self.ready_tx.send_replace(false);
                self.pending.fail_all(CallError::ChannelClosed);
                self.listeners.clear();
                return Ok(true);
            }
            ActionKind::Port => {}
            ActionKind::Unexpected { original } => self.on_unexpected(*original).await?,
        }
        Ok(false)
    }

    async fn on_handshake_ack(&mut self, events: Vec<String>) -> io::Result<()> {
        if self.phase == Phase::Connected {
            // Duplicate acknowledgment: refresh the interest mirror, nothing
            // else. The queue was already flushed and must not replay.
            self.interest.reset(events);
            return Ok(());
        }
        debug!(peer_id = %self.peer_id, "handshake acknowledged");
        self.send_with_port(ActionKind::Port, Vec::new()).await?;
        self.interest.reset(events);
        self.phase = Phase::Connected;
        let queued = std::mem::take(&mut self.queue);
        for send in queued {
            self.send_with_port(send.kind, send.ports).await?;
        }
        self.ready_tx.send_replace(true);
        for hook in &self.handshake_hooks {
            hook();
        }
        Ok(())
    }

    async fn on_request(&mut self, id: RequestId, name: String, args: Vec<Value>) -> io::Result<()> {
        match self.commands.invoke(&name, (), args) {
            None => {
                let (kind, ports) = response_parts(id, Err(not_found_error(&name)), false);
                self.send_with_port(kind, ports).await
            }
            Some((fut, transfers)) => {
                // Run the handler off the dispatch path; the response comes
                // back through the mailbox.
                let tx = self.self_tx.clone();
                tokio::spawn(async move {
                    let outcome = fut.await;
                    let _ = tx
                        .send(PeerCommand::Respond {
                            id,
                            outcome,
                            transfers,
                        })
                        .await;
                });
                Ok(())
            }
        }
    }

    fn on_response(&mut self, id: RequestId, result: Option<Value>, error: Option<String>) {
        let outcome = match error {
            Some(message) => Err(CallError::Remote(message)),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        if !self.pending.settle(id, outcome) {
            trace!(%id, "response for unknown correlation");
        }
    }

    async fn on_emit(&mut self, events: Vec<(String, Vec<Value>)>) -> io::Result<()> {
        // The hub spent a pooled endpoint to deliver this; rotate a fresh
        // one back before running listeners.
        self.send_with_port(ActionKind::Port, Vec::new()).await?;
        for (name, args) in events {
            self.listeners.fire(&name, (), &args);
        }
        Ok(())
    }

    async fn on_unexpected(&mut self, original: Action) -> io::Result<()> {
        if self.phase == Phase::Connected {
            warn!(peer_id = %self.peer_id, "hub no longer recognizes this session, re-handshaking");
            self.phase = Phase::Handshaking;
            self.ready_tx.send_replace(false);
            self.send_handshake().await?;
        }
        if let ActionKind::Request { id, .. } = original.kind {
            self.pending.settle(id, Err(CallError::UnexpectedPeer));
        }
        Ok(())
    }

    /// Tell the hub about a listener change.
    ///
    /// Before the handshake settles this is buffered: the handshake payload
    /// in flight may predate the change, so the replay after the ack is what
    /// brings the hub's interest set current.
    async fn notify_change_event(&mut self, enable: bool, name: String) -> io::Result<()> {
        let kind = ActionKind::ChangeEvent { enable, name };
        if self.phase == Phase::Connected {
            self.send_with_port(kind, Vec::new()).await
        } else {
            self.queue.push(QueuedSend {
                kind,
                ports: Vec::new(),
            });
            Ok(())
        }
    }

    async fn shutdown(&mut self) {
        self.ready_tx.send_replace(false);
        self.pending.fail_all(CallError::ChannelClosed);
        if self.phase == Phase::Connected {
            if let Err(error) = self.send_with_port(ActionKind::Destroy, Vec::new()).await {
                debug!(%error, "destroy notification failed");
            }
        }
        self.listeners.clear();
        self.queue.clear();
    }

    async fn send_handshake(&mut self) -> io::Result<()> {
        let events = self.listeners.names();
        trace!(?events, "sending handshake");
        self.send_with_port(ActionKind::Handshake { events }, Vec::new())
            .await
    }

    /// Send one action to the hub.
    ///
    /// Every outgoing envelope carries a freshly paired endpoint (plus any
    /// endpoints the caller is transferring). The retained half feeds back
    /// into this driver's dispatch loop, which is how the hub reaches us
    /// without a transport-level address.
    async fn send_with_port(
        &mut self,
        kind: ActionKind,
        mut ports: Vec<PortEndpoint>,
    ) -> io::Result<()> {
        let (retained, shipped) = port_pair();
        self.adopt_port(retained);
        let mut attached = Vec::with_capacity(ports.len() + 1);
        attached.push(shipped);
        attached.append(&mut ports);
        let envelope = Envelope::new(
            self.config.scope.clone(),
            Action::from_peer(self.peer_id, kind),
        );
        self.transport.send(envelope, attached).await
    }

    fn adopt_port(&self, mut half: PortEndpoint) {
        let inbound = self.ports_tx.clone();
        tokio::spawn(async move {
            while let Some(delivery) = half.recv().await {
                if inbound.send(delivery).await.is_err() {
                    break;
                }
            }
        });
    }
}
