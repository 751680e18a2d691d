//! Command registration and execution.
//!
//! Both roles expose named commands the remote side can invoke via `request`.
//! The registry is populated once at build time and never mutated afterwards.
//! Handlers are async and generic over a caller context `C`: the peer's
//! commands take no context, the hub's receive the calling [`PeerId`] so
//! handlers can tell their callers apart.
//!
//! Execution failures are not channel failures. A missing command or a
//! handler error becomes an error string in the response and nothing else.
//!
//! [`PeerId`]: spoke_wire::PeerId

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use spoke_wire::Value;

use crate::port::PortEndpoint;

/// Successful result of a command handler.
#[derive(Debug, Default)]
pub struct CommandOutput {
    /// The value returned to the requester.
    pub value: Value,
    /// Endpoints to transfer alongside the response. Forwarded only when the
    /// command was registered with `register_with_ports`.
    pub ports: Vec<PortEndpoint>,
}

impl From<Value> for CommandOutput {
    fn from(value: Value) -> Self {
        Self {
            value,
            ports: Vec::new(),
        }
    }
}

/// Future produced by invoking a command handler.
pub type CommandFuture = Pin<Box<dyn Future<Output = Result<CommandOutput, String>> + Send>>;

type BoxedCommand<C> = Box<dyn Fn(C, Vec<Value>) -> CommandFuture + Send + Sync>;

struct CommandEntry<C> {
    run: BoxedCommand<C>,
    transfers_endpoints: bool,
}

/// Name-to-handler registry for one channel role.
pub struct CommandRegistry<C> {
    commands: HashMap<String, CommandEntry<C>>,
}

impl<C> Default for CommandRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> CommandRegistry<C> {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Register a command returning a plain value.
    ///
    /// Registering the same name twice is a programmer error: debug builds
    /// fail loudly, release builds keep the later registration.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(C, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        self.insert(
            name.into(),
            Box::new(move |ctx, args| {
                let fut = f(ctx, args);
                Box::pin(async move { fut.await.map(CommandOutput::from) })
            }),
            false,
        );
    }

    /// Register a command whose result carries endpoints to transfer.
    pub fn register_with_ports<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(C, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CommandOutput, String>> + Send + 'static,
    {
        self.insert(
            name.into(),
            Box::new(move |ctx, args| Box::pin(f(ctx, args))),
            true,
        );
    }

    fn insert(&mut self, name: String, run: BoxedCommand<C>, transfers_endpoints: bool) {
        debug_assert!(
            !self.commands.contains_key(&name),
            "command {name} already registered"
        );
        self.commands.insert(
            name,
            CommandEntry {
                run,
                transfers_endpoints,
            },
        );
    }

    /// Start executing `name`, or `None` if no such command is registered.
    ///
    /// The returned future is meant to be spawned, never awaited on the
    /// dispatch path: message intake must not serialize behind handler
    /// execution. The bool is the transfers-endpoints flag recorded at
    /// registration.
    pub fn invoke(&self, name: &str, ctx: C, args: Vec<Value>) -> Option<(CommandFuture, bool)> {
        let entry = self.commands.get(name)?;
        Some(((entry.run)(ctx, args), entry.transfers_endpoints))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }
}

/// The error string reported for a request naming no registered command.
pub fn not_found_error(name: &str) -> String {
    format!("function {name} not found")
}

/// Turn an execution outcome into the response action and the endpoints to
/// attach. Ports are forwarded only for commands registered as transferring.
pub(crate) fn response_parts(
    id: spoke_wire::RequestId,
    outcome: Result<CommandOutput, String>,
    transfers: bool,
) -> (spoke_wire::ActionKind, Vec<PortEndpoint>) {
    match outcome {
        Ok(output) => {
            let ports = if transfers { output.ports } else { Vec::new() };
            (
                spoke_wire::ActionKind::Response {
                    id,
                    result: Some(output.value),
                    error: None,
                },
                ports,
            )
        }
        Err(message) => (
            spoke_wire::ActionKind::Response {
                id,
                result: None,
                error: Some(message),
            },
            Vec::new(),
        ),
    }
}
