//! Local event listeners and remote interest tracking.
//!
//! Each side keeps two things per connection: its own listener table (what to
//! run when an emit arrives) and a mirror of what the *remote* side listens
//! for (the gate deciding whether an emit is worth sending at all). The
//! mirror is seeded by the handshake payload and kept current by
//! `changeEvent` actions.

use std::collections::{HashMap, HashSet};

use spoke_wire::Value;

/// Event names the protocol reserves for session lifecycle.
///
/// They are invalid targets for `emit`/`on`/`off`: debug builds fail loudly,
/// release builds silently drop the call. Lifecycle is observed through
/// dedicated surfaces (`ready()`, handshake callbacks) instead.
pub const RESERVED_EVENTS: [&str; 2] = ["handshake", "destroy"];

/// Whether `name` may be used with `emit`/`on`/`off`.
pub fn is_event_name_allowed(name: &str) -> bool {
    !RESERVED_EVENTS.contains(&name)
}

/// Reserved-name gate applied at every user-facing `emit`/`on`/`off` surface.
pub(crate) fn guard_event_name(name: &str) -> bool {
    let allowed = is_event_name_allowed(name);
    debug_assert!(allowed, "event name {name} is reserved");
    allowed
}

/// Token identifying one registered listener, returned by `on` and consumed
/// by `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// The id handed back when a reserved name was silently dropped in a
    /// release build. Never allocated, so `off` with it is a no-op.
    pub(crate) const fn invalid() -> Self {
        Self(0)
    }
}

pub(crate) type BoxedListener<C> = Box<dyn Fn(C, &[Value]) + Send + Sync>;

/// Listener table for one channel role.
///
/// `C` is the emit context handed to every listener: nothing on the peer,
/// the emitting [`PeerId`](spoke_wire::PeerId) on the hub.
pub struct Listeners<C> {
    next: u64,
    table: HashMap<String, Vec<(ListenerId, BoxedListener<C>)>>,
}

impl<C: Copy> Listeners<C> {
    pub fn new() -> Self {
        Self {
            next: 1,
            table: HashMap::new(),
        }
    }

    /// Register a listener for `event`.
    pub fn on<F>(&mut self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(C, &[Value]) + Send + Sync + 'static,
    {
        self.on_boxed(event.into(), Box::new(listener))
    }

    pub(crate) fn on_boxed(&mut self, event: String, listener: BoxedListener<C>) -> ListenerId {
        let id = ListenerId(self.next);
        self.next += 1;
        self.table.entry(event).or_default().push((id, listener));
        id
    }

    /// Remove one listener. Returns whether it was present.
    pub fn off(&mut self, event: &str, id: ListenerId) -> bool {
        let Some(entries) = self.table.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.table.remove(event);
        }
        removed
    }

    /// Names currently listened for, sorted. This is the handshake payload.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run every listener registered for `event`. Returns how many ran.
    pub fn fire(&self, event: &str, ctx: C, args: &[Value]) -> usize {
        let Some(entries) = self.table.get(event) else {
            return 0;
        };
        for (_, listener) in entries {
            listener(ctx, args);
        }
        entries.len()
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }
}

impl<C: Copy> Default for Listeners<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Event names the remote side wants delivered.
#[derive(Debug, Default)]
pub struct InterestSet {
    names: HashSet<String>,
}

impl InterestSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set, as a handshake payload does.
    pub fn reset(&mut self, names: impl IntoIterator<Item = String>) {
        self.names = names.into_iter().collect();
    }

    /// Apply one incremental `changeEvent`.
    pub fn apply(&mut self, enable: bool, name: &str) {
        if enable {
            self.names.insert(name.to_string());
        } else {
            self.names.remove(name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
