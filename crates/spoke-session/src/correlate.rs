//! Request/response correlation.
//!
//! Every outgoing request parks a completion sender here under a freshly
//! allocated id; the matching `response` envelope (or a terminal channel
//! event) settles it. The arena is owned by the channel's driver and touched
//! by nothing else.

use std::collections::HashMap;

use spoke_wire::{RequestId, Value};
use tokio::sync::oneshot;

use crate::errors::CallError;

pub(crate) type Completion = oneshot::Sender<Result<Value, CallError>>;

/// Outstanding requests awaiting a response.
pub(crate) struct PendingCalls {
    next_id: u64,
    pending: HashMap<RequestId, Completion>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocate the next request id and park the completion under it.
    pub(crate) fn insert_next(&mut self, completion: Completion) -> RequestId {
        let id = RequestId::new(self.next_id);
        self.next_id += 1;
        self.pending.insert(id, completion);
        id
    }

    /// Settle one correlation. Unknown ids are ignored: a response may race
    /// a teardown that already rejected everything.
    pub(crate) fn settle(&mut self, id: RequestId, outcome: Result<Value, CallError>) -> bool {
        match self.pending.remove(&id) {
            Some(completion) => {
                let _ = completion.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Reject every outstanding correlation with the same error.
    pub(crate) fn fail_all(&mut self, error: CallError) {
        for (_, completion) in self.pending.drain() {
            let _ = completion.send(Err(error.clone()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
