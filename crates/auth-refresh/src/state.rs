//! Per-client coordination state and its teardown
//!
//! The registry maps a client identity to the state of its refresh cycle.
//! State is created when auth refresh is installed on a client and removed
//! when it is uninstalled. Within that lifetime a cycle looks like:
//!
//! 1. Qualifying failure → client paused, refresh stored, gate installed
//! 2. Refresh settles (any outcome) → gate ejected, refresh cleared, client unpaused
//!
//! All mutation happens under one `std::sync::Mutex` that is never held
//! across an `.await`, so observe-then-commit sequences are atomic even on a
//! multi-threaded runtime.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;
use transport::{ClientId, InterceptorId, Transport};

use crate::refresh::RefreshHandle;

/// Refresh bookkeeping for one client.
///
/// Invariants: `gate_id` is set iff `refresh` is set; `paused_clients` is a
/// set so an identity appears at most once.
#[derive(Default)]
pub struct CoordinationState {
    pub(crate) paused_clients: HashSet<ClientId>,
    pub(crate) refresh: Option<RefreshHandle>,
    pub(crate) gate_id: Option<InterceptorId>,
    /// Number of refresh cycles started on this client.
    pub(crate) cycle: u64,
    /// Registry-unique id of the latest cycle. Teardown only clears the
    /// cycle it was created for, even across uninstall and reinstall.
    pub(crate) cycle_id: u64,
}

impl CoordinationState {
    pub fn is_paused(&self, client_id: ClientId) -> bool {
        self.paused_clients.contains(&client_id)
    }

    pub fn refresh_in_flight(&self) -> bool {
        self.refresh.is_some()
    }

    pub fn gate_id(&self) -> Option<InterceptorId> {
        self.gate_id
    }
}

/// Read-only view of a client's coordination state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub paused: bool,
    pub refresh_in_flight: bool,
    pub gate_id: Option<InterceptorId>,
    pub cycles: u64,
}

impl StateSnapshot {
    /// No refresh, no gate, not paused.
    pub fn is_idle(&self) -> bool {
        !self.paused && !self.refresh_in_flight && self.gate_id.is_none()
    }
}

/// Registry of coordination state, keyed by client identity.
///
/// One registry may be shared (via `Arc`) by several clients; each client
/// still gets its own independent refresh cycle.
#[derive(Default)]
pub struct RefreshRegistry {
    states: Mutex<HashMap<ClientId, CoordinationState>>,
    /// Never reset, so ids stay unique when a client's state is recreated.
    next_cycle_id: AtomicU64,
}

impl RefreshRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create state for a client. Returns false if it already existed.
    pub fn register(&self, client_id: ClientId) -> bool {
        let mut states = self.lock();
        if states.contains_key(&client_id) {
            return false;
        }
        states.insert(client_id, CoordinationState::default());
        debug!(%client_id, "coordination state registered");
        true
    }

    /// Drop a client's state, ejecting its gate if a refresh is in flight.
    ///
    /// Requests already waiting on the refresh keep their handle and still
    /// observe its outcome.
    pub fn remove(&self, transport: &dyn Transport) -> bool {
        let client_id = transport.id();
        let Some(state) = self.lock().remove(&client_id) else {
            return false;
        };
        if let Some(gate_id) = state.gate_id {
            transport.eject_request_interceptor(gate_id);
        }
        debug!(%client_id, "coordination state removed");
        true
    }

    pub fn snapshot(&self, client_id: ClientId) -> Option<StateSnapshot> {
        self.lock().get(&client_id).map(|state| StateSnapshot {
            paused: state.is_paused(client_id),
            refresh_in_flight: state.refresh_in_flight(),
            gate_id: state.gate_id,
            cycles: state.cycle,
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` on a client's state with the registry locked.
    ///
    /// `f` must not block; it is the atomic section of the trigger path.
    pub(crate) fn with_state<R>(
        &self,
        client_id: ClientId,
        f: impl FnOnce(&mut CoordinationState) -> R,
    ) -> R {
        let mut states = self.lock();
        f(states.entry(client_id).or_default())
    }

    pub(crate) fn next_cycle_id(&self) -> u64 {
        self.next_cycle_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, CoordinationState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything needed to tear down one client's cycle once its refresh settles.
pub(crate) struct Teardown {
    registry: Arc<RefreshRegistry>,
    transport: Weak<dyn Transport>,
    client_id: ClientId,
}

impl Teardown {
    pub(crate) fn new(
        registry: Arc<RefreshRegistry>,
        transport: Weak<dyn Transport>,
        client_id: ClientId,
    ) -> Self {
        Self {
            registry,
            transport,
            client_id,
        }
    }

    /// Eject the gate, clear the refresh, unpause the client.
    ///
    /// Allocate the id of the cycle this teardown will belong to.
    pub(crate) fn claim_cycle(&self) -> u64 {
        self.registry.next_cycle_id()
    }

    /// No-op if the state was removed or a newer cycle owns it.
    pub(crate) fn run(self, cycle: u64) {
        let client_id = self.client_id;
        let mut states = self.registry.lock();
        let Some(state) = states.get_mut(&client_id) else {
            debug!(%client_id, "state removed before refresh settled");
            return;
        };
        if state.cycle_id != cycle {
            debug!(%client_id, cycle, current = state.cycle_id, "stale teardown ignored");
            return;
        }

        if let Some(gate_id) = state.gate_id.take() {
            match self.transport.upgrade() {
                Some(transport) => {
                    transport.eject_request_interceptor(gate_id);
                }
                None => debug!(%client_id, "client dropped before gate ejection"),
            }
        }
        state.refresh = None;
        state.paused_clients.remove(&client_id);
        debug!(%client_id, cycle, "coordination state cleared");
    }
}
