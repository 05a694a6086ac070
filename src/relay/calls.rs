//! Table of calls in flight through the relay.
//!
//! Each call is reachable from both of its legs: the caller's
//! `(inbound connection, id)` and the callee's `(destination, id)`. Lookups
//! take the read lock; only opening and removing a call write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::ConnectionId;
use crate::atomic::Uint32;
use crate::error::{MuxwireError, Result};
use crate::protocol::CallMetadata;

/// Set while the caller may still send request continuations.
pub const REQUEST_OPEN: u32 = 0b01;

/// Set until the callee sends its final response fragment.
pub const RESPONSE_OPEN: u32 = 0b10;

const ALL_OPEN: u32 = REQUEST_OPEN | RESPONSE_OPEN;

/// Response code slot value before any call response was seen.
const NO_RESPONSE: u32 = u32::MAX;

/// One end of a call as seen by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallKey {
    /// Connection the leg lives on.
    pub connection: ConnectionId,
    /// Message id shared by all frames of the call.
    pub message_id: u32,
}

impl CallKey {
    /// Key for `message_id` on `connection`.
    pub fn new(connection: ConnectionId, message_id: u32) -> Self {
        Self {
            connection,
            message_id,
        }
    }
}

/// Which side of a call a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    /// The peer that sent the call request.
    Caller,
    /// The peer the request was routed to.
    Callee,
}

impl Leg {
    /// The opposite leg.
    pub fn other(self) -> Leg {
        match self {
            Leg::Caller => Leg::Callee,
            Leg::Callee => Leg::Caller,
        }
    }
}

/// A call relayed between two connections.
#[derive(Debug)]
pub struct RelayCall {
    caller: CallKey,
    callee: CallKey,
    metadata: CallMetadata,
    destination: String,
    started: Instant,
    state: Uint32,
    response_code: Uint32,
}

impl RelayCall {
    /// Create a call with the given open directions.
    pub fn new(
        caller: CallKey,
        callee: CallKey,
        metadata: CallMetadata,
        destination: String,
        state: u32,
    ) -> Self {
        Self {
            caller,
            callee,
            metadata,
            destination,
            started: Instant::now(),
            state: Uint32::new(state & ALL_OPEN),
            response_code: Uint32::new(NO_RESPONSE),
        }
    }

    /// Key of the given leg.
    pub fn key(&self, leg: Leg) -> CallKey {
        match leg {
            Leg::Caller => self.caller,
            Leg::Callee => self.callee,
        }
    }

    /// Routing fields copied from the call request.
    pub fn metadata(&self) -> &CallMetadata {
        &self.metadata
    }

    /// Address the call was routed to.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Time since the call request was routed.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Directions still open, as `REQUEST_OPEN | RESPONSE_OPEN` bits.
    pub fn state(&self) -> u32 {
        self.state.load()
    }

    /// Whether any direction is still open.
    pub fn is_open(&self) -> bool {
        self.state() != 0
    }

    /// Record the code byte of the first call response.
    pub fn record_response_code(&self, code: u8) {
        self.response_code.compare_and_swap(NO_RESPONSE, u32::from(code));
    }

    /// Code byte of the call response, if one was forwarded.
    pub fn response_code(&self) -> Option<u8> {
        u8::try_from(self.response_code.load()).ok()
    }

    /// Clear `bits` from the open directions.
    ///
    /// Returns true for exactly one caller: the one whose update leaves no
    /// direction open. That caller owns removing the call.
    pub fn close(&self, bits: u32) -> bool {
        loop {
            let current = self.state.load();
            let next = current & !bits;
            if next == current {
                return false;
            }
            if self.state.compare_and_swap(current, next) {
                return next == 0;
            }
        }
    }

    /// Close both directions.
    pub fn close_all(&self) -> bool {
        self.close(ALL_OPEN)
    }
}

#[derive(Debug, Clone)]
struct CallEntry {
    call: Arc<RelayCall>,
    leg: Leg,
}

/// Concurrent map from either leg of a call to the call.
#[derive(Debug, Default)]
pub struct CallTable {
    calls: RwLock<HashMap<CallKey, CallEntry>>,
}

impl CallTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a call is registered under `key`.
    pub fn contains(&self, key: &CallKey) -> bool {
        self.calls.read().contains_key(key)
    }

    /// Register `call` under both of its legs.
    ///
    /// Fails with `DuplicateCall` if the caller already has a call open
    /// with this id, and with `MessageIdCollision` if either key is held by
    /// a call relayed in the other direction; the table is unchanged on
    /// failure.
    pub fn open(&self, call: RelayCall) -> Result<Arc<RelayCall>> {
        let caller = call.key(Leg::Caller);
        let callee = call.key(Leg::Callee);

        let mut calls = self.calls.write();
        match calls.get(&caller).map(|entry| entry.leg) {
            Some(Leg::Caller) => {
                return Err(MuxwireError::DuplicateCall {
                    connection: caller.connection,
                    message_id: caller.message_id,
                })
            }
            Some(Leg::Callee) => {
                return Err(MuxwireError::MessageIdCollision {
                    connection: caller.connection,
                    message_id: caller.message_id,
                })
            }
            None => {}
        }
        if caller == callee || calls.contains_key(&callee) {
            return Err(MuxwireError::MessageIdCollision {
                connection: callee.connection,
                message_id: callee.message_id,
            });
        }

        let call = Arc::new(call);
        calls.insert(
            caller,
            CallEntry {
                call: call.clone(),
                leg: Leg::Caller,
            },
        );
        calls.insert(
            callee,
            CallEntry {
                call: call.clone(),
                leg: Leg::Callee,
            },
        );
        Ok(call)
    }

    /// Find the call and leg registered under `key`.
    pub fn lookup(&self, key: &CallKey) -> Option<(Arc<RelayCall>, Leg)> {
        self.calls
            .read()
            .get(key)
            .map(|entry| (entry.call.clone(), entry.leg))
    }

    /// Remove both keys of `call`. Keys reused by a newer call are kept.
    pub fn remove(&self, call: &Arc<RelayCall>) {
        let mut calls = self.calls.write();
        for leg in [Leg::Caller, Leg::Callee] {
            let key = call.key(leg);
            if calls
                .get(&key)
                .is_some_and(|entry| Arc::ptr_eq(&entry.call, call))
            {
                calls.remove(&key);
            }
        }
    }

    /// Close and remove every call with a leg on `connection`.
    ///
    /// Returns each removed call with the leg that was on `connection`.
    /// Calls another task is already finishing are left to that task.
    pub fn drain_connection(&self, connection: ConnectionId) -> Vec<(Arc<RelayCall>, Leg)> {
        let mut calls = self.calls.write();

        let affected: Vec<CallEntry> = calls
            .iter()
            .filter(|(key, _)| key.connection == connection)
            .map(|(_, entry)| entry.clone())
            .collect();

        let mut drained = Vec::with_capacity(affected.len());
        for entry in affected {
            if entry.call.close_all() {
                for leg in [Leg::Caller, Leg::Callee] {
                    calls.remove(&entry.call.key(leg));
                }
                drained.push((entry.call, entry.leg));
            }
        }
        drained
    }

    /// Number of calls in flight.
    pub fn len(&self) -> usize {
        // Every call occupies two keys.
        self.calls.read().len() / 2
    }

    /// Whether no call is in flight.
    pub fn is_empty(&self) -> bool {
        self.calls.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> CallMetadata {
        CallMetadata {
            service: "svc".to_string(),
            method: "m".to_string(),
            ttl_ms: 1000,
        }
    }

    fn call(caller: u64, callee: u64, id: u32, state: u32) -> RelayCall {
        RelayCall::new(
            CallKey::new(ConnectionId::new(caller), id),
            CallKey::new(ConnectionId::new(callee), id),
            metadata(),
            "10.0.0.1:100".to_string(),
            state,
        )
    }

    #[test]
    fn test_open_registers_both_legs() {
        let table = CallTable::new();
        table.open(call(1, 2, 7, RESPONSE_OPEN)).unwrap();

        let (_, leg) = table.lookup(&CallKey::new(ConnectionId::new(1), 7)).unwrap();
        assert_eq!(leg, Leg::Caller);
        let (found, leg) = table.lookup(&CallKey::new(ConnectionId::new(2), 7)).unwrap();
        assert_eq!(leg, Leg::Callee);
        assert_eq!(found.key(leg.other()).connection, ConnectionId::new(1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_duplicate_call_leaves_table_untouched() {
        let table = CallTable::new();
        let first = table.open(call(1, 2, 7, RESPONSE_OPEN)).unwrap();

        let err = table.open(call(1, 3, 7, RESPONSE_OPEN)).unwrap_err();
        assert!(matches!(err, MuxwireError::DuplicateCall { message_id: 7, .. }));

        let (found, _) = table.lookup(&CallKey::new(ConnectionId::new(2), 7)).unwrap();
        assert!(Arc::ptr_eq(&found, &first));
        assert!(table.lookup(&CallKey::new(ConnectionId::new(3), 7)).is_none());
    }

    #[test]
    fn test_callee_collision() {
        let table = CallTable::new();
        table.open(call(1, 2, 7, RESPONSE_OPEN)).unwrap();

        let err = table.open(call(3, 2, 7, RESPONSE_OPEN)).unwrap_err();
        assert!(matches!(err, MuxwireError::MessageIdCollision { .. }));
        assert!(!table.contains(&CallKey::new(ConnectionId::new(3), 7)));

        let err = table.open(call(4, 4, 9, RESPONSE_OPEN)).unwrap_err();
        assert!(matches!(err, MuxwireError::MessageIdCollision { .. }));
    }

    #[test]
    fn test_callee_reusing_relayed_id_is_collision() {
        let table = CallTable::new();
        table.open(call(1, 2, 7, RESPONSE_OPEN)).unwrap();

        // Connection 2 starts its own call 7 while serving the relayed one.
        let err = table.open(call(2, 3, 7, RESPONSE_OPEN)).unwrap_err();
        assert!(matches!(
            err,
            MuxwireError::MessageIdCollision { message_id: 7, .. }
        ));
        assert!(!err.is_connection_fatal());
        assert!(!table.contains(&CallKey::new(ConnectionId::new(3), 7)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_close_reports_last_direction_once() {
        let c = call(1, 2, 7, REQUEST_OPEN | RESPONSE_OPEN);

        assert!(!c.close(RESPONSE_OPEN));
        assert!(!c.close(RESPONSE_OPEN));
        assert!(c.is_open());
        assert!(c.close(REQUEST_OPEN));
        assert!(!c.close_all());
        assert_eq!(c.state(), 0);
    }

    #[test]
    fn test_close_all_races_exactly_one_winner() {
        let c = Arc::new(call(1, 2, 7, REQUEST_OPEN | RESPONSE_OPEN));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let c = c.clone();
                std::thread::spawn(move || {
                    if i % 2 == 0 {
                        c.close_all()
                    } else {
                        c.close(RESPONSE_OPEN)
                    }
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_response_code_recorded_once() {
        let c = call(1, 2, 7, RESPONSE_OPEN);
        assert_eq!(c.response_code(), None);

        c.record_response_code(1);
        c.record_response_code(0);
        assert_eq!(c.response_code(), Some(1));
    }

    #[test]
    fn test_remove_keeps_reused_keys() {
        let table = CallTable::new();
        let old = table.open(call(1, 2, 7, RESPONSE_OPEN)).unwrap();
        table.remove(&old);
        let new = table.open(call(1, 2, 7, RESPONSE_OPEN)).unwrap();

        table.remove(&old);
        let (found, _) = table.lookup(&CallKey::new(ConnectionId::new(1), 7)).unwrap();
        assert!(Arc::ptr_eq(&found, &new));

        table.remove(&new);
        assert!(table.is_empty());
    }

    #[test]
    fn test_drain_connection() {
        let table = CallTable::new();
        table.open(call(1, 2, 7, RESPONSE_OPEN)).unwrap();
        table.open(call(3, 1, 8, RESPONSE_OPEN)).unwrap();
        table.open(call(3, 2, 9, RESPONSE_OPEN)).unwrap();

        let mut drained = table.drain_connection(ConnectionId::new(1));
        drained.sort_by_key(|(c, _)| c.key(Leg::Caller).message_id);

        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].1, Leg::Caller);
        assert_eq!(drained[1].1, Leg::Callee);
        assert!(drained.iter().all(|(c, _)| !c.is_open()));
        assert_eq!(table.len(), 1);
        assert!(table.contains(&CallKey::new(ConnectionId::new(2), 9)));
    }

    #[test]
    fn test_concurrent_calls_no_cross_talk() {
        let table = Arc::new(CallTable::new());

        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for i in 0..200u32 {
                        let id = t * 1000 + i;
                        let opened = table
                            .open(call(u64::from(t), 100 + u64::from(t), id, RESPONSE_OPEN))
                            .unwrap();

                        let key = CallKey::new(ConnectionId::new(100 + u64::from(t)), id);
                        let (found, leg) = table.lookup(&key).unwrap();
                        assert!(Arc::ptr_eq(&found, &opened));
                        assert_eq!(found.key(leg.other()).message_id, id);

                        if found.close(RESPONSE_OPEN) {
                            table.remove(&found);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_elapsed_advances() {
        let c = call(1, 2, 7, RESPONSE_OPEN);
        std::thread::sleep(Duration::from_millis(2));
        assert!(c.elapsed() >= Duration::from_millis(2));
    }
}
