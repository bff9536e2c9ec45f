use crate::error::ShardConnError;
use crate::placement::{ConnectFlags, NodeAddr};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle to a connection owned by the external pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The node-level connection pool the manager chooses connections from.
///
/// The manager never opens or closes sockets itself; it asks the pool for a
/// connection when no tracked one is suitable and reads per-connection state
/// the pool owns (`claimed_exclusively`, remote transaction failure). Pool
/// errors are propagated to the caller unchanged.
pub trait ConnectionPool {
    /// Begin establishing a connection to `node`. Flag bits the manager does
    /// not interpret are for the pool.
    fn start_connection(
        &mut self,
        flags: ConnectFlags,
        node: &NodeAddr,
    ) -> Result<ConnectionId, ShardConnError>;

    /// Block until the connection handed out by `start_connection` is usable.
    fn finish_connection_establishment(
        &mut self,
        conn: ConnectionId,
    ) -> Result<(), ShardConnError>;

    /// Whether the caller has claimed the connection for its exclusive use.
    fn is_claimed_exclusively(&self, conn: ConnectionId) -> bool;

    /// Whether the remote transaction on this connection has failed.
    fn remote_transaction_failed(&self, conn: ConnectionId) -> bool;
}

/// Records that a connection has been used to read or modify a placement (or
/// a whole co-located family) as a particular user within this transaction.
///
/// Connections established under a different role are never reused for the
/// same placement: the role change would change visibility and permissions.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionReference {
    pub(crate) user: CompactString,
    /// None until claimed, and again after the pool closes the connection
    /// mid-transaction.
    pub(crate) connection: Option<ConnectionId>,
    pub(crate) had_dml: bool,
    pub(crate) had_ddl: bool,
}

impl ConnectionReference {
    fn unclaimed() -> Self {
        Self {
            user: CompactString::default(),
            connection: None,
            had_dml: false,
            had_ddl: false,
        }
    }

    pub(crate) fn had_writes(&self) -> bool {
        self.had_dml || self.had_ddl
    }
}

/// Index of a `ConnectionReference` in the transaction arena. Placement and
/// co-location entries hold handles, never pointers; co-located placements
/// alias the same handle, which is how write exclusivity propagates across
/// the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RefHandle(usize);

/// Transaction-lifetime arena for connection references. Handles stay valid
/// until `clear`, which drops every reference in one stroke at transaction
/// end.
#[derive(Debug, Default)]
pub(crate) struct ReferenceArena {
    refs: Vec<ConnectionReference>,
}

impl ReferenceArena {
    pub(crate) fn alloc(&mut self) -> RefHandle {
        let handle = RefHandle(self.refs.len());
        self.refs.push(ConnectionReference::unclaimed());
        handle
    }

    pub(crate) fn get(&self, handle: RefHandle) -> &ConnectionReference {
        &self.refs[handle.0]
    }

    pub(crate) fn get_mut(&mut self, handle: RefHandle) -> &mut ConnectionReference {
        &mut self.refs[handle.0]
    }

    pub(crate) fn clear(&mut self) {
        self.refs.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.refs.len()
    }
}
