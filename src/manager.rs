use crate::config::ShardConnConfig;
use crate::connection::{
    ConnectionId, ConnectionPool, ConnectionReference, RefHandle, ReferenceArena,
};
use crate::error::ShardConnError;
use crate::placement::{
    AccessKind, ConnectFlags, PlacementAccess, PlacementId, ShardId, ShardPlacement,
};
use crate::session::{DistributedTransactionId, SessionState};
use compact_str::CompactString;
use smallvec::SmallVec;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;

/// Identity of a co-located placement family: placements on one node, in one
/// colocation group, covering the same value range. They must share a
/// connection within a transaction, otherwise foreign keys and partition
/// hierarchies between co-located tables can deadlock against ourselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ColocationKey {
    node_name: CompactString,
    node_port: u16,
    colocation_group_id: u32,
    representative_value: u32,
}

impl ColocationKey {
    fn for_placement(placement: &ShardPlacement) -> Self {
        Self {
            node_name: CompactString::new(placement.node.name()),
            node_port: placement.node.port(),
            colocation_group_id: placement.colocation_group_id,
            representative_value: placement.representative_value,
        }
    }
}

/// Per-placement bookkeeping for the current transaction.
#[derive(Debug)]
pub(crate) struct PlacementEntry {
    /// The connection reference DML/DDL must go through. For placements of
    /// hash-partitioned and reference tables this handle is shared with the
    /// whole co-located family.
    pub(crate) primary: RefHandle,
    /// Set once a second connection has read from the placement; DDL is
    /// forbidden from then on.
    pub(crate) has_secondary_readers: bool,
    /// Set by the commit-time failure sweep.
    pub(crate) failed: bool,
    pub(crate) colocation: Option<ColocationKey>,
}

/// Per-family bookkeeping; `primary` is aliased by every member placement.
#[derive(Debug)]
pub(crate) struct ColocatedEntry {
    pub(crate) primary: RefHandle,
    pub(crate) has_secondary_readers: bool,
}

/// Snapshot of the state the decision table needs for one access.
struct PlacementProbe {
    primary: RefHandle,
    has_secondary_readers: bool,
    colocated_has_secondary_readers: bool,
}

/// Pairing of an access with the placement entry resolved for it; carried
/// from the first pass to the second.
struct ResolvedAccess {
    placement_id: PlacementId,
    primary: RefHandle,
}

/// Read-only view of what the manager knows about one placement, for callers
/// and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementStatus {
    pub connection: Option<ConnectionId>,
    pub user: String,
    pub had_dml: bool,
    pub had_ddl: bool,
    pub has_secondary_readers: bool,
    pub failed: bool,
}

/// Brokers which pooled connection each shard placement uses within one
/// coordinator-side distributed transaction.
///
/// The manager guarantees three things for the transaction it serves:
///
/// - every DML/DDL access to a placement (and to its co-located family) goes
///   through a single primary connection, so the transaction always sees its
///   own uncommitted writes and never deadlocks against itself;
/// - reads may fan out over additional connections, but doing so forbids
///   later DDL on the placement;
/// - every placement touched is associated with its shard so the commit-time
///   failure sweep can tell "one replica failed" apart from "the shard is
///   lost".
///
/// The manager is single-threaded by contract: one backend drives one
/// distributed transaction at a time, and all per-transaction state is
/// dropped by [`reset_all`](Self::reset_all) from the commit and abort paths.
pub struct PlacementConnectionManager {
    pub(crate) placements: HashMap<PlacementId, PlacementEntry>,
    pub(crate) colocated: HashMap<ColocationKey, ColocatedEntry>,
    pub(crate) shards: HashMap<ShardId, SmallVec<[PlacementId; 4]>>,
    pub(crate) references: ReferenceArena,
    /// Which references point at each connection, so an early close can null
    /// them out. Never walked in reverse.
    pub(crate) connection_refs: HashMap<ConnectionId, Vec<RefHandle>>,
    session: SessionState,
    config: ShardConnConfig,
}

impl PlacementConnectionManager {
    pub fn new(config: ShardConnConfig) -> Result<Self, ShardConnError> {
        config.validate()?;
        Ok(Self {
            placements: HashMap::with_capacity(config.placement_capacity),
            colocated: HashMap::with_capacity(config.colocation_capacity),
            shards: HashMap::with_capacity(config.shard_capacity),
            references: ReferenceArena::default(),
            connection_refs: HashMap::new(),
            session: SessionState::default(),
            config,
        })
    }

    /// Returns a connection suitable for executing the whole ordered access
    /// list as a batch, or a conflict error if no such connection can exist
    /// without risking a self-deadlock or a read-your-own-writes violation.
    ///
    /// If none of the placements has been accessed in this transaction, a new
    /// connection is requested from the pool. If any placement was modified
    /// earlier, the connection that performed the write is the only candidate;
    /// placements modified over different connections are a hard conflict.
    /// Placements that were only read reuse the last suitable connection
    /// found while walking the list.
    ///
    /// `user` defaults to the configured session role. Reuse requires the
    /// same role: a connection established as somebody else has the wrong
    /// visibility and permissions.
    pub fn acquire_connection<P: ConnectionPool>(
        &mut self,
        pool: &mut P,
        flags: ConnectFlags,
        accesses: &[PlacementAccess],
        user: Option<&str>,
    ) -> Result<ConnectionId, ShardConnError> {
        let user: CompactString = match user {
            Some(name) => CompactString::new(name),
            None => self.config.session_user.clone(),
        };

        let mut chosen: Option<ConnectionId> = None;
        let mut found_modifying_connection = false;
        let mut resolved: Vec<Option<ResolvedAccess>> = Vec::with_capacity(accesses.len());

        // First pass: walk the accesses and either settle on a connection or
        // prove that none can work.
        for access in accesses {
            let placement = &access.placement;
            if !placement.shard_id.is_valid() {
                // Dummy placement from a SELECT that pruned to zero shards;
                // it can run on whatever connection the rest settles on.
                resolved.push(None);
                continue;
            }

            let probe = self.find_or_create_placement_entry(placement);
            resolved.push(Some(ResolvedAccess {
                placement_id: placement.placement_id,
                primary: probe.primary,
            }));

            let reference = self.references.get(probe.primary);

            if reference.connection.is_none() {
                // No connection has been chosen for the placement yet.
            } else if access.kind == AccessKind::Ddl && probe.has_secondary_readers {
                // Reads over multiple connections (typically a reference
                // table join) leave uncommitted reads on connections a DDL
                // lock would wait behind.
                return Err(ShardConnError::DdlReadOverMultipleConnections {
                    placement_id: placement.placement_id,
                });
            } else if access.kind == AccessKind::Ddl && probe.colocated_has_secondary_readers {
                return Err(ShardConnError::DdlColocatedReadOverMultipleConnections {
                    placement_id: placement.placement_id,
                });
            } else if found_modifying_connection {
                // Already locked onto the connection that performed writes;
                // a placement modified over some other connection means no
                // single connection can see all uncommitted writes.
                if reference.had_writes() && reference.connection != chosen {
                    return Err(ShardConnError::ModifiedOverMultipleConnections);
                }
            } else if can_use_existing_connection(pool, flags, &user, reference) {
                chosen = reference.connection;
                if reference.had_writes() {
                    found_modifying_connection = true;
                }
            } else if reference.had_ddl {
                // Unusable connection with DDL on it: later operations must
                // be able to see the schema change, so we cannot go around it.
                return Err(ShardConnError::DdlInProgress {
                    placement_id: placement.placement_id,
                });
            } else if reference.had_dml {
                return Err(ShardConnError::DmlInProgress {
                    placement_id: placement.placement_id,
                });
            } else if access.kind == AccessKind::Ddl {
                // Only reads so far, but they hold locks the DDL statement
                // could conflict with on the busy connection.
                return Err(ShardConnError::ParallelDdlSharedConnection);
            } else {
                // Read-only placement on a connection we cannot reuse (most
                // likely claimed exclusively); the second pass records an
                // alternate connection for it.
            }
        }

        let chosen = match chosen {
            Some(connection) => connection,
            None => {
                let first = accesses.first().ok_or_else(|| {
                    ShardConnError::Validation("placement access list cannot be empty".into())
                })?;
                let connection = pool.start_connection(flags, &first.placement.node)?;
                debug!(
                    connection = connection.0,
                    node = %first.placement.node,
                    "requested new connection from pool"
                );
                connection
            }
        };

        // Second pass: record the assignment on every placement entry.
        for (access, slot) in accesses.iter().zip(&resolved) {
            let Some(resolved_access) = slot else {
                continue;
            };
            let reference = self.references.get_mut(resolved_access.primary);

            if reference.connection == Some(chosen) {
                // Already assigned to the chosen connection.
            } else if reference.connection.is_none() {
                reference.connection = Some(chosen);
                reference.user = user.clone();
                reference.had_dml = false;
                reference.had_ddl = false;
                self.connection_refs
                    .entry(chosen)
                    .or_default()
                    .push(resolved_access.primary);
            } else {
                // A different connection than the one previously used. If
                // this access writes, the placement was previously only read
                // (writes would have locked us onto the old connection or
                // errored in the first pass): repoint the primary at the
                // writing connection. Either way the placement has now been
                // read over more than one connection, which rules out DDL.
                if access.kind.is_write() {
                    reference.connection = Some(chosen);
                    reference.user = user.clone();
                }
                if let Some(entry) = self.placements.get_mut(&resolved_access.placement_id) {
                    entry.has_secondary_readers = true;
                    if let Some(key) = entry.colocation.clone() {
                        if let Some(family) = self.colocated.get_mut(&key) {
                            family.has_secondary_readers = true;
                        }
                    }
                }
            }

            let reference = self.references.get_mut(resolved_access.primary);
            if access.kind == AccessKind::Ddl {
                reference.had_ddl = true;
            }
            if access.kind == AccessKind::Dml {
                reference.had_dml = true;
            }
        }

        Ok(chosen)
    }

    /// Single-placement variant of [`acquire_connection`]; the access kind is
    /// derived from `flags` (DDL over DML over SELECT).
    ///
    /// [`acquire_connection`]: Self::acquire_connection
    pub fn acquire_placement_connection<P: ConnectionPool>(
        &mut self,
        pool: &mut P,
        flags: ConnectFlags,
        placement: &ShardPlacement,
        user: Option<&str>,
    ) -> Result<ConnectionId, ShardConnError> {
        let access = PlacementAccess::from_flags(placement.clone(), flags);
        self.acquire_connection(pool, flags, std::slice::from_ref(&access), user)
    }

    /// Like [`acquire_connection`], but waits for connection establishment to
    /// finish before returning.
    ///
    /// [`acquire_connection`]: Self::acquire_connection
    pub fn acquire_established_connection<P: ConnectionPool>(
        &mut self,
        pool: &mut P,
        flags: ConnectFlags,
        accesses: &[PlacementAccess],
        user: Option<&str>,
    ) -> Result<ConnectionId, ShardConnError> {
        let connection = self.acquire_connection(pool, flags, accesses, user)?;
        pool.finish_connection_establishment(connection)?;
        Ok(connection)
    }

    /// Like [`acquire_placement_connection`], but waits for establishment.
    ///
    /// [`acquire_placement_connection`]: Self::acquire_placement_connection
    pub fn acquire_established_placement_connection<P: ConnectionPool>(
        &mut self,
        pool: &mut P,
        flags: ConnectFlags,
        placement: &ShardPlacement,
        user: Option<&str>,
    ) -> Result<ConnectionId, ShardConnError> {
        let connection = self.acquire_placement_connection(pool, flags, placement, user)?;
        pool.finish_connection_establishment(connection)?;
        Ok(connection)
    }

    /// Marks the start of a coordinated transaction and hands out its
    /// identity. Cleared again by [`reset_all`](Self::reset_all).
    pub fn begin_distributed_transaction(
        &mut self,
        initiator_node_id: u32,
    ) -> Result<DistributedTransactionId, ShardConnError> {
        self.session.assign(initiator_node_id)
    }

    pub fn distributed_transaction_id(&self) -> Option<DistributedTransactionId> {
        self.session.current()
    }

    pub fn in_distributed_transaction(&self) -> bool {
        self.session.current().is_some()
    }

    /// Transaction-end hook: drops every placement/shard/co-location entry,
    /// every connection reference and every back-link list in one stroke.
    /// Call from both the commit and the abort path.
    pub fn reset_all(&mut self) {
        self.placements.clear();
        self.colocated.clear();
        self.shards.clear();
        self.references.clear();
        self.connection_refs.clear();
        self.session.unset();
    }

    /// Pool hook for a connection closed before transaction end (idle
    /// timeout, pool shrink). Every reference still pointing at the
    /// connection is nulled out; the placement entries keep their primary
    /// reference, so a modified placement whose connection vanished is
    /// reported as failed by the commit-time sweep instead of silently
    /// writing over a fresh connection.
    pub fn on_connection_closed(&mut self, conn: ConnectionId) {
        let Some(handles) = self.connection_refs.remove(&conn) else {
            return;
        };
        debug!(
            connection = conn.0,
            references = handles.len(),
            "connection closed mid-transaction"
        );
        for handle in handles {
            self.references.get_mut(handle).connection = None;
        }
    }

    /// What the manager currently knows about one placement.
    pub fn placement_status(&self, placement_id: PlacementId) -> Option<PlacementStatus> {
        let entry = self.placements.get(&placement_id)?;
        let reference = self.references.get(entry.primary);
        Some(PlacementStatus {
            connection: reference.connection,
            user: reference.user.to_string(),
            had_dml: reference.had_dml,
            had_ddl: reference.had_ddl,
            has_secondary_readers: entry.has_secondary_readers,
            failed: entry.failed,
        })
    }

    pub fn tracked_placements(&self) -> usize {
        self.placements.len()
    }

    pub fn tracked_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn tracked_colocation_groups(&self) -> usize {
        self.colocated.len()
    }

    pub fn tracked_references(&self) -> usize {
        self.references.len()
    }

    /// Looks up the placement's entry, creating it (and, for hash-partitioned
    /// and reference tables, its co-located family entry) on first touch, and
    /// records the shard association either way.
    fn find_or_create_placement_entry(&mut self, placement: &ShardPlacement) -> PlacementProbe {
        self.associate_placement_with_shard(placement.shard_id, placement.placement_id);

        if let Some(entry) = self.placements.get(&placement.placement_id) {
            let colocated_has_secondary_readers = entry
                .colocation
                .as_ref()
                .and_then(|key| self.colocated.get(key))
                .is_some_and(|family| family.has_secondary_readers);
            return PlacementProbe {
                primary: entry.primary,
                has_secondary_readers: entry.has_secondary_readers,
                colocated_has_secondary_readers,
            };
        }

        let mut colocated_has_secondary_readers = false;
        let (primary, colocation) = if placement.partition_method.supports_colocation() {
            let key = ColocationKey::for_placement(placement);
            let primary = match self.colocated.entry(key.clone()) {
                Entry::Occupied(existing) => {
                    colocated_has_secondary_readers = existing.get().has_secondary_readers;
                    existing.get().primary
                }
                Entry::Vacant(vacant) => {
                    // One reference for the entire co-located family.
                    let primary = self.references.alloc();
                    vacant.insert(ColocatedEntry {
                        primary,
                        has_secondary_readers: false,
                    });
                    primary
                }
            };
            (primary, Some(key))
        } else {
            (self.references.alloc(), None)
        };

        self.placements.insert(
            placement.placement_id,
            PlacementEntry {
                primary,
                has_secondary_readers: false,
                failed: false,
                colocation,
            },
        );

        PlacementProbe {
            primary,
            has_secondary_readers: false,
            colocated_has_secondary_readers,
        }
    }

    /// Records the shard -> placement relation used by the failure sweep.
    /// A placement may be touched many times per call; the list holds it
    /// once. Shards have few placements, so scanning is cheap.
    fn associate_placement_with_shard(&mut self, shard_id: ShardId, placement_id: PlacementId) {
        let placements = self.shards.entry(shard_id).or_default();
        if !placements.contains(&placement_id) {
            placements.push(placement_id);
        }
    }
}

fn can_use_existing_connection<P: ConnectionPool>(
    pool: &P,
    flags: ConnectFlags,
    user: &str,
    reference: &ConnectionReference,
) -> bool {
    let Some(connection) = reference.connection else {
        // Already closed, obviously not usable.
        return false;
    };
    if pool.is_claimed_exclusively(connection) {
        return false;
    }
    if flags.contains(ConnectFlags::FORCE_NEW_CONNECTION) {
        return false;
    }
    reference.user.as_str() == user
}
