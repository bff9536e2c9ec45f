#![allow(dead_code)]

use shardconn::{
    ConnectFlags, ConnectionId, ConnectionPool, GroupPlacementRow, NodeAddr, PartitionMethod,
    PlacementCatalog, PlacementConnectionManager, PlacementId, PlacementState, ShardConnConfig,
    ShardConnError, ShardId, ShardPlacement,
};
use std::collections::{HashMap, HashSet};

/// Deterministic in-memory pool: hands out sequential connection ids and
/// records every request.
pub struct TestPool {
    next_id: u64,
    pub started: Vec<(ConnectFlags, NodeAddr)>,
    pub finished: Vec<ConnectionId>,
    claimed: HashSet<ConnectionId>,
    failed_remote: HashSet<ConnectionId>,
}

impl TestPool {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            started: Vec::new(),
            finished: Vec::new(),
            claimed: HashSet::new(),
            failed_remote: HashSet::new(),
        }
    }

    pub fn claim_exclusively(&mut self, conn: ConnectionId) {
        self.claimed.insert(conn);
    }

    pub fn fail_remote_transaction(&mut self, conn: ConnectionId) {
        self.failed_remote.insert(conn);
    }

    pub fn connections_started(&self) -> usize {
        self.started.len()
    }
}

impl ConnectionPool for TestPool {
    fn start_connection(
        &mut self,
        flags: ConnectFlags,
        node: &NodeAddr,
    ) -> Result<ConnectionId, ShardConnError> {
        self.next_id += 1;
        self.started.push((flags, node.clone()));
        Ok(ConnectionId(self.next_id))
    }

    fn finish_connection_establishment(
        &mut self,
        conn: ConnectionId,
    ) -> Result<(), ShardConnError> {
        self.finished.push(conn);
        Ok(())
    }

    fn is_claimed_exclusively(&self, conn: ConnectionId) -> bool {
        self.claimed.contains(&conn)
    }

    fn remote_transaction_failed(&self, conn: ConnectionId) -> bool {
        self.failed_remote.contains(&conn)
    }
}

/// In-memory placement catalog that records every state transition.
pub struct TestCatalog {
    states: HashMap<PlacementId, PlacementState>,
    pub updates: Vec<(PlacementId, PlacementState)>,
}

impl TestCatalog {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            updates: Vec::new(),
        }
    }

    pub fn with_state(mut self, placement_id: PlacementId, state: PlacementState) -> Self {
        self.states.insert(placement_id, state);
        self
    }

    pub fn state_of(&self, placement_id: PlacementId) -> Option<PlacementState> {
        self.states.get(&placement_id).copied()
    }
}

impl PlacementCatalog for TestCatalog {
    fn load_group_placement(
        &self,
        shard_id: ShardId,
        placement_id: PlacementId,
    ) -> Result<GroupPlacementRow, ShardConnError> {
        let state = self
            .states
            .get(&placement_id)
            .copied()
            .ok_or_else(|| ShardConnError::Catalog {
                message: format!("no catalog row for placement {placement_id}"),
            })?;
        Ok(GroupPlacementRow {
            placement_id,
            shard_id,
            state,
        })
    }

    fn update_placement_state(
        &mut self,
        placement_id: PlacementId,
        state: PlacementState,
    ) -> Result<(), ShardConnError> {
        self.states.insert(placement_id, state);
        self.updates.push((placement_id, state));
        Ok(())
    }
}

pub fn node(name: &str) -> NodeAddr {
    NodeAddr::new(name, 5432).expect("node addr")
}

/// A placement of a hash-partitioned table; same node/group/representative
/// value means same co-located family.
pub fn hash_placement(
    placement_id: u64,
    shard_id: u64,
    node_name: &str,
    colocation_group_id: u32,
    representative_value: u32,
) -> ShardPlacement {
    ShardPlacement {
        placement_id: PlacementId(placement_id),
        shard_id: ShardId(shard_id),
        node: node(node_name),
        partition_method: PartitionMethod::Hash,
        colocation_group_id,
        representative_value,
    }
}

/// A placement of a range-partitioned table; never co-located.
pub fn range_placement(placement_id: u64, shard_id: u64, node_name: &str) -> ShardPlacement {
    ShardPlacement {
        placement_id: PlacementId(placement_id),
        shard_id: ShardId(shard_id),
        node: node(node_name),
        partition_method: PartitionMethod::Range,
        colocation_group_id: 0,
        representative_value: 0,
    }
}

/// The dummy placement a SELECT that pruned to zero shards is planned with.
pub fn dummy_placement(node_name: &str) -> ShardPlacement {
    ShardPlacement {
        placement_id: PlacementId(0),
        shard_id: ShardId::INVALID,
        node: node(node_name),
        partition_method: PartitionMethod::Range,
        colocation_group_id: 0,
        representative_value: 0,
    }
}

pub fn manager() -> PlacementConnectionManager {
    PlacementConnectionManager::new(ShardConnConfig::for_session_user("alice")).expect("config")
}
