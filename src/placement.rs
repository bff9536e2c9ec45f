use crate::error::ShardConnError;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on worker node host names, matching the catalog column width.
pub const MAX_NODE_NAME_LEN: usize = 255;

/// Catalog-assigned identifier of one physical shard replica.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PlacementId(pub u64);

impl fmt::Display for PlacementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a logical shard. `ShardId::INVALID` is the sentinel used by
/// dummy placements when a SELECT prunes down to zero shards.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ShardId(pub u64);

impl ShardId {
    pub const INVALID: ShardId = ShardId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the owning distributed table partitions its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionMethod {
    Hash,
    /// Single logical shard replicated to every node; shares connections the
    /// same way hash-partitioned tables do.
    Reference,
    Range,
    Append,
}

impl PartitionMethod {
    /// Only hash-partitioned and reference tables participate in co-located
    /// connection sharing.
    pub fn supports_colocation(self) -> bool {
        matches!(self, PartitionMethod::Hash | PartitionMethod::Reference)
    }
}

/// Host/port of a worker node. Names are length-checked on construction so
/// they can be embedded in fixed-width co-location keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddr {
    name: CompactString,
    port: u16,
}

impl NodeAddr {
    pub fn new(name: impl AsRef<str>, port: u16) -> Result<Self, ShardConnError> {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(ShardConnError::Validation("node name cannot be empty".into()));
        }
        if name.len() > MAX_NODE_NAME_LEN {
            return Err(ShardConnError::Validation(format!(
                "node name exceeds {MAX_NODE_NAME_LEN} bytes: {name}"
            )));
        }
        Ok(Self {
            name: CompactString::new(name),
            port,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}

/// One physical replica of a shard, as produced by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardPlacement {
    pub placement_id: PlacementId,
    pub shard_id: ShardId,
    pub node: NodeAddr,
    pub partition_method: PartitionMethod,
    pub colocation_group_id: u32,
    /// Lower bound of the placement's hash range; identifies the co-located
    /// family together with the node and colocation group.
    pub representative_value: u32,
}

/// What a statement is about to do to a placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessKind {
    Select,
    Dml,
    Ddl,
}

impl AccessKind {
    pub fn is_write(self) -> bool {
        matches!(self, AccessKind::Dml | AccessKind::Ddl)
    }
}

bitflags::bitflags! {
    /// Connection-request flags.
    ///
    /// `FOR_DML`/`FOR_DDL` classify the access when a single placement is
    /// requested without an explicit access list. Bits not interpreted here
    /// are forwarded untouched to the pool's `start_connection`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConnectFlags: u32 {
        /// Connection outlives the transaction; interpreted by the pool.
        const SESSION_LIFESPAN = 1 << 0;
        /// Never reuse an existing placement connection.
        const FORCE_NEW_CONNECTION = 1 << 1;
        /// The connection will run data modification.
        const FOR_DML = 1 << 2;
        /// The connection will run schema changes.
        const FOR_DDL = 1 << 3;
    }
}

impl ConnectFlags {
    /// DDL wins over DML; anything else is a plain read.
    pub fn access_kind(self) -> AccessKind {
        if self.contains(ConnectFlags::FOR_DDL) {
            AccessKind::Ddl
        } else if self.contains(ConnectFlags::FOR_DML) {
            AccessKind::Dml
        } else {
            AccessKind::Select
        }
    }
}

/// One element of the ordered access list handed to the manager. The order
/// of the list is part of the contract: conflicts are reported against
/// whichever modifying connection was found first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementAccess {
    pub placement: ShardPlacement,
    pub kind: AccessKind,
}

impl PlacementAccess {
    pub fn select(placement: ShardPlacement) -> Self {
        Self {
            placement,
            kind: AccessKind::Select,
        }
    }

    pub fn dml(placement: ShardPlacement) -> Self {
        Self {
            placement,
            kind: AccessKind::Dml,
        }
    }

    pub fn ddl(placement: ShardPlacement) -> Self {
        Self {
            placement,
            kind: AccessKind::Ddl,
        }
    }

    pub fn from_flags(placement: ShardPlacement, flags: ConnectFlags) -> Self {
        Self {
            placement,
            kind: flags.access_kind(),
        }
    }
}
