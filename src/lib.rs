//! Per-placement connection assignment for coordinator-side distributed
//! transactions.
//!
//! A distributed transaction reaches shard placements on worker nodes
//! through pooled connections. Which connection serves which placement is
//! not a free choice: writes must stay visible to later accesses, the
//! coordinator must not deadlock against its own connections, and a failed
//! placement must only be invalidated when a sibling replica made it. The
//! [`PlacementConnectionManager`] makes that choice, tracks it for the
//! lifetime of the transaction, and settles the failure accounting at
//! commit time. It consumes a [`ConnectionPool`] and a [`PlacementCatalog`]
//! supplied by the surrounding system and owns no sockets or persistent
//! state of its own.

pub mod catalog;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod placement;
mod reaper;
pub mod session;

pub use crate::catalog::{GroupPlacementRow, PlacementCatalog, PlacementState};
pub use crate::config::{ShardConnConfig, MAX_USER_NAME_LEN};
pub use crate::connection::{ConnectionId, ConnectionPool};
pub use crate::error::{ShardConnError, ShardConnErrorCode};
pub use crate::manager::{PlacementConnectionManager, PlacementStatus};
pub use crate::placement::{
    AccessKind, ConnectFlags, NodeAddr, PartitionMethod, PlacementAccess, PlacementId, ShardId,
    ShardPlacement, MAX_NODE_NAME_LEN,
};
pub use crate::session::DistributedTransactionId;
