use crate::placement::{PlacementId, ShardId};
use thiserror::Error;

/// Stable machine-readable codes for every error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardConnErrorCode {
    Validation,
    InvalidConfig,
    DdlReadOverMultipleConnections,
    DdlColocatedReadOverMultipleConnections,
    ModifiedOverMultipleConnections,
    DdlInProgress,
    DmlInProgress,
    ParallelDdlSharedConnection,
    ShardModificationFailed,
    ShardCommitFailed,
    NothingCommitted,
    Pool,
    Catalog,
}

impl ShardConnErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ShardConnErrorCode::Validation => "validation",
            ShardConnErrorCode::InvalidConfig => "invalid_config",
            ShardConnErrorCode::DdlReadOverMultipleConnections => {
                "ddl_read_over_multiple_connections"
            }
            ShardConnErrorCode::DdlColocatedReadOverMultipleConnections => {
                "ddl_colocated_read_over_multiple_connections"
            }
            ShardConnErrorCode::ModifiedOverMultipleConnections => {
                "modified_over_multiple_connections"
            }
            ShardConnErrorCode::DdlInProgress => "ddl_in_progress",
            ShardConnErrorCode::DmlInProgress => "dml_in_progress",
            ShardConnErrorCode::ParallelDdlSharedConnection => "parallel_ddl_shared_connection",
            ShardConnErrorCode::ShardModificationFailed => "shard_modification_failed",
            ShardConnErrorCode::ShardCommitFailed => "shard_commit_failed",
            ShardConnErrorCode::NothingCommitted => "nothing_committed",
            ShardConnErrorCode::Pool => "pool",
            ShardConnErrorCode::Catalog => "catalog",
        }
    }

    /// Five-character SQLSTATE for reporting through a SQL frontend.
    ///
    /// Connection-assignment conflicts use `25001` (active SQL transaction):
    /// the request is only invalid because of what this transaction has
    /// already done over other connections. Commit-time failures are internal
    /// (`XX000`), pool failures are connection exceptions (`08000`).
    pub fn sql_state(self) -> &'static str {
        match self {
            ShardConnErrorCode::Validation | ShardConnErrorCode::InvalidConfig => "22023",
            ShardConnErrorCode::DdlReadOverMultipleConnections
            | ShardConnErrorCode::DdlColocatedReadOverMultipleConnections
            | ShardConnErrorCode::ModifiedOverMultipleConnections
            | ShardConnErrorCode::DdlInProgress
            | ShardConnErrorCode::DmlInProgress
            | ShardConnErrorCode::ParallelDdlSharedConnection => "25001",
            ShardConnErrorCode::ShardModificationFailed
            | ShardConnErrorCode::ShardCommitFailed
            | ShardConnErrorCode::NothingCommitted
            | ShardConnErrorCode::Catalog => "XX000",
            ShardConnErrorCode::Pool => "08000",
        }
    }
}

#[derive(Debug, Error)]
pub enum ShardConnError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error(
        "cannot perform DDL on placement {placement_id}, which has been read over \
         multiple connections"
    )]
    DdlReadOverMultipleConnections { placement_id: PlacementId },
    #[error(
        "cannot perform DDL on placement {placement_id} since a co-located placement \
         has been read over multiple connections"
    )]
    DdlColocatedReadOverMultipleConnections { placement_id: PlacementId },
    #[error("cannot perform query with placements that were modified over multiple connections")]
    ModifiedOverMultipleConnections,
    #[error(
        "cannot establish a new connection for placement {placement_id}, since DDL has \
         been executed on a connection that is in use"
    )]
    DdlInProgress { placement_id: PlacementId },
    #[error(
        "cannot establish a new connection for placement {placement_id}, since DML has \
         been executed on a connection that is in use"
    )]
    DmlInProgress { placement_id: PlacementId },
    #[error(
        "cannot perform a parallel DDL command because multiple placements have been \
         accessed over the same connection"
    )]
    ParallelDdlSharedConnection,
    #[error("could not make changes to shard {shard_id} on any node")]
    ShardModificationFailed { shard_id: ShardId },
    #[error("could not commit transaction for shard {shard_id} on any active node")]
    ShardCommitFailed { shard_id: ShardId },
    #[error("could not commit transaction on any active node")]
    NothingCommitted,
    #[error("connection pool error: {message}")]
    Pool { message: String },
    #[error("catalog error: {message}")]
    Catalog { message: String },
}

impl ShardConnError {
    pub fn code(&self) -> ShardConnErrorCode {
        match self {
            ShardConnError::Validation(_) => ShardConnErrorCode::Validation,
            ShardConnError::InvalidConfig { .. } => ShardConnErrorCode::InvalidConfig,
            ShardConnError::DdlReadOverMultipleConnections { .. } => {
                ShardConnErrorCode::DdlReadOverMultipleConnections
            }
            ShardConnError::DdlColocatedReadOverMultipleConnections { .. } => {
                ShardConnErrorCode::DdlColocatedReadOverMultipleConnections
            }
            ShardConnError::ModifiedOverMultipleConnections => {
                ShardConnErrorCode::ModifiedOverMultipleConnections
            }
            ShardConnError::DdlInProgress { .. } => ShardConnErrorCode::DdlInProgress,
            ShardConnError::DmlInProgress { .. } => ShardConnErrorCode::DmlInProgress,
            ShardConnError::ParallelDdlSharedConnection => {
                ShardConnErrorCode::ParallelDdlSharedConnection
            }
            ShardConnError::ShardModificationFailed { .. } => {
                ShardConnErrorCode::ShardModificationFailed
            }
            ShardConnError::ShardCommitFailed { .. } => ShardConnErrorCode::ShardCommitFailed,
            ShardConnError::NothingCommitted => ShardConnErrorCode::NothingCommitted,
            ShardConnError::Pool { .. } => ShardConnErrorCode::Pool,
            ShardConnError::Catalog { .. } => ShardConnErrorCode::Catalog,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    pub fn sql_state(&self) -> &'static str {
        self.code().sql_state()
    }

    /// True for errors raised by the connection-assignment decision table;
    /// the caller is expected to abort the distributed transaction.
    pub fn is_conflict(&self) -> bool {
        self.sql_state() == "25001"
    }
}
