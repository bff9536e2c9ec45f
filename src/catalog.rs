use crate::error::ShardConnError;
use crate::placement::{PlacementId, ShardId};
use serde::{Deserialize, Serialize};

/// Persisted health state of a placement in the metadata catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementState {
    /// Fully written and queryable.
    Finalized,
    /// Missed writes in a committed transaction; must be repaired before use.
    Inactive,
    /// Queued for removal by the shard cleaner.
    ToDelete,
}

/// The catalog row for one placement, as loaded for failure accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPlacementRow {
    pub placement_id: PlacementId,
    pub shard_id: ShardId,
    pub state: PlacementState,
}

/// Metadata-catalog operations the failure sweep delegates to.
///
/// The manager never writes catalog rows itself: the only persistent side
/// effect of this crate is the `Finalized -> Inactive` transition requested
/// through this trait. Placements in any other state belong to another actor
/// (repair, cleanup) and are left alone.
pub trait PlacementCatalog {
    fn load_group_placement(
        &self,
        shard_id: ShardId,
        placement_id: PlacementId,
    ) -> Result<GroupPlacementRow, ShardConnError>;

    fn update_placement_state(
        &mut self,
        placement_id: PlacementId,
        state: PlacementState,
    ) -> Result<(), ShardConnError>;
}
