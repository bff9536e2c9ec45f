//! Commit-time failure accounting.
//!
//! Walks the shard index and classifies every modified placement as
//! succeeded or failed, invalidating failed placements in the catalog when a
//! sibling replica survived and aborting the transaction when none did.

use crate::catalog::{PlacementCatalog, PlacementState};
use crate::connection::ConnectionPool;
use crate::error::ShardConnError;
use crate::manager::PlacementConnectionManager;
use crate::placement::ShardId;
use tracing::warn;

impl PlacementConnectionManager {
    /// Pre-commit sweep: every shard with modifications must still have at
    /// least one placement whose connection is alive and whose remote
    /// transaction has not failed, otherwise the whole distributed
    /// transaction aborts before any remote commit is sent.
    ///
    /// Failed placements of shards that do have a surviving replica are
    /// transitioned `Finalized -> Inactive` in the catalog. This can also be
    /// run after modification statements mid-transaction, so later
    /// statements do not target placements already known to be stale.
    pub fn mark_failed_placements_pre_commit<P, C>(
        &mut self,
        pool: &P,
        catalog: &mut C,
    ) -> Result<(), ShardConnError>
    where
        P: ConnectionPool,
        C: PlacementCatalog,
    {
        let shard_ids: Vec<ShardId> = self.shards.keys().copied().collect();
        for shard_id in shard_ids {
            if !self.check_shard_placements(pool, catalog, shard_id)? {
                return Err(ShardConnError::ShardModificationFailed { shard_id });
            }
        }
        Ok(())
    }

    /// Post-commit sweep, run after the remote commit attempt.
    ///
    /// With 2PC a shard whose every modified placement failed is fatal; the
    /// prepared remote transactions can still be rolled back. Without 2PC it
    /// is only warned about, because other remote commits may already have
    /// gone through. Either way, if shards were attempted and none succeeded
    /// the transaction cannot be reported as committed.
    pub fn mark_failed_placements_post_commit<P, C>(
        &mut self,
        pool: &P,
        catalog: &mut C,
        using_2pc: bool,
    ) -> Result<(), ShardConnError>
    where
        P: ConnectionPool,
        C: PlacementCatalog,
    {
        let shard_ids: Vec<ShardId> = self.shards.keys().copied().collect();
        let mut attempts = 0usize;
        let mut successes = 0usize;

        for shard_id in shard_ids {
            attempts += 1;
            if self.check_shard_placements(pool, catalog, shard_id)? {
                successes += 1;
            } else if using_2pc {
                return Err(ShardConnError::ShardCommitFailed { shard_id });
            } else {
                warn!(
                    shard_id = shard_id.0,
                    "could not commit transaction for shard on any active node"
                );
            }
        }

        if attempts > 0 && successes == 0 {
            return Err(ShardConnError::NothingCommitted);
        }
        Ok(())
    }

    /// Per-shard rollup. Returns false when the shard had modifications and
    /// every one of them failed; otherwise marks the failed placements
    /// inactive (only from `Finalized` — any other persisted state is owned
    /// by another actor) and returns true.
    fn check_shard_placements<P, C>(
        &mut self,
        pool: &P,
        catalog: &mut C,
        shard_id: ShardId,
    ) -> Result<bool, ShardConnError>
    where
        P: ConnectionPool,
        C: PlacementCatalog,
    {
        let placement_ids = match self.shards.get(&shard_id) {
            Some(ids) => ids.clone(),
            None => return Ok(true),
        };

        let mut failures = 0usize;
        let mut successes = 0usize;
        for placement_id in &placement_ids {
            let Some(entry) = self.placements.get_mut(placement_id) else {
                continue;
            };
            let reference = self.references.get(entry.primary);
            if !reference.had_writes() {
                continue;
            }
            match reference.connection {
                Some(conn) if !pool.remote_transaction_failed(conn) => successes += 1,
                _ => {
                    entry.failed = true;
                    failures += 1;
                }
            }
        }

        if failures > 0 && successes == 0 {
            return Ok(false);
        }

        for placement_id in &placement_ids {
            let failed = self
                .placements
                .get(placement_id)
                .is_some_and(|entry| entry.failed);
            if !failed {
                continue;
            }
            let row = catalog.load_group_placement(shard_id, *placement_id)?;
            if row.state == PlacementState::Finalized {
                warn!(
                    placement_id = placement_id.0,
                    shard_id = shard_id.0,
                    "marking failed placement inactive"
                );
                catalog.update_placement_state(*placement_id, PlacementState::Inactive)?;
            }
        }

        Ok(true)
    }
}
