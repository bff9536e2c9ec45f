mod common;

use common::{manager, range_placement, TestCatalog, TestPool};
use shardconn::{
    ConnectFlags, ConnectionId, PlacementAccess, PlacementConnectionManager, PlacementId,
    PlacementState, ShardConnError, ShardId,
};

/// Writes each placement over its own connection and returns the
/// connections in placement order.
fn write_placements(
    manager: &mut PlacementConnectionManager,
    pool: &mut TestPool,
    placements: &[(u64, u64, &str)],
) -> Vec<ConnectionId> {
    placements
        .iter()
        .map(|(placement_id, shard_id, node_name)| {
            manager
                .acquire_connection(
                    pool,
                    ConnectFlags::FOR_DML,
                    &[PlacementAccess::dml(range_placement(
                        *placement_id,
                        *shard_id,
                        node_name,
                    ))],
                    None,
                )
                .expect("write placement")
        })
        .collect()
}

#[test]
fn shard_with_every_replica_failed_aborts_before_commit() {
    let mut manager = manager();
    let mut pool = TestPool::new();
    let mut catalog = TestCatalog::new()
        .with_state(PlacementId(11), PlacementState::Finalized)
        .with_state(PlacementId(12), PlacementState::Finalized);

    let conns = write_placements(
        &mut manager,
        &mut pool,
        &[(11, 100, "worker-1"), (12, 100, "worker-2")],
    );
    pool.fail_remote_transaction(conns[0]);
    pool.fail_remote_transaction(conns[1]);

    let err = manager
        .mark_failed_placements_pre_commit(&pool, &mut catalog)
        .expect_err("no replica of shard 100 survived");
    assert!(matches!(
        err,
        ShardConnError::ShardModificationFailed {
            shard_id: ShardId(100)
        }
    ));
    // Aborting protects durability; nothing is invalidated.
    assert!(catalog.updates.is_empty());
}

#[test]
fn surviving_replica_invalidates_only_the_failed_finalized_placement() {
    let mut manager = manager();
    let mut pool = TestPool::new();
    let mut catalog = TestCatalog::new()
        .with_state(PlacementId(11), PlacementState::Finalized)
        .with_state(PlacementId(12), PlacementState::Finalized);

    let conns = write_placements(
        &mut manager,
        &mut pool,
        &[(11, 100, "worker-1"), (12, 100, "worker-2")],
    );
    pool.fail_remote_transaction(conns[1]);

    manager
        .mark_failed_placements_pre_commit(&pool, &mut catalog)
        .expect("one replica made it");

    assert_eq!(
        catalog.updates,
        vec![(PlacementId(12), PlacementState::Inactive)]
    );
    assert_eq!(
        catalog.state_of(PlacementId(11)),
        Some(PlacementState::Finalized)
    );
    let status = manager.placement_status(PlacementId(12)).expect("status");
    assert!(status.failed);
}

#[test]
fn placements_not_finalized_are_left_to_their_owner() {
    let mut manager = manager();
    let mut pool = TestPool::new();
    let mut catalog = TestCatalog::new()
        .with_state(PlacementId(11), PlacementState::Finalized)
        .with_state(PlacementId(12), PlacementState::ToDelete);

    let conns = write_placements(
        &mut manager,
        &mut pool,
        &[(11, 100, "worker-1"), (12, 100, "worker-2")],
    );
    pool.fail_remote_transaction(conns[1]);

    manager
        .mark_failed_placements_pre_commit(&pool, &mut catalog)
        .expect("one replica made it");

    assert!(catalog.updates.is_empty());
    assert_eq!(
        catalog.state_of(PlacementId(12)),
        Some(PlacementState::ToDelete)
    );
}

#[test]
fn post_commit_all_replicas_failed_is_fatal_under_2pc() {
    let mut manager = manager();
    let mut pool = TestPool::new();
    let mut catalog = TestCatalog::new()
        .with_state(PlacementId(11), PlacementState::Finalized)
        .with_state(PlacementId(12), PlacementState::Finalized);

    let conns = write_placements(
        &mut manager,
        &mut pool,
        &[(11, 100, "worker-1"), (12, 100, "worker-2")],
    );
    pool.fail_remote_transaction(conns[0]);
    pool.fail_remote_transaction(conns[1]);

    let err = manager
        .mark_failed_placements_post_commit(&pool, &mut catalog, true)
        .expect_err("2pc can still roll back");
    assert!(matches!(
        err,
        ShardConnError::ShardCommitFailed {
            shard_id: ShardId(100)
        }
    ));
}

#[test]
fn post_commit_without_2pc_warns_when_another_shard_succeeded() {
    let mut manager = manager();
    let mut pool = TestPool::new();
    let mut catalog = TestCatalog::new()
        .with_state(PlacementId(11), PlacementState::Finalized)
        .with_state(PlacementId(21), PlacementState::Finalized);

    let conns = write_placements(
        &mut manager,
        &mut pool,
        &[(11, 100, "worker-1"), (21, 200, "worker-2")],
    );
    // Shard 100 lost its only modified replica; shard 200 committed.
    pool.fail_remote_transaction(conns[0]);

    manager
        .mark_failed_placements_post_commit(&pool, &mut catalog, false)
        .expect("some remote commits already happened; only a warning");

    // The all-failed shard is not invalidated, there is nothing to fall
    // back to.
    assert!(catalog.updates.is_empty());
}

#[test]
fn post_commit_with_no_successful_shard_is_fatal() {
    let mut manager = manager();
    let mut pool = TestPool::new();
    let mut catalog =
        TestCatalog::new().with_state(PlacementId(11), PlacementState::Finalized);

    let conns = write_placements(&mut manager, &mut pool, &[(11, 100, "worker-1")]);
    pool.fail_remote_transaction(conns[0]);

    let err = manager
        .mark_failed_placements_post_commit(&pool, &mut catalog, false)
        .expect_err("nothing committed anywhere");
    assert!(matches!(err, ShardConnError::NothingCommitted));
}

#[test]
fn read_only_transactions_have_nothing_to_reap() {
    let mut manager = manager();
    let mut pool = TestPool::new();
    let mut catalog = TestCatalog::new();

    let conn = manager
        .acquire_connection(
            &mut pool,
            ConnectFlags::empty(),
            &[PlacementAccess::select(range_placement(1, 100, "worker-1"))],
            None,
        )
        .expect("read");
    // Even a failed remote transaction is irrelevant without writes.
    pool.fail_remote_transaction(conn);

    manager
        .mark_failed_placements_pre_commit(&pool, &mut catalog)
        .expect("pre-commit");
    manager
        .mark_failed_placements_post_commit(&pool, &mut catalog, false)
        .expect("post-commit");
    assert!(catalog.updates.is_empty());
}

#[test]
fn missing_catalog_rows_surface_as_catalog_errors() {
    let mut manager = manager();
    let mut pool = TestPool::new();
    let mut catalog = TestCatalog::new();

    let conns = write_placements(
        &mut manager,
        &mut pool,
        &[(11, 100, "worker-1"), (12, 100, "worker-2")],
    );
    pool.fail_remote_transaction(conns[1]);

    let err = manager
        .mark_failed_placements_pre_commit(&pool, &mut catalog)
        .expect_err("catalog has no row for placement 12");
    assert!(matches!(err, ShardConnError::Catalog { .. }));
}
