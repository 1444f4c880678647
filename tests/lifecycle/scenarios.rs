//! BDD scenarios for volume lifecycle operations.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleContext, lifecycle_context};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Seeded attachments carry this host's mount points"
)]
fn scenario_seeded_mounts(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Seeded attachments without local devices carry other mount points"
)]
fn scenario_mounts_without_local_devices(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Aggregate listing answers for every service"
)]
fn scenario_aggregate_listing(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Detach repeats cleanly while a second remove fails"
)]
fn scenario_detach_and_remove(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "A volume created from a snapshot keeps its options"
)]
fn scenario_create_from_snapshot(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}
