pub mod core;
pub mod lease;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use crate::core::{
    any_logical, latest_value, majority_succeeded, quorum_for, read_repair_targets,
    transport_failures, value_count,
};
pub use lease::{ExtendFn, ExtendFuture, ExtendOutcome, LeaseKeeper, LeaseKeeperHandle, TaskSpawner, TokioSpawner};
