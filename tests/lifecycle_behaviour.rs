//! Behavioural scenarios for the lifecycle engine over mock services.

#[path = "common/workspace.rs"]
mod workspace;

mod lifecycle;
