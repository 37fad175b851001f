// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Plans: steps, dependency scheduling and persistence
//!
//! A plan is approved as a list of steps. The scheduler layers it into
//! execution groups; the orchestrator runs one group at a time and persists
//! the plan between groups so it can be resumed.

pub mod scheduler;
pub mod step;
pub mod store;

pub use scheduler::{compute_groups, enforce_visual_exclusivity};
pub use step::{ExecutingPlan, ExecutionGroup, PlanState, Step};
pub use store::{FilePlanStore, InMemoryPlanStore, PlanStore};
