// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! The Template Expander / Baker (spec.md §4.E): turns a parsed workflow
//! module into a flat, validated step list ready to run as a `Run`.

mod bake;
mod error;
mod module;

pub use bake::{bake, bake_internal, prefix_child_ids, BakedWorkflow};
pub use error::BakeError;
pub use module::{
    RawAgentSpec, RawBranchSpec, RawExpandSpec, RawForeachSpec, RawKillSpec, RawShellSpec,
    RawSpawnSpec, RawStep, RawStepSpec, VariableSchema, WorkflowDef, WorkflowModule,
};
