// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-bake workflow declarations: a mapping of workflow-name to workflow
//! definition (spec.md §4.E inputs), with template placeholders still
//! present in string fields.

use indexmap::IndexMap;
use meow_core::{FailurePolicy, JsonValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A parsed module: every workflow it declares, keyed by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowModule {
    pub workflows: IndexMap<String, WorkflowDef>,
}

/// One workflow's declaration, prior to baking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDef {
    pub steps: Vec<RawStep>,
    #[serde(default)]
    pub variables: Vec<VariableSchema>,
    #[serde(default)]
    pub cleanup_on_success: Option<String>,
    #[serde(default)]
    pub cleanup_on_failure: Option<String>,
    #[serde(default)]
    pub cleanup_on_stop: Option<String>,
    /// Internal workflows are callable only via `expand`/`foreach`, not as
    /// a run's top-level workflow.
    #[serde(default)]
    pub internal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableSchema {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<JsonValue>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawStep {
    pub id: String,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub allow_failure: bool,
    pub spec: RawStepSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "executor", rename_all = "snake_case")]
pub enum RawStepSpec {
    Shell(RawShellSpec),
    Spawn(RawSpawnSpec),
    Kill(RawKillSpec),
    Expand(RawExpandSpec),
    Foreach(RawForeachSpec),
    Branch(RawBranchSpec),
    Agent(RawAgentSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawShellSpec {
    pub command: String,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSpawnSpec {
    #[serde(default)]
    pub adapter: Option<String>,
    pub workdir: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawKillSpec {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub session_name: Option<String>,
    #[serde(default = "default_true")]
    pub graceful: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawExpandSpec {
    #[serde(default)]
    pub template: Option<String>,
    pub workflow_name: String,
    #[serde(default)]
    pub variables: HashMap<String, JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawForeachSpec {
    pub items: String,
    pub item_var: String,
    #[serde(default)]
    pub index_var: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    pub workflow_name: String,
    #[serde(default)]
    pub variables: HashMap<String, JsonValue>,
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBranchSpec {
    pub condition: String,
    #[serde(default)]
    pub on_true: Option<String>,
    #[serde(default)]
    pub on_false: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAgentSpec {
    pub agent_id: String,
    pub prompt: String,
    #[serde(default)]
    pub outputs_schema: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}
