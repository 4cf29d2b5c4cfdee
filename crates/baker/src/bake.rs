// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::error::BakeError;
use crate::module::{
    RawAgentSpec, RawBranchSpec, RawExpandSpec, RawForeachSpec, RawKillSpec, RawShellSpec,
    RawSpawnSpec, RawStep, RawStepSpec, WorkflowDef, WorkflowModule,
};
use meow_core::{
    AgentSpec, BranchSpec, ExpandSpec, ForeachSpec, JsonValue, KillSpec, ShellSpec, SpawnSpec,
    Step, StepId, StepSpec, StepStatus,
};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static VAR_PLACEHOLDER: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\{\{\s*var\.([a-zA-Z0-9_.-]+)\s*\}\}").expect("constant regex is valid")
});

/// Output of [`bake`]: a flat step list plus the frozen variable mapping
/// and cleanup hooks, ready to become a [`meow_core::Run`].
#[derive(Debug, Clone)]
pub struct BakedWorkflow {
    pub steps: Vec<Step>,
    pub variables: HashMap<String, JsonValue>,
    pub cleanup_on_success: Option<String>,
    pub cleanup_on_failure: Option<String>,
    pub cleanup_on_stop: Option<String>,
}

/// Bake `workflow_name` from `module` against `provided` variables
/// (spec.md §4.E).
pub fn bake(
    module: &WorkflowModule,
    workflow_name: &str,
    provided: &HashMap<String, JsonValue>,
) -> Result<BakedWorkflow, BakeError> {
    let def = module
        .workflows
        .get(workflow_name)
        .ok_or_else(|| BakeError::WorkflowNotFound(workflow_name.to_string()))?;
    if def.internal {
        return Err(BakeError::InternalWorkflow(workflow_name.to_string()));
    }

    bake_def(def, provided)
}

/// Like [`bake`] but for a sub-workflow invoked via `expand`/`foreach`,
/// where `internal` workflows are allowed.
pub fn bake_internal(
    module: &WorkflowModule,
    workflow_name: &str,
    provided: &HashMap<String, JsonValue>,
) -> Result<BakedWorkflow, BakeError> {
    let def = module
        .workflows
        .get(workflow_name)
        .ok_or_else(|| BakeError::WorkflowNotFound(workflow_name.to_string()))?;
    bake_def(def, provided)
}

fn bake_def(
    def: &WorkflowDef,
    provided: &HashMap<String, JsonValue>,
) -> Result<BakedWorkflow, BakeError> {
    let variables = resolve_variables(def, provided)?;

    let mut steps = Vec::with_capacity(def.steps.len());
    let mut seen_ids = HashSet::new();
    for raw in &def.steps {
        if !seen_ids.insert(raw.id.clone()) {
            return Err(BakeError::DuplicateStepId(raw.id.clone()));
        }
        steps.push(bake_step(raw, &variables)?);
    }

    validate_references(&steps)?;
    detect_cycles(&steps)?;

    Ok(BakedWorkflow {
        steps,
        variables,
        cleanup_on_success: def.cleanup_on_success.clone(),
        cleanup_on_failure: def.cleanup_on_failure.clone(),
        cleanup_on_stop: def.cleanup_on_stop.clone(),
    })
}

fn resolve_variables(
    def: &WorkflowDef,
    provided: &HashMap<String, JsonValue>,
) -> Result<HashMap<String, JsonValue>, BakeError> {
    let mut resolved = HashMap::new();
    for schema in &def.variables {
        match provided.get(&schema.name) {
            Some(value) => {
                resolved.insert(schema.name.clone(), value.clone());
            }
            None => match &schema.default {
                Some(default) => {
                    resolved.insert(schema.name.clone(), default.clone());
                }
                None if schema.required => {
                    return Err(BakeError::VariableMissing(schema.name.clone()));
                }
                None => {}
            },
        }
    }
    // Variables not declared in the schema are passed through unchanged —
    // useful for `expand`/`foreach` children, which receive whatever the
    // firing step supplies without a matching schema entry.
    for (key, value) in provided {
        resolved.entry(key.clone()).or_insert_with(|| value.clone());
    }
    Ok(resolved)
}

/// Substitute only `{{var.X}}` placeholders, leaving `{{outputs...}}`,
/// `{{item}}`, and `{{index}}` untouched for the scheduler to resolve at
/// dispatch time (spec.md §4.E responsibility 2).
fn substitute_vars(
    text: &str,
    variables: &HashMap<String, JsonValue>,
) -> Result<String, BakeError> {
    let mut out = String::with_capacity(text.len());
    let mut last_end = 0;
    for caps in VAR_PLACEHOLDER.captures_iter(text) {
        let m = caps.get(0).expect("group 0 always matches");
        let path = &caps[1];
        let value = variables
            .get(path)
            .ok_or_else(|| BakeError::UnresolvedVariable(path.to_string()))?;
        out.push_str(&text[last_end..m.start()]);
        out.push_str(&scalar_to_string(value));
        last_end = m.end();
    }
    out.push_str(&text[last_end..]);
    Ok(out)
}

fn scalar_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        JsonValue::Bool(_) | JsonValue::Number(_) => value.to_string(),
        JsonValue::Array(_) | JsonValue::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

fn opt_substitute(
    text: &Option<String>,
    variables: &HashMap<String, JsonValue>,
) -> Result<Option<String>, BakeError> {
    text.as_ref()
        .map(|t| substitute_vars(t, variables))
        .transpose()
}

fn bake_step(raw: &RawStep, variables: &HashMap<String, JsonValue>) -> Result<Step, BakeError> {
    let spec = match &raw.spec {
        RawStepSpec::Shell(RawShellSpec {
            command,
            workdir,
            env,
            timeout_secs,
        }) => StepSpec::Shell(ShellSpec {
            command: substitute_vars(command, variables)?,
            workdir: opt_substitute(workdir, variables)?.map(std::path::PathBuf::from),
            env: substitute_env(env, variables)?,
            timeout_secs: *timeout_secs,
        }),
        RawStepSpec::Spawn(RawSpawnSpec {
            adapter,
            workdir,
            prompt,
        }) => StepSpec::Spawn(SpawnSpec {
            adapter: opt_substitute(adapter, variables)?,
            workdir: std::path::PathBuf::from(substitute_vars(workdir, variables)?),
            prompt: substitute_vars(prompt, variables)?,
        }),
        RawStepSpec::Kill(RawKillSpec {
            agent_id,
            session_name,
            graceful,
        }) => StepSpec::Kill(KillSpec {
            agent_id: opt_substitute(agent_id, variables)?,
            session_name: opt_substitute(session_name, variables)?,
            graceful: *graceful,
        }),
        RawStepSpec::Expand(RawExpandSpec {
            template,
            workflow_name,
            variables: child_vars,
        }) => StepSpec::Expand(ExpandSpec {
            template: opt_substitute(template, variables)?,
            workflow_name: workflow_name.clone(),
            variables: child_vars.clone(),
        }),
        RawStepSpec::Foreach(RawForeachSpec {
            items,
            item_var,
            index_var,
            template,
            workflow_name,
            variables: child_vars,
            on_failure,
        }) => StepSpec::Foreach(ForeachSpec {
            items: substitute_vars(items, variables)?,
            item_var: item_var.clone(),
            index_var: index_var.clone(),
            template: opt_substitute(template, variables)?,
            workflow_name: workflow_name.clone(),
            variables: child_vars.clone(),
            on_failure: *on_failure,
        }),
        RawStepSpec::Branch(RawBranchSpec {
            condition,
            on_true,
            on_false,
        }) => StepSpec::Branch(BranchSpec {
            condition: substitute_vars(condition, variables)?,
            on_true: on_true.clone().map(StepId::new),
            on_false: on_false.clone().map(StepId::new),
        }),
        RawStepSpec::Agent(RawAgentSpec {
            agent_id,
            prompt,
            outputs_schema,
            timeout_secs,
        }) => StepSpec::Agent(AgentSpec {
            agent_id: substitute_vars(agent_id, variables)?,
            prompt: substitute_vars(prompt, variables)?,
            outputs_schema: outputs_schema.clone(),
            timeout_secs: *timeout_secs,
        }),
    };

    Ok(Step {
        id: StepId::new(raw.id.clone()),
        executor: spec.kind(),
        status: StepStatus::Pending,
        needs: raw.needs.iter().cloned().map(StepId::new).collect(),
        spec,
        outputs: HashMap::new(),
        error: None,
        started_at: None,
        finished_at: None,
        parent_step_id: None,
        allow_failure: raw.allow_failure,
    })
}

fn substitute_env(
    env: &HashMap<String, String>,
    variables: &HashMap<String, JsonValue>,
) -> Result<HashMap<String, String>, BakeError> {
    env.iter()
        .map(|(k, v)| substitute_vars(v, variables).map(|v| (k.clone(), v)))
        .collect()
}

fn validate_references(steps: &[Step]) -> Result<(), BakeError> {
    let ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    for step in steps {
        for need in &step.needs {
            if !ids.contains(need.as_str()) {
                return Err(BakeError::UnknownNeeds {
                    step: step.id.as_str().to_string(),
                    target: need.as_str().to_string(),
                });
            }
        }
        if let StepSpec::Branch(branch) = &step.spec {
            for target in [&branch.on_true, &branch.on_false].into_iter().flatten() {
                if !ids.contains(target.as_str()) {
                    return Err(BakeError::UnknownBranchTarget {
                        step: step.id.as_str().to_string(),
                        target: target.as_str().to_string(),
                    });
                }
            }
        }
    }
    meow_core::validate_output_references(steps)?;
    Ok(())
}

/// DFS-based cycle detection over `needs` plus the implicit edges imposed
/// by `branch.on_true`/`on_false` (spec.md §4.E responsibility 3).
fn detect_cycles(steps: &[Step]) -> Result<(), BakeError> {
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in steps {
        let list = edges.entry(step.id.as_str()).or_default();
        for need in &step.needs {
            list.push(need.as_str());
        }
        if let StepSpec::Branch(branch) = &step.spec {
            for target in [&branch.on_true, &branch.on_false].into_iter().flatten() {
                list.push(target.as_str());
            }
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Temp,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<(), BakeError> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Temp) => return Err(BakeError::DependencyCycle(node.to_string())),
            None => {}
        }
        marks.insert(node, Mark::Temp);
        if let Some(deps) = edges.get(node) {
            for dep in deps {
                visit(dep, edges, marks)?;
            }
        }
        marks.insert(node, Mark::Done);
        Ok(())
    }

    for step in steps {
        visit(step.id.as_str(), &edges, &mut marks)?;
    }
    Ok(())
}

/// Rewrite step ids and `needs` to be prefixed `<parent_id>/<child_id>`, the
/// scheme used when an `expand`/`foreach` step fires and re-bakes a
/// sub-workflow (spec.md §4.E Dynamic re-baking).
pub fn prefix_child_ids(mut steps: Vec<Step>, parent_id: &str) -> Vec<Step> {
    let rename = |id: &StepId| StepId::new(format!("{parent_id}/{}", id.as_str()));
    for step in &mut steps {
        step.id = rename(&step.id);
        step.parent_step_id = Some(StepId::new(parent_id.to_string()));
        step.needs = step.needs.iter().map(rename).collect();
        if let StepSpec::Branch(branch) = &mut step.spec {
            branch.on_true = branch.on_true.as_ref().map(rename);
            branch.on_false = branch.on_false.as_ref().map(rename);
        }
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{RawStepSpec, VariableSchema};
    use indexmap::IndexMap;
    use serde_json::json;

    fn shell_step(id: &str, command: &str, needs: &[&str]) -> RawStep {
        RawStep {
            id: id.to_string(),
            needs: needs.iter().map(|s| s.to_string()).collect(),
            allow_failure: false,
            spec: RawStepSpec::Shell(RawShellSpec {
                command: command.to_string(),
                workdir: None,
                env: HashMap::new(),
                timeout_secs: None,
            }),
        }
    }

    fn branch_step(id: &str, needs: &[&str]) -> RawStep {
        RawStep {
            id: id.to_string(),
            needs: needs.iter().map(|s| s.to_string()).collect(),
            allow_failure: false,
            spec: RawStepSpec::Branch(RawBranchSpec {
                condition: "true".to_string(),
                on_true: None,
                on_false: None,
            }),
        }
    }

    fn module_with(def: WorkflowDef) -> WorkflowModule {
        let mut workflows = IndexMap::new();
        workflows.insert("main".to_string(), def);
        WorkflowModule { workflows }
    }

    #[test]
    fn bakes_simple_chain_and_substitutes_vars() {
        let def = WorkflowDef {
            steps: vec![shell_step("a", "echo {{var.greeting}}", &[])],
            variables: vec![VariableSchema {
                name: "greeting".into(),
                required: true,
                default: None,
                description: None,
            }],
            cleanup_on_success: None,
            cleanup_on_failure: None,
            cleanup_on_stop: None,
            internal: false,
        };
        let module = module_with(def);
        let mut provided = HashMap::new();
        provided.insert("greeting".to_string(), json!("hi"));
        let baked = bake(&module, "main", &provided).expect("bake");
        assert_eq!(baked.steps.len(), 1);
        match &baked.steps[0].spec {
            StepSpec::Shell(s) => assert_eq!(s.command, "echo hi"),
            _ => panic!("expected shell"),
        }
    }

    #[test]
    fn missing_required_variable_errors() {
        let def = WorkflowDef {
            steps: vec![],
            variables: vec![VariableSchema {
                name: "x".into(),
                required: true,
                default: None,
                description: None,
            }],
            cleanup_on_success: None,
            cleanup_on_failure: None,
            cleanup_on_stop: None,
            internal: false,
        };
        let module = module_with(def);
        assert_eq!(
            bake(&module, "main", &HashMap::new()).unwrap_err(),
            BakeError::VariableMissing("x".to_string())
        );
    }

    #[test]
    fn outputs_placeholder_is_left_for_dispatch_time() {
        let def = WorkflowDef {
            steps: vec![shell_step("b", "cat {{outputs.a.path}}", &["a"])],
            variables: vec![],
            cleanup_on_success: None,
            cleanup_on_failure: None,
            cleanup_on_stop: None,
            internal: false,
        };
        let mut steps = def.steps.clone();
        steps.insert(0, shell_step("a", "echo x", &[]));
        let def = WorkflowDef { steps, ..def };
        let module = module_with(def);
        let baked = bake(&module, "main", &HashMap::new()).expect("bake");
        match &baked.steps[1].spec {
            StepSpec::Shell(s) => assert_eq!(s.command, "cat {{outputs.a.path}}"),
            _ => panic!("expected shell"),
        }
    }

    #[test]
    fn rejects_output_reference_to_unknown_step() {
        let def = WorkflowDef {
            steps: vec![shell_step("b", "cat {{outputs.ghost.path}}", &[])],
            variables: vec![],
            cleanup_on_success: None,
            cleanup_on_failure: None,
            cleanup_on_stop: None,
            internal: false,
        };
        let module = module_with(def);
        assert_eq!(
            bake(&module, "main", &HashMap::new()).unwrap_err(),
            BakeError::UnknownOutputReference {
                step: "b".to_string(),
                target: "ghost".to_string(),
            }
        );
    }

    #[test]
    fn rejects_output_reference_to_a_non_output_producing_step() {
        let def = WorkflowDef {
            steps: vec![
                branch_step("cond", &[]),
                shell_step("b", "cat {{outputs.cond.path}}", &["cond"]),
            ],
            variables: vec![],
            cleanup_on_success: None,
            cleanup_on_failure: None,
            cleanup_on_stop: None,
            internal: false,
        };
        let module = module_with(def);
        assert_eq!(
            bake(&module, "main", &HashMap::new()).unwrap_err(),
            BakeError::OutputlessStepReferenced {
                step: "b".to_string(),
                target: "cond".to_string(),
            }
        );
    }

    #[test]
    fn detects_cycle() {
        let def = WorkflowDef {
            steps: vec![shell_step("a", "x", &["b"]), shell_step("b", "y", &["a"])],
            variables: vec![],
            cleanup_on_success: None,
            cleanup_on_failure: None,
            cleanup_on_stop: None,
            internal: false,
        };
        let module = module_with(def);
        assert!(matches!(
            bake(&module, "main", &HashMap::new()),
            Err(BakeError::DependencyCycle(_))
        ));
    }

    #[test]
    fn detects_unknown_needs() {
        let def = WorkflowDef {
            steps: vec![shell_step("a", "x", &["ghost"])],
            variables: vec![],
            cleanup_on_success: None,
            cleanup_on_failure: None,
            cleanup_on_stop: None,
            internal: false,
        };
        let module = module_with(def);
        assert!(matches!(
            bake(&module, "main", &HashMap::new()),
            Err(BakeError::UnknownNeeds { .. })
        ));
    }

    #[test]
    fn unknown_workflow_name_errors() {
        let module = module_with(WorkflowDef {
            steps: vec![],
            variables: vec![],
            cleanup_on_success: None,
            cleanup_on_failure: None,
            cleanup_on_stop: None,
            internal: false,
        });
        assert!(matches!(
            bake(&module, "ghost", &HashMap::new()),
            Err(BakeError::WorkflowNotFound(_))
        ));
    }

    #[test]
    fn prefix_child_ids_rewrites_needs_and_parent() {
        let steps = vec![
            Step {
                id: StepId::new("0"),
                executor: meow_core::ExecutorKind::Shell,
                status: StepStatus::Pending,
                needs: HashSet::new(),
                spec: StepSpec::Shell(ShellSpec {
                    command: "true".into(),
                    workdir: None,
                    env: HashMap::new(),
                    timeout_secs: None,
                }),
                outputs: HashMap::new(),
                error: None,
                started_at: None,
                finished_at: None,
                parent_step_id: None,
                allow_failure: false,
            },
        ];
        let renamed = prefix_child_ids(steps, "parent");
        assert_eq!(renamed[0].id.as_str(), "parent/0");
        assert_eq!(renamed[0].parent_step_id.as_ref().map(|p| p.as_str()), Some("parent"));
    }

    #[test]
    fn bake_rejects_internal_workflow_as_top_level() {
        let def = WorkflowDef {
            steps: vec![shell_step("a", "true", &[])],
            variables: vec![],
            cleanup_on_success: None,
            cleanup_on_failure: None,
            cleanup_on_stop: None,
            internal: true,
        };
        let module = module_with(def);
        assert_eq!(
            bake(&module, "main", &HashMap::new()).unwrap_err(),
            BakeError::InternalWorkflow("main".to_string())
        );
    }

    #[test]
    fn bake_internal_allows_internal_workflows() {
        let def = WorkflowDef {
            steps: vec![shell_step("a", "true", &[])],
            variables: vec![],
            cleanup_on_success: None,
            cleanup_on_failure: None,
            cleanup_on_stop: None,
            internal: true,
        };
        let module = module_with(def);
        let baked = bake_internal(&module, "main", &HashMap::new()).expect("bake_internal");
        assert_eq!(baked.steps.len(), 1);
    }
}
