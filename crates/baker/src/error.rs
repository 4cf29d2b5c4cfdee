// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BakeError {
    #[error("workflow '{0}' not found in module")]
    WorkflowNotFound(String),
    #[error("workflow '{0}' is internal and cannot be baked as a top-level run")]
    InternalWorkflow(String),
    #[error("required variable '{0}' was not supplied and has no default")]
    VariableMissing(String),
    #[error("duplicate step id: {0}")]
    DuplicateStepId(String),
    #[error("step '{step}' needs unknown step '{target}'")]
    UnknownNeeds { step: String, target: String },
    #[error("branch step '{step}' targets unknown step '{target}'")]
    UnknownBranchTarget { step: String, target: String },
    #[error("dependency cycle detected involving step '{0}'")]
    DependencyCycle(String),
    #[error("unresolved variable reference '{0}' at bake time")]
    UnresolvedVariable(String),
    #[error("step '{step}' references outputs of unknown step '{target}'")]
    UnknownOutputReference { step: String, target: String },
    #[error("step '{step}' references outputs of step '{target}', whose executor produces none")]
    OutputlessStepReferenced { step: String, target: String },
}

impl From<meow_core::OutputReferenceError> for BakeError {
    fn from(err: meow_core::OutputReferenceError) -> Self {
        match err {
            meow_core::OutputReferenceError::UnknownStep { step, target } => {
                BakeError::UnknownOutputReference { step, target }
            }
            meow_core::OutputReferenceError::NoOutputs { step, target } => {
                BakeError::OutputlessStepReferenced { step, target }
            }
        }
    }
}
