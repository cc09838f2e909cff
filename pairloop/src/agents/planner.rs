//! Planner agent: decomposes the goal and reviews finished work.

use crate::core::classifier::{classify, classify_verdict};
use crate::core::reassembler::Record;
use crate::core::session::Iteration;
use crate::core::types::{HandoffDecision, Role, Task};
use crate::io::prompt::{
    PromptBuilder, PromptContext, Purpose, Template, TemplatePromptBuilder,
};

use super::{Classification, RoleAgent};

pub struct PlannerAgent {
    prompts: Box<dyn PromptBuilder>,
}

impl PlannerAgent {
    pub fn new(prompt_budget_bytes: usize, history_iterations: usize) -> Self {
        Self::with_prompts(Box::new(TemplatePromptBuilder::new(
            Template::Planner,
            prompt_budget_bytes,
            history_iterations,
        )))
    }

    pub fn with_prompts(prompts: Box<dyn PromptBuilder>) -> Self {
        Self { prompts }
    }
}

impl RoleAgent for PlannerAgent {
    fn role(&self) -> Role {
        Role::Planner
    }

    fn prompt(&self, task: &Task, context: &PromptContext, prior: &[Iteration]) -> String {
        self.prompts.build(task, context, prior)
    }

    fn classify(&self, records: &[Record], task: &Task, purpose: Purpose) -> Classification {
        if purpose == Purpose::Validate {
            let (output, verdict) = classify_verdict(records);
            return Classification {
                output,
                decision: HandoffDecision::none(),
                verdict: Some(verdict),
            };
        }
        let (output, decision) = classify(records, Role::Planner, task);
        Classification {
            output,
            decision,
            verdict: None,
        }
    }
}
