//! Executor agent: performs one work item at a time.

use crate::core::classifier::classify;
use crate::core::reassembler::Record;
use crate::core::session::Iteration;
use crate::core::types::{Role, Task};
use crate::io::prompt::{
    PromptBuilder, PromptContext, Purpose, Template, TemplatePromptBuilder,
};

use super::{Classification, RoleAgent};

pub struct ExecutorAgent {
    prompts: Box<dyn PromptBuilder>,
}

impl ExecutorAgent {
    pub fn new(prompt_budget_bytes: usize, history_iterations: usize) -> Self {
        Self::with_prompts(Box::new(TemplatePromptBuilder::new(
            Template::Executor,
            prompt_budget_bytes,
            history_iterations,
        )))
    }

    pub fn with_prompts(prompts: Box<dyn PromptBuilder>) -> Self {
        Self { prompts }
    }
}

impl RoleAgent for ExecutorAgent {
    fn role(&self) -> Role {
        Role::Executor
    }

    fn prompt(&self, task: &Task, context: &PromptContext, prior: &[Iteration]) -> String {
        self.prompts.build(task, context, prior)
    }

    // Fallback iterations are classified the same way as supervised ones.
    fn classify(&self, records: &[Record], task: &Task, _purpose: Purpose) -> Classification {
        let (output, decision) = classify(records, Role::Executor, task);
        Classification {
            output,
            decision,
            verdict: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{HandoffReason, WorkItem};

    #[test]
    fn executor_prompt_carries_work_item() {
        let agent = ExecutorAgent::new(10_000, 4);
        let task = Task::new("Speed up the build", "/tmp");
        let context = PromptContext {
            current_item: Some(WorkItem::new("Enable incremental compilation")),
            ..PromptContext::new(Purpose::Execute)
        };
        let prompt = agent.prompt(&task, &context, &[]);
        assert!(prompt.contains("Executor Contract"));
        assert!(prompt.contains("Enable incremental compilation"));
    }

    #[test]
    fn fallback_prompt_works_without_supervision() {
        let agent = ExecutorAgent::new(10_000, 4);
        let task = Task::new("Speed up the build", "/tmp");
        let prompt = agent.prompt(&task, &PromptContext::new(Purpose::Fallback), &[]);
        assert!(prompt.contains("working alone"));
        assert!(!prompt.contains("### Work Item"));
    }

    #[test]
    fn executor_classifies_failures() {
        let agent = ExecutorAgent::new(10_000, 4);
        let task = Task::new("goal", "/tmp");
        let got = agent.classify(
            &[Record::Text("Error: connection refused".to_string())],
            &task,
            Purpose::Execute,
        );
        assert_eq!(got.decision.reason, HandoffReason::ExecutorNeedsHelp);
    }
}
