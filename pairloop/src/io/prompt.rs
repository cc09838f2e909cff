//! Prompt builders for the Planner and Executor roles.

use std::sync::LazyLock;

use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::session::Iteration;
use crate::core::types::{Task, WorkItem, truncate_chars};

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const EXECUTOR_TEMPLATE: &str = include_str!("prompts/executor.md");

const HISTORY_HEADLINE_CHARS: usize = 160;

/// What a prompt asks the external process to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Planner decomposes the goal into work items.
    Plan,
    /// Executor implements one work item.
    Execute,
    /// Planner reviews the Executor's work.
    Validate,
    /// Executor works alone after escalation.
    Fallback,
}

impl Purpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Purpose::Plan => "plan",
            Purpose::Execute => "execute",
            Purpose::Validate => "validate",
            Purpose::Fallback => "fallback",
        }
    }
}

/// Coordinator-supplied context for one prompt.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub purpose: Purpose,
    /// Every work item of the current plan.
    pub work_items: Vec<WorkItem>,
    /// The item being executed or reviewed.
    pub current_item: Option<WorkItem>,
    /// Failure output or rejection feedback from the previous attempt.
    pub feedback: Option<String>,
    /// The Executor's result text, for validation.
    pub executor_report: Option<String>,
}

impl PromptContext {
    pub fn new(purpose: Purpose) -> Self {
        Self {
            purpose,
            work_items: Vec::new(),
            current_item: None,
            feedback: None,
            executor_report: None,
        }
    }
}

/// Builds the prompt for one role. Must be a pure function of its inputs.
pub trait PromptBuilder {
    fn build(&self, task: &Task, context: &PromptContext, prior: &[Iteration]) -> String;
}

/// Which template a [`TemplatePromptBuilder`] renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Planner,
    Executor,
}

impl Template {
    fn name(self) -> &'static str {
        match self {
            Template::Planner => "planner",
            Template::Executor => "executor",
        }
    }
}

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("planner", PLANNER_TEMPLATE)
        .expect("planner template should be valid");
    env.add_template("executor", EXECUTOR_TEMPLATE)
        .expect("executor template should be valid");
    env
});

/// Renders a role template and fits it into a byte budget, dropping less
/// critical sections first.
#[derive(Debug, Clone)]
pub struct TemplatePromptBuilder {
    template: Template,
    budget_bytes: usize,
    history_iterations: usize,
}

impl TemplatePromptBuilder {
    pub fn new(template: Template, budget_bytes: usize, history_iterations: usize) -> Self {
        Self {
            template,
            budget_bytes,
            history_iterations,
        }
    }

    fn render(&self, task: &Task, ctx: &PromptContext, prior: &[Iteration]) -> String {
        let plan: Vec<&str> = ctx
            .work_items
            .iter()
            .map(|item| item.description.as_str())
            .collect();
        let history = history_lines(prior, self.history_iterations);
        let template = ENGINE
            .get_template(self.template.name())
            .expect("prompt template should be registered");
        template
            .render(context! {
                purpose => ctx.purpose.as_str(),
                goal => task.goal().trim(),
                item => ctx.current_item.as_ref().map(|item| item.description.trim()),
                report => non_blank(ctx.executor_report.as_deref()),
                feedback => non_blank(ctx.feedback.as_deref()),
                plan => (!plan.is_empty()).then_some(plan),
                history => (!history.is_empty()).then_some(history),
            })
            .expect("prompt template rendering should not fail")
    }
}

impl PromptBuilder for TemplatePromptBuilder {
    fn build(&self, task: &Task, context: &PromptContext, prior: &[Iteration]) -> String {
        let rendered = self.render(task, context, prior);
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|s| !s.is_empty())
}

/// One line per recent iteration, oldest first.
fn history_lines(prior: &[Iteration], limit: usize) -> Vec<String> {
    let skip = prior.len().saturating_sub(limit);
    prior
        .iter()
        .skip(skip)
        .map(|iteration| {
            let headline = iteration.output.headline(HISTORY_HEADLINE_CHARS);
            let summary = match &iteration.failure {
                Some(failure) => truncate_chars(failure, HISTORY_HEADLINE_CHARS),
                None if headline.is_empty() => "(no output)".to_string(),
                None => headline,
            };
            format!(
                "#{} {} [{}]: {}",
                iteration.seq, iteration.role, iteration.decision.reason, summary
            )
        })
        .collect()
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    /// Whether this section is required (cannot be dropped).
    required: bool,
    content: String,
}

/// Parse sections from rendered template output using HTML comment markers.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
    });

    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let required = kind.as_str() == "required";
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());

        let content = rendered[whole.end()..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

/// Apply budget to parsed sections, dropping droppable sections as needed.
///
/// Drop order: history -> plan -> feedback
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    if total_len(sections) <= budget {
        return;
    }

    for key in ["history", "plan", "feedback"] {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // Still over budget: truncate the largest section.
    if total_len(sections) <= budget {
        return;
    }
    let Some(idx) = (0..sections.len()).max_by_key(|&i| sections[i].content.len()) else {
        return;
    };
    let other_len = total_len(sections) - sections[idx].content.len();
    let allowed = budget.saturating_sub(other_len);
    let section = &mut sections[idx];
    let before_len = section.content.len();
    let marker = "\n[truncated]";
    let keep = floor_char_boundary(&section.content, allowed.saturating_sub(marker.len()));
    section.content.truncate(keep);
    if allowed > marker.len() {
        section.content.push_str(marker);
    }
    debug!(
        section = section.key,
        before_len,
        after_len = section.content.len(),
        "truncated section for budget"
    );
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Render sections back to a single string.
fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ExitStatus, HandoffDecision, ParsedOutput, Role};
    use chrono::Utc;

    fn task() -> Task {
        Task::new("Add a caching layer", "/tmp/work")
    }

    fn iteration(seq: u32, result: &str) -> Iteration {
        Iteration {
            seq,
            role: Role::Executor,
            prompt: String::new(),
            output: ParsedOutput {
                result: result.to_string(),
                ..ParsedOutput::default()
            },
            decision: HandoffDecision::none(),
            verdict: None,
            exit: ExitStatus::Success,
            duration_ms: 1,
            timestamp: Utc::now(),
            failure: None,
        }
    }

    fn executor_context() -> PromptContext {
        PromptContext {
            work_items: vec![
                WorkItem::new("Add the cache trait"),
                WorkItem::new("Wire the cache into the client"),
            ],
            current_item: Some(WorkItem::new("Add the cache trait")),
            feedback: Some("Error: tests failed".to_string()),
            ..PromptContext::new(Purpose::Execute)
        }
    }

    /// Verifies prompt sections appear in deterministic order.
    #[test]
    fn executor_prompt_ordering_is_stable() {
        let builder = TemplatePromptBuilder::new(Template::Executor, 10_000, 5);
        let prompt = builder.build(&task(), &executor_context(), &[iteration(1, "Started.")]);

        let positions: Vec<usize> = [
            "### Executor Contract",
            "### Goal",
            "### Work Item",
            "### Feedback",
            "### Full Plan",
            "### History",
        ]
        .iter()
        .map(|header| prompt.find(header).expect(header))
        .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(prompt.contains("2. Wire the cache into the client"));
        assert!(prompt.contains("- #1 executor [none]: Started."));
    }

    #[test]
    fn planner_prompt_switches_contract_for_validation() {
        let builder = TemplatePromptBuilder::new(Template::Planner, 10_000, 5);
        let plan = builder.build(&task(), &PromptContext::new(Purpose::Plan), &[]);
        assert!(plan.contains("Work items defined. Ready to implement."));
        assert!(!plan.contains("### Executor Report"));

        let validate = builder.build(
            &task(),
            &PromptContext {
                current_item: Some(WorkItem::new("Add the cache trait")),
                executor_report: Some("Task complete.".to_string()),
                ..PromptContext::new(Purpose::Validate)
            },
            &[],
        );
        assert!(validate.contains("quality gate"));
        assert!(validate.contains("### Executor Report"));
        assert!(validate.contains("<item>\nAdd the cache trait\n</item>"));
    }

    /// Verifies budget enforcement drops less critical sections first.
    #[test]
    fn budget_drops_history_before_required_sections() {
        let builder = TemplatePromptBuilder::new(Template::Executor, 900, 50);
        let prior: Vec<Iteration> = (1..=30)
            .map(|seq| iteration(seq, &"long progress note ".repeat(5)))
            .collect();
        let prompt = builder.build(&task(), &executor_context(), &prior);

        assert!(!prompt.contains("### History"), "history should be dropped");
        assert!(prompt.contains("### Executor Contract"));
        assert!(prompt.contains("### Goal"));
        assert!(prompt.contains("### Work Item"));
    }

    #[test]
    fn history_keeps_most_recent_iterations() {
        let prior: Vec<Iteration> = (1..=4).map(|seq| iteration(seq, "step")).collect();
        let lines = history_lines(&prior, 2);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("#3 "));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut sections = vec![ParsedSection {
            key: "goal".to_string(),
            required: true,
            content: "é".repeat(100),
        }];
        apply_budget_to_sections(&mut sections, 51);
        assert!(sections[0].content.len() <= 51);
        assert!(sections[0].content.ends_with("[truncated]"));
    }
}
