//! Task state and the prompts rendered from it

use std::collections::BTreeMap;

pub const INITIAL_THOUGHT: &str = "I'll solve this task step by step.";
pub const TRUNCATION_MARKER: &str = "... [Truncated]";

/// Progress estimate after a round, and after a successful tool
pub const ROUND_PROGRESS_CAP: u8 = 85;
pub const TOOL_PROGRESS_CAP: u8 = 90;
const PROGRESS_STEP: u8 = 5;

/// Where a task ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    /// `final_answer` succeeded
    Completed,
    /// Budget spent, answer came from the summary call
    Exhausted,
    Failed,
}

/// Working memory of one task execution
#[derive(Debug, Clone, PartialEq)]
pub struct TaskState {
    pub original_query: String,
    pub iteration: u32,
    pub max_iterations: u32,
    /// Advisory only
    pub completion_percent: u8,
    /// Label to full text; truncated only when rendered
    pub results: BTreeMap<String, String>,
    pub current_thought: String,
    pub status: TaskStatus,
}

impl TaskState {
    pub fn new(query: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            original_query: query.into(),
            iteration: 0,
            max_iterations,
            completion_percent: 0,
            results: BTreeMap::new(),
            current_thought: INITIAL_THOUGHT.to_string(),
            status: TaskStatus::Running,
        }
    }

    pub fn has_budget(&self) -> bool {
        self.status == TaskStatus::Running && self.iteration < self.max_iterations
    }

    pub fn advance_round(&mut self) {
        self.completion_percent = (self.completion_percent + PROGRESS_STEP).min(ROUND_PROGRESS_CAP);
    }

    pub fn advance_tool(&mut self) {
        self.completion_percent = (self.completion_percent + PROGRESS_STEP).min(TOOL_PROGRESS_CAP);
    }

    pub fn record(&mut self, label: impl Into<String>, text: impl Into<String>) {
        self.results.insert(label.into(), text.into());
    }

    /// Prompt for the next round
    pub fn render_prompt(&self, truncate_at: usize) -> String {
        let mut prompt = format!(
            "Original task: {}\n\nCurrent progress: {}%\nIteration: {} of {}\n\n",
            self.original_query, self.completion_percent, self.iteration, self.max_iterations
        );
        if !self.results.is_empty() {
            prompt.push_str("Information gathered so far:\n");
            for (source, result) in &self.results {
                prompt.push_str(&format!(
                    "Results source: {}\n<RESULTS>\n{}\n</RESULTS>\n",
                    source,
                    truncate(result, truncate_at)
                ));
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!(
            "\n\nCurrent thought: {}\n\n\
             What should I do next to complete this task? Is the task finished? \
             If so, provide the final answer.",
            self.current_thought
        ));
        prompt.trim().to_string()
    }

    /// Prompt for the closing summary once the budget is spent
    pub fn render_summary(&self) -> String {
        let mut prompt = format!(
            "I've been working on this task: {}\n\nHere's what I've learned and done so far:\n\n",
            self.original_query
        );
        for (source, result) in &self.results {
            prompt.push_str(&format!("- From {}: {}\n", source, result));
        }
        prompt.push_str(
            "I've reached the maximum number of iterations. \
             Based on the above, provide a comprehensive final answer.",
        );
        prompt
    }
}

/// Cut `text` after `max_chars` characters and mark the cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => format!("{}{}", &text[..byte], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}
