//! Human-interaction contract used by the `wait.human` handler.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use waypoint_types::Result;

/// One selectable choice, usually derived from an outgoing edge label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Accelerator key parsed from a `[X]`, `X)`, or `X -` label prefix.
    pub key: Option<char>,
    pub label: String,
    /// Target node id of the edge this choice maps to.
    pub target: String,
}

impl Choice {
    /// Build a choice from an edge label, splitting off the accelerator key.
    pub fn from_edge_label(label: &str, target: &str) -> Self {
        let (key, _) = split_accelerator(label);
        Self {
            key,
            label: label.to_string(),
            target: target.to_string(),
        }
    }
}

/// Split a leading accelerator marker off a label: `[Y] Yes` / `Y) Yes` /
/// `Y - Yes` all yield `(Some('y'), "Yes")`. Labels without a marker come
/// back untouched.
pub fn split_accelerator(label: &str) -> (Option<char>, &str) {
    let trimmed = label.trim();
    let chars: Vec<char> = trimmed.chars().take(3).collect();

    if chars.len() >= 3 && chars[0] == '[' && chars[1].is_ascii_alphanumeric() && chars[2] == ']' {
        let rest = trimmed[3..].trim_start();
        return (Some(chars[1].to_ascii_lowercase()), rest);
    }
    if chars.len() >= 2 && chars[0].is_ascii_alphanumeric() && chars[1] == ')' {
        let rest = trimmed[2..].trim_start();
        return (Some(chars[0].to_ascii_lowercase()), rest);
    }
    if let Some(first) = chars.first() {
        if first.is_ascii_alphanumeric() {
            let after = &trimmed[first.len_utf8()..];
            let stripped = after.trim_start();
            if let Some(rest) = stripped.strip_prefix('-') {
                return (Some(first.to_ascii_lowercase()), rest.trim_start());
            }
        }
    }
    (None, trimmed)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub node_id: String,
    pub prompt: String,
    pub choices: Vec<Choice>,
    pub default_choice: Option<String>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Answered,
    Timeout,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub status: AnswerStatus,
    /// Chosen label when `status` is `Answered`.
    pub choice: Option<String>,
}

impl Answer {
    pub fn answered(choice: impl Into<String>) -> Self {
        Self {
            status: AnswerStatus::Answered,
            choice: Some(choice.into()),
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: AnswerStatus::Timeout,
            choice: None,
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: AnswerStatus::Skipped,
            choice: None,
        }
    }
}

#[async_trait]
pub trait Interviewer: Send + Sync {
    async fn ask(&self, question: &Question) -> Result<Answer>;
}

// ---------------------------------------------------------------------------
// AutoApproveInterviewer
// ---------------------------------------------------------------------------

/// Always answers with the default choice, else the first choice. Useful for
/// unattended runs.
pub struct AutoApproveInterviewer;

#[async_trait]
impl Interviewer for AutoApproveInterviewer {
    async fn ask(&self, question: &Question) -> Result<Answer> {
        let choice = question
            .default_choice
            .clone()
            .or_else(|| question.choices.first().map(|c| c.label.clone()));
        Ok(match choice {
            Some(c) => Answer::answered(c),
            None => Answer::skipped(),
        })
    }
}

// ---------------------------------------------------------------------------
// ConsoleInterviewer
// ---------------------------------------------------------------------------

/// Prompts on stdout and reads the reply from stdin. Accepts a choice number,
/// an accelerator key, or the full label; an empty reply takes the default.
pub struct ConsoleInterviewer;

#[async_trait]
impl Interviewer for ConsoleInterviewer {
    async fn ask(&self, question: &Question) -> Result<Answer> {
        println!("\n{}", question.prompt);
        for (i, choice) in question.choices.iter().enumerate() {
            println!("  [{}] {}", i + 1, choice.label);
        }

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        let reply = input.trim();

        if reply.is_empty() {
            if let Some(default) = &question.default_choice {
                return Ok(Answer::answered(default.clone()));
            }
            return Ok(Answer::skipped());
        }
        if let Ok(n) = reply.parse::<usize>() {
            if n >= 1 && n <= question.choices.len() {
                return Ok(Answer::answered(question.choices[n - 1].label.clone()));
            }
        }
        if reply.chars().count() == 1 {
            let key = reply.chars().next().unwrap().to_ascii_lowercase();
            if let Some(choice) = question.choices.iter().find(|c| c.key == Some(key)) {
                return Ok(Answer::answered(choice.label.clone()));
            }
        }
        Ok(Answer::answered(reply.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ScriptedInterviewer
// ---------------------------------------------------------------------------

/// Replays preset answers and records the questions it was asked. Test double.
pub struct ScriptedInterviewer {
    answers: Mutex<VecDeque<Answer>>,
    asked: Mutex<Vec<Question>>,
}

impl ScriptedInterviewer {
    pub fn new(answers: Vec<Answer>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<Question> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Interviewer for ScriptedInterviewer {
    async fn ask(&self, question: &Question) -> Result<Answer> {
        self.asked.lock().unwrap().push(question.clone());
        let next = self.answers.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| {
            question
                .choices
                .first()
                .map(|c| Answer::answered(c.label.clone()))
                .unwrap_or_else(Answer::skipped)
        }))
    }
}
