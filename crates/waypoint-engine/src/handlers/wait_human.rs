//! Human-gate handler (`hexagon` shape): pause, ask, route on the reply.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use waypoint_types::{Context, Outcome, Result};

use crate::events::{EventEmitter, PipelineEvent};
use crate::graph::{Edge, Graph, Node};
use crate::handler::NodeHandler;
use crate::handlers::stage_dir;
use crate::interviewer::{Answer, AnswerStatus, Choice, Interviewer, Question};
use crate::routing::normalize_label;

pub struct WaitHumanHandler {
    interviewer: Option<Arc<dyn Interviewer>>,
    emitter: EventEmitter,
}

impl WaitHumanHandler {
    pub fn new(interviewer: Arc<dyn Interviewer>, emitter: EventEmitter) -> Self {
        Self {
            interviewer: Some(interviewer),
            emitter,
        }
    }

    /// No interviewer attached: the handler takes the first edge.
    pub fn simulation(emitter: EventEmitter) -> Self {
        Self {
            interviewer: None,
            emitter,
        }
    }
}

/// Match a chosen label back to one of the node's outgoing edges: exact label
/// first, then normalized label, then accelerator key.
fn edge_for_choice<'g>(edges: &'g [Edge], choices: &[Choice], picked: &str) -> Option<&'g Edge> {
    if let Some(choice) = choices.iter().find(|c| c.label == picked) {
        return edges.iter().find(|e| e.to == choice.target);
    }
    let wanted = normalize_label(picked);
    if let Some(choice) = choices
        .iter()
        .find(|c| normalize_label(&c.label) == wanted)
    {
        return edges.iter().find(|e| e.to == choice.target);
    }
    let mut keys = picked.trim().chars();
    if let (Some(key), None) = (keys.next(), keys.next()) {
        let key = key.to_ascii_lowercase();
        if let Some(choice) = choices.iter().find(|c| c.key == Some(key)) {
            return edges.iter().find(|e| e.to == choice.target);
        }
    }
    None
}

async fn write_answer(dir: &Path, answer: &Answer) -> Result<()> {
    let json = serde_json::to_string_pretty(answer)?;
    tokio::fs::write(dir.join("answer.json"), json).await?;
    Ok(())
}

#[async_trait]
impl NodeHandler for WaitHumanHandler {
    fn handler_type(&self) -> &str {
        "wait.human"
    }

    async fn execute(
        &self,
        node: &Node,
        _context: &Context,
        graph: &Graph,
        logs_root: &Path,
    ) -> Result<Outcome> {
        let edges = graph.outgoing_edges(&node.id);
        let choices: Vec<Choice> = edges
            .iter()
            .map(|e| {
                let label = e.label().unwrap_or_else(|| e.to.clone());
                Choice::from_edge_label(&label, &e.to)
            })
            .collect();

        let default_choice = node
            .attr_str("human.default_choice")
            .or_else(|| graph.attr_str("human.default_choice"))
            .filter(|s| !s.is_empty());

        let question = Question {
            node_id: node.id.clone(),
            prompt: node.prompt().unwrap_or_else(|| node.label()),
            choices,
            default_choice: default_choice.clone(),
            timeout: node.timeout(),
        };

        let dir = stage_dir(logs_root, &node.id).await?;
        tokio::fs::write(
            dir.join("question.json"),
            serde_json::to_string_pretty(&question)?,
        )
        .await?;

        let Some(interviewer) = &self.interviewer else {
            // Simulation: take the first edge.
            let Some(first) = edges.first() else {
                return Ok(Outcome::fail(format!(
                    "human gate '{}' has no outgoing edges",
                    node.id
                )));
            };
            let answer = Answer::answered(
                question
                    .choices
                    .first()
                    .map(|c| c.label.clone())
                    .unwrap_or_else(|| first.to.clone()),
            );
            write_answer(&dir, &answer).await?;
            return Ok(Outcome::success("no interviewer registered; taking first edge")
                .with_suggested_next(vec![first.to.clone()]));
        };

        self.emitter.emit(PipelineEvent::InterviewStarted {
            node_id: node.id.clone(),
            question: question.prompt.clone(),
        });

        let answer = match question.timeout {
            Some(limit) => match tokio::time::timeout(limit, interviewer.ask(&question)).await {
                Ok(result) => result?,
                Err(_) => Answer::timeout(),
            },
            None => interviewer.ask(&question).await?,
        };
        write_answer(&dir, &answer).await?;

        match answer.status {
            AnswerStatus::Answered => {
                let picked = answer.choice.unwrap_or_default();
                self.emitter.emit(PipelineEvent::InterviewCompleted {
                    node_id: node.id.clone(),
                    answer: picked.clone(),
                });
                let mut outcome =
                    Outcome::success("human responded").with_preferred_label(picked.clone());
                if let Some(edge) = edge_for_choice(edges, &question.choices, &picked) {
                    outcome = outcome.with_suggested_next(vec![edge.to.clone()]);
                }
                Ok(outcome)
            }
            AnswerStatus::Timeout => {
                self.emitter.emit(PipelineEvent::InterviewTimeout {
                    node_id: node.id.clone(),
                });
                match default_choice {
                    Some(default) => {
                        let mut outcome = Outcome::success("interview timed out; default choice taken")
                            .with_preferred_label(default.clone());
                        if let Some(edge) = edge_for_choice(edges, &question.choices, &default) {
                            outcome = outcome.with_suggested_next(vec![edge.to.clone()]);
                        }
                        Ok(outcome)
                    }
                    None => Ok(Outcome::retry("interview timed out")),
                }
            }
            AnswerStatus::Skipped => Ok(Outcome::fail("interview skipped")),
        }
    }
}
