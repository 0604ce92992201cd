//! Waypoint pipeline engine.
//!
//! Executes directed workflows described as annotated graphs: each node is a
//! unit of work dispatched to a typed handler, each edge carries routing
//! metadata. The engine traverses one node at a time, selects edges through a
//! deterministic priority cascade, retries with exponential backoff, enforces
//! goal gates at terminal nodes, checkpoints after every stage, and emits
//! lifecycle events to registered observers.

pub mod checkpoint;
pub mod condition;
pub mod engine;
pub mod events;
pub mod goal_gate;
pub mod graph;
pub mod handler;
pub mod handlers;
pub mod interviewer;
pub mod retry;
pub mod routing;
pub mod stylesheet;
pub mod validation;

pub use checkpoint::{clear_checkpoint, load_checkpoint, save_checkpoint};
pub use condition::evaluate_condition;
pub use engine::{Engine, RunReport};
pub use events::{ChannelObserver, EventEmitter, EventObserver, PipelineEvent};
pub use goal_gate::{check_goal_gates, resolve_retry_target, GateCheck};
pub use graph::{Edge, Graph, Node};
pub use handler::{
    shape_handler_type, ConditionalHandler, ExitHandler, HandlerRegistry, NodeHandler,
    StartHandler,
};
pub use handlers::{
    BackendReply, ChildLauncher, ChildProcess, ChildSignal, CodergenBackend, CodergenHandler,
    EngineChildLauncher, FanInHandler, ManagerLoopHandler, ParallelHandler, ToolHandler,
    WaitHumanHandler,
};
pub use interviewer::{
    Answer, AnswerStatus, AutoApproveInterviewer, Choice, ConsoleInterviewer, Interviewer,
    Question, ScriptedInterviewer,
};
pub use retry::{attempt_budget, RetryPolicy};
pub use routing::select_edge;
pub use stylesheet::{apply_stylesheet, ModelStylesheet, Selector, StyleRule};
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
