//! Handler contract and registry.
//!
//! Each node resolves to a handler by explicit `type` attribute, then by
//! shape, then to the registry default. Handlers receive the node, the shared
//! context, the graph, and the run's logs root, and must fold every side
//! effect into the returned [`Outcome`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use waypoint_types::{Context, Outcome, Result, WaypointError};

use crate::graph::{Graph, Node};

#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Registry key, e.g. `"codergen"` or `"stack.manager_loop"`.
    fn handler_type(&self) -> &str;

    async fn execute(
        &self,
        node: &Node,
        context: &Context,
        graph: &Graph,
        logs_root: &Path,
    ) -> Result<Outcome>;
}

/// Built-in shape → handler type mapping.
pub fn shape_handler_type(shape: &str) -> Option<&'static str> {
    Some(match shape {
        "Mdiamond" => "start",
        "Msquare" => "exit",
        "box" => "codergen",
        "hexagon" => "wait.human",
        "diamond" => "conditional",
        "component" => "parallel",
        "tripleoctagon" => "parallel.fan_in",
        "parallelogram" => "tool",
        "house" => "stack.manager_loop",
        _ => return None,
    })
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
    default: Option<Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: impl NodeHandler + 'static) {
        self.register_arc(Arc::new(handler));
    }

    pub fn register_arc(&mut self, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(handler.handler_type().to_string(), handler);
    }

    /// Handler used when neither the `type` attribute nor the shape resolves.
    pub fn set_default(&mut self, handler: impl NodeHandler + 'static) {
        self.default = Some(Arc::new(handler));
    }

    pub fn get(&self, handler_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(handler_type).cloned()
    }

    pub fn has(&self, handler_type: &str) -> bool {
        self.handlers.contains_key(handler_type)
    }

    /// Resolution order: explicit registered `type`, shape mapping, default.
    pub fn resolve(&self, node: &Node) -> Result<Arc<dyn NodeHandler>> {
        if let Some(t) = node.node_type() {
            if let Some(handler) = self.handlers.get(&t) {
                return Ok(handler.clone());
            }
        }
        if let Some(t) = shape_handler_type(&node.shape()) {
            if let Some(handler) = self.handlers.get(t) {
                return Ok(handler.clone());
            }
        }
        if let Some(handler) = &self.default {
            return Ok(handler.clone());
        }
        Err(WaypointError::NoHandler {
            node: node.id.clone(),
            shape: node.shape(),
            node_type: node.node_type(),
        })
    }

    /// The resolved handler type name, for logging and events.
    pub fn resolve_type(&self, node: &Node) -> String {
        self.resolve(node)
            .map(|h| h.handler_type().to_string())
            .unwrap_or_else(|_| "unresolved".to_string())
    }

    /// Registry with every built-in handler and codergen (simulation mode) as
    /// the default.
    pub fn with_defaults(emitter: &crate::events::EventEmitter) -> Self {
        use crate::handlers;

        let mut registry = Self::new();
        registry.register(StartHandler);
        registry.register(ExitHandler);
        registry.register(ConditionalHandler);
        registry.register(handlers::CodergenHandler::simulation());
        registry.register(handlers::ToolHandler);
        registry.register(handlers::WaitHumanHandler::simulation(emitter.clone()));
        registry.register(handlers::ParallelHandler::new(emitter.clone()));
        registry.register(handlers::FanInHandler);
        registry.register(handlers::ManagerLoopHandler::default());
        registry.set_default(handlers::CodergenHandler::simulation());
        registry
    }

    /// [`with_defaults`](Self::with_defaults) plus a live interviewer for
    /// `wait.human` nodes.
    pub fn with_interviewer(
        emitter: &crate::events::EventEmitter,
        interviewer: Arc<dyn crate::interviewer::Interviewer>,
    ) -> Self {
        let mut registry = Self::with_defaults(emitter);
        registry.register(crate::handlers::WaitHumanHandler::new(
            interviewer,
            emitter.clone(),
        ));
        registry
    }
}

// ---------------------------------------------------------------------------
// Trivial built-ins
// ---------------------------------------------------------------------------

/// Entry no-op.
pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    fn handler_type(&self) -> &str {
        "start"
    }

    async fn execute(
        &self,
        _node: &Node,
        _context: &Context,
        _graph: &Graph,
        _logs_root: &Path,
    ) -> Result<Outcome> {
        Ok(Outcome::success("pipeline started"))
    }
}

/// Terminal no-op.
pub struct ExitHandler;

#[async_trait]
impl NodeHandler for ExitHandler {
    fn handler_type(&self) -> &str {
        "exit"
    }

    async fn execute(
        &self,
        _node: &Node,
        _context: &Context,
        _graph: &Graph,
        _logs_root: &Path,
    ) -> Result<Outcome> {
        Ok(Outcome::success("pipeline finished"))
    }
}

/// Pure routing node; the edge algorithm does the work.
pub struct ConditionalHandler;

#[async_trait]
impl NodeHandler for ConditionalHandler {
    fn handler_type(&self) -> &str {
        "conditional"
    }

    async fn execute(
        &self,
        node: &Node,
        _context: &Context,
        _graph: &Graph,
        _logs_root: &Path,
    ) -> Result<Outcome> {
        Ok(Outcome::success(format!("conditional node '{}' evaluated", node.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventEmitter;

    fn node_with(dot: &str, id: &str) -> (Graph, Node) {
        let graph = Graph::from_ast(waypoint_dot::parse(dot).unwrap());
        let node = graph.node(id).unwrap().clone();
        (graph, node)
    }

    #[test]
    fn explicit_type_wins_over_shape() {
        let registry = HandlerRegistry::with_defaults(&EventEmitter::new());
        let (_, node) = node_with(r#"digraph G { n [shape="box", type="tool"] }"#, "n");
        assert_eq!(registry.resolve(&node).unwrap().handler_type(), "tool");
    }

    #[test]
    fn unregistered_type_falls_back_to_shape() {
        let registry = HandlerRegistry::with_defaults(&EventEmitter::new());
        let (_, node) = node_with(r#"digraph G { n [shape="parallelogram", type="custom"] }"#, "n");
        assert_eq!(registry.resolve(&node).unwrap().handler_type(), "tool");
    }

    #[test]
    fn shape_mapping_covers_builtins() {
        let registry = HandlerRegistry::with_defaults(&EventEmitter::new());
        let cases = [
            ("Mdiamond", "start"),
            ("Msquare", "exit"),
            ("box", "codergen"),
            ("hexagon", "wait.human"),
            ("diamond", "conditional"),
            ("component", "parallel"),
            ("tripleoctagon", "parallel.fan_in"),
            ("parallelogram", "tool"),
            ("house", "stack.manager_loop"),
        ];
        for (shape, expected) in cases {
            let (_, node) = node_with(&format!(r#"digraph G {{ n [shape="{shape}"] }}"#), "n");
            assert_eq!(registry.resolve(&node).unwrap().handler_type(), expected, "shape {shape}");
        }
    }

    #[test]
    fn unknown_shape_uses_default() {
        let registry = HandlerRegistry::with_defaults(&EventEmitter::new());
        let (_, node) = node_with(r#"digraph G { n [shape="cylinder"] }"#, "n");
        assert_eq!(registry.resolve(&node).unwrap().handler_type(), "codergen");
    }

    #[test]
    fn empty_registry_reports_no_handler() {
        let registry = HandlerRegistry::new();
        let (_, node) = node_with(r#"digraph G { n [shape="box"] }"#, "n");
        let err = match registry.resolve(&node) {
            Err(e) => e,
            Ok(_) => panic!("expected resolve to fail"),
        };
        assert!(matches!(err, WaypointError::NoHandler { .. }));
        assert_eq!(registry.resolve_type(&node), "unresolved");
    }

    #[tokio::test]
    async fn trivial_handlers_succeed() {
        let (graph, node) = node_with(r#"digraph G { n [shape="Mdiamond"] }"#, "n");
        let ctx = Context::new();
        let dir = std::env::temp_dir();

        for handler in [
            Box::new(StartHandler) as Box<dyn NodeHandler>,
            Box::new(ExitHandler),
            Box::new(ConditionalHandler),
        ] {
            let outcome = handler.execute(&node, &ctx, &graph, &dir).await.unwrap();
            assert!(outcome.status.is_success(), "{}", handler.handler_type());
        }
    }
}
