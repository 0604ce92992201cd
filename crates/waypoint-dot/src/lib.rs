//! Parser for the strict Graphviz subset used by Waypoint pipelines.
//!
//! Parses `digraph Name { ... }` documents into a typed AST: [`GraphAst`],
//! [`NodeAst`], [`EdgeAst`], [`SubgraphAst`], [`AttrValue`].
//!
//! # Example
//! ```
//! let ast = waypoint_dot::parse("digraph Demo { start -> work -> done }").unwrap();
//! assert_eq!(ast.name, "Demo");
//! assert_eq!(ast.edges.len(), 2);
//! ```

pub mod ast;
mod duration_serde;
mod parser;

pub use ast::{AttrMap, AttrValue, EdgeAst, GraphAst, NodeAst, SubgraphAst};
pub use parser::parse;
