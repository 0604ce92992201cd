//! Model stylesheet: CSS-like selectors that compute per-node LLM settings.
//!
//! The graph-level `model_stylesheet` attribute holds rules such as
//! `* { llm_model: default }` or `#review { reasoning_effort: high }`.
//! Selector kinds and their specificity: universal (`*`, 0), type (`name`,
//! 1), class (`.name`, 10), id (`#name`, 100). Higher specificity wins;
//! node attributes seed the config and rules may override them.

use std::collections::HashMap;

use crate::graph::{Graph, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectorKind {
    Universal,
    Type,
    Class,
    Id,
}

#[derive(Debug, Clone)]
pub struct Selector {
    raw: String,
    kind: SelectorKind,
}

impl Selector {
    pub fn parse(text: &str) -> Self {
        let raw = text.trim().to_string();
        let kind = if raw == "*" {
            SelectorKind::Universal
        } else if raw.starts_with('#') {
            SelectorKind::Id
        } else if raw.starts_with('.') {
            SelectorKind::Class
        } else {
            SelectorKind::Type
        };
        Self { raw, kind }
    }

    pub fn matches(&self, node: &Node) -> bool {
        match self.kind {
            SelectorKind::Universal => true,
            SelectorKind::Id => node.id == self.raw[1..],
            SelectorKind::Class => node.classes().iter().any(|c| c == &self.raw[1..]),
            SelectorKind::Type => node.node_type().as_deref() == Some(self.raw.as_str()),
        }
    }

    pub fn specificity(&self) -> u32 {
        match self.kind {
            SelectorKind::Universal => 0,
            SelectorKind::Type => 1,
            SelectorKind::Class => 10,
            SelectorKind::Id => 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StyleRule {
    pub selector: Selector,
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelStylesheet {
    rules: Vec<StyleRule>,
}

impl ModelStylesheet {
    /// Parse `selector { key: value; ... }` rules. `//` and `/* */` comments
    /// are removed first; malformed fragments are skipped.
    pub fn parse(source: &str) -> Self {
        let without_line = regex::Regex::new(r"(?m)//.*$").unwrap().replace_all(source, "");
        let cleaned = regex::Regex::new(r"(?s)/\*.*?\*/")
            .unwrap()
            .replace_all(&without_line, "");

        let rule_re = regex::Regex::new(r"([^{}]+)\{([^}]*)\}").unwrap();
        let mut rules = Vec::new();
        for cap in rule_re.captures_iter(&cleaned) {
            let selector = Selector::parse(&cap[1]);
            let mut properties = HashMap::new();
            for line in cap[2].split(';') {
                if let Some((key, value)) = line.split_once(':') {
                    let key = key.trim();
                    let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
                    if !key.is_empty() && !value.is_empty() {
                        properties.insert(key.to_string(), value.to_string());
                    }
                }
            }
            rules.push(StyleRule { selector, properties });
        }
        Self { rules }
    }

    /// Computed properties for a node: matching rules applied in ascending
    /// specificity, later higher-specificity rules overriding earlier ones.
    pub fn apply(&self, node: &Node) -> HashMap<String, String> {
        let mut ordered: Vec<&StyleRule> = self.rules.iter().collect();
        ordered.sort_by_key(|r| r.selector.specificity());

        let mut computed = HashMap::new();
        for rule in ordered {
            if rule.selector.matches(node) {
                computed.extend(rule.properties.clone());
            }
        }
        computed
    }

    /// Per-node model configuration: explicit node attributes seeded first,
    /// stylesheet rules layered on top.
    pub fn model_config(&self, node: &Node) -> HashMap<String, String> {
        let mut config = HashMap::new();
        for key in ["llm_model", "llm_provider", "reasoning_effort"] {
            if let Some(value) = node.attr_str(key) {
                config.insert(key.to_string(), value);
            }
        }
        config.extend(self.apply(node));
        config
    }
}

/// Parse the graph's `model_stylesheet` attribute and compute the config for
/// every node.
pub fn apply_stylesheet(graph: &Graph) -> HashMap<String, HashMap<String, String>> {
    let sheet = ModelStylesheet::parse(&graph.model_stylesheet().unwrap_or_default());
    graph
        .nodes()
        .map(|n| (n.id.clone(), sheet.model_config(n)))
        .collect()
}
