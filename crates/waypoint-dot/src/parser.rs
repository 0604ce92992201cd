//! Winnow-based parser for the Waypoint DOT dialect.
//!
//! Supported subset: `digraph Name { ... }` containing node statements with
//! bracketed attribute lists, chained edges (`a -> b -> c`), `graph`/`node`/
//! `edge` default blocks, bare `key = value` graph attributes, and flattened
//! subgraphs. Undirected graphs and `--` edges are rejected.

use std::collections::HashMap;
use std::time::Duration;

use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{alt, opt, preceded, repeat};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::token::{any, literal, take_while};
use winnow::{ModalResult, Parser};

use crate::ast::{AttrMap, AttrValue, EdgeAst, GraphAst, NodeAst, SubgraphAst};

fn cut_err(desc: &'static str) -> ErrMode<ContextError<StrContext>> {
    let mut err = ContextError::new();
    err.push(StrContext::Expected(StrContextValue::Description(desc)));
    ErrMode::Cut(err)
}

/// Remove `//` and `/* */` comments, leaving string literals untouched and
/// preserving newlines so error positions stay meaningful.
fn strip_comments(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    if bytes[i] == b'\n' {
                        out.push('\n');
                    }
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            b'"' => {
                out.push('"');
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\\' && i + 1 < bytes.len() {
                        out.push(bytes[i] as char);
                        out.push(bytes[i + 1] as char);
                        i += 2;
                    } else if bytes[i] == b'"' {
                        out.push('"');
                        i += 1;
                        break;
                    } else {
                        out.push(bytes[i] as char);
                        i += 1;
                    }
                }
            }
            c => {
                out.push(c as char);
                i += 1;
            }
        }
    }
    out
}

fn sp(input: &mut &str) -> ModalResult<()> {
    multispace0.void().parse_next(input)
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

/// Dotted attribute key such as `stack.child_dotfile`, or a plain identifier.
fn dotted_key(input: &mut &str) -> ModalResult<String> {
    let head = ident.parse_next(input)?;
    let tail: Vec<&str> = repeat(0.., preceded('.', ident)).parse_next(input)?;
    let mut key = head.to_string();
    for part in tail {
        key.push('.');
        key.push_str(part);
    }
    Ok(key)
}

/// Double-quoted string with `\n \t \\ \"` escapes.
fn string_lit(input: &mut &str) -> ModalResult<String> {
    '"'.parse_next(input)?;
    let mut value = String::new();
    loop {
        match any.parse_next(input)? {
            '"' => break,
            '\\' => match any.parse_next(input)? {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                '\\' => value.push('\\'),
                '"' => value.push('"'),
                other => {
                    value.push('\\');
                    value.push(other);
                }
            },
            c => value.push(c),
        }
    }
    Ok(value)
}

/// Integer with a unit suffix: `250ms`, `900s`, `15m`, `2h`, `7d`.
fn duration_lit(input: &mut &str) -> ModalResult<Duration> {
    let digits: &str = digit1.parse_next(input)?;
    let n: u64 = digits
        .parse()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))?;
    let unit = alt(("ms", "s", "m", "h", "d")).parse_next(input)?;
    Ok(match unit {
        "ms" => Duration::from_millis(n),
        "s" => Duration::from_secs(n),
        "m" => Duration::from_secs(n * 60),
        "h" => Duration::from_secs(n * 3600),
        "d" => Duration::from_secs(n * 86400),
        _ => unreachable!(),
    })
}

fn bool_lit(input: &mut &str) -> ModalResult<bool> {
    alt((literal("true").value(true), literal("false").value(false))).parse_next(input)
}

fn float_lit(input: &mut &str) -> ModalResult<f64> {
    let text: &str = (opt(alt(('-', '+'))), digit1, '.', digit1)
        .take()
        .parse_next(input)?;
    text.parse()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))
}

fn int_lit(input: &mut &str) -> ModalResult<i64> {
    let text: &str = (opt(alt(('-', '+'))), digit1).take().parse_next(input)?;
    text.parse()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))
}

fn value(input: &mut &str) -> ModalResult<AttrValue> {
    alt((
        string_lit.map(AttrValue::String),
        bool_lit.map(AttrValue::Boolean),
        duration_lit.map(AttrValue::Duration),
        float_lit.map(AttrValue::Float),
        int_lit.map(AttrValue::Integer),
        // bare-identifier values are treated as strings
        dotted_key.map(AttrValue::String),
    ))
    .parse_next(input)
}

fn attr_pair(input: &mut &str) -> ModalResult<(String, AttrValue)> {
    let key = dotted_key.parse_next(input)?;
    sp.parse_next(input)?;
    '='.parse_next(input)?;
    sp.parse_next(input)?;
    let val = value
        .context(StrContext::Expected(StrContextValue::Description(
            "attribute value",
        )))
        .parse_next(input)?;
    Ok((key, val))
}

/// `[ key=value (,|;)? ... ]`
fn attr_list(input: &mut &str) -> ModalResult<AttrMap> {
    '['.parse_next(input)?;
    sp.parse_next(input)?;
    let mut attrs = AttrMap::new();
    if let Some((key, val)) = opt(attr_pair).parse_next(input)? {
        attrs.insert(key, val);
        loop {
            sp.parse_next(input)?;
            opt(alt((',', ';'))).parse_next(input)?;
            sp.parse_next(input)?;
            match opt(attr_pair).parse_next(input)? {
                Some((key, val)) => {
                    attrs.insert(key, val);
                }
                None => break,
            }
        }
    }
    sp.parse_next(input)?;
    ']'.parse_next(input)?;
    Ok(attrs)
}

/// One parsed statement before graph assembly.
enum Item {
    GraphDefaults(AttrMap),
    NodeDefaults(AttrMap),
    EdgeDefaults(AttrMap),
    NodeDecl(String, AttrMap),
    EdgeChain(Vec<String>, AttrMap),
    Block(Option<String>, Vec<Item>),
    GraphAttr(String, AttrValue),
}

fn defaults_item(keyword: &'static str) -> impl FnMut(&mut &str) -> ModalResult<AttrMap> {
    move |input: &mut &str| {
        literal(keyword).parse_next(input)?;
        sp.parse_next(input)?;
        let attrs = attr_list.parse_next(input)?;
        sp.parse_next(input)?;
        opt(';').parse_next(input)?;
        Ok(attrs)
    }
}

fn subgraph_item(input: &mut &str) -> ModalResult<Item> {
    literal("subgraph").parse_next(input)?;
    sp.parse_next(input)?;
    let name = opt(ident).parse_next(input)?;
    sp.parse_next(input)?;
    '{'.parse_next(input)?;
    let body = items.parse_next(input)?;
    sp.parse_next(input)?;
    '}'.parse_next(input)?;
    sp.parse_next(input)?;
    opt(';').parse_next(input)?;
    Ok(Item::Block(name.map(str::to_string), body))
}

fn node_or_edge_item(input: &mut &str) -> ModalResult<Item> {
    let first = ident.parse_next(input)?;
    sp.parse_next(input)?;

    if opt(literal("->")).parse_next(input)?.is_some() {
        let mut chain = vec![first.to_string()];
        loop {
            sp.parse_next(input)?;
            let next = ident
                .context(StrContext::Expected(StrContextValue::Description(
                    "edge target",
                )))
                .parse_next(input)?;
            chain.push(next.to_string());
            sp.parse_next(input)?;
            if opt(literal("->")).parse_next(input)?.is_none() {
                break;
            }
        }
        let attrs = opt(attr_list).parse_next(input)?.unwrap_or_default();
        sp.parse_next(input)?;
        opt(';').parse_next(input)?;
        return Ok(Item::EdgeChain(chain, attrs));
    }

    if opt(literal("--")).parse_next(input)?.is_some() {
        return Err(cut_err("directed edge '->' (undirected '--' edges are not supported)"));
    }

    if let Some(attrs) = opt(attr_list).parse_next(input)? {
        sp.parse_next(input)?;
        opt(';').parse_next(input)?;
        return Ok(Item::NodeDecl(first.to_string(), attrs));
    }

    if opt('=').parse_next(input)?.is_some() {
        sp.parse_next(input)?;
        let val = value.parse_next(input)?;
        sp.parse_next(input)?;
        opt(';').parse_next(input)?;
        return Ok(Item::GraphAttr(first.to_string(), val));
    }

    opt(';').parse_next(input)?;
    Ok(Item::NodeDecl(first.to_string(), AttrMap::new()))
}

fn item(input: &mut &str) -> ModalResult<Item> {
    sp.parse_next(input)?;
    alt((
        defaults_item("graph").map(Item::GraphDefaults),
        defaults_item("node").map(Item::NodeDefaults),
        defaults_item("edge").map(Item::EdgeDefaults),
        subgraph_item,
        node_or_edge_item,
    ))
    .parse_next(input)
}

fn items(input: &mut &str) -> ModalResult<Vec<Item>> {
    let mut collected = Vec::new();
    loop {
        sp.parse_next(input)?;
        if input.is_empty() || input.starts_with('}') {
            break;
        }
        collected.push(item.parse_next(input)?);
    }
    Ok(collected)
}

struct Assembled {
    attrs: AttrMap,
    nodes: HashMap<String, NodeAst>,
    edges: Vec<EdgeAst>,
    subgraphs: Vec<SubgraphAst>,
    node_defaults: AttrMap,
    edge_defaults: AttrMap,
}

/// Fold parsed items into graph structure, layering defaults as they appear
/// and expanding edge chains pairwise. Nodes referenced only by edges are
/// created implicitly with the current node defaults.
fn assemble(items: Vec<Item>, parent_node_defaults: &AttrMap, parent_edge_defaults: &AttrMap) -> Assembled {
    let mut out = Assembled {
        attrs: AttrMap::new(),
        nodes: HashMap::new(),
        edges: Vec::new(),
        subgraphs: Vec::new(),
        node_defaults: parent_node_defaults.clone(),
        edge_defaults: parent_edge_defaults.clone(),
    };

    for item in items {
        match item {
            Item::GraphDefaults(attrs) => out.attrs.extend(attrs),
            Item::GraphAttr(key, val) => {
                out.attrs.insert(key, val);
            }
            Item::NodeDefaults(attrs) => out.node_defaults.extend(attrs),
            Item::EdgeDefaults(attrs) => out.edge_defaults.extend(attrs),
            Item::NodeDecl(id, mut attrs) => {
                for (k, v) in &out.node_defaults {
                    attrs.entry(k.clone()).or_insert_with(|| v.clone());
                }
                out.nodes.insert(id.clone(), NodeAst { id, attrs });
            }
            Item::EdgeChain(chain, attrs) => {
                for pair in chain.windows(2) {
                    let mut merged = out.edge_defaults.clone();
                    merged.extend(attrs.clone());
                    out.edges.push(EdgeAst {
                        from: pair[0].clone(),
                        to: pair[1].clone(),
                        attrs: merged,
                    });
                }
                for id in &chain {
                    out.nodes.entry(id.clone()).or_insert_with(|| NodeAst {
                        id: id.clone(),
                        attrs: out.node_defaults.clone(),
                    });
                }
            }
            Item::Block(name, body) => {
                let inner = assemble(body, &out.node_defaults, &out.edge_defaults);
                out.subgraphs.push(SubgraphAst {
                    name,
                    attrs: inner.attrs,
                    nodes: inner.nodes,
                    edges: inner.edges,
                    node_defaults: inner.node_defaults,
                    edge_defaults: inner.edge_defaults,
                });
                out.subgraphs.extend(inner.subgraphs);
            }
        }
    }

    out
}

fn digraph(input: &mut &str) -> ModalResult<GraphAst> {
    sp.parse_next(input)?;

    if input.starts_with("strict") {
        return Err(cut_err("'digraph' keyword (strict graphs are not supported)"));
    }
    if let Some(rest) = input.strip_prefix("graph") {
        let rest = rest.trim_start();
        if rest.starts_with('{') || rest.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Err(cut_err("'digraph' keyword (undirected graphs are not supported)"));
        }
    }

    literal("digraph")
        .context(StrContext::Expected(StrContextValue::StringLiteral("digraph")))
        .parse_next(input)?;
    sp.parse_next(input)?;
    let name = ident
        .context(StrContext::Expected(StrContextValue::Description("graph name")))
        .parse_next(input)?;
    sp.parse_next(input)?;
    '{'.parse_next(input)?;
    let body = items.parse_next(input)?;
    sp.parse_next(input)?;
    '}'.parse_next(input)?;
    sp.parse_next(input)?;

    let empty = AttrMap::new();
    let assembled = assemble(body, &empty, &empty);
    Ok(GraphAst {
        name: name.to_string(),
        attrs: assembled.attrs,
        nodes: assembled.nodes,
        edges: assembled.edges,
        subgraphs: assembled.subgraphs,
        node_defaults: assembled.node_defaults,
        edge_defaults: assembled.edge_defaults,
    })
}

fn position_of(stripped: &str, remaining_len: usize) -> (usize, usize) {
    let consumed = stripped.len() - remaining_len;
    let prefix = &stripped[..consumed.min(stripped.len())];
    let line = prefix.matches('\n').count() + 1;
    let col = match prefix.rfind('\n') {
        Some(pos) => consumed - pos,
        None => consumed + 1,
    };
    (line, col)
}

/// Parse DOT source into a [`GraphAst`].
pub fn parse(source: &str) -> waypoint_types::Result<GraphAst> {
    let stripped = strip_comments(source);
    let mut remaining = stripped.as_str();

    digraph.parse_next(&mut remaining).map_err(|err| {
        let (line, col) = position_of(&stripped, remaining.len());
        let snippet: String = remaining.chars().take(40).collect();
        waypoint_types::WaypointError::Parse {
            line,
            col,
            message: err.to_string(),
            snippet: (!snippet.is_empty()).then_some(snippet),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_chain() {
        let g = parse("digraph Demo { start -> plan -> done }").unwrap();
        assert_eq!(g.name, "Demo");
        assert_eq!(g.edges.len(), 2);
        assert_eq!((g.edges[0].from.as_str(), g.edges[0].to.as_str()), ("start", "plan"));
        assert_eq!((g.edges[1].from.as_str(), g.edges[1].to.as_str()), ("plan", "done"));
        // implicit nodes created from the chain
        assert!(g.nodes.contains_key("start"));
        assert!(g.nodes.contains_key("done"));
    }

    #[test]
    fn node_attributes() {
        let g = parse(r#"digraph G { entry [shape="Mdiamond", label="Begin"] }"#).unwrap();
        let node = &g.nodes["entry"];
        assert_eq!(node.attrs["shape"], AttrValue::String("Mdiamond".into()));
        assert_eq!(node.attrs["label"], AttrValue::String("Begin".into()));
    }

    #[test]
    fn edge_attributes_and_chain_sharing() {
        let g = parse(r#"digraph G { a -> b -> c [label="next", weight=3] }"#).unwrap();
        assert_eq!(g.edges.len(), 2);
        for edge in &g.edges {
            assert_eq!(edge.attrs["label"], AttrValue::String("next".into()));
            assert_eq!(edge.attrs["weight"], AttrValue::Integer(3));
        }
    }

    #[test]
    fn typed_literals() {
        let g = parse(
            r#"digraph G {
                n [retries=3, ratio=0.5, gate=true, wait=250ms, window=2h, mode=fast]
            }"#,
        )
        .unwrap();
        let attrs = &g.nodes["n"].attrs;
        assert_eq!(attrs["retries"], AttrValue::Integer(3));
        assert_eq!(attrs["ratio"], AttrValue::Float(0.5));
        assert_eq!(attrs["gate"], AttrValue::Boolean(true));
        assert_eq!(attrs["wait"], AttrValue::Duration(Duration::from_millis(250)));
        assert_eq!(attrs["window"], AttrValue::Duration(Duration::from_secs(7200)));
        // bare identifiers read as strings
        assert_eq!(attrs["mode"], AttrValue::String("fast".into()));
    }

    #[test]
    fn graph_level_attributes() {
        let g = parse(
            r#"digraph G {
                goal = "ship the feature"
                graph [default_max_retry=2]
                a -> b
            }"#,
        )
        .unwrap();
        assert_eq!(g.attrs["goal"], AttrValue::String("ship the feature".into()));
        assert_eq!(g.attrs["default_max_retry"], AttrValue::Integer(2));
    }

    #[test]
    fn node_and_edge_defaults() {
        let g = parse(
            r#"digraph G {
                node [shape="box"]
                edge [weight=1]
                a -> b
            }"#,
        )
        .unwrap();
        assert_eq!(g.nodes["a"].attrs["shape"], AttrValue::String("box".into()));
        assert_eq!(g.edges[0].attrs["weight"], AttrValue::Integer(1));
    }

    #[test]
    fn explicit_attrs_override_defaults() {
        let g = parse(
            r#"digraph G {
                node [shape="box"]
                special [shape="hexagon"]
            }"#,
        )
        .unwrap();
        assert_eq!(g.nodes["special"].attrs["shape"], AttrValue::String("hexagon".into()));
    }

    #[test]
    fn subgraph_flattening() {
        let g = parse(
            r#"digraph G {
                a -> b
                subgraph cluster_inner {
                    node [shape="ellipse"]
                    c -> d
                }
            }"#,
        )
        .unwrap();
        assert_eq!(g.subgraphs.len(), 1);
        let sg = &g.subgraphs[0];
        assert_eq!(sg.name.as_deref(), Some("cluster_inner"));
        assert_eq!(sg.nodes["c"].attrs["shape"], AttrValue::String("ellipse".into()));
        assert_eq!(sg.edges.len(), 1);
    }

    #[test]
    fn string_escapes() {
        let g = parse(r#"digraph G { n [label="a\nb\tc\\d\"e"] }"#).unwrap();
        assert_eq!(
            g.nodes["n"].attrs["label"],
            AttrValue::String("a\nb\tc\\d\"e".into())
        );
    }

    #[test]
    fn comments_are_stripped() {
        let g = parse(
            "// heading\ndigraph G {\n /* block\n comment */ a -> b // trailing\n}",
        )
        .unwrap();
        assert_eq!(g.edges.len(), 1);
    }

    #[test]
    fn semicolons_are_optional() {
        let g = parse(
            r#"digraph G {
                a [label="one"];
                b [label="two"]
                a -> b;
            }"#,
        )
        .unwrap();
        assert_eq!(g.nodes.len(), 2);
        assert_eq!(g.edges.len(), 1);
    }

    #[test]
    fn rejects_undirected_graphs() {
        assert!(parse("graph G { a -- b }").is_err());
        assert!(parse("digraph G { a -- b }").is_err());
    }

    #[test]
    fn parse_error_carries_position() {
        let err = parse("nonsense { }").unwrap_err();
        match err {
            waypoint_types::WaypointError::Parse { line, col, .. } => {
                assert!(line >= 1);
                assert!(col >= 1);
            }
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn dotted_attribute_keys() {
        let g = parse(r#"digraph G { m [stack.child_dotfile="child.dot"] }"#).unwrap();
        assert_eq!(
            g.nodes["m"].attrs["stack.child_dotfile"],
            AttrValue::String("child.dot".into())
        );
    }
}
