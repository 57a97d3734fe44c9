//! Graph rendering
//!
//! Three text formats, all produced from the static structure of a
//! [`Graph`]:
//!
//! | Format | Output | Use |
//! |--------|--------|-----|
//! | Mermaid | `graph TD` flowchart | READMEs, GitHub rendering |
//! | DOT | `digraph G { .. }` | `dot -Tpng graph.dot -o graph.png` |
//! | ASCII | indented adjacency list | terminals, logs |
//!
//! Direct edges are drawn solid. Conditional edges are drawn dashed with
//! the branch label. Routers that return node names or `Send` packets have
//! no static branch map and are drawn as a dotted edge to a `dynamic`
//! placeholder.
//!
//! Output is deterministic: nodes follow registration order and branches
//! are sorted by label, so rendered diagrams diff cleanly.
//!
//! ```rust,ignore
//! let compiled = builder.compile()?;
//! println!("{}", compiled.draw_mermaid());
//! ```

use crate::compiled::CompiledGraph;
use crate::graph::{Edge, Graph, END, START};
use crate::state::GraphState;

const DYNAMIC: &str = "dynamic";

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisualizationFormat {
    #[default]
    Mermaid,
    Dot,
    Ascii,
}

#[derive(Debug, Clone, Default)]
pub struct VisualizationOptions {
    pub format: VisualizationFormat,
    pub title: Option<String>,
}

impl VisualizationOptions {
    pub fn mermaid() -> Self {
        Self::default()
    }

    pub fn dot() -> Self {
        Self {
            format: VisualizationFormat::Dot,
            ..Default::default()
        }
    }

    pub fn ascii() -> Self {
        Self {
            format: VisualizationFormat::Ascii,
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// One drawable arrow
struct Arrow<'a> {
    from: &'a str,
    to: &'a str,
    label: Option<&'a str>,
}

/// Flatten the edge lists into arrows in a stable order
fn arrows<S: GraphState>(graph: &Graph<S>) -> Vec<Arrow<'_>> {
    let sources = std::iter::once(START).chain(graph.order.iter().map(String::as_str));
    let mut out = Vec::new();
    for from in sources {
        let Some(edges) = graph.edges.get(from) else {
            continue;
        };
        for edge in edges {
            match edge {
                Edge::Direct(to) => out.push(Arrow { from, to, label: None }),
                Edge::Conditional { branches, .. } if branches.is_empty() => out.push(Arrow {
                    from,
                    to: DYNAMIC,
                    label: None,
                }),
                Edge::Conditional { branches, .. } => {
                    let mut sorted: Vec<_> = branches.iter().collect();
                    sorted.sort();
                    out.extend(sorted.into_iter().map(|(label, to)| Arrow {
                        from,
                        to,
                        label: Some(label),
                    }));
                }
            }
        }
    }
    out
}

fn has_dynamic<S: GraphState>(graph: &Graph<S>) -> bool {
    graph.edges.values().flatten().any(|edge| {
        matches!(edge, Edge::Conditional { branches, .. } if branches.is_empty())
    })
}

/// Render `graph` in the requested format
pub fn visualize<S: GraphState>(graph: &Graph<S>, options: &VisualizationOptions) -> String {
    match options.format {
        VisualizationFormat::Mermaid => render_mermaid(graph, options),
        VisualizationFormat::Dot => render_dot(graph, options),
        VisualizationFormat::Ascii => render_ascii(graph),
    }
}

fn render_mermaid<S: GraphState>(graph: &Graph<S>, options: &VisualizationOptions) -> String {
    let mut out = String::new();
    if let Some(title) = &options.title {
        out.push_str(&format!("---\ntitle: {}\n---\n", escape_mermaid(title)));
    }
    out.push_str("graph TD\n");
    out.push_str(&format!("    {}([START])\n", mermaid_id(START)));
    out.push_str(&format!("    {}([END])\n", mermaid_id(END)));
    for node in &graph.order {
        out.push_str(&format!("    {}[\"{}\"]\n", mermaid_id(node), escape_mermaid(node)));
    }
    if has_dynamic(graph) {
        out.push_str(&format!("    {}{{{{\"{}\"}}}}\n", DYNAMIC, DYNAMIC));
    }

    for arrow in arrows(graph) {
        let (from, to) = (mermaid_id(arrow.from), mermaid_id(arrow.to));
        match arrow.label {
            Some(label) => {
                out.push_str(&format!("    {} -. \"{}\" .-> {}\n", from, escape_mermaid(label), to))
            }
            None if arrow.to == DYNAMIC => out.push_str(&format!("    {} -.-> {}\n", from, to)),
            None => out.push_str(&format!("    {} --> {}\n", from, to)),
        }
    }
    out
}

fn render_dot<S: GraphState>(graph: &Graph<S>, options: &VisualizationOptions) -> String {
    let mut out = String::from("digraph G {\n    rankdir=TB;\n    node [shape=box, style=rounded];\n");
    if let Some(title) = &options.title {
        out.push_str(&format!("    labelloc=\"t\";\n    label=\"{}\";\n", escape_dot(title)));
    }
    out.push_str(&format!("    \"{}\" [label=\"START\", shape=circle];\n", START));
    out.push_str(&format!("    \"{}\" [label=\"END\", shape=doublecircle];\n", END));
    for node in &graph.order {
        out.push_str(&format!("    \"{}\";\n", escape_dot(node)));
    }
    if has_dynamic(graph) {
        out.push_str(&format!("    \"{}\" [shape=diamond, style=dotted];\n", DYNAMIC));
    }

    for arrow in arrows(graph) {
        let (from, to) = (escape_dot(arrow.from), escape_dot(arrow.to));
        match arrow.label {
            Some(label) => out.push_str(&format!(
                "    \"{}\" -> \"{}\" [label=\"{}\", style=dashed];\n",
                from,
                to,
                escape_dot(label)
            )),
            None if arrow.to == DYNAMIC => {
                out.push_str(&format!("    \"{}\" -> \"{}\" [style=dotted];\n", from, to))
            }
            None => out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to)),
        }
    }
    out.push_str("}\n");
    out
}

fn render_ascii<S: GraphState>(graph: &Graph<S>) -> String {
    let mut out = String::new();
    let mut current = "";
    for arrow in arrows(graph) {
        if arrow.from != current {
            current = arrow.from;
            out.push_str(&format!("[{}]\n", display_name(current)));
        }
        match arrow.label {
            Some(label) => out.push_str(&format!("  --{}--> {}\n", label, display_name(arrow.to))),
            None => out.push_str(&format!("  --> {}\n", display_name(arrow.to))),
        }
    }
    out
}

fn display_name(name: &str) -> &str {
    match name {
        START => "START",
        END => "END",
        other => other,
    }
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn escape_mermaid(s: &str) -> String {
    s.replace('"', "&quot;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Mermaid ids must be plain identifiers
fn mermaid_id(name: &str) -> String {
    match name {
        START => "start".to_string(),
        END => "end_".to_string(),
        other => other
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect(),
    }
}

impl<S: GraphState> CompiledGraph<S> {
    /// Mermaid flowchart of this graph
    pub fn draw_mermaid(&self) -> String {
        visualize(
            self.graph(),
            &VisualizationOptions::mermaid().with_title(self.name()),
        )
    }

    pub fn draw(&self, options: &VisualizationOptions) -> String {
        visualize(self.graph(), options)
    }
}
