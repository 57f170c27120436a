//! Probe planning and source rewriting.

use super::scope::ScopeTracker;
use super::syntax::{NodeId, NodeKind, SourceUnit, Span, SyntaxTree};
use crate::error::Result;

/// Path of the probe macro as written into instrumented scripts.
pub const PROBE_MACRO: &str = "::tracepad::probe!";

/// How an insertion is laid out in the rewritten text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// On its own line, before the line holding the target.
    LineStart { indent: String },
    /// Directly in front of the target, on the same line.
    Inline,
    /// Appended after the last line of the script.
    EndOfText,
}

/// A probe call to insert into the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeInsertion {
    /// Byte offset in the original text.
    pub offset: usize,
    /// Span the probe reports.
    pub span: Span,
    /// Live variables captured by the probe.
    pub variables: Vec<String>,
    pub layout: Layout,
}

impl ProbeInsertion {
    /// The probe call, without the statement terminator.
    pub fn call(&self) -> String {
        if self.variables.is_empty() {
            format!("{PROBE_MACRO}({}, {})", self.span.start, self.span.len)
        } else {
            format!(
                "{PROBE_MACRO}({}, {}; {})",
                self.span.start,
                self.span.len,
                self.variables.join(", ")
            )
        }
    }

    /// Text inserted at [`offset`](Self::offset).
    pub fn render(&self) -> String {
        match &self.layout {
            Layout::LineStart { indent } => format!("{indent}{};\n", self.call()),
            Layout::Inline => format!("{}; ", self.call()),
            Layout::EndOfText => format!("{};\n", self.call()),
        }
    }
}

/// Result of instrumenting a script.
#[derive(Debug, Clone)]
pub struct Instrumented {
    pub text: String,
    /// Every insertion applied, in emission order.
    pub probes: Vec<ProbeInsertion>,
}

/// Parse `source` and insert a probe before every statement and at every
/// block exit.
pub fn instrument(source: &str) -> Result<Instrumented> {
    let unit = SourceUnit::parse(source)?;
    let probes = plan(&unit);
    let text = apply(unit.text(), &probes);
    Ok(Instrumented { text, probes })
}

/// Compute every insertion for the unit tree and each method tree.
pub fn plan(unit: &SourceUnit) -> Vec<ProbeInsertion> {
    let mut planner = Planner {
        text: unit.text(),
        out: Vec::new(),
    };
    for tree in unit.trees() {
        let mut scope = ScopeTracker::new();
        planner.visit(tree, tree.root(), &mut scope);
    }
    planner.out
}

/// Apply insertions to `text`, highest offset first.
///
/// Offsets all refer to `text`, so inserting from the end never shifts a
/// pending offset. Insertions sharing an offset come out in the order they
/// were emitted.
pub fn apply(text: &str, insertions: &[ProbeInsertion]) -> String {
    let mut order: Vec<usize> = (0..insertions.len()).collect();
    order.sort_by(|&a, &b| {
        insertions[b]
            .offset
            .cmp(&insertions[a].offset)
            .then(b.cmp(&a))
    });

    let extra: usize = insertions.iter().map(|p| p.render().len()).sum();
    let mut out = String::with_capacity(text.len() + extra + 1);
    out.push_str(text);
    if insertions.iter().any(|p| p.layout == Layout::EndOfText) && !text.ends_with('\n') {
        out.push('\n');
    }

    for i in order {
        let probe = &insertions[i];
        let offset = if probe.layout == Layout::EndOfText {
            out.len()
        } else {
            probe.offset
        };
        out.insert_str(offset, &probe.render());
    }
    out
}

struct Planner<'t> {
    text: &'t str,
    out: Vec<ProbeInsertion>,
}

impl Planner<'_> {
    fn visit(&mut self, tree: &SyntaxTree, id: NodeId, scope: &mut ScopeTracker) {
        let node = tree.node(id);
        scope.enter(id);

        match node.kind {
            NodeKind::VariableDeclaration => {
                let owner = tree.owner_of(id);
                for name in &node.names {
                    scope.declare(name.clone(), owner);
                }
            }
            kind if kind.is_probed_statement() => {
                self.emit(node.anchor, node.probe_span, scope.live_names());
            }
            _ => {}
        }

        for &child in &node.children {
            self.visit(tree, child, scope);
        }

        if node.kind.is_block() {
            if node.kind == NodeKind::Unit && node.anchor == self.text.len() {
                self.out.push(ProbeInsertion {
                    offset: self.text.len(),
                    span: node.probe_span,
                    variables: scope.live_names(),
                    layout: Layout::EndOfText,
                });
            } else {
                self.emit(node.anchor, node.probe_span, scope.live_names());
            }
        }

        scope.exit(id);
    }

    fn emit(&mut self, target: usize, span: Span, variables: Vec<String>) {
        let line_start = self.text[..target].rfind('\n').map_or(0, |i| i + 1);
        let prefix = &self.text[line_start..target];
        let (offset, layout) = if prefix.chars().all(|c| c == ' ' || c == '\t') {
            (
                line_start,
                Layout::LineStart {
                    indent: prefix.to_string(),
                },
            )
        } else {
            (target, Layout::Inline)
        };

        self.out.push(ProbeInsertion {
            offset,
            span,
            variables,
            layout,
        });
    }
}
