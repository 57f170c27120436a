//! Statement trees lowered from `syn`.
//!
//! A script is the body of a `main` function: a sequence of statements and
//! items. [`SourceUnit::parse`] turns it into one [`SyntaxTree`] for the
//! script itself plus one tree per function body found anywhere in it.
//! The trees only keep what instrumentation needs: statement boundaries,
//! nested blocks and the variables each construct binds.

use proc_macro2::{LineColumn, Span as TokenSpan};
use syn::parse::{ParseStream, Parser};
use syn::spanned::Spanned;
use syn::visit::Visit;
use syn::{Attribute, Block, Expr, FnArg, Local, Pat, Stmt};

use crate::error::{Error, Result};

/// Index of a node inside its [`SyntaxTree`].
pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Root of the script tree.
    Unit,
    Block,
    /// Expression, macro or tail-expression statement.
    Statement,
    /// A `let` statement.
    LocalDeclaration,
    ForLoop,
    /// Names bound by a `let`, a pattern or function parameters.
    VariableDeclaration,
    /// `break`.
    Jump,
    /// Root of a function body tree.
    MethodDeclaration,
}

impl NodeKind {
    /// Kinds that get a probe in front of them.
    pub fn is_probed_statement(self) -> bool {
        matches!(
            self,
            NodeKind::Statement | NodeKind::LocalDeclaration | NodeKind::ForLoop
        )
    }

    /// Kinds that get a probe when they are left.
    pub fn is_block(self) -> bool {
        matches!(self, NodeKind::Block | NodeKind::Unit)
    }

    /// Kinds that can own variables.
    fn is_scope(self) -> bool {
        matches!(
            self,
            NodeKind::Unit | NodeKind::Block | NodeKind::ForLoop | NodeKind::Statement
        )
    }
}

/// Byte range into the original script text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            len: end.saturating_sub(start),
        }
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

#[derive(Debug, Clone)]
pub struct StatementNode {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Full extent of the construct.
    pub span: Span,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Span reported by the probe for this node: the statement itself, the
    /// header of a `for` loop, or the closing brace of a block.
    pub probe_span: Span,
    /// Where the probe goes in the text. For blocks this is where the exit
    /// probe goes: before the closing brace or before the tail expression.
    pub anchor: usize,
    /// Names bound by a `VariableDeclaration`.
    pub names: Vec<String>,
}

/// Statement tree of one body, stored as an arena.
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    nodes: Vec<StatementNode>,
    root: NodeId,
}

impl SyntaxTree {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &StatementNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[StatementNode] {
        &self.nodes
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = &StatementNode> + '_ {
        std::iter::successors(self.nodes[id].parent, |&p| self.nodes[p].parent)
            .map(|p| &self.nodes[p])
    }

    /// Node owning the variables declared by `decl`.
    ///
    /// The nearest scope-like ancestor, looking past the `let` statement the
    /// declaration belongs to; the declaration itself if there is none.
    pub fn owner_of(&self, decl: NodeId) -> NodeId {
        self.ancestors(decl)
            .filter(|n| n.kind != NodeKind::LocalDeclaration)
            .find(|n| n.kind.is_scope())
            .map(|n| n.id)
            .unwrap_or(decl)
    }
}

/// A parsed script: the text plus every tree instrumentation walks.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    text: String,
    unit: SyntaxTree,
    methods: Vec<SyntaxTree>,
}

impl SourceUnit {
    /// Parse a script, failing with the first parser diagnostic.
    pub fn parse(text: &str) -> Result<Self> {
        let parser = |input: ParseStream| {
            // Header doc comments (`//!`) arrive as inner attributes.
            input.call(Attribute::parse_inner)?;
            Block::parse_within(input)
        };
        let stmts = parser.parse_str(text).map_err(|err| {
            let start = err.span().start();
            Error::Parse {
                message: err.to_string(),
                line: start.line,
                column: start.column,
            }
        })?;

        let index = LineIndex::new(text);

        let mut builder = TreeBuilder::new(&index);
        let root = builder.push(
            NodeKind::Unit,
            Span::new(0, text.len()),
            Span::new(text.len(), text.len()),
            text.len(),
            None,
        );
        builder.lower_body(&stmts, root);
        let unit = builder.finish(root);

        let mut collector = FnCollector::default();
        for stmt in &stmts {
            collector.visit_stmt(stmt);
        }
        let methods = collector
            .bodies
            .into_iter()
            .map(|(sig, body)| TreeBuilder::method_tree(&index, sig, body))
            .collect();

        Ok(Self {
            text: text.to_string(),
            unit,
            methods,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn unit(&self) -> &SyntaxTree {
        &self.unit
    }

    pub fn methods(&self) -> &[SyntaxTree] {
        &self.methods
    }

    /// The unit tree followed by every method tree.
    pub fn trees(&self) -> impl Iterator<Item = &SyntaxTree> {
        std::iter::once(&self.unit).chain(self.methods.iter())
    }
}

/// Maps proc-macro2 line/column positions to byte offsets.
struct LineIndex<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { text, line_starts }
    }

    /// `line` is 1-based, `column` counts chars.
    fn offset(&self, pos: LineColumn) -> usize {
        let Some(&line_start) = self.line_starts.get(pos.line.saturating_sub(1)) else {
            return self.text.len();
        };
        self.text[line_start..]
            .char_indices()
            .nth(pos.column)
            .map(|(i, _)| line_start + i)
            .unwrap_or(self.text.len())
    }

    fn start(&self, span: TokenSpan) -> usize {
        self.offset(span.start())
    }

    fn end(&self, span: TokenSpan) -> usize {
        self.offset(span.end())
    }

    fn range(&self, span: TokenSpan) -> Span {
        Span::new(self.start(span), self.end(span))
    }
}

struct TreeBuilder<'i, 'a> {
    index: &'i LineIndex<'a>,
    nodes: Vec<StatementNode>,
}

impl<'i, 'a> TreeBuilder<'i, 'a> {
    fn new(index: &'i LineIndex<'a>) -> Self {
        Self {
            index,
            nodes: Vec::new(),
        }
    }

    fn finish(self, root: NodeId) -> SyntaxTree {
        SyntaxTree {
            nodes: self.nodes,
            root,
        }
    }

    fn method_tree(index: &LineIndex<'_>, sig: &syn::Signature, body: &Block) -> SyntaxTree {
        let mut builder = TreeBuilder::new(index);
        let span = Span::new(index.start(sig.span()), index.end(body.span()));
        let root = builder.push(NodeKind::MethodDeclaration, span, span, span.start, None);

        let params = sig
            .inputs
            .iter()
            .filter_map(|arg| match arg {
                FnArg::Typed(pat_type) => match &*pat_type.pat {
                    Pat::Ident(ident) if ident.subpat.is_none() => Some(ident.ident.to_string()),
                    _ => None,
                },
                FnArg::Receiver(_) => None,
            })
            .collect();
        builder.lower_block(body, root, params, sig.span());
        builder.finish(root)
    }

    fn push(
        &mut self,
        kind: NodeKind,
        span: Span,
        probe_span: Span,
        anchor: usize,
        parent: Option<NodeId>,
    ) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(StatementNode {
            id,
            kind,
            span,
            parent,
            children: Vec::new(),
            probe_span,
            anchor,
            names: Vec::new(),
        });
        if let Some(parent) = parent {
            self.nodes[parent].children.push(id);
        }
        id
    }

    fn declare(&mut self, names: Vec<String>, at: TokenSpan, parent: NodeId) {
        if names.is_empty() {
            return;
        }
        let span = self.index.range(at);
        let id = self.push(
            NodeKind::VariableDeclaration,
            span,
            span,
            span.start,
            Some(parent),
        );
        self.nodes[id].names = names;
    }

    /// Lower a statement list into `parent` and set the parent's exit anchor.
    fn lower_body(&mut self, stmts: &[Stmt], parent: NodeId) {
        for stmt in stmts {
            self.lower_stmt(stmt, parent);
        }
        if let Some(tail) = stmts.last().filter(|stmt| is_value_tail(stmt)) {
            self.nodes[parent].anchor = self.index.start(tail.span());
        }
    }

    fn lower_block(
        &mut self,
        block: &Block,
        parent: NodeId,
        bindings: Vec<String>,
        binding_span: TokenSpan,
    ) -> NodeId {
        let span = self.index.range(block.brace_token.span.join());
        let close = self.index.range(block.brace_token.span.close());
        let id = self.push(NodeKind::Block, span, close, close.start, Some(parent));
        self.declare(bindings, binding_span, id);
        self.lower_body(&block.stmts, id);
        id
    }

    fn lower_stmt(&mut self, stmt: &Stmt, parent: NodeId) {
        match stmt {
            Stmt::Local(local) => self.lower_local(local, parent),
            Stmt::Item(_) => {}
            Stmt::Macro(_) => {
                let span = self.index.range(stmt.span());
                self.push(NodeKind::Statement, span, span, span.start, Some(parent));
            }
            // A stray `;`.
            Stmt::Expr(Expr::Verbatim(tokens), _) if tokens.is_empty() => {}
            Stmt::Expr(Expr::ForLoop(for_loop), _) => {
                let span = self.index.range(stmt.span());
                let header = Span::new(
                    self.index.start(for_loop.for_token.span),
                    self.index.end(for_loop.expr.span()),
                );
                let id = self.push(NodeKind::ForLoop, span, header, span.start, Some(parent));
                // The iterator is evaluated before the pattern binds.
                self.nested_blocks(&for_loop.expr, id);
                self.declare(binding_names(&for_loop.pat), for_loop.pat.span(), id);
                self.lower_block(&for_loop.body, id, Vec::new(), for_loop.body.span());
            }
            Stmt::Expr(expr @ Expr::Break(_), _) => {
                let span = self.index.range(stmt.span());
                let id = self.push(NodeKind::Jump, span, span, span.start, Some(parent));
                self.nested_blocks(expr, id);
            }
            Stmt::Expr(expr, _) => {
                let span = self.index.range(stmt.span());
                let id = self.push(NodeKind::Statement, span, span, span.start, Some(parent));
                self.nested_blocks(expr, id);
            }
        }
    }

    fn lower_local(&mut self, local: &Local, parent: NodeId) {
        let span = self.index.range(local.span());
        let id = self.push(
            NodeKind::LocalDeclaration,
            span,
            span,
            span.start,
            Some(parent),
        );

        if let Some(init) = &local.init {
            self.nested_blocks(&init.expr, id);
            if let Some((_, diverge)) = &init.diverge {
                self.nested_blocks(diverge, id);
            }
            // The initializer never sees the names it binds.
            self.declare(binding_names(&local.pat), local.pat.span(), id);
        }
    }

    /// Attach every block nested anywhere in `expr` to `parent`.
    fn nested_blocks(&mut self, expr: &Expr, parent: NodeId) {
        NestedBlocks {
            builder: self,
            parent,
        }
        .visit_expr(expr);
    }
}

/// Lowers the blocks an expression contains: plain, `unsafe` and `async`
/// blocks, branches and loop bodies, match arms and closure bodies.
///
/// Items, types, generic arguments and `const` contexts are left alone;
/// probes cannot run there.
struct NestedBlocks<'b, 'i, 'a> {
    builder: &'b mut TreeBuilder<'i, 'a>,
    parent: NodeId,
}

impl NestedBlocks<'_, '_, '_> {
    fn lower(&mut self, block: &Block, bindings: Vec<String>, binding_span: TokenSpan) {
        self.builder
            .lower_block(block, self.parent, bindings, binding_span);
    }
}

impl<'ast> Visit<'ast> for NestedBlocks<'_, '_, '_> {
    fn visit_block(&mut self, block: &'ast Block) {
        self.lower(block, Vec::new(), block.span());
    }

    fn visit_expr_if(&mut self, node: &'ast syn::ExprIf) {
        self.visit_expr(&node.cond);
        self.lower(&node.then_branch, let_bindings(&node.cond), node.cond.span());
        if let Some((_, else_branch)) = &node.else_branch {
            self.visit_expr(else_branch);
        }
    }

    fn visit_expr_while(&mut self, node: &'ast syn::ExprWhile) {
        self.visit_expr(&node.cond);
        self.lower(&node.body, let_bindings(&node.cond), node.cond.span());
    }

    // Only reached for loops in expression position; statement loops keep
    // their `ForLoop` node.
    fn visit_expr_for_loop(&mut self, node: &'ast syn::ExprForLoop) {
        self.visit_expr(&node.expr);
        self.lower(&node.body, binding_names(&node.pat), node.pat.span());
    }

    fn visit_expr_match(&mut self, node: &'ast syn::ExprMatch) {
        self.visit_expr(&node.expr);
        for arm in &node.arms {
            if let Some((_, guard)) = &arm.guard {
                self.visit_expr(guard);
            }
            match &*arm.body {
                Expr::Block(body) => {
                    self.lower(&body.block, binding_names(&arm.pat), arm.pat.span());
                }
                other => self.visit_expr(other),
            }
        }
    }

    fn visit_expr_closure(&mut self, node: &'ast syn::ExprClosure) {
        match &*node.body {
            Expr::Block(body) => {
                let mut params = Vec::new();
                for input in &node.inputs {
                    collect_pat(input, &mut params);
                }
                self.lower(&body.block, params, node.inputs.span());
            }
            other => self.visit_expr(other),
        }
    }

    fn visit_expr_repeat(&mut self, node: &'ast syn::ExprRepeat) {
        // The length is a constant expression.
        self.visit_expr(&node.expr);
    }

    fn visit_expr_const(&mut self, _: &'ast syn::ExprConst) {}

    fn visit_item(&mut self, _: &'ast syn::Item) {}

    fn visit_type(&mut self, _: &'ast syn::Type) {}

    fn visit_generic_argument(&mut self, _: &'ast syn::GenericArgument) {}

    fn visit_attribute(&mut self, _: &'ast Attribute) {}
}

/// Whether the last statement of a body produces the body's value.
///
/// `for` and `while` loops are always `()`, so the exit probe can safely go
/// after them.
fn is_value_tail(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Expr(Expr::ForLoop(_) | Expr::While(_), None) => false,
        Stmt::Expr(Expr::Verbatim(tokens), None) => !tokens.is_empty(),
        Stmt::Expr(_, None) => true,
        Stmt::Macro(mac) => mac.semi_token.is_none(),
        _ => false,
    }
}

/// Names bound by `if let` / `while let` conditions.
fn let_bindings(cond: &Expr) -> Vec<String> {
    let mut names = Vec::new();
    collect_let_bindings(cond, &mut names);
    names
}

fn collect_let_bindings(cond: &Expr, names: &mut Vec<String>) {
    match cond {
        Expr::Let(expr_let) => collect_pat(&expr_let.pat, names),
        // Let chains: `if let Some(a) = x && let Some(b) = y`
        Expr::Binary(bin) if matches!(bin.op, syn::BinOp::And(_)) => {
            collect_let_bindings(&bin.left, names);
            collect_let_bindings(&bin.right, names);
        }
        Expr::Paren(paren) => collect_let_bindings(&paren.expr, names),
        _ => {}
    }
}

/// Identifiers bound by a pattern, in source order.
pub fn binding_names(pat: &Pat) -> Vec<String> {
    let mut names = Vec::new();
    collect_pat(pat, &mut names);
    names
}

fn collect_pat(pat: &Pat, names: &mut Vec<String>) {
    match pat {
        Pat::Ident(ident) => {
            let name = ident.ident.to_string();
            // Capitalized identifiers are unit variants or constants.
            if !name.starts_with(|c: char| c.is_uppercase()) && !names.contains(&name) {
                names.push(name);
            }
            if let Some((_, sub)) = &ident.subpat {
                collect_pat(sub, names);
            }
        }
        Pat::Tuple(tuple) => tuple.elems.iter().for_each(|p| collect_pat(p, names)),
        Pat::TupleStruct(ts) => ts.elems.iter().for_each(|p| collect_pat(p, names)),
        Pat::Struct(s) => s.fields.iter().for_each(|f| collect_pat(&f.pat, names)),
        Pat::Slice(slice) => slice.elems.iter().for_each(|p| collect_pat(p, names)),
        Pat::Reference(r) => collect_pat(&r.pat, names),
        Pat::Paren(p) => collect_pat(&p.pat, names),
        Pat::Type(t) => collect_pat(&t.pat, names),
        // Every alternative binds the same names.
        Pat::Or(or) => {
            if let Some(first) = or.cases.first() {
                collect_pat(first, names);
            }
        }
        _ => {}
    }
}

/// Finds every function body in the script, including nested ones.
///
/// `const fn` bodies are skipped: probes are not callable in const context.
#[derive(Default)]
struct FnCollector<'ast> {
    bodies: Vec<(&'ast syn::Signature, &'ast Block)>,
}

impl<'ast> FnCollector<'ast> {
    fn push(&mut self, sig: &'ast syn::Signature, body: &'ast Block) {
        if sig.constness.is_none() {
            self.bodies.push((sig, body));
        }
    }
}

impl<'ast> Visit<'ast> for FnCollector<'ast> {
    fn visit_item_fn(&mut self, node: &'ast syn::ItemFn) {
        self.push(&node.sig, &node.block);
        syn::visit::visit_item_fn(self, node);
    }

    fn visit_impl_item_fn(&mut self, node: &'ast syn::ImplItemFn) {
        self.push(&node.sig, &node.block);
        syn::visit::visit_impl_item_fn(self, node);
    }

    fn visit_trait_item_fn(&mut self, node: &'ast syn::TraitItemFn) {
        if let Some(body) = &node.default {
            self.push(&node.sig, body);
        }
        syn::visit::visit_trait_item_fn(self, node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tree: &SyntaxTree) -> Vec<NodeKind> {
        tree.nodes().iter().map(|n| n.kind).collect()
    }

    #[test]
    fn test_let_lowers_to_declaration_child() {
        let unit = SourceUnit::parse("let x = 1;\nprintln!(\"{}\", x);").unwrap();
        let tree = unit.unit();
        assert_eq!(
            kinds(tree),
            [
                NodeKind::Unit,
                NodeKind::LocalDeclaration,
                NodeKind::VariableDeclaration,
                NodeKind::Statement,
            ]
        );
        assert_eq!(tree.node(1).span, Span::new(0, 10));
        assert_eq!(tree.node(2).names, ["x"]);
        assert_eq!(tree.owner_of(2), tree.root());
        assert_eq!(tree.node(3).span, Span::new(11, 29));
    }

    #[test]
    fn test_for_header_span_and_binding_owner() {
        let src = "let mut sum = 0;\nfor i in 0..3 { sum += i; }";
        let unit = SourceUnit::parse(src).unwrap();
        let tree = unit.unit();
        let for_node = tree
            .nodes()
            .iter()
            .find(|n| n.kind == NodeKind::ForLoop)
            .unwrap();
        let header = &src[for_node.probe_span.start..for_node.probe_span.end()];
        assert_eq!(header, "for i in 0..3");

        let decl = tree.node(for_node.children[0]);
        assert_eq!(decl.kind, NodeKind::VariableDeclaration);
        assert_eq!(decl.names, ["i"]);
        assert_eq!(tree.owner_of(decl.id), for_node.id);
    }

    #[test]
    fn test_if_let_binding_lives_in_then_block() {
        let unit = SourceUnit::parse("if let Some(v) = opt { use_it(v); }").unwrap();
        let tree = unit.unit();
        let block = tree
            .nodes()
            .iter()
            .find(|n| n.kind == NodeKind::Block)
            .unwrap();
        let decl = tree.node(block.children[0]);
        assert_eq!(decl.names, ["v"]);
        assert_eq!(tree.owner_of(decl.id), block.id);
    }

    #[test]
    fn test_tail_expression_moves_exit_anchor() {
        let src = "let y = { let a = 2; a * 3 };";
        let unit = SourceUnit::parse(src).unwrap();
        let tree = unit.unit();
        let block = tree
            .nodes()
            .iter()
            .find(|n| n.kind == NodeKind::Block)
            .unwrap();
        assert_eq!(&src[block.anchor..], "a * 3 };");
        assert_eq!(&src[block.probe_span.start..block.probe_span.end()], "}");
    }

    #[test]
    fn test_items_are_separate_trees() {
        let src = "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\nlet z = add(1, 2);";
        let unit = SourceUnit::parse(src).unwrap();

        // The unit only sees the `let`.
        assert_eq!(
            kinds(unit.unit()),
            [
                NodeKind::Unit,
                NodeKind::LocalDeclaration,
                NodeKind::VariableDeclaration,
            ]
        );

        assert_eq!(unit.methods().len(), 1);
        let method = &unit.methods()[0];
        assert_eq!(method.node(method.root()).kind, NodeKind::MethodDeclaration);
        let params = method
            .nodes()
            .iter()
            .find(|n| n.kind == NodeKind::VariableDeclaration)
            .unwrap();
        assert_eq!(params.names, ["a", "b"]);
    }

    #[test]
    fn test_nested_and_impl_functions_are_found() {
        let src = r#"
struct S;
impl S {
    fn get(&self) -> u8 { 1 }
}
fn outer() {
    fn inner() {}
    inner();
}
"#;
        let unit = SourceUnit::parse(src).unwrap();
        assert_eq!(unit.methods().len(), 3);
    }

    #[test]
    fn test_jumps_and_patterns() {
        let src = "loop { break; }\nmatch x { Some((a, b)) => { a; } None => {} }";
        let unit = SourceUnit::parse(src).unwrap();
        let tree = unit.unit();
        assert!(tree.nodes().iter().any(|n| n.kind == NodeKind::Jump));

        let decls: Vec<&Vec<String>> = tree
            .nodes()
            .iter()
            .filter(|n| n.kind == NodeKind::VariableDeclaration)
            .map(|n| &n.names)
            .collect();
        assert_eq!(decls, [&vec!["a".to_string(), "b".to_string()]]);
    }

    #[test]
    fn test_continue_is_a_statement() {
        let unit = SourceUnit::parse("for i in 0..3 {\n    continue;\n}").unwrap();
        let tree = unit.unit();
        assert!(!tree.nodes().iter().any(|n| n.kind == NodeKind::Jump));
        let statement = tree
            .nodes()
            .iter()
            .find(|n| n.kind == NodeKind::Statement)
            .unwrap();
        assert_eq!(statement.span, Span::new(20, 29));
    }

    #[test]
    fn test_blocks_inside_expressions_are_lowered() {
        let src = "x = if true { let a = 1; a } else { 2 };\n\
                   (0..2).for_each(|i| { let b = i; println!(\"{b}\"); });\n\
                   let v = Some({ let c = 3; c });\n\
                   let p = Point { x: { 1 }, y: unsafe { 2 } };\n\
                   let f = async { 3 };\n";
        let unit = SourceUnit::parse(src).unwrap();
        let tree = unit.unit();

        let blocks = tree.nodes().iter().filter(|n| n.kind == NodeKind::Block).count();
        // then, else, closure body, `Some` argument, two fields, async.
        assert_eq!(blocks, 7);

        let statements: Vec<&str> = tree
            .nodes()
            .iter()
            .filter(|n| n.kind.is_probed_statement() && n.parent != Some(tree.root()))
            .map(|n| &src[n.span.start..n.span.end()])
            .collect();
        assert_eq!(
            statements,
            [
                "let a = 1;",
                "a",
                "2",
                "let b = i;",
                "println!(\"{b}\");",
                "let c = 3;",
                "c",
                "1",
                "2",
                "3",
            ]
        );
    }

    #[test]
    fn test_closure_parameters_live_in_body() {
        let unit = SourceUnit::parse("let g = |(a, b), c: u8| { a };").unwrap();
        let tree = unit.unit();
        let block = tree
            .nodes()
            .iter()
            .find(|n| n.kind == NodeKind::Block)
            .unwrap();
        let params = tree.node(block.children[0]);
        assert_eq!(params.kind, NodeKind::VariableDeclaration);
        assert_eq!(params.names, ["a", "b", "c"]);
        assert_eq!(tree.owner_of(params.id), block.id);
    }

    #[test]
    fn test_const_contexts_are_skipped() {
        let src = "const fn square(x: u32) -> u32 { x * x }\n\
                   fn cube(x: u32) -> u32 { x * x * x }\n\
                   let a = [0u8; { 2 + 1 }];\n\
                   let b = const { 4 };\n";
        let unit = SourceUnit::parse(src).unwrap();
        assert_eq!(unit.methods().len(), 1);
        assert!(
            !unit
                .unit()
                .nodes()
                .iter()
                .any(|n| n.kind == NodeKind::Block)
        );
    }

    #[test]
    fn test_nested_items_are_not_lowered_twice() {
        let src = "let f = || { fn inner() { let z = 1; } inner(); };";
        let unit = SourceUnit::parse(src).unwrap();
        assert!(
            !unit
                .unit()
                .nodes()
                .iter()
                .any(|n| n.kind == NodeKind::LocalDeclaration && src[n.span.start..].starts_with("let z"))
        );
        assert_eq!(unit.methods().len(), 1);
    }

    #[test]
    fn test_header_doc_comments_are_accepted() {
        let src = "//! ```cargo\n//! [dependencies]\n//! ```\nlet a = 1;";
        let unit = SourceUnit::parse(src).unwrap();
        let local = unit.unit().node(1);
        assert_eq!(&src[local.span.start..local.span.end()], "let a = 1;");
    }

    #[test]
    fn test_parse_error_reports_position() {
        match SourceUnit::parse("let x = ;\n") {
            Err(Error::Parse { line, column, .. }) => {
                assert_eq!(line, 1);
                assert_eq!(column, 8);
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_multibyte_offsets_are_bytes() {
        let src = "let s = \"héllo\";\nlet n = 1;";
        let unit = SourceUnit::parse(src).unwrap();
        let second = unit
            .unit()
            .nodes()
            .iter()
            .filter(|n| n.kind == NodeKind::LocalDeclaration)
            .nth(1)
            .unwrap();
        assert_eq!(&src[second.span.start..second.span.end()], "let n = 1;");
    }
}
