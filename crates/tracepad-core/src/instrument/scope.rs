//! Lexical scope tracking during a depth-first walk of a [`SyntaxTree`].
//!
//! [`SyntaxTree`]: super::SyntaxTree

use super::syntax::NodeId;

/// Tracks which local variables are live at each point of a traversal.
///
/// Variables are kept on a stack of `(name, owner)` pairs. Leaving a node
/// pops the variables it owns from the top of the stack, so scopes unwind in
/// exact reverse declaration order.
#[derive(Debug, Default)]
pub struct ScopeTracker {
    path: Vec<NodeId>,
    variables: Vec<(String, NodeId)>,
}

impl ScopeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin visiting `node`.
    pub fn enter(&mut self, node: NodeId) {
        self.path.push(node);
    }

    /// Finish visiting `node`, dropping the variables it owns.
    pub fn exit(&mut self, node: NodeId) {
        let left = self.path.pop();
        debug_assert_eq!(left, Some(node), "unbalanced scope exit");

        while let Some((_, owner)) = self.variables.last() {
            if *owner != node {
                break;
            }
            self.variables.pop();
        }
    }

    /// Record a variable owned by `owner`.
    pub fn declare(&mut self, name: impl Into<String>, owner: NodeId) {
        self.variables.push((name.into(), owner));
    }

    /// Live variable names in declaration order.
    ///
    /// A shadowed name appears once, at the position of its most recent
    /// declaration.
    pub fn live_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(self.variables.len());
        for (name, _) in &self.variables {
            if let Some(pos) = names.iter().position(|n| n == name) {
                names.remove(pos);
            }
            names.push(name.clone());
        }
        names
    }

    /// Number of nodes currently being visited.
    pub fn depth(&self) -> usize {
        self.path.len()
    }
}
