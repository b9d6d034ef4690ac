//! Minimal graph-node abstraction.
//!
//! The tensor-graph execution loop and its node representation belong to
//! the CPU execution backend, not to this engine (spec: out of scope). This
//! module defines only the sliver of surface the resolver and coordination
//! API need: a node's source tensor names, and random access into the
//! node list by index.

/// A single source tensor reference on a graph node.
pub trait TensorSource {
    /// The tensor's name, e.g. `"blk.12.attn_q.weight"`.
    fn name(&self) -> &str;
}

/// A computation-graph node as seen by the prefetch engine: just its
/// source tensors, in the fixed order the resolver walks them.
pub trait GraphNode {
    type Source: TensorSource;

    /// Source tensors feeding this node, in declaration order.
    fn sources(&self) -> &[Self::Source];
}

/// Read-only view over a graph's node list, addressed by index.
pub trait GraphView {
    type Node: GraphNode;

    /// Total number of nodes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Node at index `n`. Panics if out of range (a node index out of
    /// range is a precondition violation, not a runtime error).
    fn node(&self, n: usize) -> &Self::Node;
}

/// A trivial owned tensor source, used by tests and the demo harness.
#[derive(Debug, Clone)]
pub struct NamedSource(pub String);

impl TensorSource for NamedSource {
    fn name(&self) -> &str {
        &self.0
    }
}

/// A trivial owned graph node, used by tests and the demo harness.
#[derive(Debug, Clone, Default)]
pub struct SimpleNode {
    pub sources: Vec<NamedSource>,
}

impl SimpleNode {
    pub fn new(source_names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            sources: source_names
                .into_iter()
                .map(|s| NamedSource(s.into()))
                .collect(),
        }
    }
}

impl GraphNode for SimpleNode {
    type Source = NamedSource;

    fn sources(&self) -> &[Self::Source] {
        &self.sources
    }
}

/// A trivial owned graph, used by tests and the demo harness.
#[derive(Debug, Clone, Default)]
pub struct SimpleGraph {
    pub nodes: Vec<SimpleNode>,
}

impl GraphView for SimpleGraph {
    type Node = SimpleNode;

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn node(&self, n: usize) -> &Self::Node {
        &self.nodes[n]
    }
}
