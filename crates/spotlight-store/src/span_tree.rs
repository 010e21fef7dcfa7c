//! Span tree reconstruction
//!
//! Spans arrive as a flat map, possibly out of order and with parents that
//! never show up. [`group_spans`] rebuilds the hierarchy into an arena:
//! every node lives in one vector inside [`SpanTree`] and structure is
//! expressed as [`NodeId`] lists, so the same span id may appear twice (for example a
//! self-referencing span wrapped in its own orphan) without aliasing.

use indexmap::IndexMap;
use serde::Serialize;
use spotlight_core::{Span, SpanId, ORPHAN_OP};
use std::collections::HashMap;
use std::ops::Index;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
pub struct SpanNode {
    pub span: Span,
    pub children: Vec<NodeId>,
}

/// Ordered forest of spans.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanTree {
    nodes: Vec<SpanNode>,
    roots: Vec<NodeId>,
}

/// Owned nested rendering of a tree, for serialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NestedSpan {
    #[serde(flatten)]
    pub span: Span,
    pub children: Vec<NestedSpan>,
}

impl SpanTree {
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn get(&self, id: NodeId) -> Option<&SpanNode> {
        self.nodes.get(id.0)
    }

    /// Children of `id`, ordered by start time. Empty for ids this tree does
    /// not know.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.0)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    /// Time window covered by a node. Orphan placeholders carry no timestamps
    /// of their own and cover their children instead.
    pub fn extent(&self, id: NodeId) -> (f64, f64) {
        let Some(node) = self.nodes.get(id.0) else {
            return (0.0, 0.0);
        };
        let span = &node.span;
        let placeholder = span.op.as_deref() == Some(ORPHAN_OP)
            && span.start_timestamp == 0.0
            && span.timestamp == 0.0;
        if !placeholder || node.children.is_empty() {
            return (span.start_timestamp, span.timestamp);
        }
        node.children
            .iter()
            .map(|&child| self.extent(child))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(start, end), (s, e)| {
                (start.min(s), end.max(e))
            })
    }

    /// Number of nodes reachable from the roots.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Depth-first, pre-order walk yielding each node with its depth.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, usize)> + '_ {
        let mut stack: Vec<(NodeId, usize)> = self.roots.iter().rev().map(|&id| (id, 0)).collect();
        std::iter::from_fn(move || {
            let (id, depth) = stack.pop()?;
            stack.extend(self.nodes[id.0].children.iter().rev().map(|&c| (c, depth + 1)));
            Some((id, depth))
        })
    }

    /// First node carrying `span_id`, in walk order.
    pub fn find(&self, span_id: &str) -> Option<NodeId> {
        self.iter()
            .map(|(id, _)| id)
            .find(|&id| self.nodes[id.0].span.span_id == span_id)
    }

    pub fn to_nested(&self) -> Vec<NestedSpan> {
        self.roots.iter().map(|&id| self.nested(id)).collect()
    }

    fn nested(&self, id: NodeId) -> NestedSpan {
        let node = &self.nodes[id.0];
        NestedSpan {
            span: node.span.clone(),
            children: node.children.iter().map(|&c| self.nested(c)).collect(),
        }
    }

    pub(crate) fn push(&mut self, span: Span) -> NodeId {
        self.nodes.push(SpanNode {
            span,
            children: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut SpanNode {
        &mut self.nodes[id.0]
    }

    pub(crate) fn set_roots(&mut self, roots: Vec<NodeId>) {
        self.roots = roots;
    }

    /// Stable sort of every child list by start time.
    fn sort_children(&mut self) {
        for index in 0..self.nodes.len() {
            let mut children = std::mem::take(&mut self.nodes[index].children);
            children.sort_by(|&a, &b| self.extent(a).0.total_cmp(&self.extent(b).0));
            self.nodes[index].children = children;
        }
    }
}

impl Index<NodeId> for SpanTree {
    type Output = SpanNode;

    fn index(&self, id: NodeId) -> &SpanNode {
        &self.nodes[id.0]
    }
}

/// Rebuild the span hierarchy of a trace.
///
/// Roots (spans without `parent_span_id`) are processed first; otherwise the
/// map's insertion order is kept, so roots stay in encounter order. Siblings
/// are ordered by start time, ties keeping processing order.
/// A span whose parent is absent is wrapped in a synthetic orphan node keyed
/// by the missing id; the orphan hangs under the first true root if there is
/// one, or becomes a root itself. Every input span appears exactly once.
pub fn group_spans(spans: &IndexMap<SpanId, Span>) -> SpanTree {
    let mut builder = Builder {
        spans,
        tree: SpanTree::default(),
        parents: Vec::new(),
        lookup: HashMap::new(),
        pending: HashMap::new(),
        root: None,
    };

    let mut ordered: Vec<&Span> = spans.values().collect();
    ordered.sort_by_key(|span| span.parent_span_id.is_some());

    for span in ordered {
        builder.place(span);
    }

    let mut tree = builder.tree;
    tree.sort_children();
    tree
}

struct Builder<'a> {
    spans: &'a IndexMap<SpanId, Span>,
    tree: SpanTree,
    /// Parent of each node, indexed like `tree.nodes`.
    parents: Vec<Option<NodeId>>,
    /// Processed spans and orphans by span id.
    lookup: HashMap<&'a str, NodeId>,
    /// Spans materialized early because a child referenced them first.
    pending: HashMap<&'a str, NodeId>,
    /// First true root, which adopts orphans.
    root: Option<NodeId>,
}

impl<'a> Builder<'a> {
    fn place(&mut self, span: &'a Span) {
        let id = match self.pending.remove(span.span_id.as_str()) {
            Some(id) => id,
            None => self.push(span.clone()),
        };

        match span.parent_span_id.as_deref() {
            None => {
                self.tree.roots.push(id);
                self.root.get_or_insert(id);
            }
            Some(parent_id) => match self.resolve_parent(span, parent_id) {
                Some(parent) if !self.is_ancestor(id, parent) => self.attach(parent, id),
                _ => self.adopt_orphan(span, parent_id, id),
            },
        }

        self.lookup.insert(span.span_id.as_str(), id);
    }

    fn resolve_parent(&mut self, span: &Span, parent_id: &'a str) -> Option<NodeId> {
        if let Some(&parent) = self.lookup.get(parent_id) {
            return Some(parent);
        }
        if let Some(&parent) = self.pending.get(parent_id) {
            return Some(parent);
        }
        // A span is never its own parent; that case falls through to orphan wrapping.
        if parent_id == span.span_id {
            return None;
        }
        let spans = self.spans;
        let (key, parent_span) = spans.get_key_value(parent_id)?;
        let parent = self.push(parent_span.clone());
        self.pending.insert(key.as_str(), parent);
        Some(parent)
    }

    fn adopt_orphan(&mut self, span: &Span, parent_id: &'a str, child: NodeId) {
        let root_span_id = self.root.map(|r| self.tree[r].span.span_id.clone());
        let orphan = self.push(Span::orphan(parent_id, span.trace_id.clone(), root_span_id));
        match self.root {
            Some(root) => self.attach(root, orphan),
            None => self.tree.roots.push(orphan),
        }
        self.attach(orphan, child);
        self.lookup.entry(parent_id).or_insert(orphan);
    }

    fn push(&mut self, span: Span) -> NodeId {
        self.parents.push(None);
        self.tree.push(span)
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.tree.node_mut(parent).children.push(child);
        self.parents[child.0] = Some(parent);
    }

    /// Whether `node` is `candidate` or one of its ancestors.
    fn is_ancestor(&self, node: NodeId, candidate: NodeId) -> bool {
        let mut current = Some(candidate);
        while let Some(id) = current {
            if id == node {
                return true;
            }
            current = self.parents[id.0];
        }
        false
    }
}
