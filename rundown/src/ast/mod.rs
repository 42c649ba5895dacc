mod kind;

pub use kind::{
    CodeBody, ExecutionSpec, InvokeSpec, NodeKind, SectionPointer, SkipTarget, SpinnerMode,
    StopSpec, TextSpan,
};

use std::collections::HashMap;
use std::fmt::Write as _;

/// Index of a node inside an [`Ast`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

/// Mutable document tree.
///
/// Nodes live in a flat arena and are linked through parent, child and
/// sibling indices, so that passes can splice, move and copy subtrees while
/// holding plain `NodeId` handles. Detached nodes stay allocated but are no
/// longer reachable from the root.
#[derive(Debug, Clone)]
pub struct Ast {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for Ast {
    fn default() -> Self {
        Self::new()
    }
}

impl Ast {
    pub fn new() -> Self {
        let mut ast = Ast {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        ast.root = ast.alloc(NodeKind::Document);
        ast
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_child(self.root).is_none()
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id.index()].kind
    }

    pub fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
        self.nodes[id.index()].kind = kind;
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].first_child
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].last_child
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].next
    }

    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].prev
    }

    pub fn has_children(&self, id: NodeId) -> bool {
        self.first_child(id).is_some()
    }

    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            ast: self,
            next: self.first_child(id),
        }
    }

    /// Snapshot of the direct children, safe to hold across mutation.
    pub fn child_ids(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id).collect()
    }

    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            ast: self,
            next: self.parent(id),
        }
    }

    /// Whether the node is still reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        id == self.root || self.ancestors(id).any(|a| a == self.root)
    }

    /// Every node reachable from the root, in document (pre-)order.
    pub fn preorder(&self) -> Vec<NodeId> {
        self.subtree(self.root)
    }

    /// `id` and all its descendants, in document order.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            out.push(node);
            let mut child = self.last_child(node);
            while let Some(c) = child {
                stack.push(c);
                child = self.prev_sibling(c);
            }
        }
        out
    }

    /// Siblings following `id`, in order.
    pub fn following_siblings(&self, id: NodeId) -> Children<'_> {
        Children {
            ast: self,
            next: self.next_sibling(id),
        }
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Allocate a detached node.
    pub fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            parent: None,
            first_child: None,
            last_child: None,
            prev: None,
            next: None,
        });
        id
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        let last = self.nodes[parent.index()].last_child;
        {
            let node = &mut self.nodes[child.index()];
            node.parent = Some(parent);
            node.prev = last;
            node.next = None;
        }
        match last {
            Some(last) => self.nodes[last.index()].next = Some(child),
            None => self.nodes[parent.index()].first_child = Some(child),
        }
        self.nodes[parent.index()].last_child = Some(child);
    }

    pub fn insert_before(&mut self, anchor: NodeId, node: NodeId) {
        self.detach(node);
        let parent = self.parent(anchor);
        let prev = self.prev_sibling(anchor);
        {
            let n = &mut self.nodes[node.index()];
            n.parent = parent;
            n.prev = prev;
            n.next = Some(anchor);
        }
        self.nodes[anchor.index()].prev = Some(node);
        match prev {
            Some(prev) => self.nodes[prev.index()].next = Some(node),
            None => {
                if let Some(parent) = parent {
                    self.nodes[parent.index()].first_child = Some(node);
                }
            }
        }
    }

    pub fn insert_after(&mut self, anchor: NodeId, node: NodeId) {
        self.detach(node);
        let parent = self.parent(anchor);
        let next = self.next_sibling(anchor);
        {
            let n = &mut self.nodes[node.index()];
            n.parent = parent;
            n.prev = Some(anchor);
            n.next = next;
        }
        self.nodes[anchor.index()].next = Some(node);
        match next {
            Some(next) => self.nodes[next.index()].prev = Some(node),
            None => {
                if let Some(parent) = parent {
                    self.nodes[parent.index()].last_child = Some(node);
                }
            }
        }
    }

    /// Unlink a node (and its subtree) from its parent and siblings.
    pub fn detach(&mut self, id: NodeId) {
        let (parent, prev, next) = {
            let n = &self.nodes[id.index()];
            (n.parent, n.prev, n.next)
        };
        match prev {
            Some(prev) => self.nodes[prev.index()].next = next,
            None => {
                if let Some(parent) = parent {
                    self.nodes[parent.index()].first_child = next;
                }
            }
        }
        match next {
            Some(next) => self.nodes[next.index()].prev = prev,
            None => {
                if let Some(parent) = parent {
                    self.nodes[parent.index()].last_child = prev;
                }
            }
        }
        let n = &mut self.nodes[id.index()];
        n.parent = None;
        n.prev = None;
        n.next = None;
    }

    /// Move all children of `from` to sit directly after `anchor`, keeping
    /// their order. Returns the last moved node, or `anchor` if there were
    /// none.
    pub fn splice_children_after(&mut self, from: NodeId, anchor: NodeId) -> NodeId {
        let mut cursor = anchor;
        for child in self.child_ids(from) {
            self.insert_after(cursor, child);
            cursor = child;
        }
        cursor
    }

    /// Move all children of `from` to the end of `to`.
    pub fn move_children(&mut self, from: NodeId, to: NodeId) {
        for child in self.child_ids(from) {
            self.append_child(to, child);
        }
    }

    /// Deep copy of `id`'s subtree, skipping descendants for which `keep`
    /// returns false. Node references held inside kinds are remapped to the
    /// copies when both ends were copied. Returns the new (detached) root
    /// together with the old-to-new id map.
    pub fn deep_copy(
        &mut self,
        id: NodeId,
        keep: &dyn Fn(&NodeKind) -> bool,
    ) -> (NodeId, HashMap<NodeId, NodeId>) {
        let (copies, map) = self.deep_copy_many(&[id], keep);
        (copies[0], map)
    }

    /// Like [`Ast::deep_copy`] for a run of siblings. References between the
    /// copied subtrees, such as a conditional start and its end, point at the
    /// copies.
    pub fn deep_copy_many(
        &mut self,
        ids: &[NodeId],
        keep: &dyn Fn(&NodeKind) -> bool,
    ) -> (Vec<NodeId>, HashMap<NodeId, NodeId>) {
        let mut map = HashMap::new();
        let copies: Vec<NodeId> = ids
            .iter()
            .map(|id| self.copy_rec(*id, keep, &mut map))
            .collect();
        for new in map.values().copied().collect::<Vec<_>>() {
            let kind = self.kind_mut(new);
            kind.remap_refs(&map);
        }
        (copies, map)
    }

    fn copy_rec(
        &mut self,
        id: NodeId,
        keep: &dyn Fn(&NodeKind) -> bool,
        map: &mut HashMap<NodeId, NodeId>,
    ) -> NodeId {
        let copy = self.alloc(self.kind(id).clone());
        map.insert(id, copy);
        for child in self.child_ids(id) {
            if !keep(self.kind(child)) {
                continue;
            }
            let c = self.copy_rec(child, keep, map);
            self.append_child(copy, c);
        }
        copy
    }

    // -----------------------------------------------------------------------
    // Debugging
    // -----------------------------------------------------------------------

    /// Indented outline of the reachable tree. Two trees with equal dumps
    /// are structurally identical.
    pub fn dump(&self, source: &str) -> String {
        let mut out = String::new();
        self.dump_rec(self.root, 0, source, &mut out);
        out
    }

    fn dump_rec(&self, id: NodeId, depth: usize, source: &str, out: &mut String) {
        let _ = writeln!(out, "{}{}", "  ".repeat(depth), self.kind(id).describe(source));
        for child in self.children(id) {
            self.dump_rec(child, depth + 1, source, out);
        }
    }
}

pub struct Children<'a> {
    ast: &'a Ast,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.ast.next_sibling(current);
        Some(current)
    }
}

pub struct Ancestors<'a> {
    ast: &'a Ast,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.ast.parent(current);
        Some(current)
    }
}
