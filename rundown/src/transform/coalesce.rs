use super::{Transformer, is_blank};
use crate::ast::{NodeId, NodeKind};

impl Transformer<'_> {
    /// Pair `RundownOpen`/`RundownClose` markers into `RundownBlock`s, first
    /// inside inline containers, then at block level.
    pub(super) fn coalesce(&mut self) {
        let order = self.ast.preorder();

        for &id in &order {
            let kind = self.ast.kind(id);
            if kind.holds_inlines() || kind.is_inline() {
                self.pair_markers(id, true);
            }
        }
        for &id in &order {
            if self.ast.kind(id).holds_inlines() && self.ast.is_attached(id) {
                self.hoist_unmatched(id);
            }
        }
        for id in self.ast.preorder() {
            let kind = self.ast.kind(id);
            if !kind.holds_inlines() && !kind.is_inline() {
                self.pair_markers(id, false);
            }
        }
        for id in self.ast.preorder() {
            if matches!(self.ast.kind(id), NodeKind::Paragraph) && self.ast.is_attached(id) {
                self.collapse_sole_annotation(id);
            }
        }
    }

    fn pair_markers(&mut self, container: NodeId, inline: bool) {
        let mut open: Vec<NodeId> = Vec::new();
        for child in self.ast.child_ids(container) {
            match self.ast.kind(child) {
                NodeKind::RundownOpen { .. } => open.push(child),
                NodeKind::RundownClose { span } => {
                    let close_span = span.clone();
                    let Some(start) = open.pop() else {
                        if !inline {
                            self.warn("closing </r> without a matching <r>", close_span);
                            self.ast.detach(child);
                        }
                        continue;
                    };
                    while let Some(next) = self.ast.next_sibling(start) {
                        if next == child {
                            break;
                        }
                        self.ast.append_child(start, next);
                    }
                    if let NodeKind::RundownOpen { attrs, span } = self.ast.kind(start).clone() {
                        self.ast.set_kind(
                            start,
                            NodeKind::RundownBlock {
                                attrs,
                                inline,
                                span: span.start..close_span.end,
                            },
                        );
                    }
                    self.ast.detach(child);
                }
                _ => {}
            }
        }
        if !inline {
            for start in open {
                if let NodeKind::RundownOpen { span, .. } = self.ast.kind(start) {
                    let span = span.clone();
                    self.warn("<r> annotation is never closed", span);
                }
                self.ast.detach(start);
            }
        }
    }

    /// An annotation may open at the start of one paragraph and close at the
    /// end of a later one. Move such unmatched markers out to block level so
    /// the block pass can pair them.
    fn hoist_unmatched(&mut self, para: NodeId) {
        loop {
            let Some(first) = self.first_content(para) else {
                break;
            };
            if !matches!(self.ast.kind(first), NodeKind::RundownOpen { .. }) {
                break;
            }
            self.ast.insert_before(para, first);
        }
        loop {
            let Some(last) = self.last_content(para) else {
                break;
            };
            if !matches!(self.ast.kind(last), NodeKind::RundownClose { .. }) {
                break;
            }
            self.ast.insert_after(para, last);
        }
        // Anything left over cannot be paired.
        for child in self.ast.child_ids(para) {
            match self.ast.kind(child) {
                NodeKind::RundownOpen { span, .. } => {
                    let span = span.clone();
                    self.warn("<r> annotation is never closed", span);
                    self.ast.detach(child);
                }
                NodeKind::RundownClose { span } => {
                    let span = span.clone();
                    self.warn("closing </r> without a matching <r>", span);
                    self.ast.detach(child);
                }
                _ => {}
            }
        }
        if self.first_content(para).is_none() {
            self.ast.detach(para);
        }
    }

    /// First child that is not whitespace; whitespace before it is dropped.
    fn first_content(&mut self, id: NodeId) -> Option<NodeId> {
        while let Some(child) = self.ast.first_child(id) {
            if is_blank(self.ast, child, self.source) {
                self.ast.detach(child);
            } else {
                return Some(child);
            }
        }
        None
    }

    fn last_content(&mut self, id: NodeId) -> Option<NodeId> {
        while let Some(child) = self.ast.last_child(id) {
            if is_blank(self.ast, child, self.source) {
                self.ast.detach(child);
            } else {
                return Some(child);
            }
        }
        None
    }

    /// A paragraph holding nothing but one annotation becomes that
    /// annotation at block level, with its inline children rewrapped in a
    /// paragraph.
    fn collapse_sole_annotation(&mut self, para: NodeId) {
        let content: Vec<NodeId> = self
            .ast
            .children(para)
            .filter(|c| !is_blank(self.ast, *c, self.source))
            .collect();
        let [only] = content.as_slice() else {
            return;
        };
        let only = *only;
        let NodeKind::RundownBlock { attrs, span, .. } = self.ast.kind(only).clone() else {
            return;
        };
        self.ast.insert_before(para, only);
        self.ast.set_kind(
            only,
            NodeKind::RundownBlock {
                attrs,
                inline: false,
                span,
            },
        );
        if self.ast.has_children(only) {
            let wrapper = self.ast.alloc(NodeKind::Paragraph);
            self.ast.move_children(only, wrapper);
            self.ast.append_child(only, wrapper);
        }
        self.ast.detach(para);
    }
}
