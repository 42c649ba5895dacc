use std::collections::HashMap;

use super::Transformer;
use crate::ast::{Ast, NodeId, NodeKind, SkipTarget};

/// Document-order extent of one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionExtent {
    pub pointer: NodeId,
    pub start: usize,
    pub end: usize,
}

/// Position of every reachable node in document order, plus the extent of
/// every section that has an end.
pub fn extents(ast: &Ast) -> (HashMap<NodeId, usize>, Vec<SectionExtent>) {
    let order = ast.preorder();
    let pos: HashMap<NodeId, usize> = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let sections = order
        .iter()
        .filter_map(|id| match ast.kind(*id) {
            NodeKind::SectionPointer(p) => {
                let end = p.end.and_then(|e| pos.get(&e))?;
                Some(SectionExtent {
                    pointer: *id,
                    start: pos[id],
                    end: *end,
                })
            }
            _ => None,
        })
        .collect();
    (pos, sections)
}

fn innermost(sections: &[SectionExtent], at: usize) -> Option<NodeId> {
    sections
        .iter()
        .filter(|s| s.start < at && at < s.end)
        .max_by_key(|s| s.start)
        .map(|s| s.pointer)
}

/// Map from each node to the innermost section containing it.
pub fn innermost_sections(ast: &Ast) -> HashMap<NodeId, NodeId> {
    let (pos, sections) = extents(ast);
    pos.into_iter()
        .filter_map(|(id, at)| innermost(&sections, at).map(|s| (id, s)))
        .collect()
}

/// Shallowest heading level in the document. Sections declared at this
/// level are root-level.
pub fn root_level(ast: &Ast) -> Option<u8> {
    ast.preorder()
        .into_iter()
        .filter_map(|id| match ast.kind(id) {
            NodeKind::Heading { level } => Some(*level),
            _ => None,
        })
        .min()
}

impl Transformer<'_> {
    /// Insert a `SectionEnd` for every heading section: before the next
    /// heading of the same or a shallower level, ahead of any section
    /// markers that precede that heading.
    pub(super) fn place_section_ends(&mut self) {
        for id in self.ast.preorder() {
            let NodeKind::SectionPointer(pointer) = self.ast.kind(id) else {
                continue;
            };
            if pointer.end.is_some() {
                continue;
            }
            let Some(heading) = pointer.heading else {
                continue;
            };
            let level = pointer.level;
            let Some(parent) = self.ast.parent(heading) else {
                continue;
            };

            let following: Vec<NodeId> = self.ast.following_siblings(heading).collect();
            let anchor = following.iter().copied().find(|sib| match self.ast.kind(*sib) {
                NodeKind::Heading { level: l } => *l <= level,
                // Ends of enclosing blocks that started before this heading.
                NodeKind::SectionEnd { pointer } => !following.contains(pointer),
                NodeKind::ConditionalEnd { start } => !following.contains(start),
                _ => false,
            });

            let end = self.ast.alloc(NodeKind::SectionEnd { pointer: id });
            match anchor {
                Some(mut anchor) => {
                    while let Some(prev) = self.ast.prev_sibling(anchor) {
                        let markers = matches!(
                            self.ast.kind(prev),
                            NodeKind::SectionPointer(_) | NodeKind::SectionEnd { .. }
                        );
                        if !markers || prev == id {
                            break;
                        }
                        anchor = prev;
                    }
                    self.ast.insert_before(anchor, end);
                }
                None => self.ast.append_child(parent, end),
            }
            if let NodeKind::SectionPointer(pointer) = self.ast.kind_mut(id) {
                pointer.end = Some(end);
            }
        }
    }

    /// Attach options, descriptions and dependencies to the innermost
    /// section that contains them.
    pub(super) fn populate_sections(&mut self) {
        let (pos, sections) = extents(self.ast);
        for s in &sections {
            if let NodeKind::SectionPointer(p) = self.ast.kind_mut(s.pointer) {
                p.options.clear();
                p.dependencies.clear();
                p.long_description = None;
            }
        }

        for id in self.ast.preorder() {
            let Some(owner) = innermost(&sections, pos[&id]) else {
                continue;
            };
            match self.ast.kind(id).clone() {
                NodeKind::SectionOption(spec) => {
                    if let NodeKind::SectionPointer(p) = self.ast.kind_mut(owner) {
                        match p.options.iter_mut().find(|o| o.name == spec.name) {
                            Some(existing) => *existing = spec,
                            None => p.options.push(spec),
                        }
                    }
                }
                NodeKind::DescriptionBlock { short } => {
                    if let NodeKind::SectionPointer(p) = self.ast.kind_mut(owner) {
                        if p.long_description.is_none() {
                            p.long_description = Some(id);
                        }
                        if short.is_some() {
                            p.short_description = short;
                        }
                    }
                }
                NodeKind::InvokeBlock(spec) if spec.as_dependency => {
                    if let NodeKind::SectionPointer(p) = self.ast.kind_mut(owner) {
                        if !p.dependencies.contains(&spec.target) {
                            p.dependencies.push(spec.target.clone());
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Point each skip-capable node at the end of whatever encloses it: the
    /// invocation it was copied into, else its innermost section, else the
    /// end of the document.
    pub(super) fn resolve_skip_targets(&mut self) {
        let (pos, sections) = extents(self.ast);
        for id in self.ast.preorder() {
            if !matches!(
                self.ast.kind(id),
                NodeKind::ExecutionBlock(_) | NodeKind::SkipBlock { .. }
            ) {
                continue;
            }
            let invoke = self
                .ast
                .ancestors(id)
                .find(|a| matches!(self.ast.kind(*a), NodeKind::InvokeBlock(_)));
            let target = match invoke {
                Some(invoke) => SkipTarget::ExitOf(invoke),
                None => match innermost(&sections, pos[&id]) {
                    Some(section) => match self.ast.kind(section) {
                        NodeKind::SectionPointer(p) => p.end.map_or(SkipTarget::End, SkipTarget::Node),
                        _ => SkipTarget::End,
                    },
                    None => SkipTarget::End,
                },
            };
            match self.ast.kind_mut(id) {
                NodeKind::ExecutionBlock(spec) => spec.skip_target = target,
                NodeKind::SkipBlock { target: t } => *t = target,
                _ => {}
            }
        }
    }
}
