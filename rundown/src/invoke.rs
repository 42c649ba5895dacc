//! Expansion of `<r invoke="…"/>`: the target section's content is copied
//! under the invoke node, with headings re-levelled to fit the invoke point.

use crate::ast::{NodeId, NodeKind, SkipTarget};
use crate::transform::Transformer;

/// Invocations inside invoked content are expanded up to this depth.
const MAX_DEPTH: usize = 8;

pub(crate) fn expand(t: &mut Transformer<'_>) {
    for _ in 0..MAX_DEPTH {
        let pending = pending(t);
        if pending.is_empty() {
            return;
        }
        for invoke in pending {
            expand_one(t, invoke);
        }
    }
    for invoke in pending(t) {
        let span = mark_expanded(t, invoke);
        t.warn("invocations are nested too deeply", span);
    }
}

fn pending(t: &Transformer<'_>) -> Vec<NodeId> {
    t.ast
        .preorder()
        .into_iter()
        .filter(|id| matches!(t.ast.kind(*id), NodeKind::InvokeBlock(spec) if !spec.expanded))
        .collect()
}

fn mark_expanded(t: &mut Transformer<'_>, invoke: NodeId) -> std::ops::Range<usize> {
    match t.ast.kind_mut(invoke) {
        NodeKind::InvokeBlock(spec) => {
            spec.expanded = true;
            spec.span.clone()
        }
        _ => 0..0,
    }
}

fn find_section(t: &Transformer<'_>, name: &str) -> Option<NodeId> {
    t.ast
        .preorder()
        .into_iter()
        .find(|id| matches!(t.ast.kind(*id), NodeKind::SectionPointer(p) if p.name == name))
}

fn expand_one(t: &mut Transformer<'_>, invoke: NodeId) {
    let NodeKind::InvokeBlock(spec) = t.ast.kind(invoke).clone() else {
        return;
    };
    let span = mark_expanded(t, invoke);

    let Some(pointer_id) = find_section(t, &spec.target) else {
        t.warn(format!("invoked section `{}` does not exist", spec.target), span);
        return;
    };
    let NodeKind::SectionPointer(pointer) = t.ast.kind(pointer_id).clone() else {
        return;
    };
    let Some(end) = pointer.end else {
        return;
    };

    // Invoking a section from inside itself would never terminate.
    let order = t.ast.preorder();
    let position = |id: NodeId| order.iter().position(|n| *n == id);
    let (Some(at), Some(start), Some(stop)) = (position(invoke), position(pointer_id), position(end))
    else {
        return;
    };
    let nested_in_same = t.ast.ancestors(invoke).any(|a| {
        matches!(t.ast.kind(a), NodeKind::InvokeBlock(outer) if outer.target == spec.target)
    });
    if (start < at && at < stop) || nested_in_same {
        t.warn(format!("section `{}` invokes itself", spec.target), span);
        return;
    }

    let invoke_level = order[..at]
        .iter()
        .rev()
        .find_map(|id| match t.ast.kind(*id) {
            NodeKind::Heading { level } => Some(*level),
            _ => None,
        })
        .unwrap_or(0);

    let mut sources = Vec::new();
    let mut cursor = t.ast.next_sibling(pointer_id);
    while let Some(node) = cursor {
        if node == end {
            break;
        }
        let skip_heading = Some(node) == pointer.heading && !spec.keep_heading;
        if !skip_heading && keep(t.ast.kind(node)) {
            sources.push(node);
        }
        cursor = t.ast.next_sibling(node);
    }

    let container = match &pointer.if_script {
        Some(script) => {
            let cond = t.ast.alloc(NodeKind::ConditionalStart {
                if_script: script.clone(),
                end: None,
            });
            t.ast.append_child(invoke, cond);
            Some(cond)
        }
        None => None,
    };

    let (copies, _) = t.ast.deep_copy_many(&sources, &keep);
    for copy in &copies {
        t.ast.append_child(invoke, *copy);
    }

    if let Some(cond) = container {
        let cond_end = t.ast.alloc(NodeKind::ConditionalEnd { start: cond });
        t.ast.append_child(invoke, cond_end);
        if let NodeKind::ConditionalStart { end, .. } = t.ast.kind_mut(cond) {
            *end = Some(cond_end);
        }
    }

    relevel(t, &copies, invoke_level);
}

/// Section markers and options stay with the original section.
fn keep(kind: &NodeKind) -> bool {
    !matches!(
        kind,
        NodeKind::SectionPointer(_) | NodeKind::SectionEnd { .. } | NodeKind::SectionOption(_)
    )
}

fn relevel(t: &mut Transformer<'_>, copies: &[NodeId], invoke_level: u8) {
    let nodes: Vec<NodeId> = copies.iter().flat_map(|c| t.ast.subtree(*c)).collect();
    let first_level = nodes.iter().find_map(|id| match t.ast.kind(*id) {
        NodeKind::Heading { level } => Some(*level),
        _ => None,
    });
    let offset = first_level.map_or(0, |first| i16::from(invoke_level) + 1 - i16::from(first));

    for id in nodes {
        let fresh_id = matches!(t.ast.kind(id), NodeKind::ExecutionBlock(_)).then(|| t.next_exec_id());
        match t.ast.kind_mut(id) {
            NodeKind::Heading { level } => {
                *level = (i16::from(*level) + offset).clamp(1, 6) as u8;
            }
            NodeKind::ExecutionBlock(spec) => {
                if let Some(fresh) = fresh_id {
                    spec.id = fresh;
                }
                spec.skip_target = SkipTarget::Unresolved;
            }
            NodeKind::SkipBlock { target } => *target = SkipTarget::Unresolved,
            _ => {}
        }
    }
}
