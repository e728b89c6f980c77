//! Strongly-connected components over the CFG
//!
//! Iterative Tarjan restricted to non-`continue` edges. After removing the
//! intentional back-edges of recursion, any remaining cycle is a structural
//! deadlock, so the deadlock check reduces to "any SCC with more than one
//! node, or a node with a non-continue self-loop".

use std::collections::HashMap;

use crate::cfg::{Cfg, NodeId};

/// Strongly-connected components of `cfg` ignoring `continue` edges
///
/// Components are returned in discovery order; node ids inside one component
/// keep the order Tarjan popped them in. Runs in O(|N| + |E|).
pub fn strongly_connected_components(cfg: &Cfg) -> Vec<Vec<NodeId>> {
    let nodes: Vec<&NodeId> = cfg.nodes().map(|e| &e.id).collect();
    let by_id: HashMap<&str, &NodeId> = nodes.iter().map(|n| (n.as_str(), *n)).collect();

    #[derive(Clone, Copy)]
    struct Meta {
        index: usize,
        lowlink: usize,
        on_stack: bool,
    }

    let mut meta: HashMap<&NodeId, Meta> = HashMap::new();
    let mut stack: Vec<&NodeId> = Vec::new();
    let mut next_index = 0usize;
    let mut components: Vec<Vec<NodeId>> = Vec::new();

    // Explicit work stack; frames remember which successor to resume at.
    enum Frame<'a> {
        Visit(&'a NodeId),
        Resume(&'a NodeId, usize),
    }

    for root in &nodes {
        if meta.contains_key(*root) {
            continue;
        }
        let mut work = vec![Frame::Visit(root)];

        while let Some(frame) = work.pop() {
            match frame {
                Frame::Visit(v) => {
                    meta.insert(
                        v,
                        Meta {
                            index: next_index,
                            lowlink: next_index,
                            on_stack: true,
                        },
                    );
                    next_index += 1;
                    stack.push(v);
                    work.push(Frame::Resume(v, 0));
                }
                Frame::Resume(v, succ_idx) => {
                    let successors: Vec<&NodeId> = cfg
                        .outgoing(v)
                        .into_iter()
                        .filter(|e| !e.edge_type.is_continue())
                        .map(|e| *by_id.get(e.to.as_str()).expect("edge target exists"))
                        .collect();

                    if let Some(&w) = successors.get(succ_idx) {
                        work.push(Frame::Resume(v, succ_idx + 1));
                        let w_meta = meta.get(w).map(|m| (m.index, m.on_stack));
                        match w_meta {
                            None => work.push(Frame::Visit(w)),
                            Some((w_index, true)) => {
                                let entry = meta.get_mut(v).expect("visited");
                                entry.lowlink = entry.lowlink.min(w_index);
                            }
                            Some(_) => {}
                        }
                    } else {
                        // All successors handled; fold lowlinks upward and
                        // pop a component if v is a root.
                        let v_meta = meta[v];
                        if let Some(Frame::Resume(parent, _)) = work.last() {
                            let v_low = v_meta.lowlink;
                            let entry = meta.get_mut(parent).expect("visited");
                            entry.lowlink = entry.lowlink.min(v_low);
                        }
                        if v_meta.lowlink == v_meta.index {
                            let mut component = Vec::new();
                            while let Some(w) = stack.pop() {
                                meta.get_mut(w).expect("on stack").on_stack = false;
                                component.push((*w).clone());
                                if w == v {
                                    break;
                                }
                            }
                            components.push(component);
                        }
                    }
                }
            }
        }
    }

    components
}

/// Whether `node` has a non-`continue` edge to itself
pub fn has_self_loop(cfg: &Cfg, node: &str) -> bool {
    cfg.outgoing(node)
        .iter()
        .any(|e| e.to == node && !e.edge_type.is_continue())
}
