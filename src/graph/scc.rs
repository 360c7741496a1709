use crate::core::node::NodeId;
use crate::graph::liability_graph::LiabilityGraph;

const UNVISITED: u32 = u32::MAX;

/// Strongly connected components of the subgraph induced by `member`,
/// found with an iterative Tarjan walk over debtor → creditor edges.
///
/// Components come back debtors first: if any member of component `a`
/// owes a member of component `b`, `a` precedes `b`. Nodes inside a
/// component are in ascending index order.
pub fn strongly_connected_components(
    graph: &LiabilityGraph,
    member: impl Fn(NodeId) -> bool,
) -> Vec<Vec<NodeId>> {
    let n = graph.node_count();
    let counterparties = graph.counterparties();
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0u32; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<NodeId> = Vec::new();
    let mut frames: Vec<(NodeId, usize)> = Vec::new();
    let mut next_index = 0u32;
    let mut components = Vec::new();

    for root in graph.nodes() {
        if !member(root) || index[root.index()] != UNVISITED {
            continue;
        }
        index[root.index()] = next_index;
        lowlink[root.index()] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root.index()] = true;
        frames.push((root, graph.edge_range(root).start));

        while let Some(&(v, pos)) = frames.last() {
            let vi = v.index();
            if pos < graph.edge_range(v).end {
                if let Some(frame) = frames.last_mut() {
                    frame.1 += 1;
                }
                let w = counterparties[pos];
                let wi = w.index();
                if !member(w) {
                    continue;
                }
                if index[wi] == UNVISITED {
                    index[wi] = next_index;
                    lowlink[wi] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack[wi] = true;
                    frames.push((w, graph.edge_range(w).start));
                } else if on_stack[wi] {
                    lowlink[vi] = lowlink[vi].min(index[wi]);
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                let pi = parent.index();
                lowlink[pi] = lowlink[pi].min(lowlink[vi]);
            }
            if lowlink[vi] == index[vi] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w.index()] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                component.sort_unstable();
                components.push(component);
            }
        }
    }

    // Tarjan emits a component only after everything it reaches.
    components.reverse();
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::LiabilityGraphBuilder;

    fn n(i: u32) -> NodeId {
        NodeId::new(i)
    }

    #[test]
    fn test_cycle_and_tail() {
        // 0 → 1 → 2 → 1, 2 → 3; node 4 is the sink.
        let mut builder = LiabilityGraphBuilder::new(5, n(4)).unwrap();
        builder.add_liability(n(0), n(1), 10.0).unwrap();
        builder.add_liability(n(1), n(2), 10.0).unwrap();
        builder.add_liability(n(2), n(1), 5.0).unwrap();
        builder.add_liability(n(2), n(3), 5.0).unwrap();
        let graph = builder.build();

        let components = strongly_connected_components(&graph, |node| node != n(4));
        assert_eq!(components, vec![vec![n(0)], vec![n(1), n(2)], vec![n(3)]]);
    }

    #[test]
    fn test_member_filter_cuts_edges() {
        let mut builder = LiabilityGraphBuilder::new(4, n(3)).unwrap();
        builder.add_liability(n(0), n(1), 10.0).unwrap();
        builder.add_liability(n(1), n(0), 10.0).unwrap();
        builder.add_liability(n(1), n(2), 10.0).unwrap();
        let graph = builder.build();

        let components = strongly_connected_components(&graph, |node| node != n(1));
        assert_eq!(components.len(), 3);
        assert!(components.iter().all(|c| c.len() == 1));
        assert!(!components.iter().any(|c| c.contains(&n(1))));
    }

    #[test]
    fn test_long_chain_does_not_recurse() {
        let len = 50_000u32;
        let mut builder = LiabilityGraphBuilder::new(len as usize + 1, n(len)).unwrap();
        for i in 0..len - 1 {
            builder.add_liability(n(i), n(i + 1), 1.0).unwrap();
        }
        let graph = builder.build();

        let components = strongly_connected_components(&graph, |node| node != n(len));
        assert_eq!(components.len(), len as usize);
        assert_eq!(components[0], vec![n(0)]);
        assert_eq!(components[len as usize - 1], vec![n(len - 1)]);
    }
}
