//! Reference graph helpers
//!
//! Property values of the form `${path}` point at other properties. These
//! helpers find reference cycles and order nodes so dependencies come first.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

/// Every cycle in `edges`, each as a closed path `[a, b, .., a]`
///
/// A cycle is reported once, rotated so that its smallest node comes first.
/// Iteration follows the map's ordering, which keeps the output stable.
pub fn find_cycles<K>(edges: &BTreeMap<K, Vec<K>>) -> Vec<Vec<K>>
where
    K: Ord + Clone + Hash,
{
    let mut colour: HashMap<&K, Colour> = HashMap::new();
    let mut cycles: BTreeSet<Vec<K>> = BTreeSet::new();
    let mut ordered = Vec::new();

    for start in edges.keys() {
        if colour.get(start).copied().unwrap_or(Colour::White) != Colour::White {
            continue;
        }
        // explicit stack of (node, next edge index) keeps deep chains off the call stack
        let mut stack: Vec<(&K, usize)> = vec![(start, 0)];
        colour.insert(start, Colour::Grey);

        while let Some((node, next)) = stack.last().copied() {
            let targets = edges.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if next >= targets.len() {
                colour.insert(node, Colour::Black);
                stack.pop();
                continue;
            }
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }

            let target = &targets[next];
            match colour.get(target).copied().unwrap_or(Colour::White) {
                Colour::White => {
                    colour.insert(target, Colour::Grey);
                    stack.push((target, 0));
                }
                Colour::Grey => {
                    // back edge: the cycle is the stack from `target` to the top
                    if let Some(pos) = stack.iter().position(|(n, _)| *n == target) {
                        let path: Vec<K> = stack[pos..].iter().map(|(n, _)| (*n).clone()).collect();
                        let cycle = canonical_cycle(path);
                        if cycles.insert(cycle.clone()) {
                            ordered.push(cycle);
                        }
                    }
                }
                Colour::Black => {}
            }
        }
    }
    ordered
}

fn canonical_cycle<K: Ord + Clone>(mut path: Vec<K>) -> Vec<K> {
    if let Some((min_idx, _)) = path.iter().enumerate().min_by(|a, b| a.1.cmp(b.1)) {
        path.rotate_left(min_idx);
    }
    if let Some(first) = path.first().cloned() {
        path.push(first);
    }
    path
}

/// Order `nodes` so that each node's dependencies come before it
///
/// Nodes without dependency constraints keep their input order. Dependencies
/// outside `nodes` are ignored, and any remaining cycle is broken at the
/// point where the walk meets it.
pub fn stable_topo_order<K>(nodes: &[K], deps: &BTreeMap<K, BTreeSet<K>>) -> Vec<K>
where
    K: Ord + Clone + Hash,
{
    let members: BTreeSet<&K> = nodes.iter().collect();
    let mut visited: BTreeSet<&K> = BTreeSet::new();
    let mut out = Vec::with_capacity(nodes.len());

    fn visit<'a, K: Ord + Clone>(
        node: &'a K,
        deps: &'a BTreeMap<K, BTreeSet<K>>,
        members: &BTreeSet<&'a K>,
        visited: &mut BTreeSet<&'a K>,
        out: &mut Vec<K>,
    ) {
        if !visited.insert(node) {
            return;
        }
        if let Some(before) = deps.get(node) {
            for dep in before {
                if members.contains(dep) {
                    visit(dep, deps, members, visited, out);
                }
            }
        }
        out.push(node.clone());
    }

    for node in nodes {
        // `deps` keys borrow for the walk; look the node up there when present
        let node_ref = deps.get_key_value(node).map(|(k, _)| k);
        match node_ref {
            Some(key) => visit(key, deps, &members, &mut visited, &mut out),
            None => {
                if !visited.contains(node) {
                    visited.insert(node);
                    out.push(node.clone());
                }
            }
        }
    }
    out
}
