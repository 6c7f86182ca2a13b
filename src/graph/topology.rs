use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

/// Error type for topology operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError<K: Debug + Clone> {
    /// Cycle detected in the graph
    CycleDetected { path: Vec<K> },
}

impl<K: Debug + Clone> std::fmt::Display for TopologyError<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyError::CycleDetected { path } => {
                write!(f, "Cycle detected: ")?;
                for (i, node) in path.iter().enumerate() {
                    if i > 0 {
                        write!(f, " -> ")?;
                    }
                    write!(f, "{:?}", node)?;
                }
                Ok(())
            }
        }
    }
}

impl<K: Debug + Clone> std::error::Error for TopologyError<K> {}

/// Generic topological sort using DFS
///
/// # Arguments
/// * `nodes` - Iterator over all nodes to sort
/// * `get_dependencies` - Function that returns the dependencies (predecessors) for a node
///
/// # Returns
/// A vector of nodes in topological order (dependencies before dependents),
/// or the cycle that prevents an ordering.
pub fn topological_sort<K>(
    nodes: impl IntoIterator<Item = K>,
    get_dependencies: impl Fn(&K) -> Vec<K>,
) -> Result<Vec<K>, TopologyError<K>>
where
    K: Hash + Eq + Clone + Debug,
{
    let nodes: Vec<K> = nodes.into_iter().collect();

    // Edge from dep -> node (dep must be processed before node)
    let mut adjacency: HashMap<K, Vec<K>> = HashMap::new();
    for node in &nodes {
        adjacency.entry(node.clone()).or_default();
        for dep in get_dependencies(node) {
            adjacency.entry(dep).or_default().push(node.clone());
        }
    }

    let mut sorted = Vec::with_capacity(nodes.len());
    let mut visited: HashSet<K> = HashSet::new();
    let mut on_path: HashSet<K> = HashSet::new();
    let mut path: Vec<K> = Vec::new();
    // (node, index of the next neighbor to visit)
    let mut stack: Vec<(K, usize)> = Vec::new();

    for root in &nodes {
        if visited.contains(root) {
            continue;
        }
        on_path.insert(root.clone());
        path.push(root.clone());
        stack.push((root.clone(), 0));

        while let Some((node, index)) = stack.last_mut() {
            let next = adjacency
                .get(&*node)
                .and_then(|neighbors| neighbors.get(*index))
                .cloned();
            *index += 1;

            match next {
                Some(neighbor) => {
                    if on_path.contains(&neighbor) {
                        let start = path.iter().position(|n| *n == neighbor).unwrap_or(0);
                        return Err(TopologyError::CycleDetected {
                            path: path[start..].to_vec(),
                        });
                    }
                    if visited.contains(&neighbor) {
                        continue;
                    }
                    on_path.insert(neighbor.clone());
                    path.push(neighbor.clone());
                    stack.push((neighbor, 0));
                }
                None => {
                    let Some((finished, _)) = stack.pop() else {
                        break;
                    };
                    path.pop();
                    on_path.remove(&finished);
                    visited.insert(finished.clone());
                    sorted.push(finished);
                }
            }
        }
    }

    // Reverse to get dependency order (dependencies first)
    sorted.reverse();

    Ok(sorted)
}

/// Shortest path from `start` to `goal`, searched forward along `successors` and
/// backward along `predecessors` at once. The smaller frontier is expanded first,
/// so the search ends as soon as either side runs dry.
///
/// The returned path includes both ends; `start == goal` yields a single-element path.
pub fn find_path<K>(
    start: K,
    goal: &K,
    successors: impl Fn(&K) -> Vec<K>,
    predecessors: impl Fn(&K) -> Vec<K>,
) -> Option<Vec<K>>
where
    K: Hash + Eq + Clone + Debug,
{
    if start == *goal {
        return Some(vec![start]);
    }

    // node -> the node it was reached from
    let mut forward: HashMap<K, Option<K>> = HashMap::from([(start.clone(), None)]);
    let mut backward: HashMap<K, Option<K>> = HashMap::from([(goal.clone(), None)]);
    let mut forward_frontier = vec![start];
    let mut backward_frontier = vec![goal.clone()];

    while !forward_frontier.is_empty() && !backward_frontier.is_empty() {
        let meeting = if forward_frontier.len() <= backward_frontier.len() {
            expand(&mut forward_frontier, &mut forward, &backward, &successors)
        } else {
            expand(&mut backward_frontier, &mut backward, &forward, &predecessors)
        };

        if let Some(meeting) = meeting {
            let mut path = trace_back(&forward, meeting.clone());
            path.reverse();
            path.extend(trace_back(&backward, meeting).into_iter().skip(1));
            return Some(path);
        }
    }

    None
}

/// Advances one breadth-first layer. Returns the first node also reached by the
/// opposite search.
fn expand<K>(
    frontier: &mut Vec<K>,
    reached: &mut HashMap<K, Option<K>>,
    opposite: &HashMap<K, Option<K>>,
    neighbors: &impl Fn(&K) -> Vec<K>,
) -> Option<K>
where
    K: Hash + Eq + Clone,
{
    for node in std::mem::take(frontier) {
        for next in neighbors(&node) {
            if reached.contains_key(&next) {
                continue;
            }
            reached.insert(next.clone(), Some(node.clone()));
            if opposite.contains_key(&next) {
                return Some(next);
            }
            frontier.push(next);
        }
    }
    None
}

fn trace_back<K>(reached: &HashMap<K, Option<K>>, from: K) -> Vec<K>
where
    K: Hash + Eq + Clone,
{
    let mut current = from;
    let mut path = vec![current.clone()];
    while let Some(Some(previous)) = reached.get(&current) {
        current = previous.clone();
        path.push(current.clone());
    }
    path
}
