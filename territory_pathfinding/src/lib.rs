use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::hash::Hash;

/// A trait for graphs that can be searched.
///
/// `Node`: The type of node identifiers (e.g., a territory id).
/// `Ctx`: A context object passed to cost calculations (e.g., the world state
/// plus the guild a shipment belongs to).
pub trait Graph<Node, Ctx> {
    /// Return the traversable neighbors of a node.
    ///
    /// Filtering (closed borders, removed nodes) happens here, not in `cost`.
    fn neighbors(&self, node: Node, context: &Ctx) -> Vec<Node>;

    /// Calculate the cost of entering `to` from `from`.
    ///
    /// Costs are additive along a path. Callers that need lexicographic
    /// multi-criteria comparison pack the criteria into disjoint bit ranges.
    fn cost(&self, from: Node, to: Node, context: &Ctx) -> u64;
}

/// A generic Dijkstra pathfinder with explicit tie selection.
///
/// When several predecessors reach a node at exactly the same cost, the
/// winner is picked through `tie_break`: for the `n`-th equally-good
/// candidate the callback receives `n` and the candidate replaces the
/// incumbent iff it returns 0. A uniform draw in `[0, n)` therefore yields a
/// reservoir sample over tied paths; a callback that always returns a
/// non-zero value pins the first-found path deterministically.
pub struct Dijkstra;

impl Dijkstra {
    /// Find a minimum-cost simple path from `start` to `goal`.
    ///
    /// Returns the path (including both endpoints) and its total cost, or
    /// `None` when `goal` is unreachable.
    pub fn find_path<Node, Ctx, G>(
        graph: &G,
        start: Node,
        goal: Node,
        context: &Ctx,
        tie_break: &mut dyn FnMut(usize) -> usize,
    ) -> Option<(Vec<Node>, u64)>
    where
        Node: Copy + Eq + Hash + std::fmt::Debug,
        G: Graph<Node, Ctx>,
    {
        let mut open_set = BinaryHeap::new();
        let mut came_from: HashMap<Node, Node> = HashMap::new();
        let mut g_score: HashMap<Node, u64> = HashMap::new();
        // Number of equally-good candidates seen per node, for tie selection.
        let mut ties_seen: HashMap<Node, usize> = HashMap::new();
        let mut closed_set: HashSet<Node> = HashSet::new();

        g_score.insert(start, 0);
        open_set.push(State {
            node: start,
            cost: 0,
        });

        while let Some(State { node: current, .. }) = open_set.pop() {
            // Skip if already processed with a better path
            if !closed_set.insert(current) {
                continue;
            }

            if current == goal {
                // Reconstruct path
                let mut path = vec![current];
                let mut curr = current;
                while let Some(&prev) = came_from.get(&curr) {
                    path.push(prev);
                    curr = prev;
                }
                path.reverse();
                return Some((path, g_score[&goal]));
            }

            let current_g = g_score[&current];

            for neighbor in graph.neighbors(current, context) {
                // Skip already-processed nodes
                if closed_set.contains(&neighbor) {
                    continue;
                }

                let tentative_g = current_g + graph.cost(current, neighbor, context);
                let best = g_score.get(&neighbor).copied().unwrap_or(u64::MAX);

                match tentative_g.cmp(&best) {
                    Ordering::Less => {
                        came_from.insert(neighbor, current);
                        g_score.insert(neighbor, tentative_g);
                        ties_seen.insert(neighbor, 1);
                        open_set.push(State {
                            node: neighbor,
                            cost: tentative_g,
                        });
                    }
                    Ordering::Equal => {
                        // Equally good: keep or replace the incumbent
                        // predecessor according to the tie selector.
                        let seen = ties_seen.entry(neighbor).or_insert(1);
                        *seen += 1;
                        if tie_break(*seen) == 0 {
                            came_from.insert(neighbor, current);
                        }
                    }
                    Ordering::Greater => {}
                }
            }
        }

        None
    }
}

/// Tie selector that always keeps the first-found path.
///
/// Useful as a deterministic default and in tests.
pub fn keep_first(_candidates: usize) -> usize {
    1
}

/// Helper struct for the priority queue.
#[derive(Copy, Clone, Eq, PartialEq)]
struct State<Node> {
    node: Node,
    cost: u64,
}

// The priority queue depends on `Ord`.
// Explicitly implement the trait so the queue becomes a min-heap.
impl<Node: Eq> Ord for State<Node> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Notice that we flip the ordering on costs.
        other.cost.cmp(&self.cost)
    }
}

// `PartialOrd` needs to be implemented as well.
impl<Node: Eq> PartialOrd for State<Node> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
