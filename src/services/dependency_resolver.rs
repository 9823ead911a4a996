use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Task;

/// Validates dependency edges within a swarm and rejects cycles.
///
/// Both `depends_on` and `triggers_after` count as edges, so an ordering
/// reference can never close a loop either.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver;

fn edges(task: &Task) -> impl Iterator<Item = Uuid> + '_ {
    task.depends_on.iter().chain(task.triggers_after.iter()).copied()
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Check that every referenced task exists in the candidate's swarm.
    pub fn validate_references(&self, candidate: &Task, swarm_tasks: &[Task]) -> DomainResult<()> {
        let known: HashSet<Uuid> = swarm_tasks
            .iter()
            .filter(|t| t.swarm_id == candidate.swarm_id)
            .map(|t| t.id)
            .collect();

        for dep_id in edges(candidate) {
            if dep_id == candidate.id {
                return Err(DomainError::ValidationFailed(
                    "Task cannot depend on itself".to_string(),
                ));
            }
            if !known.contains(&dep_id) {
                return Err(DomainError::ValidationFailed(format!(
                    "Dependency task {dep_id} not found in swarm {}",
                    candidate.swarm_id
                )));
            }
        }
        Ok(())
    }

    /// Find a cycle anywhere in `tasks`, returned as a closed path.
    pub fn detect_cycle(&self, tasks: &[Task]) -> Option<Vec<Uuid>> {
        let graph: HashMap<Uuid, Vec<Uuid>> =
            tasks.iter().map(|t| (t.id, edges(t).collect())).collect();

        let mut done = HashSet::new();
        let mut roots: Vec<Uuid> = graph.keys().copied().collect();
        roots.sort_unstable();

        for root in roots {
            if let Some(cycle) = find_cycle_from(root, &graph, &mut done) {
                return Some(cycle);
            }
        }
        None
    }

    /// Validate a created or edited task against the rest of its swarm.
    ///
    /// `swarm_tasks` may contain a stale copy of `candidate`; it is replaced.
    pub fn check_mutation(&self, candidate: &Task, swarm_tasks: &[Task]) -> DomainResult<()> {
        self.validate_references(candidate, swarm_tasks)?;

        let mut graph: HashMap<Uuid, Vec<Uuid>> = swarm_tasks
            .iter()
            .filter(|t| t.id != candidate.id)
            .map(|t| (t.id, edges(t).collect()))
            .collect();
        graph.insert(candidate.id, edges(candidate).collect());

        // The stored graph is acyclic, so any new cycle runs through the candidate
        let mut done = HashSet::new();
        match find_cycle_from(candidate.id, &graph, &mut done) {
            Some(cycle) => Err(DomainError::DependencyCycle(cycle)),
            None => Ok(()),
        }
    }
}

/// Iterative DFS from `root`. Each node is expanded at most once across calls
/// sharing `done`, which bounds the walk by the size of the graph.
fn find_cycle_from(
    root: Uuid,
    graph: &HashMap<Uuid, Vec<Uuid>>,
    done: &mut HashSet<Uuid>,
) -> Option<Vec<Uuid>> {
    if done.contains(&root) {
        return None;
    }

    let mut path: Vec<Uuid> = vec![root];
    let mut on_path: HashSet<Uuid> = HashSet::from([root]);
    let mut cursors: Vec<usize> = vec![0];

    while let Some(&node) = path.last() {
        let neighbors = graph.get(&node).map(Vec::as_slice).unwrap_or_default();
        let Some(cursor) = cursors.last_mut() else {
            break;
        };

        if let Some(&next) = neighbors.get(*cursor) {
            *cursor += 1;
            if on_path.contains(&next) {
                let start = path.iter().position(|&id| id == next).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(next);
                return Some(cycle);
            }
            if !done.contains(&next) && graph.contains_key(&next) {
                path.push(next);
                on_path.insert(next);
                cursors.push(0);
            }
        } else {
            path.pop();
            cursors.pop();
            on_path.remove(&node);
            done.insert(node);
        }
    }

    None
}
