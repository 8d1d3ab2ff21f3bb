//! Startup validation of the provider dependency graph
//!
//! The graph is implied by `requires`/`supplies` declarations rather than
//! stored: an edge runs from any provider supplying a key to any provider
//! requiring it. Cycles and unsatisfiable requirements are configuration
//! errors caught before the service accepts requests.

use crate::types::{ContextKey, Provider};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Duplicate provider id '{0}'")]
    DuplicateId(String),

    #[error("Provider '{provider}' requires {key:?}, which no provider supplies")]
    Unsatisfiable {
        provider: String,
        key: ContextKey,
    },

    #[error("Dependency cycle among providers: {0:?}")]
    Cycle(Vec<String>),
}

/// Validate the registered provider set against the keys seeded into the
/// context at run start.
pub fn validate(
    providers: &[Arc<dyn Provider>],
    seeded: &[ContextKey],
) -> Result<(), GraphError> {
    let mut ids = HashSet::new();
    for p in providers {
        if !ids.insert(p.id()) {
            return Err(GraphError::DuplicateId(p.id().to_string()));
        }
    }

    // Who supplies each key
    let mut suppliers: HashMap<ContextKey, Vec<&'static str>> = HashMap::new();
    for p in providers {
        for &key in p.supplies() {
            suppliers.entry(key).or_default().push(p.id());
        }
    }

    // Every requirement must be seeded or supplied by someone
    for p in providers {
        for &key in p.requires() {
            if !seeded.contains(&key) && !suppliers.contains_key(&key) {
                return Err(GraphError::Unsatisfiable {
                    provider: p.id().to_string(),
                    key,
                });
            }
        }
    }

    // Kahn's algorithm over supplier -> consumer edges. Seeded keys
    // contribute no edges.
    let mut in_degree: HashMap<&'static str, usize> =
        providers.iter().map(|p| (p.id(), 0)).collect();
    let mut edges: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
    for p in providers {
        for &key in p.requires() {
            if seeded.contains(&key) {
                continue;
            }
            if let Some(sups) = suppliers.get(&key) {
                for &sup in sups {
                    if sup == p.id() {
                        continue;
                    }
                    edges.entry(sup).or_default().push(p.id());
                    if let Some(d) = in_degree.get_mut(p.id()) {
                        *d += 1;
                    }
                }
            }
        }
    }

    let mut queue: VecDeque<&'static str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut visited = 0usize;
    while let Some(id) = queue.pop_front() {
        visited += 1;
        if let Some(next) = edges.get(id) {
            for &n in next {
                if let Some(d) = in_degree.get_mut(n) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(n);
                    }
                }
            }
        }
    }

    if visited < providers.len() {
        let mut stuck: Vec<String> = in_degree
            .iter()
            .filter(|(_, &d)| d > 0)
            .map(|(&id, _)| id.to_string())
            .collect();
        stuck.sort();
        return Err(GraphError::Cycle(stuck));
    }

    Ok(())
}
