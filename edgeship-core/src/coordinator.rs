//! Cross-domain dependency validation and execution ordering.
//!
//! Runs before any pipeline starts; every error here aborts the whole run.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use edgeship_model::DomainName;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};

/// `dependent` may only start once `prerequisite` has COMPLETED.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DependencyEdge {
    pub dependent: DomainName,
    pub prerequisite: DomainName,
}

impl DependencyEdge {
    pub fn new(
        dependent: impl AsRef<str>,
        prerequisite: impl AsRef<str>,
    ) -> Self {
        Self {
            dependent: DomainName::new(dependent),
            prerequisite: DomainName::new(prerequisite),
        }
    }
}

/// Validated schedule for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    order: Vec<DomainName>,
    prerequisites: BTreeMap<DomainName, Vec<DomainName>>,
    waves: Vec<Vec<DomainName>>,
}

impl ExecutionPlan {
    /// Topological order; ties keep the caller's domain order.
    pub fn order(&self) -> &[DomainName] {
        &self.order
    }

    pub fn prerequisites(&self, domain: &DomainName) -> &[DomainName] {
        self.prerequisites
            .get(domain)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Groups of domains with no dependency relationship among themselves;
    /// wave `n` only depends on waves `< n`.
    pub fn waves(&self) -> &[Vec<DomainName>] {
        &self.waves
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CrossDomainCoordinator;

impl CrossDomainCoordinator {
    pub fn new() -> Self {
        Self
    }

    pub fn plan(
        &self,
        domains: &[DomainName],
        edges: &[DependencyEdge],
    ) -> Result<ExecutionPlan> {
        let position: HashMap<&DomainName, usize> = domains
            .iter()
            .enumerate()
            .map(|(index, domain)| (domain, index))
            .collect();
        if position.len() != domains.len() {
            return Err(EngineError::Validation(
                "domain list contains duplicates".to_string(),
            ));
        }

        let mut prerequisites: BTreeMap<DomainName, BTreeSet<DomainName>> =
            BTreeMap::new();
        for edge in edges {
            for name in [&edge.dependent, &edge.prerequisite] {
                if !position.contains_key(name) {
                    return Err(EngineError::UnknownDomain(name.clone()));
                }
            }
            if edge.dependent == edge.prerequisite {
                return Err(EngineError::CircularDependency {
                    cycle: vec![
                        edge.dependent.to_string(),
                        edge.dependent.to_string(),
                    ],
                });
            }
            prerequisites
                .entry(edge.dependent.clone())
                .or_default()
                .insert(edge.prerequisite.clone());
        }

        let mut dependents: HashMap<&DomainName, Vec<&DomainName>> =
            HashMap::new();
        let mut indegree: Vec<usize> = vec![0; domains.len()];
        for (dependent, prereqs) in &prerequisites {
            indegree[position[dependent]] = prereqs.len();
            for prereq in prereqs {
                dependents.entry(prereq).or_default().push(dependent);
            }
        }

        let mut wave_of: Vec<usize> = vec![0; domains.len()];
        let mut ready: VecDeque<usize> = (0..domains.len())
            .filter(|&index| indegree[index] == 0)
            .collect();
        let mut order = Vec::with_capacity(domains.len());

        while let Some(index) = ready.pop_front() {
            let domain = &domains[index];
            order.push(domain.clone());

            let mut unlocked: Vec<usize> = Vec::new();
            for dependent in dependents.get(domain).into_iter().flatten() {
                let dep_index = position[*dependent];
                wave_of[dep_index] = wave_of[dep_index].max(wave_of[index] + 1);
                indegree[dep_index] -= 1;
                if indegree[dep_index] == 0 {
                    unlocked.push(dep_index);
                }
            }
            unlocked.sort_unstable();
            ready.extend(unlocked);
        }

        if order.len() != domains.len() {
            let remaining: BTreeSet<&DomainName> = domains
                .iter()
                .enumerate()
                .filter(|(index, _)| indegree[*index] > 0)
                .map(|(_, domain)| domain)
                .collect();
            return Err(EngineError::CircularDependency {
                cycle: find_cycle(&remaining, &prerequisites),
            });
        }

        let wave_count = wave_of.iter().copied().max().map_or(0, |w| w + 1);
        let mut waves = vec![Vec::new(); wave_count];
        for domain in &order {
            waves[wave_of[position[domain]]].push(domain.clone());
        }

        debug!(
            target: "edgeship::orchestrator",
            domains = domains.len(),
            edges = edges.len(),
            waves = waves.len(),
            "execution plan built"
        );

        Ok(ExecutionPlan {
            order,
            prerequisites: prerequisites
                .into_iter()
                .map(|(domain, prereqs)| (domain, prereqs.into_iter().collect()))
                .collect(),
            waves,
        })
    }
}

/// Walk prerequisite links inside the unresolved set until a node repeats.
fn find_cycle(
    remaining: &BTreeSet<&DomainName>,
    prerequisites: &BTreeMap<DomainName, BTreeSet<DomainName>>,
) -> Vec<String> {
    let Some(&start) = remaining.iter().next() else {
        return Vec::new();
    };

    let mut path: Vec<&DomainName> = vec![start];
    let mut current: &DomainName = start;
    loop {
        let next = prerequisites
            .get(current)
            .and_then(|prereqs| {
                prereqs.iter().find(|p| remaining.contains(p))
            });
        let Some(next) = next else {
            return path.iter().map(|d| d.to_string()).collect();
        };
        if let Some(pos) = path.iter().position(|d| *d == next) {
            let mut cycle: Vec<String> =
                path[pos..].iter().map(|d| d.to_string()).collect();
            cycle.push(next.to_string());
            return cycle;
        }
        path.push(next);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(raw: &[&str]) -> Vec<DomainName> {
        raw.iter().map(DomainName::new).collect()
    }

    #[test]
    fn independent_domains_keep_input_order_in_one_wave() {
        let plan = CrossDomainCoordinator::new()
            .plan(&names(&["c.com", "a.com", "b.com"]), &[])
            .unwrap();
        assert_eq!(plan.order(), names(&["c.com", "a.com", "b.com"]).as_slice());
        assert_eq!(plan.waves().len(), 1);
    }

    #[test]
    fn prerequisites_come_first() {
        let plan = CrossDomainCoordinator::new()
            .plan(
                &names(&["b.com", "a.com", "c.com"]),
                &[
                    DependencyEdge::new("b.com", "a.com"),
                    DependencyEdge::new("c.com", "b.com"),
                ],
            )
            .unwrap();
        assert_eq!(plan.order(), names(&["a.com", "b.com", "c.com"]).as_slice());
        assert_eq!(plan.waves().len(), 3);
        assert_eq!(
            plan.prerequisites(&DomainName::new("b.com")),
            names(&["a.com"]).as_slice()
        );
        assert!(plan.prerequisites(&DomainName::new("a.com")).is_empty());
    }

    #[test]
    fn cycles_are_reported_with_their_members() {
        let err = CrossDomainCoordinator::new()
            .plan(
                &names(&["a.com", "b.com", "c.com", "d.com"]),
                &[
                    DependencyEdge::new("a.com", "b.com"),
                    DependencyEdge::new("b.com", "c.com"),
                    DependencyEdge::new("c.com", "a.com"),
                    DependencyEdge::new("d.com", "a.com"),
                ],
            )
            .unwrap_err();
        match err {
            EngineError::CircularDependency { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 4);
                assert!(!cycle.contains(&"d.com".to_string()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn self_edges_and_unknown_domains_are_rejected() {
        let coordinator = CrossDomainCoordinator::new();
        let domains = names(&["a.com"]);
        assert!(matches!(
            coordinator.plan(&domains, &[DependencyEdge::new("a.com", "a.com")]),
            Err(EngineError::CircularDependency { .. })
        ));
        assert!(matches!(
            coordinator.plan(&domains, &[DependencyEdge::new("a.com", "z.com")]),
            Err(EngineError::UnknownDomain(_))
        ));
    }

    #[test]
    fn duplicates_are_rejected() {
        assert!(
            CrossDomainCoordinator::new()
                .plan(&names(&["a.com", "A.com"]), &[])
                .is_err()
        );
    }
}
