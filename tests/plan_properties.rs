use greenlight::error::Error;
use greenlight::plan::StartupPlan;
use greenlight::probe::ProbeSpec;
use greenlight::registry::{ServiceRegistry, ServiceSpec};
use proptest::prelude::*;
use std::collections::HashSet;

fn spec(name: String, depends_on: Vec<String>) -> ServiceSpec {
    ServiceSpec {
        name,
        start: None,
        probe: ProbeSpec::None,
        probe_timeout: None,
        depends_on,
        retry: None,
    }
}

fn registry_from_edges(edges: &[Vec<usize>]) -> ServiceRegistry {
    let specs = edges.iter().enumerate().map(|(index, deps)| {
        spec(
            format!("svc-{index}"),
            deps.iter().map(|dep| format!("svc-{dep}")).collect(),
        )
    });
    ServiceRegistry::from_specs(specs).expect("generated specs should register")
}

/// Adjacency lists where node `i` may only depend on nodes `< i`, so the
/// generated graph is acyclic by construction.
fn dag_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (2usize..10).prop_flat_map(|count| {
        prop::collection::vec(prop::collection::vec(any::<bool>(), count), count).prop_map(
            move |matrix| {
                (0..count)
                    .map(|node| (0..node).filter(|&dep| matrix[node][dep]).collect())
                    .collect()
            },
        )
    })
}

proptest! {
    #[test]
    fn every_service_appears_after_all_its_dependencies(edges in dag_strategy()) {
        let registry = registry_from_edges(&edges);
        let plan = StartupPlan::resolve(&registry).expect("acyclic graph resolves");

        prop_assert_eq!(plan.len(), edges.len());
        let distinct: HashSet<usize> = plan.order().iter().copied().collect();
        prop_assert_eq!(distinct.len(), edges.len(), "plan must be a permutation");

        let mut position = vec![0usize; edges.len()];
        for (slot, &index) in plan.order().iter().enumerate() {
            position[index] = slot;
        }
        for (node, deps) in edges.iter().enumerate() {
            for &dep in deps {
                prop_assert!(
                    position[dep] < position[node],
                    "svc-{} must come before svc-{}",
                    dep,
                    node
                );
            }
        }
    }

    #[test]
    fn resolution_is_deterministic(edges in dag_strategy()) {
        let registry = registry_from_edges(&edges);
        let first = StartupPlan::resolve(&registry).expect("acyclic graph resolves");
        let second = StartupPlan::resolve(&registry).expect("acyclic graph resolves");
        prop_assert_eq!(first.order(), second.order());
    }

    #[test]
    fn closing_a_chain_into_a_loop_is_rejected(count in 2usize..8, entry in 1usize..8) {
        let entry = entry.min(count - 1);
        let mut edges: Vec<Vec<usize>> = (0..count)
            .map(|node| if node == 0 { Vec::new() } else { vec![node - 1] })
            .collect();
        edges[0].push(entry);

        let registry = registry_from_edges(&edges);
        match StartupPlan::resolve(&registry) {
            Err(Error::Cycle(err)) => {
                prop_assert!(!err.members.is_empty());
                prop_assert!(err.members.len() <= count);
            }
            other => prop_assert!(false, "expected cycle error, got {:?}", other.map(|_| ())),
        }
    }
}

#[test]
fn independent_services_keep_registration_order() {
    let registry = registry_from_edges(&[Vec::new(), Vec::new(), Vec::new(), Vec::new()]);
    let plan = StartupPlan::resolve(&registry).expect("independent services resolve");
    assert_eq!(plan.order(), &[0, 1, 2, 3]);
}
