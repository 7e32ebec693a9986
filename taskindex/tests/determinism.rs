//! Cross-module invariants over generated indexes.
//!
//! A small deterministic LCG stands in for a fuzzer: hundreds of generated
//! indexes, each checked for byte-deterministic persistence and for the
//! scheduler's cap and overlap guarantees.

use std::collections::{BTreeMap, BTreeSet};

use taskindex::scheduler::{self, Caps};
use taskindex::{store, Index, Task, TaskState};

/// Deterministic pseudo-random sequence (Numerical Recipes LCG constants).
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n.max(1)
    }
}

const STATES: [TaskState; 10] = [
    TaskState::Backlog,
    TaskState::Triaged,
    TaskState::Implemented,
    TaskState::Tested,
    TaskState::Reviewed,
    TaskState::Mergeable,
    TaskState::Merged,
    TaskState::Blocked,
    TaskState::Conflict,
    TaskState::Resolved,
];

const ROLES: [&str; 3] = ["engineer", "reviewer", "tester"];
const TAGS: [&str; 4] = ["db", "api", "ui", "infra"];

/// Build an index with acyclic dependencies (tasks only depend on earlier
/// IDs) and assorted states, roles, overlaps, and orders.
fn generate(rng: &mut Lcg, tasks: usize) -> Index {
    let mut index = Index::new();
    for i in 0..tasks {
        let mut task = Task::execution(
            format!("task-{i:02}"),
            STATES[rng.below(STATES.len() as u64) as usize],
        );
        task.role = ROLES[rng.below(ROLES.len() as u64) as usize].to_string();
        task.order = rng.below(5) as i64 * 10;
        for j in 0..i {
            if rng.below(4) == 0 {
                task.dependencies.push(format!("task-{j:02}"));
            }
        }
        for tag in TAGS {
            if rng.below(3) == 0 {
                task.overlap.push(tag.to_string());
            }
        }
        index.tasks.push(task);
    }
    index
}

#[test]
fn canonical_bytes_are_order_insensitive() {
    let mut rng = Lcg(7);
    for _ in 0..200 {
        let index = generate(&mut rng, 8);
        let mut shuffled = index.clone();
        shuffled.tasks.reverse();
        for task in &mut shuffled.tasks {
            task.dependencies.reverse();
            task.overlap.reverse();
        }
        assert_eq!(
            store::to_canonical_json(&index),
            store::to_canonical_json(&shuffled)
        );
    }
}

#[test]
fn save_load_save_roundtrips_bit_exact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.json");
    let mut rng = Lcg(21);

    for _ in 0..50 {
        let index = generate(&mut rng, 10);
        store::save(&path, &index).unwrap();
        let first = std::fs::read(&path).unwrap();

        let loaded = store::load(&path).unwrap();
        store::save(&path, &loaded).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }
}

#[test]
fn routing_never_violates_caps_or_overlap() {
    let mut rng = Lcg(1234);
    for round in 0..300 {
        let index = generate(&mut rng, 12);
        let mut caps = Caps {
            global: rng.below(6) as usize,
            default_role: rng.below(4) as i64,
            roles: BTreeMap::new(),
        };
        for role in ROLES {
            if rng.below(2) == 0 {
                caps.roles.insert(role.to_string(), rng.below(4) as i64 - 1);
            }
        }

        let selection = match scheduler::select(&index, &caps, &BTreeSet::new()) {
            Ok(selection) => selection,
            Err(e) => panic!("acyclic generation produced a cycle: {e} (round {round})"),
        };

        assert!(
            selection.selected.len() <= caps.global,
            "global cap exceeded in round {round}"
        );

        let mut per_role: BTreeMap<&str, i64> = BTreeMap::new();
        let mut seen_tags: BTreeSet<&str> = BTreeSet::new();
        for id in &selection.selected {
            let task = index.task(id).unwrap();
            assert!(scheduler::is_eligible(&index, task), "ineligible selection");
            *per_role.entry(task.role.as_str()).or_insert(0) += 1;
            for tag in &task.overlap {
                assert!(
                    seen_tags.insert(tag.as_str()),
                    "overlap tag `{tag}` selected twice in round {round}"
                );
            }
        }
        for (role, used) in per_role {
            assert!(
                used <= caps.role_cap(role),
                "role cap exceeded for `{role}` in round {round}"
            );
        }

        // Every decision carries a reason; selected ones say so.
        for decision in &selection.decisions {
            if decision.selected {
                assert_eq!(decision.reason, "selected");
            } else {
                assert!(decision.reason.starts_with("skipped ("));
            }
        }
    }
}

#[test]
fn ordering_is_stable_across_runs() {
    let mut rng_a = Lcg(99);
    let mut rng_b = Lcg(99);
    for _ in 0..50 {
        let a = generate(&mut rng_a, 10);
        let b = generate(&mut rng_b, 10);
        let order_a: Vec<String> = scheduler::ordered_eligible(&a)
            .iter()
            .map(|t| t.id.clone())
            .collect();
        let order_b: Vec<String> = scheduler::ordered_eligible(&b)
            .iter()
            .map(|t| t.id.clone())
            .collect();
        assert_eq!(order_a, order_b);
    }
}
