// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Property tests for plan layering

use std::collections::HashMap;

use proptest::prelude::*;
use proptest::sample::Index;

use pluribots::agents::AgentCatalog;
use pluribots::plans::{compute_groups, enforce_visual_exclusivity, ExecutionGroup, Step};

/// Acyclic plans: step i may only depend on steps before it, plus a
/// sprinkling of ids that do not exist.
fn acyclic_plan() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        (
            any::<bool>(),
            prop::collection::vec(any::<Index>(), 0..3),
            any::<bool>(),
        ),
        1..12,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (is_visual, deps, dangling))| {
                let agent = if is_visual { "web-design" } else { "seo" };
                let mut depends_on: Vec<String> = if i == 0 {
                    Vec::new()
                } else {
                    deps.iter().map(|d| format!("s{}", d.index(i))).collect()
                };
                if dangling {
                    depends_on.push("ghost".to_string());
                }
                Step::new(agent, format!("s{}", i), "task").depends_on(depends_on)
            })
            .collect()
    })
}

fn group_index(groups: &[ExecutionGroup]) -> HashMap<&str, usize> {
    groups
        .iter()
        .enumerate()
        .flat_map(|(g, ids)| ids.iter().map(move |id| (id.as_str(), g)))
        .collect()
}

fn assert_dependencies_precede(steps: &[Step], groups: &[ExecutionGroup]) {
    let index = group_index(groups);
    for step in steps {
        for dep in &step.depends_on {
            if let Some(dep_group) = index.get(dep.as_str()) {
                assert!(
                    *dep_group < index[step.instance_id.as_str()],
                    "{} must run after {}",
                    step.instance_id,
                    dep
                );
            }
        }
    }
}

proptest! {
    #[test]
    fn prop_every_step_scheduled_once(steps in acyclic_plan()) {
        let groups = compute_groups(&steps);
        let mut flat: Vec<&str> = groups.iter().flatten().map(String::as_str).collect();
        flat.sort();
        let mut expected: Vec<&str> = steps.iter().map(|s| s.instance_id.as_str()).collect();
        expected.sort();
        prop_assert_eq!(flat, expected);
        prop_assert!(groups.iter().all(|g| !g.is_empty()));
    }

    #[test]
    fn prop_dependencies_run_in_earlier_groups(steps in acyclic_plan()) {
        assert_dependencies_precede(&steps, &compute_groups(&steps));
    }

    #[test]
    fn prop_layers_are_minimal(steps in acyclic_plan()) {
        // A step only lands in group k > 0 because a dependency sits in group k - 1.
        let groups = compute_groups(&steps);
        let index = group_index(&groups);
        for step in &steps {
            let g = index[step.instance_id.as_str()];
            if g > 0 {
                prop_assert!(step
                    .depends_on
                    .iter()
                    .any(|dep| index.get(dep.as_str()) == Some(&(g - 1))));
            }
        }
    }

    #[test]
    fn prop_visual_exclusivity(steps in acyclic_plan()) {
        let catalog = AgentCatalog::builtin();
        let groups = enforce_visual_exclusivity(compute_groups(&steps), &steps, |s| {
            catalog.is_visual(&s.agent_id)
        });

        let by_id: HashMap<&str, &Step> =
            steps.iter().map(|s| (s.instance_id.as_str(), s)).collect();
        for group in &groups {
            let visuals = group
                .iter()
                .filter(|id| catalog.is_visual(&by_id[id.as_str()].agent_id))
                .count();
            prop_assert!(visuals <= 1);
        }
        prop_assert_eq!(groups.iter().map(Vec::len).sum::<usize>(), steps.len());
        assert_dependencies_precede(&steps, &groups);
    }
}

#[test]
fn test_cycle_lands_in_final_group() {
    let steps = vec![
        Step::new("seo", "root", "t"),
        Step::new("seo", "a", "t").depends_on(["root", "b"]),
        Step::new("seo", "b", "t").depends_on(["a"]),
    ];
    let groups = compute_groups(&steps);
    assert_eq!(
        groups,
        vec![vec!["root".to_string()], vec!["a".to_string(), "b".to_string()]]
    );
}

#[test]
fn test_parallel_web_designs_are_serialized() {
    let steps = vec![
        Step::new("web-design", "home", "t"),
        Step::new("web-design", "about", "t"),
        Step::new("branding", "brand", "t"),
        Step::new("dev", "site", "t").depends_on(["home", "about"]),
    ];
    let catalog = AgentCatalog::builtin();
    let groups = enforce_visual_exclusivity(compute_groups(&steps), &steps, |s| {
        catalog.is_visual(&s.agent_id)
    });
    assert_eq!(
        groups,
        vec![
            vec!["home".to_string(), "brand".to_string()],
            vec!["about".to_string()],
            vec!["site".to_string()],
        ]
    );
}
