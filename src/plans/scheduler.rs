// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Dependency scheduling
//!
//! [`compute_groups`] layers steps with Kahn's algorithm: each group holds
//! every step whose known dependencies all sit in earlier groups.
//! [`enforce_visual_exclusivity`] then splits groups so that at most one
//! visual agent runs at a time.

use std::collections::{HashMap, HashSet};

use super::step::{ExecutionGroup, Step};

/// Layer steps into groups that may run concurrently.
///
/// Dependencies naming unknown instance ids are dropped. Steps caught in a
/// cycle never become ready; they are placed together in one final group.
/// Groups keep the steps' input order.
pub fn compute_groups(steps: &[Step]) -> Vec<ExecutionGroup> {
    let mut order: Vec<&Step> = Vec::with_capacity(steps.len());
    let mut known: HashSet<&str> = HashSet::new();

    for step in steps {
        if known.insert(step.instance_id.as_str()) {
            order.push(step);
        } else {
            tracing::warn!(
                target: "pluribots.scheduler",
                instance_id = %step.instance_id,
                "duplicate instance id, keeping first"
            );
        }
    }

    let deps: HashMap<&str, HashSet<&str>> = order
        .iter()
        .map(|step| {
            let id = step.instance_id.as_str();
            let resolved = step
                .depends_on
                .iter()
                .map(String::as_str)
                .filter(|dep| {
                    let exists = *dep != id && known.contains(dep);
                    if !exists {
                        tracing::debug!(
                            target: "pluribots.scheduler",
                            instance_id = id,
                            dependency = *dep,
                            "ignoring unresolvable dependency"
                        );
                    }
                    exists
                })
                .collect();
            (id, resolved)
        })
        .collect();
    let order: Vec<&str> = order.iter().map(|s| s.instance_id.as_str()).collect();

    let mut groups: Vec<ExecutionGroup> = Vec::new();
    let mut placed: HashSet<&str> = HashSet::new();

    while placed.len() < order.len() {
        let ready: Vec<&str> = order
            .iter()
            .copied()
            .filter(|id| !placed.contains(id))
            .filter(|id| deps[id].iter().all(|dep| placed.contains(dep)))
            .collect();

        if ready.is_empty() {
            let leftovers: ExecutionGroup = order
                .iter()
                .filter(|id| !placed.contains(*id))
                .map(|id| id.to_string())
                .collect();
            tracing::warn!(
                target: "pluribots.scheduler",
                steps = ?leftovers,
                "dependency cycle, scheduling remaining steps last"
            );
            groups.push(leftovers);
            break;
        }

        placed.extend(ready.iter().copied());
        groups.push(ready.into_iter().map(str::to_string).collect());
    }

    groups
}

/// Split groups holding more than one visual step.
///
/// The first visual step keeps its group along with every non-visual step;
/// each further visual step follows as its own singleton group, in order.
pub fn enforce_visual_exclusivity<F>(
    groups: Vec<ExecutionGroup>,
    steps: &[Step],
    is_visual: F,
) -> Vec<ExecutionGroup>
where
    F: Fn(&Step) -> bool,
{
    let by_id: HashMap<&str, &Step> = steps
        .iter()
        .map(|s| (s.instance_id.as_str(), s))
        .collect();
    let visual = |id: &String| by_id.get(id.as_str()).is_some_and(|s| is_visual(s));

    let mut result = Vec::with_capacity(groups.len());
    for group in groups {
        if group.iter().filter(|id| visual(id)).count() <= 1 {
            result.push(group);
            continue;
        }

        let mut head = Vec::new();
        let mut tail = Vec::new();
        let mut seen_visual = false;
        for id in group {
            if !visual(&id) {
                head.push(id);
            } else if !seen_visual {
                seen_visual = true;
                head.push(id);
            } else {
                tail.push(vec![id]);
            }
        }
        result.push(head);
        result.extend(tail);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> Step {
        Step::new("seo", id, "task").depends_on(deps.iter().copied())
    }

    fn visual(id: &str) -> Step {
        Step::new("web-design", id, "task")
    }

    fn is_web(step: &Step) -> bool {
        step.agent_id == "web-design"
    }

    fn ids(groups: &[ExecutionGroup]) -> Vec<Vec<&str>> {
        groups
            .iter()
            .map(|g| g.iter().map(String::as_str).collect())
            .collect()
    }

    // ===== compute_groups Tests =====

    #[test]
    fn test_independent_steps_one_group() {
        let groups = compute_groups(&[step("a", &[]), step("b", &[]), step("c", &[])]);
        assert_eq!(ids(&groups), vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn test_chain() {
        let groups = compute_groups(&[step("c", &["b"]), step("b", &["a"]), step("a", &[])]);
        assert_eq!(ids(&groups), vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_diamond() {
        let groups = compute_groups(&[
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ]);
        assert_eq!(ids(&groups), vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn test_unknown_dependency_ignored() {
        let groups = compute_groups(&[step("a", &["ghost"]), step("b", &["a", "phantom"])]);
        assert_eq!(ids(&groups), vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_self_dependency_ignored() {
        let groups = compute_groups(&[step("a", &["a"])]);
        assert_eq!(ids(&groups), vec![vec!["a"]]);
    }

    #[test]
    fn test_cycle_goes_last() {
        let groups = compute_groups(&[
            step("a", &[]),
            step("x", &["y"]),
            step("y", &["x"]),
            step("b", &["a"]),
        ]);
        assert_eq!(ids(&groups), vec![vec!["a"], vec!["b"], vec!["x", "y"]]);
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let groups = compute_groups(&[step("a", &[]), step("a", &["b"]), step("b", &["a"])]);
        assert_eq!(ids(&groups), vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_empty() {
        assert!(compute_groups(&[]).is_empty());
    }

    // ===== enforce_visual_exclusivity Tests =====

    #[test]
    fn test_single_visual_untouched() {
        let steps = vec![visual("w1"), step("s1", &[])];
        let groups = compute_groups(&steps);
        let split = enforce_visual_exclusivity(groups.clone(), &steps, is_web);
        assert_eq!(split, groups);
    }

    #[test]
    fn test_three_visual_split() {
        let steps = vec![visual("w1"), visual("w2"), visual("w3")];
        let split = enforce_visual_exclusivity(compute_groups(&steps), &steps, is_web);
        assert_eq!(ids(&split), vec![vec!["w1"], vec!["w2"], vec!["w3"]]);
    }

    #[test]
    fn test_non_visual_stays_with_first_visual() {
        let steps = vec![visual("w1"), step("s1", &[]), visual("w2"), step("s2", &[])];
        let split = enforce_visual_exclusivity(compute_groups(&steps), &steps, is_web);
        assert_eq!(ids(&split), vec![vec!["w1", "s1", "s2"], vec!["w2"]]);
    }

    #[test]
    fn test_split_keeps_later_groups_after() {
        let steps = vec![visual("w1"), visual("w2"), step("d", &["w1", "w2"])];
        let split = enforce_visual_exclusivity(compute_groups(&steps), &steps, is_web);
        assert_eq!(ids(&split), vec![vec!["w1"], vec!["w2"], vec!["d"]]);
    }
}
