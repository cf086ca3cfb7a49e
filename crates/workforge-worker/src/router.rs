//! Task Router (C3, worker-side) — classifies a task's complexity and
//! decides whether to execute it locally or escalate to a remote provider.
//!
//! Grounded in this codebase's existing keyword-heuristic routers (the
//! model-complexity router and the CLI's task-tier splitter): classification
//! is a deterministic scan over keyword sets, never a model call, so the same
//! task always routes the same way.

use std::collections::HashMap;

/// Estimated complexity of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Medium,
    High,
}

/// Where a task should execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Local,
    Api,
}

/// The routed plan for a single task: where to run it, which provider to use,
/// and why (for logging/debugging).
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub strategy: Strategy,
    pub provider: String,
    pub reasoning: String,
}

const SIMPLE_KEYWORDS: &[&str] = &[
    "format", "lint", "echo", "status", "list", "search", "read", "write", "file", "git",
];

const HIGH_KEYWORDS: &[&str] = &[
    "architecture",
    "design",
    "review",
    "security",
    "analysis",
    "refactor",
    "optimization",
    "performance",
    "strategy",
    "planning",
    "evaluation",
    "assessment",
];

/// Classify a task's complexity from its type and payload values. High wins
/// over Simple when both keyword sets match; Medium is the default.
pub fn classify_complexity(task_type: &str, payload: &HashMap<String, String>) -> Complexity {
    let mut haystack = task_type.to_lowercase();
    for value in payload.values() {
        haystack.push(' ');
        haystack.push_str(&value.to_lowercase());
    }

    if HIGH_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
        Complexity::High
    } else if SIMPLE_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
        Complexity::Simple
    } else {
        Complexity::Medium
    }
}

/// Pick an execution plan for a task. `complexity_hint` (from the
/// `complexity_hint` payload key, §6) overrides classification when present.
/// `local_available` reflects whether a local provider is configured.
pub fn route(
    task_type: &str,
    payload: &HashMap<String, String>,
    local_available: bool,
) -> ExecutionPlan {
    let complexity = match payload.get("complexity_hint").map(|s| s.to_lowercase()) {
        Some(ref hint) if hint == "simple" => Complexity::Simple,
        Some(ref hint) if hint == "medium" => Complexity::Medium,
        Some(ref hint) if hint == "high" => Complexity::High,
        _ => classify_complexity(task_type, payload),
    };

    match complexity {
        Complexity::Simple => ExecutionPlan {
            strategy: Strategy::Local,
            provider: "local".to_string(),
            reasoning: "simple task, routed to local provider".to_string(),
        },
        Complexity::Medium if local_available => ExecutionPlan {
            strategy: Strategy::Local,
            provider: "local".to_string(),
            reasoning: "medium task, local provider available".to_string(),
        },
        Complexity::Medium => ExecutionPlan {
            strategy: Strategy::Api,
            provider: "remote".to_string(),
            reasoning: "medium task, no local provider available".to_string(),
        },
        Complexity::High => ExecutionPlan {
            strategy: Strategy::Api,
            provider: "remote".to_string(),
            reasoning: "high complexity task, escalated to remote provider".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn simple_keyword_classifies_simple() {
        assert_eq!(
            classify_complexity("format_file", &HashMap::new()),
            Complexity::Simple
        );
    }

    #[test]
    fn high_keyword_wins_over_simple() {
        let p = payload(&[("document_type", "security review of the file listing")]);
        assert_eq!(classify_complexity("task", &p), Complexity::High);
    }

    #[test]
    fn no_keyword_match_is_medium() {
        assert_eq!(
            classify_complexity("create_document", &HashMap::new()),
            Complexity::Medium
        );
    }

    #[test]
    fn simple_routes_local_even_without_local_available() {
        let plan = route("format_file", &HashMap::new(), false);
        assert_eq!(plan.strategy, Strategy::Local);
    }

    #[test]
    fn medium_prefers_local_when_available() {
        let plan = route("create_document", &HashMap::new(), true);
        assert_eq!(plan.strategy, Strategy::Local);
    }

    #[test]
    fn medium_falls_back_to_api_without_local() {
        let plan = route("create_document", &HashMap::new(), false);
        assert_eq!(plan.strategy, Strategy::Api);
    }

    #[test]
    fn high_always_routes_api() {
        let plan = route("architecture_review", &HashMap::new(), true);
        assert_eq!(plan.strategy, Strategy::Api);
    }

    #[test]
    fn complexity_hint_overrides_classification() {
        let p = payload(&[("complexity_hint", "high")]);
        let plan = route("format_file", &p, true);
        assert_eq!(plan.strategy, Strategy::Api);
    }

    #[test]
    fn routing_is_deterministic() {
        let p = payload(&[("document_type", "coding_standards")]);
        let first = route("create_document", &p, true);
        let second = route("create_document", &p, true);
        assert_eq!(first.strategy, second.strategy);
        assert_eq!(first.provider, second.provider);
    }
}
