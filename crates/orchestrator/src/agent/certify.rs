//! Deciding whether a worker's claim of being done can be trusted.
//!
//! Workers cannot close goals themselves. An implementation goal needs
//! evidence in the tool history: at least one file edit and one recognised
//! build or test command.

use std::sync::LazyLock;

use regex::Regex;

use super::state::ToolRecord;
use crate::goals::Goal;
use crate::tools::names;

#[allow(clippy::expect_used)]
static IMPLEMENTATION_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(implement|add|fix|create|build|write|refactor|update|modify|change|remove|rename|migrate|port|code|function|method|class|module|endpoint|test)s?\b")
        .expect("valid implementation regex (verified by tests)")
});

#[allow(clippy::expect_used)]
static SOURCE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[\w./-]+\.(rs|py|ts|tsx|js|jsx|go|java|kt|c|h|cc|cpp|hpp|cs|rb|php|swift|scala|sh|toml|ya?ml|json|sql|html|css)\b")
        .expect("valid source file regex (verified by tests)")
});

#[allow(clippy::expect_used)]
static BUILD_OR_TEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(cargo\s+(build|test|check|clippy|nextest|run)|(npm|pnpm|yarn|bun)\s+(run\s+)?(test|build|check|lint)|pytest|python3?\s+-m\s+(pytest|unittest)|go\s+(build|test|vet)|make(\s|$)|mvn\s|gradle|tsc\b|dotnet\s+(build|test)|ctest|jest|vitest|mix\s+test|rspec)")
        .expect("valid build/test regex (verified by tests)")
});

/// Message sent once per goal when evidence is missing.
pub const EVIDENCE_NUDGE: &str = "Before this goal can be closed, show your work: \
make the change with write_file or edit_file, then run the build or the tests with the shell tool \
and report the result.";

/// Whether a goal reads like a request to change code.
pub fn looks_like_implementation(goal: &Goal) -> bool {
    let text = format!("{}\n{}", goal.name, goal.description);
    IMPLEMENTATION_WORDS.is_match(&text) || SOURCE_FILE.is_match(&text)
}

/// Whether a shell command builds or tests something.
pub fn is_build_or_test(command: &str) -> bool {
    BUILD_OR_TEST.is_match(command)
}

/// At least one successful file edit and one build or test command.
pub fn has_evidence<'a, I>(records: I) -> bool
where
    I: IntoIterator<Item = &'a ToolRecord>,
{
    let mut edited = false;
    let mut verified = false;
    for record in records {
        if record.ok && names::FILE_EDITS.contains(&record.tool.as_str()) {
            edited = true;
        }
        if record.tool == names::SHELL
            && record
                .args
                .get("command")
                .and_then(serde_json::Value::as_str)
                .is_some_and(is_build_or_test)
        {
            verified = true;
        }
    }
    edited && verified
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::goals::GoalStatus;

    fn goal(name: &str, description: &str) -> Goal {
        Goal {
            id: "g".to_string(),
            project_id: "p".to_string(),
            name: name.to_string(),
            description: description.to_string(),
            status: GoalStatus::Pending,
            depends_on: Default::default(),
            parent_goal_id: None,
            agent_id: None,
            report: None,
            summary: None,
            error: None,
            evidence_nudged: false,
            review_retries: 0,
        }
    }

    fn record(tool: &str, args: serde_json::Value, ok: bool) -> ToolRecord {
        ToolRecord {
            id: "c".to_string(),
            tool: tool.to_string(),
            args,
            result: String::new(),
            ok,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn should_spot_implementation_goals() {
        assert!(looks_like_implementation(&goal("Implement login", "")));
        assert!(looks_like_implementation(&goal("Parser", "see src/parser.rs")));
        assert!(!looks_like_implementation(&goal("Research options", "Summarize the tradeoffs")));
    }

    #[test]
    fn should_recognise_build_and_test_commands() {
        assert!(is_build_or_test("cd api && cargo test --all"));
        assert!(is_build_or_test("npm run build"));
        assert!(is_build_or_test("python -m pytest -q"));
        assert!(!is_build_or_test("ls -la"));
    }

    #[test]
    fn should_require_both_edit_and_verification() {
        let edit = record("edit_file", json!({"path": "a.rs"}), true);
        let failed_edit = record("write_file", json!({"path": "a.rs"}), false);
        let test = record("shell", json!({"command": "cargo test"}), true);
        let listing = record("shell", json!({"command": "ls"}), true);

        assert!(has_evidence([&edit, &test]));
        assert!(!has_evidence([&edit, &listing]));
        assert!(!has_evidence([&failed_edit, &test]));
        assert!(!has_evidence(std::iter::empty()));
    }
}
