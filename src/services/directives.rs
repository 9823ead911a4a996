//! `SKILL:` and `CLI:` directives embedded in task descriptions.
//!
//! A directive is a line starting with the keyword (case-insensitive). The
//! first `SKILL:` line names the skill to load; the first `CLI:` line lists
//! comma-separated tools. Both are optional.

use regex::Regex;
use std::sync::LazyLock;

static SKILL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^SKILL:\s*([^\n]+)").expect("SKILL pattern compiles"));
static CLI_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^CLI:\s*([^\n]+)").expect("CLI pattern compiles"));
static DIRECTIVE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^(?:SKILL|CLI):\s*[^\n]+\n*").expect("directive pattern compiles")
});

/// Directives parsed out of a description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDirectives {
    pub skill: Option<String>,
    pub clis: Vec<String>,
    /// Description with directive lines removed
    pub body: String,
}

impl TaskDirectives {
    pub fn parse(description: &str) -> Self {
        Self {
            skill: extract_skill(description),
            clis: extract_clis(description),
            body: clean_description(description),
        }
    }
}

pub fn extract_skill(description: &str) -> Option<String> {
    SKILL_LINE
        .captures(description)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn extract_clis(description: &str) -> Vec<String> {
    CLI_LINE
        .captures(description)
        .and_then(|caps| caps.get(1))
        .map(|m| {
            m.as_str()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

pub fn clean_description(description: &str) -> String {
    DIRECTIVE_LINE.replace_all(description, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_skill() {
        let desc = "SKILL: backend-developer\nCLI: stripe-cli\n\nBuild an API";
        assert_eq!(extract_skill(desc), Some("backend-developer".to_string()));
        assert_eq!(extract_skill("Just a simple task"), None);
    }

    #[test]
    fn test_extract_clis() {
        let desc = "SKILL: backend\nCLI: stripe-cli, vercel,\n\nDeploy app";
        assert_eq!(extract_clis(desc), vec!["stripe-cli".to_string(), "vercel".to_string()]);
    }

    #[test]
    fn test_directives_are_case_insensitive_and_line_anchored() {
        let desc = "skill: writer\nDo not parse SKILL: inline mentions";
        let parsed = TaskDirectives::parse(desc);
        assert_eq!(parsed.skill.as_deref(), Some("writer"));
        assert_eq!(parsed.body, "Do not parse SKILL: inline mentions");
    }

    #[test]
    fn test_clean_description() {
        assert_eq!(
            clean_description("SKILL: test\nCLI: foo\n\nActual description here"),
            "Actual description here"
        );
        assert_eq!(clean_description("plain"), "plain");
    }
}
