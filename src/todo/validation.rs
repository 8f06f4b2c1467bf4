//! Per-section content validation.
//!
//! Pure functions, no I/O. Each [`SectionSchema`] accepts a different
//! dialect of text; only `checklist` and `test_cases` actually constrain it.

use crate::error::{Result, TodoError};

use super::checklist::is_checkbox_line;
use super::types::SectionSchema;

impl SectionSchema {
    /// Validate `content` against this schema.
    ///
    /// # Errors
    ///
    /// Returns a validation error on the `content` field describing the
    /// first offending line or the missing construct.
    ///
    /// # Example
    ///
    /// ```
    /// use todo_mcp::todo::SectionSchema;
    ///
    /// assert!(SectionSchema::Checklist.validate("- [ ] ok\n\n- [x] done").is_ok());
    /// assert!(SectionSchema::Checklist.validate("- [] nope").is_err());
    /// ```
    pub fn validate(&self, content: &str) -> Result<()> {
        match self {
            Self::Freeform | Self::Research | Self::Strategy | Self::Results => Ok(()),
            Self::Checklist => validate_checklist(content),
            Self::TestCases => validate_test_cases(content),
        }
    }
}

/// Validate content against a schema given by name.
///
/// # Errors
///
/// Unknown schema names are rejected before the content is looked at.
pub fn validate_named(schema: &str, content: &str) -> Result<()> {
    schema.parse::<SectionSchema>()?.validate(content)
}

fn validate_checklist(content: &str) -> Result<()> {
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if !is_checkbox_line(line) {
            return Err(TodoError::validation(
                "content",
                format!(
                    "invalid checkbox syntax at line {}: '{}' (expected '- [ ] item', '- [>] item' or '- [x] item')",
                    idx + 1,
                    line.trim()
                ),
            ));
        }
    }
    Ok(())
}

fn validate_test_cases(content: &str) -> Result<()> {
    let mut open = false;
    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            if open {
                return Ok(());
            }
            open = true;
        }
    }
    Err(TodoError::validation(
        "content",
        "test_cases sections must contain at least one fenced code block (```)",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissive_schemas_accept_anything() {
        for schema in [
            SectionSchema::Freeform,
            SectionSchema::Research,
            SectionSchema::Strategy,
            SectionSchema::Results,
        ] {
            assert!(schema.validate("- [] whatever\n```").is_ok());
        }
    }

    #[test]
    fn test_checklist_accepts_all_marks_and_blank_lines() {
        let content = "- [ ] a\n- [x] b\n\n   \n- [>] c\n- [-] d\n- [~] e";
        assert!(SectionSchema::Checklist.validate(content).is_ok());
    }

    #[test]
    fn test_checklist_rejects_missing_space() {
        let err = SectionSchema::Checklist
            .validate("- [] Missing space")
            .unwrap_err();
        assert!(err.client_message().contains("invalid checkbox syntax"));
    }

    #[test]
    fn test_checklist_rejects_prose_line() {
        let err = SectionSchema::Checklist
            .validate("- [ ] ok\nnot a checkbox")
            .unwrap_err();
        assert!(err.client_message().contains("line 2"));
    }

    #[test]
    fn test_checklist_rejects_mark_without_text() {
        assert!(SectionSchema::Checklist.validate("- [ ] ").is_err());
    }

    #[test]
    fn test_test_cases_requires_fenced_block() {
        assert!(SectionSchema::TestCases
            .validate("```rust\n#[test]\nfn t() {}\n```")
            .is_ok());
        assert!(SectionSchema::TestCases.validate("just prose").is_err());
        assert!(SectionSchema::TestCases.validate("```\nunterminated").is_err());
    }

    #[test]
    fn test_validate_named_rejects_unknown_schema() {
        let err = validate_named("gantt", "x").unwrap_err();
        assert!(err.client_message().contains("schema"));
        assert!(validate_named("checklist", "- [x] done").is_ok());
    }
}
