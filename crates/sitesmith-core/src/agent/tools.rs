//! Tool catalog for the page-editing agent
//!
//! Each tool's input is an explicit struct validated at the boundary with
//! serde; nothing downstream ever touches loosely-typed argument bags. The
//! catalog handed to the completion engine is assembled per turn, because
//! two of the tools are gated: image tools by the session's
//! `image_generation_allowed` flag, variant generation by the caller.

use serde::Deserialize;
use serde_json::json;

use crate::completion::ToolSpec;
use crate::snapshot::PageFile;

#[derive(Debug, Deserialize)]
pub struct ReadFileArgs {
    pub file: PageFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditFileArgs {
    pub file: PageFile,
    pub old_string: String,
    pub new_string: String,
}

#[derive(Debug, Deserialize)]
pub struct SummaryArgs {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateVariantsArgs {
    pub count: usize,
    pub instructions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateImageArgs {
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditImageArgs {
    /// File name of an existing asset in the version directory.
    pub image: String,
    pub prompt: String,
}

fn file_schema() -> serde_json::Value {
    json!({
        "type": "string",
        "enum": ["index.html", "styles.css", "script.js"],
        "description": "Which of the page's three source files"
    })
}

/// Builds the tool catalog for one turn.
pub fn tool_catalog(image_generation_allowed: bool, allow_variants: bool) -> Vec<ToolSpec> {
    let mut catalog = vec![
        ToolSpec {
            name: "read_file".to_string(),
            description: "Returns the current working-copy content of one page file".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "file": file_schema() },
                "required": ["file"]
            }),
        },
        ToolSpec {
            name: "edit_file".to_string(),
            description: "Replaces a single occurrence of oldString with newString in one page file. oldString must match exactly one location; include surrounding context to disambiguate.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file": file_schema(),
                    "oldString": {
                        "type": "string",
                        "description": "Existing text to replace; must occur exactly once"
                    },
                    "newString": {
                        "type": "string",
                        "description": "Replacement text"
                    }
                },
                "required": ["file", "oldString", "newString"]
            }),
        },
        ToolSpec {
            name: "summary".to_string(),
            description: "Records a short human-readable summary of what was changed and ends the turn. Call this exactly once, when the work is done.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "One or two sentences for the user" }
                },
                "required": ["message"]
            }),
        },
    ];

    if image_generation_allowed {
        catalog.push(ToolSpec {
            name: "list_images".to_string(),
            description: "Lists the generated image assets available to the current page version".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        });
        catalog.push(ToolSpec {
            name: "generate_image".to_string(),
            description: "Generates a new image asset from a prompt and makes it available to the page".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "prompt": { "type": "string", "description": "What the image should show" }
                },
                "required": ["prompt"]
            }),
        });
        catalog.push(ToolSpec {
            name: "edit_image".to_string(),
            description: "Edits an existing image asset according to a prompt, producing a new asset".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "image": { "type": "string", "description": "File name of the asset to edit" },
                    "prompt": { "type": "string", "description": "How to change it" }
                },
                "required": ["image", "prompt"]
            }),
        });
    }

    if allow_variants {
        catalog.push(ToolSpec {
            name: "generate_variants".to_string(),
            description: "Proposes several stylistic variants of the page. Each instruction seeds one independent sibling session. Does not change any files; ends the turn.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "count": { "type": "integer", "minimum": 1 },
                    "instructions": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "One instruction per variant, same length as count"
                    }
                },
                "required": ["count", "instructions"]
            }),
        });
    }

    catalog
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum MatchFailure {
    /// The old string occurs nowhere, even after relaxed matching.
    NotFound,
    /// The old string occurs more than once; the edit would be ambiguous.
    Ambiguous,
}

/// Replaces exactly one occurrence of `old` in `haystack`.
///
/// Matching strategies, in order: exact substring, trimmed, newline-
/// normalized (CRLF folded to LF on both sides), and finally whitespace-
/// flexible (any run of whitespace in `old` matches any run in the file).
/// The first strategy that matches at all decides: one occurrence replaces,
/// more than one is ambiguous.
pub(crate) fn replace_single(
    haystack: &str,
    old: &str,
    new: &str,
) -> Result<String, MatchFailure> {
    // Exact.
    match haystack.matches(old).count() {
        1 => return Ok(haystack.replacen(old, new, 1)),
        n if n > 1 => return Err(MatchFailure::Ambiguous),
        _ => {}
    }

    // Trimmed.
    let trimmed = old.trim();
    if !trimmed.is_empty() && trimmed != old {
        match haystack.matches(trimmed).count() {
            1 => return Ok(haystack.replacen(trimmed, new.trim(), 1)),
            n if n > 1 => return Err(MatchFailure::Ambiguous),
            _ => {}
        }
    }

    // Newline-normalized.
    let normalized_haystack = haystack.replace("\r\n", "\n");
    let normalized_old = old.replace("\r\n", "\n");
    match normalized_haystack.matches(&normalized_old).count() {
        1 => return Ok(normalized_haystack.replacen(&normalized_old, new, 1)),
        n if n > 1 => return Err(MatchFailure::Ambiguous),
        _ => {}
    }

    // Whitespace-flexible.
    let parts: Vec<String> = old.split_whitespace().map(|p| regex::escape(p)).collect();
    if parts.is_empty() {
        return Err(MatchFailure::NotFound);
    }
    let pattern = parts.join(r"\s+");
    let re = match regex::Regex::new(&pattern) {
        Ok(re) => re,
        Err(_) => return Err(MatchFailure::NotFound),
    };
    let mut matches = re.find_iter(haystack);
    let first = matches.next();
    let second = matches.next();
    match (first, second) {
        (Some(m), None) => {
            let mut result = String::with_capacity(haystack.len());
            result.push_str(&haystack[..m.start()]);
            result.push_str(new);
            result.push_str(&haystack[m.end()..]);
            Ok(result)
        }
        (Some(_), Some(_)) => Err(MatchFailure::Ambiguous),
        (None, _) => Err(MatchFailure::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_replacement() {
        let result = replace_single("body { color: red; }", "color: red", "color: blue").unwrap();
        assert_eq!(result, "body { color: blue; }");
    }

    #[test]
    fn ambiguous_when_old_occurs_twice() {
        let css = "h1 { margin: 0; }\nh2 { margin: 0; }\n";
        assert_eq!(
            replace_single(css, "margin: 0;", "margin: 4px;"),
            Err(MatchFailure::Ambiguous)
        );
    }

    #[test]
    fn not_found_after_all_strategies() {
        assert_eq!(
            replace_single("body {}", "header {}", "footer {}"),
            Err(MatchFailure::NotFound)
        );
    }

    #[test]
    fn trimmed_match_recovers_padding() {
        let result = replace_single("let x = 1;", "  let x = 1;  ", "let x = 2;").unwrap();
        assert_eq!(result, "let x = 2;");
    }

    #[test]
    fn crlf_in_old_string_is_normalized() {
        let file = "a\nb\nc\n";
        let result = replace_single(file, "a\r\nb", "a\nB").unwrap();
        assert_eq!(result, "a\nB\nc\n");
    }

    #[test]
    fn whitespace_flexible_fallback() {
        let file = "<div   class=\"hero\">\n  <p>hi</p>\n</div>";
        let result = replace_single(file, "<div class=\"hero\">", "<div class=\"banner\">").unwrap();
        assert!(result.contains("banner"));
    }

    #[test]
    fn catalog_gating() {
        let names = |specs: &[ToolSpec]| {
            specs.iter().map(|s| s.name.clone()).collect::<Vec<_>>()
        };

        let base = tool_catalog(false, false);
        assert_eq!(names(&base), vec!["read_file", "edit_file", "summary"]);

        let with_images = tool_catalog(true, false);
        assert!(names(&with_images).contains(&"generate_image".to_string()));
        assert!(!names(&with_images).contains(&"generate_variants".to_string()));

        let with_variants = tool_catalog(false, true);
        assert!(names(&with_variants).contains(&"generate_variants".to_string()));
        assert!(!names(&with_variants).contains(&"list_images".to_string()));
    }

    #[test]
    fn edit_args_accept_camel_case() {
        let args: EditFileArgs = serde_json::from_value(serde_json::json!({
            "file": "styles.css",
            "oldString": "red",
            "newString": "blue"
        }))
        .unwrap();
        assert_eq!(args.file, PageFile::Styles);
        assert_eq!(args.old_string, "red");
    }
}
