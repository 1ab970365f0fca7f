//! Pulls the Java source out of a model response.

const FENCE: &str = "```";

/// First fenced block (preferring one tagged `java`) up to its closing
/// fence, or to the end of the text when the fence is never closed.
/// Without any fence the whole reply counts only if it already looks like
/// a compilation unit (starts with `package` or `import`).
pub fn extract_code_block(text: &str) -> Option<String> {
    let body = java_fenced(text)
        .or_else(|| fenced(text, FENCE))
        .map(str::trim)
        .or_else(|| raw_source(text))?;

    (!body.is_empty()).then(|| body.to_string())
}

/// A fence whose info string is exactly `java`, so ```javascript is skipped.
fn java_fenced(text: &str) -> Option<&str> {
    const OPENER: &str = "```java";
    let mut from = 0;
    while let Some(pos) = text[from..].find(OPENER) {
        let start = from + pos;
        let after = &text[start + OPENER.len()..];
        if after.chars().next().map_or(true, char::is_whitespace) {
            return fenced(&text[start..], OPENER);
        }
        from = start + OPENER.len();
    }
    None
}

fn fenced<'a>(text: &'a str, opener: &str) -> Option<&'a str> {
    let start = text.find(opener)?;
    let rest = &text[start + opener.len()..];

    // skip an info string such as "java" on a bare fence
    let rest = match rest.find('\n') {
        Some(nl) if !rest[..nl].contains(FENCE) => &rest[nl + 1..],
        _ => rest,
    };

    Some(match rest.find(FENCE) {
        Some(end) => &rest[..end],
        None => rest,
    })
}

fn raw_source(text: &str) -> Option<&str> {
    let t = text.trim();
    (t.starts_with("package") || t.starts_with("import")).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn java_fence_is_preferred() {
        let reply = "Here you go:\n```text\nnotes\n```\n```java\npackage a;\nclass T {}\n```\nDone.";
        assert_eq!(extract_code_block(reply).as_deref(), Some("package a;\nclass T {}"));
    }

    #[test]
    fn javascript_fence_is_not_mistaken_for_java() {
        let reply = "```javascript\nconsole.log(1);\n```\n```java\npackage a;\n```";
        assert_eq!(extract_code_block(reply).as_deref(), Some("package a;"));
    }

    #[test]
    fn javascript_only_falls_back_to_first_fence() {
        let reply = "```javascript\nlet x = 1;\n```";
        assert_eq!(extract_code_block(reply).as_deref(), Some("let x = 1;"));
    }

    #[test]
    fn bare_fence_with_info_string() {
        let reply = "```Java\npackage a;\n```";
        assert_eq!(extract_code_block(reply).as_deref(), Some("package a;"));
    }

    #[test]
    fn unterminated_fence_runs_to_end() {
        let reply = "```java\npackage a;\nclass T {}\n";
        assert_eq!(extract_code_block(reply).as_deref(), Some("package a;\nclass T {}"));
    }

    #[test]
    fn raw_package_source_is_accepted() {
        let reply = "\n  package org.example;\n\nclass CalculatorTest {}\n";
        assert_eq!(
            extract_code_block(reply).as_deref(),
            Some("package org.example;\n\nclass CalculatorTest {}")
        );
    }

    #[test]
    fn prose_is_rejected() {
        assert_eq!(extract_code_block("I cannot help with that."), None);
        assert_eq!(extract_code_block("```java\n   \n```"), None);
        assert_eq!(extract_code_block(""), None);
    }
}
