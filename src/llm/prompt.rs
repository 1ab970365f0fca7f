use sha2::{Digest, Sha256};

const PROMPT_ABI_VERSION: &str = "v1-junit5-synthesis";

#[derive(Debug, Clone)]
pub struct LlmPrompt {
    pub system: String,
    pub user: String,
}

impl LlmPrompt {
    /// Stable hash for log correlation across retries and runs.
    pub fn hash(&self) -> String {
        let mut h = Sha256::new();
        h.update(PROMPT_ABI_VERSION.as_bytes());
        h.update(self.system.as_bytes());
        h.update(self.user.as_bytes());
        hex::encode(h.finalize())
    }
}

/// Inputs to one synthesis request.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInputs<'a> {
    pub source: &'a str,
    pub inspiration: Option<&'a str>,
    pub existing_test: Option<&'a str>,
}

pub fn build_prompt(inputs: SynthesisInputs<'_>) -> LlmPrompt {
    LlmPrompt {
        system: system_prompt().to_string(),
        user: user_prompt(inputs),
    }
}

fn system_prompt() -> &'static str {
    "You are an expert Java developer specializing in clean, modern, maintainable JUnit 5 tests.\n\
     You respond with a single complete Java test file and nothing else."
}

fn user_prompt(inputs: SynthesisInputs<'_>) -> String {
    let mut p = String::new();

    p.push_str(
        "Synthesize a single, comprehensive JUnit 5 test file for the Java class below. \
         You are given:\n",
    );
    p.push_str("1. **The Source Code:** the class under test.\n");

    if inputs.inspiration.is_some() {
        p.push_str(
            "2. **Generated Test (Inspiration):** produced by a coverage-oriented test generator. \
             Treat it as the source of truth for test cases: keep its method calls, inputs and \
             assertions to preserve coverage.\n",
        );
    }

    if inputs.existing_test.is_some() {
        p.push_str(
            "3. **Existing JUnit 5 Test (Style Guide & Base):** a hand-written test file. Follow its \
             style and structure and MERGE its tests into your output. Do not remove existing tests.\n\n",
        );
    } else {
        p.push_str("3. No existing test file was found. Create a new one from scratch.\n\n");
    }

    if inputs.inspiration.is_none() {
        p.push_str(
            "**IMPORTANT:** No generated test is available. Derive high-quality test cases from the \
             source code alone: common scenarios, edge cases and null inputs.\n\n",
        );
    }

    p.push_str("Follow these rules STRICTLY:\n");
    p.push_str("1. **JUNIT 5 ONLY:** use `org.junit.jupiter.api.*`.\n");
    p.push_str("2. **DESCRIPTIVE NAMING:** e.g. `add_withPositiveNumbers_returnsSum`.\n");
    p.push_str("3. **MERGE, DON'T REPLACE:** keep every test from an existing file.\n");
    p.push_str("4. **ASSERTIONS:** standard JUnit 5 assertions (`assertEquals`, `assertThrows`, ...).\n");
    p.push_str("5. **NO GENERATOR SPECIFICS:** drop scaffolding, runners and annotations of the generator.\n");
    p.push_str("6. **OUTPUT FORMAT:** only the complete Java code in a single ```java code block.\n\n");

    push_block(&mut p, "Source Code Under Test", Some(inputs.source));
    push_block(&mut p, "Generated Test (Inspiration for Test Cases)", inputs.inspiration);
    push_block(&mut p, "Existing JUnit 5 Test (Style Guide & Base)", inputs.existing_test);

    p
}

fn push_block(p: &mut String, title: &str, body: Option<&str>) {
    let Some(body) = body else {
        return;
    };
    p.push_str("---\n**");
    p.push_str(title);
    p.push_str(":**\n```java\n");
    p.push_str(body.trim_end());
    p.push_str("\n```\n\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "package org.example;\npublic class Calculator {}";

    #[test]
    fn source_only_prompt_asks_for_analysis() {
        let p = build_prompt(SynthesisInputs {
            source: SRC,
            inspiration: None,
            existing_test: None,
        });

        assert!(p.user.contains("public class Calculator"));
        assert!(p.user.contains("No generated test is available"));
        assert!(p.user.contains("No existing test file was found"));
        assert!(!p.user.contains("Inspiration for Test Cases"));
    }

    #[test]
    fn all_inputs_are_embedded() {
        let p = build_prompt(SynthesisInputs {
            source: SRC,
            inspiration: Some("class Calculator_ESTest {}"),
            existing_test: Some("class CalculatorTest {}"),
        });

        assert!(p.user.contains("class Calculator_ESTest {}"));
        assert!(p.user.contains("class CalculatorTest {}"));
        assert!(p.user.contains("MERGE its tests"));
        assert!(!p.user.contains("No generated test is available"));
    }

    #[test]
    fn hash_is_stable_and_input_sensitive() {
        let a = build_prompt(SynthesisInputs {
            source: SRC,
            inspiration: None,
            existing_test: None,
        });
        let b = build_prompt(SynthesisInputs {
            source: "package x;",
            inspiration: None,
            existing_test: None,
        });

        assert_eq!(a.hash(), a.clone().hash());
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
    }
}
