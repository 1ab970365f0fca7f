use tracing::info;

use crate::executor::run::CancelToken;
use crate::llm::client::{LlmClient, SynthesisError};
use crate::llm::prompt::{build_prompt, SynthesisInputs};

/// External synthesizer: {source, inspiration, existing test} -> raw reply.
/// Code extraction happens in the pipeline, not here.
pub trait Synthesizer: Send + Sync {
    fn synthesize(
        &self,
        unit: &str,
        inputs: SynthesisInputs<'_>,
        cancel: &CancelToken,
    ) -> Result<String, SynthesisError>;
}

impl Synthesizer for LlmClient {
    fn synthesize(
        &self,
        unit: &str,
        inputs: SynthesisInputs<'_>,
        cancel: &CancelToken,
    ) -> Result<String, SynthesisError> {
        let prompt = build_prompt(inputs);
        info!(unit, provider = ?self.provider(), "synthesizing JUnit 5 test");

        let result = self.run(&prompt, cancel)?;
        info!(unit, prompt_hash = %result.prompt_hash, chars = result.text.len(), "LLM generation completed");
        Ok(result.text)
    }
}
