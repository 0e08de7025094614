//! Prompt assembly. Pure string building with a fixed section order:
//! rules, schema reference, retrieved examples (most similar first), request.

use std::fmt::Write;

use serde_json::Value;

use crate::corpus::PromptAssets;
use crate::retrieval::RetrievedExample;

const NO_EXAMPLES: &str = "(no similar examples found)";

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    assets: PromptAssets,
}

impl PromptBuilder {
    pub fn new(assets: PromptAssets) -> Self {
        Self { assets }
    }

    pub fn build(
        &self,
        description: &str,
        headers: Option<&str>,
        examples: &[RetrievedExample],
    ) -> String {
        build_prompt(
            description,
            headers,
            examples,
            &self.assets.rules,
            &self.assets.schema,
        )
    }
}

pub fn build_prompt(
    description: &str,
    headers: Option<&str>,
    examples: &[RetrievedExample],
    rules: &str,
    schema: &str,
) -> String {
    let mut prompt = String::with_capacity(rules.len() + schema.len() + examples.len() * 512);

    prompt.push_str(rules.trim_end());
    prompt.push_str("\n\n## Schema Reference\n\n");
    prompt.push_str(schema.trim_end());
    prompt.push_str("\n\n## Examples\n\n");

    if examples.is_empty() {
        prompt.push_str(NO_EXAMPLES);
        prompt.push('\n');
    }
    for example in examples {
        let _ = writeln!(
            prompt,
            "English Text: {}; Headers/Column Names: {}, Answer: {}",
            example.record.description,
            example.record.headers,
            render_config(&example.record.target_config)
        );
    }

    let _ = write!(
        prompt,
        "\n## Request\n\nEnglish Text: {}; Headers/Column Names: {}, Answer:",
        description,
        headers.unwrap_or("")
    );
    prompt
}

fn render_config(config: &Value) -> String {
    serde_json::to_string_pretty(config).unwrap_or_else(|_| config.to_string())
}
