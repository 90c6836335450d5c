//! Prompt templates for text2pod.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory
//! (`formatting.toml`, `analysis.toml`, `script.toml`).

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Prompts {
    /// Raw extracted text to clean markdown.
    pub formatting: StagePrompts,
    /// Markdown to structured podcast analysis.
    pub analysis: StagePrompts,
    /// Analysis segment to dialogue lines.
    pub script: StagePrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// System and user templates for one model call.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StagePrompts {
    pub system: String,
    pub user: String,
}

fn formatting_defaults() -> StagePrompts {
    StagePrompts {
        system: r#"You turn raw text extracted from technical documents into clean, well-structured markdown.

- Repair extraction artifacts: broken hyphenation, stray page numbers, running headers and footers
- Use heading levels that mirror the document hierarchy
- Keep lists, tables and code blocks, using markdown syntax for each
- Keep every technical term and number exactly as written
- Do not summarise and do not add commentary

Reply with markdown only."#
            .to_string(),
        user: r#"Document: {{title}}
{{position}}

{{content}}"#
            .to_string(),
    }
}

fn analysis_defaults() -> StagePrompts {
    StagePrompts {
        system: r#"You plan podcast episodes from technical documents.

Read the markdown you are given and reply with a single JSON object of this shape:
{
  "podcast_format": {
    "recommended": "host_expert" | "two_experts" | "panel",
    "reasoning": "why this format suits the material",
    "technical_level": "beginner" | "intermediate" | "advanced",
    "estimated_duration_minutes": number
  },
  "segments": [
    {
      "id": "short identifier",
      "speaker": "host" | "expert" | "panelist",
      "content": "what this speaker says or covers",
      "tone": "neutral" | "welcoming" | "authoritative" | "curious",
      "technical_terms": ["terms introduced in this segment"]
    }
  ],
  "technical_glossary": { "term": "plain-language definition" }
}

The duration estimate covers only the material you were given."#
            .to_string(),
        user: r#"Document: {{title}}
{{position}}

{{content}}"#
            .to_string(),
    }
}

fn script_defaults() -> StagePrompts {
    StagePrompts {
        system: r#"You write natural podcast dialogue for a {{format}} episode.

Reply with a JSON object: {"lines": [{"speaker": "host" | "expert" | "panelist", "text": "...", "tone": "..."}]}

- Speakers available: {{speakers}}
- Explain technical terms the first time they appear
- Keep each line under 120 words so it reads well aloud
- No stage directions, sound effects or markdown"#
            .to_string(),
        user: r#"Episode: {{title}}
Segment {{segment_number}} of {{segment_count}} (suggested speaker: {{speaker}}, tone: {{tone}})

Material to cover:
{{content}}

Glossary:
{{glossary}}"#
            .to_string(),
    }
}

impl Default for Prompts {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::defaults();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            for (file, slot) in [
                ("formatting.toml", &mut prompts.formatting),
                ("analysis.toml", &mut prompts.analysis),
                ("script.toml", &mut prompts.script),
            ] {
                let path = custom_path.join(file);
                if path.exists() {
                    let content = std::fs::read_to_string(&path)?;
                    *slot = toml::from_str(&content)?;
                }
            }
        }

        Ok(prompts)
    }

    /// Built-in templates with no custom variables.
    pub fn defaults() -> Self {
        Self {
            formatting: formatting_defaults(),
            analysis: analysis_defaults(),
            script: script_defaults(),
            variables: HashMap::new(),
        }
    }

    /// Render a prompt template with the given variables.
    ///
    /// Placeholders are replaced in one pass over the template, so `{{...}}` inside a
    /// substituted value is left alone. Unknown placeholders stay as written.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        placeholder_regex()
            .replace_all(template, |caps: &Captures| match vars.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("valid placeholder regex"))
}
