//! Dialogue script generation from an analysis.

use crate::analysis::{AnalysisSegment, FormatStyle, PodcastAnalysis, Speaker};
use crate::combine::extract_json;
use crate::config::Prompts;
use crate::error::{PodError, Result};
use crate::llm::{LanguageModel, ResponseMode};
use crate::retry::{retry, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// One spoken line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptLine {
    pub ordinal: usize,
    pub speaker: Speaker,
    pub text: String,
    #[serde(default = "neutral")]
    pub tone: String,
}

fn neutral() -> String {
    "neutral".to_string()
}

/// Ordered dialogue for one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub title: String,
    pub format: FormatStyle,
    pub lines: Vec<ScriptLine>,
}

impl Script {
    pub fn validate(&self) -> Result<()> {
        if self.lines.is_empty() {
            return Err(PodError::Validation(format!(
                "script for '{}' has no lines",
                self.title
            )));
        }
        for (i, line) in self.lines.iter().enumerate() {
            if line.ordinal != i {
                return Err(PodError::Validation(format!(
                    "script line {} has ordinal {}",
                    i, line.ordinal
                )));
            }
            if line.text.trim().is_empty() {
                return Err(PodError::Validation(format!("script line {} is empty", i)));
            }
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let script: Script = serde_json::from_str(&json)
            .map_err(|e| PodError::Validation(format!("Invalid script JSON: {}", e)))?;
        script.validate()?;
        Ok(script)
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        self.validate()?;
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Distinct speakers in order of first appearance.
    pub fn speakers(&self) -> Vec<Speaker> {
        let mut speakers = Vec::new();
        for line in &self.lines {
            if !speakers.contains(&line.speaker) {
                speakers.push(line.speaker);
            }
        }
        speakers
    }

    pub fn word_count(&self) -> usize {
        self.lines.iter().map(|l| l.text.split_whitespace().count()).sum()
    }
}

/// Map a speaker onto the roles available in `format`.
pub fn cast(format: FormatStyle, speaker: Speaker) -> Speaker {
    let roles = format.speakers();
    if roles.contains(&speaker) {
        return speaker;
    }
    match speaker {
        Speaker::Host => roles[0],
        _ => roles[roles.len() - 1],
    }
}

#[derive(Debug, Deserialize)]
struct DialogueReply {
    lines: Vec<DialogueLine>,
}

#[derive(Debug, Deserialize)]
struct DialogueLine {
    speaker: Speaker,
    text: String,
    #[serde(default)]
    tone: Option<String>,
}

/// Turns an analysis into a script, optionally expanding each segment into
/// dialogue with the language model.
pub struct ScriptGenerator {
    model: Option<Arc<dyn LanguageModel>>,
    prompts: Prompts,
    policy: RetryPolicy,
}

impl ScriptGenerator {
    /// Generator that expands segments into dialogue through `model`.
    pub fn new(model: Arc<dyn LanguageModel>, prompts: Prompts, policy: RetryPolicy) -> Self {
        Self {
            model: Some(model),
            prompts,
            policy,
        }
    }

    /// Generator that reads each segment's content as a single line.
    pub fn direct() -> Self {
        Self {
            model: None,
            prompts: Prompts::defaults(),
            policy: RetryPolicy::once(),
        }
    }

    #[instrument(skip(self, analysis), fields(segments = analysis.segments.len()))]
    pub async fn generate(
        &self,
        title: &str,
        analysis: &PodcastAnalysis,
        format_override: Option<FormatStyle>,
    ) -> Result<Script> {
        analysis.validate()?;
        let format = format_override.unwrap_or(analysis.podcast_format.recommended);
        if format_override.is_some_and(|f| f != analysis.podcast_format.recommended) {
            info!(
                "Using format {} instead of recommended {}",
                format, analysis.podcast_format.recommended
            );
        }

        let mut lines = Vec::new();
        let total = analysis.segments.len();
        for (i, segment) in analysis.segments.iter().enumerate() {
            let produced = match &self.model {
                Some(model) => {
                    self.expand(model.as_ref(), title, format, analysis, segment, i, total)
                        .await?
                }
                None => vec![(cast(format, segment.speaker), segment.content.clone(), segment.tone.clone())],
            };
            for (speaker, text, tone) in produced {
                lines.push(ScriptLine {
                    ordinal: lines.len(),
                    speaker,
                    text,
                    tone,
                });
            }
        }

        let script = Script {
            title: title.to_string(),
            format,
            lines,
        };
        script.validate()?;
        info!(
            "Script for '{}': {} lines, {} words",
            title,
            script.lines.len(),
            script.word_count()
        );
        Ok(script)
    }

    #[allow(clippy::too_many_arguments)]
    async fn expand(
        &self,
        model: &dyn LanguageModel,
        title: &str,
        format: FormatStyle,
        analysis: &PodcastAnalysis,
        segment: &AnalysisSegment,
        index: usize,
        total: usize,
    ) -> Result<Vec<(Speaker, String, String)>> {
        let speakers = format
            .speakers()
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let glossary = segment
            .technical_terms
            .iter()
            .filter_map(|t| analysis.technical_glossary.get(t).map(|d| format!("- {}: {}", t, d)))
            .collect::<Vec<_>>()
            .join("\n");

        let mut vars = HashMap::new();
        vars.insert("title".to_string(), title.to_string());
        vars.insert("format".to_string(), format.to_string());
        vars.insert("speakers".to_string(), speakers);
        vars.insert("segment_number".to_string(), (index + 1).to_string());
        vars.insert("segment_count".to_string(), total.to_string());
        vars.insert("speaker".to_string(), cast(format, segment.speaker).to_string());
        vars.insert("tone".to_string(), segment.tone.clone());
        vars.insert("content".to_string(), segment.content.clone());
        vars.insert(
            "glossary".to_string(),
            if glossary.is_empty() { "(none)".to_string() } else { glossary },
        );

        let system = self.prompts.render_with_custom(&self.prompts.script.system, &vars);
        let user = self.prompts.render_with_custom(&self.prompts.script.user, &vars);
        let label = format!("script {}", segment.id);

        let reply = retry(&self.policy, &label, |_| async {
            let completion = model.complete(&system, &user, ResponseMode::Json).await?;
            let reply: DialogueReply = serde_json::from_str(extract_json(&completion.text))
                .map_err(|e| PodError::TransientApi(format!("malformed dialogue JSON: {}", e)))?;
            if reply.lines.iter().all(|l| l.text.trim().is_empty()) {
                return Err(PodError::TransientApi(format!(
                    "no dialogue returned for {}",
                    segment.id
                )));
            }
            Ok(reply)
        })
        .await?;

        debug!("Segment {} expanded to {} lines", segment.id, reply.lines.len());
        Ok(reply
            .lines
            .into_iter()
            .filter(|l| !l.text.trim().is_empty())
            .map(|l| {
                (
                    cast(format, l.speaker),
                    l.text.trim().to_string(),
                    l.tone.unwrap_or_else(|| segment.tone.clone()),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tests::sample_json;
    use crate::llm::Completion;
    use crate::retry::Backoff;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedModel {
        replies: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, _system: &str, _user: &str, _mode: ResponseMode) -> Result<Completion> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(PodError::PermanentApi("no more replies".into()));
            }
            Ok(Completion::text(replies.remove(0)))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            delay: Duration::ZERO,
            backoff: Backoff::Fixed,
            max_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_direct_generation() {
        let analysis = PodcastAnalysis::from_json(sample_json()).unwrap();
        let script = ScriptGenerator::direct()
            .generate("Paper", &analysis, None)
            .await
            .unwrap();

        assert_eq!(script.format, FormatStyle::HostExpert);
        assert_eq!(script.lines.len(), 2);
        assert_eq!(script.lines[1].speaker, Speaker::Expert);
        assert_eq!(script.lines[1].tone, "authoritative");
        assert_eq!(script.speakers(), vec![Speaker::Host, Speaker::Expert]);
    }

    #[tokio::test]
    async fn test_format_override_recasts_speakers() {
        let analysis = PodcastAnalysis::from_json(sample_json()).unwrap();
        let script = ScriptGenerator::direct()
            .generate("Paper", &analysis, Some(FormatStyle::TwoExperts))
            .await
            .unwrap();

        assert_eq!(script.format, FormatStyle::TwoExperts);
        assert_eq!(script.lines[0].speaker, Speaker::Expert);
    }

    #[tokio::test]
    async fn test_expansion_retries_malformed_reply() {
        let model = Arc::new(ScriptedModel {
            replies: Mutex::new(vec![
                "not json".to_string(),
                r#"{"lines": [{"speaker": "host", "text": "Hi there."}, {"speaker": "expert", "text": "Hello."}]}"#.to_string(),
                r#"```json
{"lines": [{"speaker": "expert", "text": "Zebra caches stripe keys.", "tone": "authoritative"}]}
```"#
                    .to_string(),
            ]),
        });
        let generator = ScriptGenerator::new(model, Prompts::defaults(), fast());
        let analysis = PodcastAnalysis::from_json(sample_json()).unwrap();

        let script = generator.generate("Paper", &analysis, None).await.unwrap();

        assert_eq!(script.lines.len(), 3);
        assert_eq!(script.lines[0].tone, "welcoming");
        assert_eq!(script.lines[2].ordinal, 2);
        assert!(script.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_gaps() {
        let script = Script {
            title: "t".into(),
            format: FormatStyle::Panel,
            lines: vec![ScriptLine {
                ordinal: 1,
                speaker: Speaker::Host,
                text: "hi".into(),
                tone: neutral(),
            }],
        };
        assert!(matches!(script.validate(), Err(PodError::Validation(_))));
    }

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        let script = Script {
            title: "t".into(),
            format: FormatStyle::Panel,
            lines: vec![ScriptLine {
                ordinal: 0,
                speaker: Speaker::Panelist,
                text: "hi".into(),
                tone: neutral(),
            }],
        };
        script.store(&path).unwrap();
        assert_eq!(Script::load(&path).unwrap(), script);
    }
}
