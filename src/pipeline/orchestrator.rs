//! Pipeline orchestrator for text2pod.
//!
//! Coordinates the stages from document extraction to the assembled episode,
//! resuming each document from its last durable artifact.

use super::artifacts::ArtifactStore;
use super::store::{RunStatus, RunStore};
use super::{AutoProceed, CancelToken, Decision, DecisionSource, Stage};
use crate::analysis::{FormatStyle, PodcastAnalysis, Speaker, TechnicalLevel};
use crate::audio::{Assembler, AudioSegment};
use crate::chunking::ChunkBudget;
use crate::combine::CombinedResult;
use crate::config::{Prompts, Settings};
use crate::document::{self, content_id, Document};
use crate::error::{PodError, Result};
use crate::llm::{CompletionService, DocumentRequest, LanguageModel, OpenAiModel, ResponseMode};
use crate::retry::{retry, RetryPolicy};
use crate::script::{Script, ScriptGenerator};
use crate::tokens::{HeuristicCounter, UsageReport, UsageTracker};
use crate::voice::{ElevenLabsSynthesizer, VoiceMapper, VoiceSynthesizer};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Podcast format to use instead of the analysis recommendation.
    pub format: Option<FormatStyle>,
    /// Ignore existing artifacts and start from the first stage.
    pub force: bool,
    /// Re-run from this stage even if its artifacts are valid.
    pub from_stage: Option<Stage>,
    /// Remove segment files after a successful assembly.
    pub cleanup: bool,
}

/// Result of processing one document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutcome {
    pub document_id: String,
    pub title: String,
    pub source: PathBuf,
    pub status: RunStatus,
    /// Last stage whose artifacts are in place.
    pub completed_stage: Option<Stage>,
    /// Stage that failed, if any.
    pub failed_stage: Option<Stage>,
    pub error: Option<String>,
    pub audio_path: Option<PathBuf>,
    /// Every stage was already complete; nothing ran.
    pub already_complete: bool,
}

impl DocumentOutcome {
    fn new(source: &Path, title: &str) -> Self {
        Self {
            document_id: String::new(),
            title: title.to_string(),
            source: source.to_path_buf(),
            status: RunStatus::Running,
            completed_stage: None,
            failed_stage: None,
            error: None,
            audio_path: None,
            already_complete: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Metadata written next to the assembled episode.
#[derive(Debug, Serialize)]
struct EpisodeMetadata<'a> {
    title: &'a str,
    document_id: &'a str,
    source: Option<String>,
    format: FormatStyle,
    technical_level: TechnicalLevel,
    estimated_duration_minutes: f64,
    duration_seconds: f64,
    lines: usize,
    speakers: Vec<Speaker>,
    technical_glossary: &'a IndexMap<String, String>,
    generated_at: DateTime<Utc>,
}

/// What one run works on.
struct Job {
    id: String,
    title: String,
    source: Option<PathBuf>,
}

/// The main orchestrator for the text2pod pipeline.
pub struct Orchestrator {
    settings: Settings,
    prompts: Prompts,
    completion: CompletionService,
    scripts: ScriptGenerator,
    synthesizer: Arc<dyn VoiceSynthesizer>,
    voices: VoiceMapper,
    assembler: Assembler,
    runs: Arc<RunStore>,
    artifacts: ArtifactStore,
    decisions: Arc<dyn DecisionSource>,
    cancel: CancelToken,
    policy: RetryPolicy,
    usage: Option<Arc<UsageTracker>>,
}

impl Orchestrator {
    /// Create an orchestrator with the OpenAI and ElevenLabs clients.
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;

        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let openai = OpenAiModel::new(
            &settings.llm.model,
            settings.llm.temperature,
            Duration::from_secs(settings.llm.timeout_secs),
        )?;
        let usage = openai.usage();
        let model: Arc<dyn LanguageModel> = Arc::new(openai);

        let synthesizer: Arc<dyn VoiceSynthesizer> =
            Arc::new(ElevenLabsSynthesizer::from_env(&settings.voice)?);
        let runs = Arc::new(RunStore::new(&settings.runs_db_path())?);

        let mut orchestrator = Self::with_components(settings, prompts, model, synthesizer, runs)?;
        orchestrator.usage = Some(usage);
        Ok(orchestrator)
    }

    /// Create an orchestrator with custom components.
    pub fn with_components(
        settings: Settings,
        prompts: Prompts,
        model: Arc<dyn LanguageModel>,
        synthesizer: Arc<dyn VoiceSynthesizer>,
        runs: Arc<RunStore>,
    ) -> Result<Self> {
        settings.validate()?;

        let mut counter =
            HeuristicCounter::with_ratio(model.model(), settings.chunking.chars_per_token);
        if let Some(window) = settings.llm.context_window {
            counter = counter.with_context_window(window);
        }

        let policy = settings.retry.policy();
        let budget: ChunkBudget = settings.chunking.budget();
        let completion = CompletionService::new(
            Arc::clone(&model),
            Arc::new(counter),
            &budget,
            policy.clone(),
            prompts.clone(),
        )?
        .with_concurrency(settings.llm.max_concurrent_requests);

        let scripts = if settings.script.expand_dialogue {
            ScriptGenerator::new(Arc::clone(&model), prompts.clone(), policy.clone())
        } else {
            ScriptGenerator::direct()
        };

        let artifacts = ArtifactStore::new(settings.output_dir());
        std::fs::create_dir_all(artifacts.root())?;

        Ok(Self {
            voices: VoiceMapper::new(&settings.voice),
            assembler: Assembler::new(Duration::from_millis(settings.audio.crossfade_ms)),
            settings,
            prompts,
            completion,
            scripts,
            synthesizer,
            runs,
            artifacts,
            decisions: Arc::new(AutoProceed),
            cancel: CancelToken::new(),
            policy,
            usage: None,
        })
    }

    /// Ask `decisions` before each stage.
    pub fn with_decisions(mut self, decisions: Arc<dyn DecisionSource>) -> Self {
        self.decisions = decisions;
        self
    }

    /// Stop at the next stage boundary once `cancel` fires.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn runs(&self) -> Arc<RunStore> {
        Arc::clone(&self.runs)
    }

    /// Token usage of every model call so far, when the model reports it.
    pub fn usage_report(&self) -> Option<UsageReport> {
        self.usage.as_ref().map(|u| u.report())
    }

    /// Process each document in turn. A failing document does not stop the others.
    pub async fn process_batch(&self, paths: &[PathBuf], options: &ProcessOptions) -> Vec<DocumentOutcome> {
        let mut outcomes = Vec::with_capacity(paths.len());
        for (i, path) in paths.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("Cancelled, {} document(s) not processed", paths.len() - i);
                break;
            }
            eprintln!("\n[{}/{}] {}", i + 1, paths.len(), path.display());
            outcomes.push(self.process_document(path, options).await);
        }
        outcomes
    }

    /// Run a document through the pipeline, resuming where it left off.
    #[instrument(skip(self, options), fields(path = %path.display()))]
    pub async fn process_document(&self, path: &Path, options: &ProcessOptions) -> DocumentOutcome {
        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string();
        let mut outcome = DocumentOutcome::new(path, &title);

        let id = match std::fs::read(path) {
            Ok(bytes) => content_id(&bytes),
            Err(e) => {
                let err = PodError::Extraction(format!("Cannot read {}: {}", path.display(), e));
                outcome.status = RunStatus::Failed;
                outcome.failed_stage = Some(Stage::Extracted);
                outcome.error = Some(err.to_string());
                return outcome;
            }
        };
        outcome.document_id = id.clone();

        let job = Job {
            id,
            title,
            source: Some(path.to_path_buf()),
        };
        self.run(&job, &Stage::ALL, options, outcome).await
    }

    /// Build an episode from an existing analysis file, skipping extraction and analysis.
    #[instrument(skip(self, options), fields(path = %analysis_path.display()))]
    pub async fn process_analysis(
        &self,
        analysis_path: &Path,
        title: Option<&str>,
        options: &ProcessOptions,
    ) -> DocumentOutcome {
        let title = title
            .map(str::to_string)
            .or_else(|| analysis_path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .unwrap_or_else(|| "podcast".to_string());
        let mut outcome = DocumentOutcome::new(analysis_path, &title);

        let prepared = std::fs::read(analysis_path)
            .map_err(PodError::from)
            .and_then(|bytes| {
                let id = content_id(&bytes);
                let analysis = PodcastAnalysis::load(analysis_path)?;
                self.artifacts.prepare(&id)?;
                analysis.store(&self.artifacts.analysis_path(&id))?;
                Ok(id)
            });

        let id = match prepared {
            Ok(id) => id,
            Err(e) => {
                outcome.status = RunStatus::Failed;
                outcome.failed_stage = Some(Stage::Analyzed);
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };
        outcome.document_id = id.clone();
        outcome.completed_stage = Some(Stage::Analyzed);

        let job = Job {
            id,
            title,
            source: None,
        };
        let stages = [Stage::Scripted, Stage::Synthesized, Stage::Assembled];
        self.run(&job, &stages, options, outcome).await
    }

    async fn run(
        &self,
        job: &Job,
        stages: &[Stage],
        options: &ProcessOptions,
        mut outcome: DocumentOutcome,
    ) -> DocumentOutcome {
        if let Err(e) = self.drive(job, stages, options, &mut outcome).await {
            warn!("'{}' stopped: {}", job.title, e);
            outcome.status = match e {
                PodError::Aborted(_) => RunStatus::Aborted,
                _ => RunStatus::Failed,
            };
            outcome.error = Some(e.to_string());
            if let Err(store_err) = self
                .runs
                .set_status(&job.id, outcome.status, Some(&e.to_string()))
            {
                warn!("Failed to record run status: {}", store_err);
            }
        }
        outcome
    }

    async fn drive(
        &self,
        job: &Job,
        stages: &[Stage],
        options: &ProcessOptions,
        outcome: &mut DocumentOutcome,
    ) -> Result<()> {
        let Some(&first) = stages.first() else {
            return Ok(());
        };

        self.artifacts.prepare(&job.id)?;
        let source = job
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        self.runs.start(&job.id, &source, &job.title)?;

        let resume = if options.force {
            Some(first)
        } else {
            self.artifacts.resume_point(stages, &job.id, &job.title)
        };
        let requested = options.from_stage.map(|s| s.max(first));
        let start = match (resume, requested) {
            (Some(r), Some(f)) => r.min(f),
            (Some(r), None) => r,
            (None, Some(f)) => f,
            (None, None) => {
                info!("'{}' is already complete", job.title);
                eprintln!("  Already complete.");
                self.runs.set_status(&job.id, RunStatus::Completed, None)?;
                outcome.status = RunStatus::Completed;
                outcome.completed_stage = Some(Stage::Assembled);
                outcome.audio_path = Some(self.artifacts.audio_path(&job.id, &job.title));
                outcome.already_complete = true;
                return Ok(());
            }
        };

        self.runs.rewind(&job.id, start)?;
        // Later artifacts were built from what `start` is about to replace. A stage
        // resumed because its own artifact is incomplete keeps what it has so far.
        let stale_from = if resume == Some(start) {
            start.next()
        } else {
            Some(start)
        };
        if let Some(stale_from) = stale_from {
            self.artifacts.remove_from(stale_from, &job.id, &job.title)?;
        }
        outcome.completed_stage = Stage::ALL.iter().copied().filter(|s| *s < start).last();
        if start > first {
            info!("Resuming '{}' at stage {}", job.title, start);
            eprintln!("  Resuming at: {}", start);
        }

        for &stage in stages.iter().filter(|s| **s >= start) {
            if self.cancel.is_cancelled() {
                return Err(PodError::Aborted(format!("cancelled before {}", stage)));
            }

            match self.decisions.decide(stage, &job.title) {
                Decision::Proceed => {}
                Decision::Skip => {
                    info!("Skipping '{}' at stage {}", job.title, stage);
                    self.runs.set_status(&job.id, RunStatus::Paused, None)?;
                    outcome.status = RunStatus::Paused;
                    return Ok(());
                }
                Decision::Abort => {
                    return Err(PodError::Aborted(format!("aborted before {}", stage)));
                }
            }

            self.runs.begin_stage(&job.id, stage)?;
            eprintln!("  {}...", stage.action());

            let produced = match self.run_stage(stage, job, options).await {
                Ok(produced) => produced,
                Err(e) => {
                    outcome.failed_stage = Some(stage);
                    return Err(e);
                }
            };

            let paths: Vec<String> = produced.iter().map(|p| p.display().to_string()).collect();
            self.runs.complete_stage(&job.id, stage, &paths)?;
            outcome.completed_stage = Some(stage);
            info!("'{}' reached stage {}", job.title, stage);
        }

        outcome.status = RunStatus::Completed;
        outcome.audio_path = Some(self.artifacts.audio_path(&job.id, &job.title));
        Ok(())
    }

    async fn run_stage(&self, stage: Stage, job: &Job, options: &ProcessOptions) -> Result<Vec<PathBuf>> {
        match stage {
            Stage::Extracted => self.extract(job),
            Stage::Analyzed => self.analyze(job).await,
            Stage::Scripted => self.write_script(job, options).await,
            Stage::Synthesized => self.synthesize(job).await,
            Stage::Assembled => self.assemble(job, options),
        }
    }

    fn extract(&self, job: &Job) -> Result<Vec<PathBuf>> {
        let path = job.source.as_ref().ok_or_else(|| {
            PodError::Extraction(format!("'{}' has no source document", job.title))
        })?;

        let loaded = document::load(path)?;
        let document = Document::with_id(job.id.clone(), &job.title, loaded.text);
        if document.is_empty() {
            return Err(PodError::Extraction(format!(
                "No text content extracted from {}",
                path.display()
            )));
        }

        eprintln!(
            "  Extracted {} characters in {} blocks",
            document.text.len(),
            document.units.len()
        );
        Ok(vec![self.artifacts.store_document(&document)?])
    }

    async fn analyze(&self, job: &Job) -> Result<Vec<PathBuf>> {
        let document = self.artifacts.load_document(&job.id)?;

        let formatted = self
            .completion
            .run(&DocumentRequest {
                label: "formatting",
                document: &document,
                prompts: &self.prompts.formatting,
                mode: ResponseMode::Markdown,
            })
            .await?;
        let CombinedResult::Markdown(markdown) = formatted else {
            return Err(PodError::Combination(
                "formatting produced structured output".to_string(),
            ));
        };
        let markdown_path = self.artifacts.markdown_path(&job.id);
        std::fs::write(&markdown_path, &markdown)?;
        eprintln!("  Formatted markdown ({} characters)", markdown.len());

        let content = Document::with_id(job.id.clone(), &job.title, markdown);
        let analyzed = self
            .completion
            .run(&DocumentRequest {
                label: "analysis",
                document: &content,
                prompts: &self.prompts.analysis,
                mode: ResponseMode::Json,
            })
            .await?;
        let CombinedResult::Analysis(analysis) = analyzed else {
            return Err(PodError::Combination(
                "analysis produced markdown output".to_string(),
            ));
        };

        let analysis_path = self.artifacts.analysis_path(&job.id);
        analysis.store(&analysis_path)?;
        eprintln!(
            "  Analysis: {} segments, format {}, ~{:.0} min",
            analysis.segments.len(),
            analysis.podcast_format.recommended,
            analysis.podcast_format.estimated_duration_minutes
        );
        Ok(vec![markdown_path, analysis_path])
    }

    async fn write_script(&self, job: &Job, options: &ProcessOptions) -> Result<Vec<PathBuf>> {
        let analysis = PodcastAnalysis::load(&self.artifacts.analysis_path(&job.id))?;
        let script = self
            .scripts
            .generate(&job.title, &analysis, options.format)
            .await?;

        let path = self.artifacts.script_path(&job.id);
        script.store(&path)?;
        eprintln!("  Script: {} lines ({})", script.lines.len(), script.format);
        Ok(vec![path])
    }

    async fn synthesize(&self, job: &Job) -> Result<Vec<PathBuf>> {
        let script = Script::load(&self.artifacts.script_path(&job.id))?;
        let total = script.lines.len();
        let mut paths = Vec::with_capacity(total + 1);
        let mut reused = 0;

        let csv_path = self.artifacts.voice_segments_path(&job.id);
        std::fs::write(&csv_path, self.voices.segments_csv(&script))?;
        paths.push(csv_path);

        for line in &script.lines {
            if let Some(existing) = self.artifacts.valid_segment(&job.id, line) {
                reused += 1;
                paths.push(existing);
                continue;
            }

            eprintln!("    Segment {}/{} ({})", line.ordinal + 1, total, line.speaker);
            let profile = self.voices.profile(line.speaker, &line.tone);
            let label = format!("synthesize segment {}", line.ordinal);
            let wav = retry(&self.policy, &label, |_| async {
                let wav = self.synthesizer.synthesize(&line.text, &profile).await?;
                let segment = AudioSegment::from_wav(line.ordinal, line.speaker, wav).map_err(|e| {
                    PodError::TransientApi(format!("unusable audio returned: {}", e))
                })?;
                if segment.duration.is_zero() {
                    return Err(PodError::TransientApi("empty audio returned".to_string()));
                }
                Ok(segment.wav)
            })
            .await?;

            let path = self.artifacts.segment_path(&job.id, line);
            write_atomic(&path, &wav)?;
            paths.push(path);
        }

        if reused > 0 {
            info!("Reused {} of {} existing segments", reused, total);
            eprintln!("  Reused {} existing segment(s)", reused);
        }
        Ok(paths)
    }

    fn assemble(&self, job: &Job, options: &ProcessOptions) -> Result<Vec<PathBuf>> {
        let script = Script::load(&self.artifacts.script_path(&job.id))?;
        let analysis = PodcastAnalysis::load(&self.artifacts.analysis_path(&job.id))?;

        let mut segments = Vec::with_capacity(script.lines.len());
        for line in &script.lines {
            let path = self.artifacts.segment_path(&job.id, line);
            if path.exists() {
                segments.push(AudioSegment::load(line.ordinal, line.speaker, &path)?);
            }
        }

        let pcm = self.assembler.assemble(&segments, script.lines.len())?;

        let audio_path = self.artifacts.audio_path(&job.id, &job.title);
        write_atomic(&audio_path, &pcm.to_wav()?)?;

        let metadata = EpisodeMetadata {
            title: &job.title,
            document_id: &job.id,
            source: job.source.as_ref().map(|p| p.display().to_string()),
            format: script.format,
            technical_level: analysis.podcast_format.technical_level,
            estimated_duration_minutes: analysis.podcast_format.estimated_duration_minutes,
            duration_seconds: pcm.duration().as_secs_f64(),
            lines: script.lines.len(),
            speakers: script.speakers(),
            technical_glossary: &analysis.technical_glossary,
            generated_at: Utc::now(),
        };
        let metadata_path = self.artifacts.metadata_path(&job.id);
        std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;

        eprintln!(
            "  Episode: {} ({:.1}s)",
            audio_path.display(),
            pcm.duration().as_secs_f64()
        );

        if options.cleanup || self.settings.audio.cleanup_segments {
            let removed = self.artifacts.remove_segments(&job.id)?;
            info!("Removed {} segment files", removed);
        }
        Ok(vec![audio_path, metadata_path])
    }
}

/// Write through a temporary file so a partial write never looks valid.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("part");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Supported documents under `path`: the file itself, or a directory's files sorted by name.
pub fn discover_inputs(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(PodError::Extraction(format!(
            "{} does not exist",
            path.display()
        )));
    }

    let mut inputs: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && document::is_supported(p))
        .collect();
    inputs.sort();
    Ok(inputs)
}
