//! Combination of per-chunk model responses into one result.
//!
//! Markdown fragments are joined in chunk order. Analysis fragments are merged
//! field by field: segments concatenate, the glossary is last-writer-wins, and
//! the scalar format fields go through a reducer each.

use crate::analysis::{segment_id, AnalysisSegment, FormatRecommendation, PodcastAnalysis};
use crate::analysis::{FormatStyle, TechnicalLevel};
use crate::error::{PodError, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Model output for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialResponse {
    pub index: usize,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Markdown(String),
    /// Raw model output expected to contain an analysis JSON object.
    Analysis(String),
}

impl PartialResponse {
    pub fn markdown(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            body: ResponseBody::Markdown(text.into()),
        }
    }

    pub fn analysis(index: usize, raw: impl Into<String>) -> Self {
        Self {
            index,
            body: ResponseBody::Analysis(raw.into()),
        }
    }
}

/// Combined output of all chunks of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum CombinedResult {
    Markdown(String),
    Analysis(PodcastAnalysis),
}

/// Combine `responses` for a request split into `expected` chunks.
pub fn combine(expected: usize, responses: &[PartialResponse]) -> Result<CombinedResult> {
    let ordered = order(expected, responses)?;
    match &ordered[0].body {
        ResponseBody::Markdown(_) => {
            let fragments = ordered
                .iter()
                .map(|r| match &r.body {
                    ResponseBody::Markdown(text) => Ok(text.as_str()),
                    ResponseBody::Analysis(_) => Err(mode_mismatch(r.index)),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(CombinedResult::Markdown(join_markdown(&fragments)))
        }
        ResponseBody::Analysis(_) => {
            let fragments = ordered
                .iter()
                .map(|r| match &r.body {
                    ResponseBody::Analysis(raw) => parse_fragment(r.index, raw),
                    ResponseBody::Markdown(_) => Err(mode_mismatch(r.index)),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(CombinedResult::Analysis(merge_analyses(fragments)?))
        }
    }
}

/// Combine markdown fragments.
pub fn combine_markdown(expected: usize, responses: &[PartialResponse]) -> Result<String> {
    match combine(expected, responses)? {
        CombinedResult::Markdown(text) => Ok(text),
        CombinedResult::Analysis(_) => Err(mode_mismatch(0)),
    }
}

/// Combine analysis fragments.
pub fn combine_analysis(expected: usize, responses: &[PartialResponse]) -> Result<PodcastAnalysis> {
    match combine(expected, responses)? {
        CombinedResult::Analysis(analysis) => Ok(analysis),
        CombinedResult::Markdown(_) => Err(mode_mismatch(0)),
    }
}

/// Extract the JSON object from a model reply that may wrap it in prose or fences.
pub fn extract_json(response: &str) -> &str {
    let start = response.find('{');
    let end = response.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if end > start => &response[start..=end],
        _ => response.trim(),
    }
}

/// Sort responses by index, checking that every index in `0..expected` appears once.
fn order(expected: usize, responses: &[PartialResponse]) -> Result<Vec<&PartialResponse>> {
    if expected == 0 || responses.is_empty() {
        return Err(PodError::Combination(
            "no partial responses to combine".to_string(),
        ));
    }

    let mut slots: Vec<Option<&PartialResponse>> = vec![None; expected];
    for response in responses {
        let slot = slots.get_mut(response.index).ok_or_else(|| {
            PodError::Combination(format!(
                "response index {} is outside the {} expected chunk(s)",
                response.index, expected
            ))
        })?;
        if slot.is_some() {
            return Err(PodError::Combination(format!(
                "duplicate response for chunk {}",
                response.index
            )));
        }
        *slot = Some(response);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.ok_or_else(|| PodError::Combination(format!("missing response for chunk {}", i)))
        })
        .collect()
}

fn mode_mismatch(index: usize) -> PodError {
    PodError::Combination(format!(
        "response for chunk {} does not match the mode of the other responses",
        index
    ))
}

/// Trim blank lines around each fragment and join them with one blank line.
fn join_markdown(fragments: &[&str]) -> String {
    fragments
        .iter()
        .map(|f| trim_blank_lines(f))
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn trim_blank_lines(text: &str) -> &str {
    let lines: Vec<&str> = text.split('\n').collect();
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    let (Some(first), Some(last)) = (first, last) else {
        return "";
    };

    let start: usize = lines[..first].iter().map(|l| l.len() + 1).sum();
    let end: usize = start + lines[first..=last].iter().map(|l| l.len() + 1).sum::<usize>() - 1;
    text[start..end].trim_end_matches('\r')
}

/// Analysis fragment as produced for one chunk. Segments may be empty.
#[derive(Debug, Deserialize)]
struct AnalysisFragment {
    podcast_format: FormatRecommendation,
    segments: Vec<AnalysisSegment>,
    #[serde(default)]
    technical_glossary: IndexMap<String, String>,
}

fn parse_fragment(index: usize, raw: &str) -> Result<AnalysisFragment> {
    let fragment: AnalysisFragment = serde_json::from_str(extract_json(raw)).map_err(|e| {
        PodError::Combination(format!(
            "chunk {} is not a valid analysis: {}. Response was: {}",
            index,
            e,
            raw.chars().take(300).collect::<String>()
        ))
    })?;

    for segment in &fragment.segments {
        if segment.id.trim().is_empty() || segment.content.trim().is_empty() {
            return Err(PodError::Combination(format!(
                "chunk {} has a segment with an empty id or content",
                index
            )));
        }
    }
    Ok(fragment)
}

fn merge_analyses(fragments: Vec<AnalysisFragment>) -> Result<PodcastAnalysis> {
    let recommended = vote_format(&fragments);
    let reasoning = fragments
        .iter()
        .find(|f| f.podcast_format.recommended == recommended)
        .map(|f| f.podcast_format.reasoning.clone())
        .unwrap_or_default();
    let technical_level = fragments
        .iter()
        .map(|f| f.podcast_format.technical_level)
        .max()
        .unwrap_or(TechnicalLevel::Intermediate);
    let estimated_duration_minutes = fragments
        .iter()
        .map(|f| f.podcast_format.estimated_duration_minutes)
        .sum();

    let mut segments = Vec::new();
    let mut technical_glossary = IndexMap::new();
    for fragment in fragments {
        segments.extend(fragment.segments);
        for (term, definition) in fragment.technical_glossary {
            // Last writer wins but the first position of the term is kept.
            technical_glossary.insert(term, definition);
        }
    }
    for (position, segment) in segments.iter_mut().enumerate() {
        segment.id = segment_id(position);
    }

    let analysis = PodcastAnalysis {
        podcast_format: FormatRecommendation {
            recommended,
            reasoning,
            technical_level,
            estimated_duration_minutes,
        },
        segments,
        technical_glossary,
    };

    analysis
        .validate()
        .map_err(|e| PodError::Combination(format!("combined analysis is invalid: {}", e)))?;

    debug!(
        "Combined analysis: {} segments, {} glossary terms, format {}",
        analysis.segments.len(),
        analysis.technical_glossary.len(),
        analysis.podcast_format.recommended
    );
    Ok(analysis)
}

/// Majority vote; ties go to the format first recommended by the earliest chunk.
fn vote_format(fragments: &[AnalysisFragment]) -> FormatStyle {
    let mut counts: HashMap<FormatStyle, (usize, usize)> = HashMap::new();
    for (i, fragment) in fragments.iter().enumerate() {
        let entry = counts.entry(fragment.podcast_format.recommended).or_insert((0, i));
        entry.0 += 1;
    }

    counts
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(format, _)| format)
        .unwrap_or(FormatStyle::HostExpert)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(format: &str, level: &str, minutes: f64, segments: &[(&str, &str)], glossary: &[(&str, &str)]) -> String {
        let segments = segments
            .iter()
            .enumerate()
            .map(|(i, (speaker, content))| {
                serde_json::json!({
                    "id": format!("seg_{:03}", i + 1),
                    "speaker": speaker,
                    "content": content,
                    "tone": "neutral",
                    "technical_terms": []
                })
            })
            .collect::<Vec<_>>();
        let glossary: serde_json::Map<String, serde_json::Value> = glossary
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        serde_json::json!({
            "podcast_format": {
                "recommended": format,
                "reasoning": format!("because {}", format),
                "technical_level": level,
                "estimated_duration_minutes": minutes
            },
            "segments": segments,
            "technical_glossary": glossary
        })
        .to_string()
    }

    #[test]
    fn test_markdown_joined_with_single_blank_line() {
        let responses = vec![
            PartialResponse::markdown(1, "\n\n## Part Two\n\nMore text.\n\n\n"),
            PartialResponse::markdown(0, "# Title\n\nIntro.\n"),
        ];
        let combined = combine_markdown(2, &responses).unwrap();
        assert_eq!(combined, "# Title\n\nIntro.\n\n## Part Two\n\nMore text.");
    }

    #[test]
    fn test_markdown_repeated_heading_is_kept() {
        let responses = vec![
            PartialResponse::markdown(0, "## Results\n\nFirst half."),
            PartialResponse::markdown(1, "## Results\n\nSecond half."),
        ];
        let combined = combine_markdown(2, &responses).unwrap();
        assert_eq!(combined.matches("## Results").count(), 2);
    }

    #[test]
    fn test_missing_index_is_error() {
        let responses = vec![
            PartialResponse::markdown(0, "a"),
            PartialResponse::markdown(2, "c"),
        ];
        let err = combine(3, &responses).unwrap_err();
        assert!(matches!(err, PodError::Combination(ref m) if m.contains("missing response for chunk 1")));
    }

    #[test]
    fn test_duplicate_index_is_error() {
        let responses = vec![
            PartialResponse::markdown(0, "a"),
            PartialResponse::markdown(0, "b"),
        ];
        assert!(matches!(combine(2, &responses), Err(PodError::Combination(_))));
    }

    #[test]
    fn test_empty_input_is_error() {
        assert!(matches!(combine(0, &[]), Err(PodError::Combination(_))));
        assert!(matches!(combine(2, &[]), Err(PodError::Combination(_))));
    }

    #[test]
    fn test_mode_mismatch_is_error() {
        let responses = vec![
            PartialResponse::markdown(0, "a"),
            PartialResponse::analysis(1, "{}"),
        ];
        assert!(matches!(combine(2, &responses), Err(PodError::Combination(_))));
    }

    #[test]
    fn test_structured_merge() {
        let responses = vec![
            PartialResponse::analysis(
                0,
                fragment("host_expert", "intermediate", 5.0, &[("host", "Intro"), ("expert", "Core")], &[("LRU", "old"), ("TTL", "time to live")]),
            ),
            PartialResponse::analysis(
                1,
                format!(
                    "Here is the analysis:\n```json\n{}\n```",
                    fragment("panel", "advanced", 4.0, &[("expert", "Deep dive")], &[("LRU", "new")])
                ),
            ),
            PartialResponse::analysis(
                2,
                fragment("panel", "beginner", 3.5, &[("host", "Wrap up")], &[]),
            ),
        ];

        let analysis = combine_analysis(3, &responses).unwrap();

        let ids: Vec<_> = analysis.segments.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["seg_001", "seg_002", "seg_003", "seg_004"]);
        assert_eq!(analysis.segments[2].content, "Deep dive");
        assert_eq!(analysis.technical_glossary["LRU"], "new");
        assert_eq!(
            analysis.technical_glossary.keys().collect::<Vec<_>>(),
            vec!["LRU", "TTL"]
        );
        assert_eq!(analysis.podcast_format.recommended, FormatStyle::Panel);
        assert_eq!(analysis.podcast_format.reasoning, "because panel");
        assert_eq!(analysis.podcast_format.technical_level, TechnicalLevel::Advanced);
        assert!((analysis.podcast_format.estimated_duration_minutes - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_format_tie_goes_to_earliest_chunk() {
        let responses = vec![
            PartialResponse::analysis(0, fragment("two_experts", "beginner", 1.0, &[("expert", "a")], &[])),
            PartialResponse::analysis(1, fragment("panel", "beginner", 1.0, &[("panelist", "b")], &[])),
        ];
        let analysis = combine_analysis(2, &responses).unwrap();
        assert_eq!(analysis.podcast_format.recommended, FormatStyle::TwoExperts);
    }

    #[test]
    fn test_schema_violation_is_combination_error() {
        let responses = vec![
            PartialResponse::analysis(0, fragment("panel", "beginner", 1.0, &[("host", "a")], &[])),
            PartialResponse::analysis(1, r#"{"podcast_format": {"recommended": "panel"}, "segments": []}"#),
        ];
        assert!(matches!(combine(2, &responses), Err(PodError::Combination(_))));

        let wrong_type = vec![PartialResponse::analysis(
            0,
            fragment("panel", "beginner", 1.0, &[("host", "a")], &[]).replace("1.0", "\"long\""),
        )];
        assert!(matches!(combine(1, &wrong_type), Err(PodError::Combination(_))));
    }

    #[test]
    fn test_combination_is_idempotent() {
        let responses = vec![
            PartialResponse::analysis(0, fragment("host_expert", "intermediate", 2.0, &[("host", "x")], &[("a", "1")])),
            PartialResponse::analysis(1, fragment("host_expert", "advanced", 3.0, &[("expert", "y")], &[("b", "2")])),
        ];
        let first = combine(2, &responses).unwrap();
        let second = combine(2, &responses).unwrap();
        assert_eq!(first, second);

        let CombinedResult::Analysis(analysis) = first else {
            panic!("expected analysis");
        };
        let again = combine_analysis(1, &[PartialResponse::analysis(0, analysis.to_json().unwrap())]).unwrap();
        assert_eq!(again, analysis);

        let md = vec![PartialResponse::markdown(0, "# A\n\ntext"), PartialResponse::markdown(1, "more")];
        let once = combine_markdown(2, &md).unwrap();
        let twice = combine_markdown(1, &[PartialResponse::markdown(0, once.clone())]).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_six_chunk_report_combines_in_order() {
        let responses: Vec<_> = (0..6)
            .rev()
            .map(|i| PartialResponse::markdown(i, format!("## Part {}\n\nBody {}.", i + 1, i + 1)))
            .collect();
        let combined = combine_markdown(6, &responses).unwrap();

        let positions: Vec<_> = (1..=6)
            .map(|i| combined.find(&format!("## Part {}", i)).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(extract_json("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(extract_json("no json"), "no json");
    }
}
