//! Result Normalizer: maps the grader's raw output to [`CanonicalAnalysis`].
//!
//! Two shapes are recognized, structurally:
//!
//! | Shape | Detected by | Handling |
//! |-------|-------------|----------|
//! | Canonical | numeric `overallScore` + array `sections` | passed through unchanged |
//! | Legacy | numeric `score` + array `weaknesses` | rebuilt per section (below) |
//!
//! Legacy results carry one global score, global strengths, a flat list of
//! tagged weaknesses, and suggestions grouped by section name. Each
//! `suggestionsBySection` entry becomes a section, in the provider's order,
//! scored with the global score and given the weaknesses whose `section` tag
//! contains its name. A synthetic "Highlights & Critical Points" section is
//! prepended holding the global strengths and the priority-1 weaknesses that
//! are not tied to a content section.
//!
//! Anything else is a grading contract break (`AppError::UnrecognizedResultShape`).
//! Cached entries hold raw results, so this runs on cache hits too.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::errors::AppError;
use crate::models::analysis::{CanonicalAnalysis, Section};

pub const HIGHLIGHTS_SECTION: &str = "Highlights & Critical Points";
pub const SUMMARY_FALLBACK: &str = "No summary available.";

/// Cap on weaknesses listed per section.
const MAX_SECTION_WEAKNESSES: usize = 5;

/// Weakness tags that belong to the résumé as a whole rather than a section.
const GLOBAL_SECTION_TAGS: [&str; 5] = ["general", "layout", "formatting", "design", "photo"];

/// Flat result shape produced by older grading prompts.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyResult {
    pub score: f64,
    #[serde(default)]
    pub strengths: Option<Vec<String>>,
    pub weaknesses: Vec<LegacyWeakness>,
    #[serde(default, deserialize_with = "ordered_sections")]
    pub suggestions_by_section: Vec<(String, Vec<String>)>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub red_flags: Option<Vec<String>>,
    #[serde(default)]
    pub structured_resume: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyWeakness {
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub suggestion: String,
    /// Only a string tag can match a section.
    #[serde(default)]
    pub section: Option<Value>,
    /// 1 is the highest priority. Non-numeric values never count as critical.
    #[serde(default)]
    pub priority: Option<Value>,
}

impl LegacyWeakness {
    fn section_tag(&self) -> String {
        self.section
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_lowercase()
    }

    fn is_critical(&self) -> bool {
        self.priority.as_ref().and_then(Value::as_f64) == Some(1.0)
    }
}

/// Raw grader output, classified by shape.
#[derive(Debug, Clone)]
pub enum RawAnalysis {
    Canonical(CanonicalAnalysis),
    Legacy(LegacyResult),
}

impl RawAnalysis {
    pub fn detect(raw: &Value) -> Result<Self, AppError> {
        let object = raw
            .as_object()
            .ok_or_else(|| unrecognized(format!("expected a JSON object, got {}", kind_of(raw))))?;
        let has_number = |key: &str| object.get(key).is_some_and(Value::is_number);
        let has_array = |key: &str| object.get(key).is_some_and(Value::is_array);

        if has_number("overallScore") && has_array("sections") {
            return serde_json::from_value(raw.clone())
                .map(RawAnalysis::Canonical)
                .map_err(|e| unrecognized(format!("malformed canonical result: {e}")));
        }

        if has_number("score") && has_array("weaknesses") {
            return serde_json::from_value(raw.clone())
                .map(RawAnalysis::Legacy)
                .map_err(|e| unrecognized(format!("malformed legacy result: {e}")));
        }

        let keys: Vec<&str> = object.keys().map(String::as_str).collect();
        Err(unrecognized(format!(
            "neither overallScore+sections nor score+weaknesses present (keys: [{}])",
            keys.join(", ")
        )))
    }
}

/// Normalizes a raw grader result into the canonical shape.
pub fn normalize_result(raw: &Value) -> Result<CanonicalAnalysis, AppError> {
    let analysis = match RawAnalysis::detect(raw)? {
        RawAnalysis::Canonical(analysis) => analysis,
        RawAnalysis::Legacy(legacy) => normalize_legacy(legacy),
    };
    validate_scores(&analysis)?;
    Ok(analysis)
}

fn normalize_legacy(legacy: LegacyResult) -> CanonicalAnalysis {
    let LegacyResult {
        score,
        strengths,
        weaknesses,
        suggestions_by_section,
        notes,
        red_flags,
        structured_resume,
    } = legacy;

    let mut sections = Vec::with_capacity(suggestions_by_section.len() + 1);
    sections.push(Section {
        name: HIGHLIGHTS_SECTION.to_string(),
        score,
        strengths: strengths.unwrap_or_default(),
        weaknesses: critical_points(&weaknesses),
        // already distributed to the content sections below
        suggestions: Vec::new(),
    });

    for (name, suggestions) in suggestions_by_section {
        sections.push(Section {
            weaknesses: section_weaknesses(&weaknesses, &name),
            name,
            score,
            strengths: Vec::new(),
            suggestions,
        });
    }

    CanonicalAnalysis {
        overall_score: score,
        summary: notes.unwrap_or_else(|| SUMMARY_FALLBACK.to_string()),
        sections,
        red_flags: red_flags.unwrap_or_default(),
        structured_resume,
    }
}

/// Suggestions of the weaknesses whose section tag contains `section_name`,
/// case-insensitively, in original order.
fn section_weaknesses(weaknesses: &[LegacyWeakness], section_name: &str) -> Vec<String> {
    let needle = section_name.to_lowercase();
    weaknesses
        .iter()
        .filter(|w| w.section_tag().contains(&needle))
        .map(|w| w.suggestion.clone())
        .take(MAX_SECTION_WEAKNESSES)
        .collect()
}

/// Priority-1 weaknesses with no section tag or a résumé-wide one, rendered
/// as "<issue>: <suggestion>".
fn critical_points(weaknesses: &[LegacyWeakness]) -> Vec<String> {
    weaknesses
        .iter()
        .filter(|w| w.is_critical())
        .filter(|w| {
            let tag = w.section_tag();
            tag.is_empty() || GLOBAL_SECTION_TAGS.contains(&tag.as_str())
        })
        .map(|w| format!("{}: {}", w.issue, w.suggestion))
        .take(MAX_SECTION_WEAKNESSES)
        .collect()
}

fn validate_scores(analysis: &CanonicalAnalysis) -> Result<(), AppError> {
    let in_range = |score: f64| (0.0..=100.0).contains(&score);
    if !in_range(analysis.overall_score) {
        return Err(unrecognized(format!(
            "overall score {} outside 0..100",
            analysis.overall_score
        )));
    }
    if let Some(section) = analysis.sections.iter().find(|s| !in_range(s.score)) {
        return Err(unrecognized(format!(
            "section '{}' score {} outside 0..100",
            section.name, section.score
        )));
    }
    Ok(())
}

fn unrecognized(message: String) -> AppError {
    AppError::UnrecognizedResultShape(message)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Reads a JSON object of `section -> [suggestion]` keeping key order.
fn ordered_sections<'de, D>(deserializer: D) -> Result<Vec<(String, Vec<String>)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedSections;

    impl<'de> Visitor<'de> for OrderedSections {
        type Value = Vec<(String, Vec<String>)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of section name to a list of suggestions")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut sections = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry::<String, Vec<String>>()? {
                sections.push(entry);
            }
            Ok(sections)
        }
    }

    deserializer.deserialize_map(OrderedSections)
}
