use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The single normalized result shape every consumer downstream of the
/// normalizer depends on. Serialized with camelCase keys, which is also the
/// shape the grading prompt asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalAnalysis {
    /// 0 – 100
    pub overall_score: f64,
    pub summary: String,
    pub sections: Vec<Section>,
    #[serde(default)]
    pub red_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_resume: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    /// 0 – 100
    pub score: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl CanonicalAnalysis {
    /// Score on the 0..10 scale used by history rows.
    pub fn history_score(&self) -> f64 {
        self.overall_score / 10.0
    }
}
