//! Analysis Invoker: hands extracted content to the external grading engine.
//!
//! The grader's reply is returned as untyped JSON; its shape is only trusted
//! after `normalizer::normalize_result`. Nothing here retries: a failed call
//! surfaces as `AppError::AnalysisProvider`.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::analysis::extractor::{ExtractedContent, PageImage};
use crate::analysis::prompts::{
    GRADING_IMAGES_PROMPT_TEMPLATE, GRADING_PROMPT_TEMPLATE, GRADING_SCHEMA, GRADING_SYSTEM,
};
use crate::errors::AppError;
use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::llm_client::{ContentPart, LlmClient};

/// The grading engine seam. Carried in the pipeline as `Arc<dyn Grader>`.
#[async_trait]
pub trait Grader: Send + Sync {
    async fn grade(&self, content: &ExtractedContent) -> Result<Value, AppError>;
}

/// Grades résumés with Claude through the shared [`LlmClient`].
pub struct LlmGrader {
    llm: LlmClient,
}

impl LlmGrader {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Grader for LlmGrader {
    async fn grade(&self, content: &ExtractedContent) -> Result<Value, AppError> {
        let system = format!("{GRADING_SYSTEM} {JSON_ONLY_SYSTEM}");
        let result = match content {
            ExtractedContent::Text(text) => {
                info!("Grading résumé text ({} chars)", text.len());
                self.llm
                    .call_json::<Value>(&text_prompt(text), &system)
                    .await
            }
            ExtractedContent::Pages(pages) => {
                info!("Grading résumé from {} page image(s)", pages.len());
                self.llm
                    .call_json_with_parts::<Value>(image_parts(pages), &system)
                    .await
            }
        };
        result.map_err(|e| AppError::AnalysisProvider(format!("Résumé grading failed: {e}")))
    }
}

fn text_prompt(text: &str) -> String {
    GRADING_PROMPT_TEMPLATE
        .replace("{schema}", GRADING_SCHEMA)
        .replace("{resume_text}", text)
}

/// Page images in order, followed by the grading instructions.
fn image_parts(pages: &[PageImage]) -> Vec<ContentPart> {
    let mut parts: Vec<ContentPart> = pages
        .iter()
        .map(|p| ContentPart::image(&p.media_type, &p.data))
        .collect();
    parts.push(ContentPart::text(
        GRADING_IMAGES_PROMPT_TEMPLATE.replace("{schema}", GRADING_SCHEMA),
    ));
    parts
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_text_prompt_embeds_resume_and_schema() {
        let prompt = text_prompt("Jane Doe, Staff Engineer");
        assert!(prompt.contains("Jane Doe, Staff Engineer"));
        assert!(prompt.contains("\"overallScore\""));
        assert!(!prompt.contains("{resume_text}"));
        assert!(!prompt.contains("{schema}"));
    }

    #[test]
    fn test_image_parts_keep_page_order_and_end_with_instructions() {
        let pages: Vec<PageImage> = (1..=3)
            .map(|page| PageImage {
                page,
                media_type: "image/png".to_string(),
                data: Bytes::from(vec![page as u8]),
            })
            .collect();
        let parts = image_parts(&pages);
        assert_eq!(parts.len(), 4);

        let json = serde_json::to_value(&parts).unwrap();
        assert_eq!(json[0]["source"]["data"], "AQ==");
        assert_eq!(json[2]["source"]["data"], "Aw==");
        assert_eq!(json[3]["type"], "text");
    }
}
