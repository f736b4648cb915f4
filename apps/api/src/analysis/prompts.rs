// Prompt constants for résumé grading.
// JSON-only enforcement is appended from llm_client::prompts at call time.

/// Grader persona.
pub const GRADING_SYSTEM: &str = "You are an experienced technical recruiter and résumé reviewer. \
    You grade résumés strictly and give concrete, actionable feedback.";

/// Shared output schema for both text and image grading.
pub const GRADING_SCHEMA: &str = r#"Return a JSON object with this EXACT schema (no extra fields):
{
  "overallScore": 72,
  "summary": "Two or three sentences on the résumé as a whole.",
  "sections": [
    {
      "name": "Experience",
      "score": 70,
      "strengths": ["Clear progression of responsibility"],
      "weaknesses": ["Bullets describe duties, not outcomes"],
      "suggestions": ["Quantify impact: latency, revenue, users"]
    }
  ],
  "redFlags": ["Unexplained 2-year gap"],
  "structuredResume": {
    "name": "Jane Doe",
    "contact": {"email": "jane@example.com"},
    "experience": [{"company": "Acme", "role": "Engineer", "start": "2021-01", "end": null}],
    "education": [{"institution": "State University", "degree": "BSc Computer Science"}],
    "skills": ["Rust", "PostgreSQL"]
  }
}

Rules:
- All scores are integers from 0 to 100.
- Cover at least: Summary, Experience, Education, Skills, Formatting.
- Order sections by importance to a hiring manager.
- "redFlags" may be an empty array."#;

/// Text grading prompt. Replace `{resume_text}` and `{schema}` before sending.
pub const GRADING_PROMPT_TEMPLATE: &str = r#"Grade the following résumé.

{schema}

Résumé:
"""
{resume_text}
"""
"#;

/// Image grading prompt. Sent after the page images, first page first.
pub const GRADING_IMAGES_PROMPT_TEMPLATE: &str = r#"The images above are the pages of a résumé, in order. Grade it.
Formatting and visual layout count; judge them from the images.

{schema}
"#;
