use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info};

use super::upstream::GenerativeModel;
use super::{PipelineError, TranscriptInput};
use crate::config::plans::PlanFeatures;
use crate::modules::jobs::model::ContentBundle;

/// Longest transcript excerpt sent inline.
const MAX_TRANSCRIPT_CHARS: usize = 30_000;

const STYLE_GUIDE: &str = "\
STYLE INSTRUCTIONS:
- Tone: Human, expert, slightly opinionated.
- No filler words: avoid \"unleash\", \"unlock\", \"delve\", \"game-changer\".
- Sentences: Short and punchy.
- Formatting: Standard Markdown (# H1, ## H2, - bullets).";

const OUTPUT_CONTRACT: &str = r#"OUTPUT FORMAT (strict JSON, no other text):
{
  "blogPost": "The full markdown blog post",
  "linkedinPost": "A professional, hook-driven LinkedIn post",
  "twitterThread": ["tweet 1", "tweet 2", "... 5 to 7 tweets"],
  "newsletter": "A personal email summary"
}"#;

/// The exact object the model must return.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawBundle {
    blog_post: String,
    linkedin_post: String,
    twitter_thread: Vec<String>,
    newsletter: String,
}

pub struct ContentGenerator {
    model: Arc<dyn GenerativeModel>,
}

impl ContentGenerator {
    pub fn new(model: Arc<dyn GenerativeModel>) -> Self {
        Self { model }
    }

    /// One model call, no retries here: a failure goes back to the queue.
    pub async fn generate(
        &self,
        input: &TranscriptInput,
        features: &PlanFeatures,
    ) -> Result<ContentBundle, PipelineError> {
        let prompt = build_prompt(input, features);
        let media = match input {
            TranscriptInput::Media(media) => Some(media),
            TranscriptInput::Text(_) => None,
        };

        info!(model = features.model, "🤖 Generating content bundle");
        let raw = self
            .model
            .generate(features.model, &prompt, media)
            .await
            .map_err(|e| {
                error!("Generation request failed: {:#}", e);
                PipelineError::upstream("model request failed", e, PipelineError::GenerationFailure)
            })?;

        parse_bundle(&raw)
    }
}

pub fn build_prompt(input: &TranscriptInput, features: &PlanFeatures) -> String {
    let seo = if features.seo_optimization {
        "ON (include a meta description and H1/H2 structure)"
    } else {
        "OFF"
    };

    let source = match input {
        TranscriptInput::Text(text) => format!("TRANSCRIPT:\n{}", truncate_chars(text, MAX_TRANSCRIPT_CHARS)),
        TranscriptInput::Media(_) => "SOURCE: the attached audio track of the video.".to_string(),
    };

    format!(
        "You are an elite content writer. Repurpose this video into a complete content bundle.\n\n\
         {STYLE_GUIDE}\n\n\
         INPUT CONFIG:\n- Blog length: {}\n- SEO mode: {}\n\n\
         {OUTPUT_CONTRACT}\n\n\
         {}",
        features.blog_length, seo, source
    )
}

/// Strips a surrounding Markdown code fence, if any.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json) up to the first newline.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches("json"),
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

pub fn parse_bundle(raw: &str) -> Result<ContentBundle, PipelineError> {
    let json = strip_code_fence(raw);
    let parsed: RawBundle = serde_json::from_str(json)
        .map_err(|e| PipelineError::GenerationFailure(format!("malformed model output: {}", e)))?;

    let thread: Vec<String> = parsed
        .twitter_thread
        .into_iter()
        .map(|post| post.trim().to_string())
        .filter(|post| !post.is_empty())
        .collect();

    let blank = [
        ("blogPost", parsed.blog_post.trim().is_empty()),
        ("linkedinPost", parsed.linkedin_post.trim().is_empty()),
        ("twitterThread", thread.is_empty()),
        ("newsletter", parsed.newsletter.trim().is_empty()),
    ];
    if let Some((field, _)) = blank.iter().find(|(_, empty)| *empty) {
        return Err(PipelineError::GenerationFailure(format!("model returned an empty {}", field)));
    }

    Ok(ContentBundle {
        article: parsed.blog_post,
        social_post_short: parsed.linkedin_post,
        social_thread: thread,
        newsletter_body: parsed.newsletter,
    })
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::plans::for_tier;
    use crate::modules::users::model::PlanTier;
    use crate::pipeline::MediaRef;
    use crate::testing::{FakeModel, VALID_BUNDLE_JSON};

    #[test]
    fn strips_fences_with_and_without_language() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```\n"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn parses_a_complete_bundle() {
        let bundle = parse_bundle(&format!("```json\n{}\n```", VALID_BUNDLE_JSON)).unwrap();
        assert!(bundle.article.starts_with("# Title"));
        assert_eq!(bundle.social_thread, vec!["First tweet", "Second tweet"]);
        assert_eq!(bundle.newsletter_body, "Hi friends");
    }

    #[test]
    fn missing_field_is_a_generation_failure() {
        let raw = r##"{"blogPost":"# T","linkedinPost":"post","twitterThread":["a"]}"##;
        assert!(matches!(parse_bundle(raw), Err(PipelineError::GenerationFailure(_))));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let raw = r##"{"blogPost":"# T","linkedinPost":"p","twitterThread":["a"],"newsletter":"n","extra":"x"}"##;
        assert!(matches!(parse_bundle(raw), Err(PipelineError::GenerationFailure(_))));
    }

    #[test]
    fn blank_field_is_rejected() {
        let raw = r##"{"blogPost":"# T","linkedinPost":"p","twitterThread":["  "],"newsletter":"n"}"##;
        let err = parse_bundle(raw).unwrap_err();
        assert!(err.failed_reason().contains("twitterThread"));
    }

    #[test]
    fn prose_instead_of_json_fails() {
        assert!(parse_bundle("Sure! Here is your content.").is_err());
    }

    #[test]
    fn prompt_carries_plan_parameters_and_truncates_text() {
        let features = &for_tier(PlanTier::Pro).features;
        let long = "é".repeat(MAX_TRANSCRIPT_CHARS + 50);
        let prompt = build_prompt(&TranscriptInput::Text(long), features);

        assert!(prompt.contains(features.blog_length));
        assert!(prompt.contains("SEO mode: ON"));
        assert_eq!(prompt.matches('é').count(), MAX_TRANSCRIPT_CHARS);
    }

    #[tokio::test]
    async fn media_input_is_attached_not_inlined() {
        let model = Arc::new(FakeModel::replying(VALID_BUNDLE_JSON));
        let generator = ContentGenerator::new(model.clone());
        let media = MediaRef {
            name: "files/abc".into(),
            uri: "https://files/abc".into(),
            mime_type: "audio/mp4".into(),
        };

        generator
            .generate(&TranscriptInput::Media(media.clone()), &for_tier(PlanTier::Free).features)
            .await
            .unwrap();

        let call = model.last_call().expect("model was called");
        assert_eq!(call.media, Some(media));
        assert_eq!(call.model, "gemini-1.5-flash");
        assert!(!call.prompt.contains("TRANSCRIPT:"));
    }

    #[tokio::test]
    async fn transport_errors_map_to_generation_failure() {
        let generator = ContentGenerator::new(Arc::new(FakeModel::unreachable()));
        let err = generator
            .generate(&TranscriptInput::Text("hi".into()), &for_tier(PlanTier::Free).features)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::GenerationFailure(_)));
    }
}
