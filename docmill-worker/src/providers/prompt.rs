//! Versioned prompt building
//!
//! Prompt construction is a pure function selected by [`PromptVersion`], so
//! switching versions is a config value rather than branching scattered
//! through the generation clients. V2 is the canonical version; V1 is kept
//! selectable for comparison runs.

use docmill_common::db::models::Language;
use docmill_common::{Error, Result};

use super::generate::DraftRequest;

/// Prompt strategy version tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptVersion {
    V1,
    V2,
}

impl PromptVersion {
    pub fn parse_str(s: &str) -> Result<Self> {
        match s {
            "v1" => Ok(PromptVersion::V1),
            "v2" => Ok(PromptVersion::V2),
            other => Err(Error::Config(format!("Unknown prompt version '{}'", other))),
        }
    }

    /// Build the full prompt for a draft request
    pub fn build_prompt(&self, request: &DraftRequest) -> String {
        match self {
            PromptVersion::V1 => build_v1(request),
            PromptVersion::V2 => build_v2(request),
        }
    }
}

fn source_listing(request: &DraftRequest) -> String {
    let mut out = String::new();
    for source in &request.sources {
        out.push_str(&format!(
            "[{}] {} ({})\n{}\n\n",
            source.position, source.title, source.url, source.excerpt
        ));
    }
    out
}

fn language_instruction(language: Language) -> &'static str {
    match language {
        Language::En => "Write the entire document in English.",
        Language::Ko => {
            "문서 전체를 한국어로 작성하세요. 영어 고유명사 외에는 한국어만 사용하세요."
        }
    }
}

fn build_v1(request: &DraftRequest) -> String {
    format!(
        "Write a detailed markdown report on the topic below, grounded in the \
         numbered sources. Cite sources inline as [n]. {}\n\n\
         Topic: {}\n\nSources:\n{}",
        language_instruction(request.language),
        request.topic,
        source_listing(request),
    )
}

fn build_v2(request: &DraftRequest) -> String {
    format!(
        "You are a research writer producing a long-form markdown report.\n\
         {}\n\n\
         Topic: {}\n\n\
         Requirements:\n\
         - At least {} characters and no more than {} characters.\n\
         - At least {} sections introduced with `## ` headings, plus a final \
           `## References` section listing every source.\n\
         - Ground every factual claim in the numbered sources and cite inline \
           as [n]; every source must be cited at least once.\n\
         - Include at least one mermaid diagram in a ```mermaid fence and at \
           least one markdown table.\n\
         - Mark any claim you cannot ground in a source with the literal token \
           [needs-verification] instead of inventing a citation.\n\n\
         Sources:\n{}",
        language_instruction(request.language),
        request.topic,
        request.tier.min_chars(),
        request.tier.max_chars(),
        request.tier.min_sections(),
        source_listing(request),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmill_common::db::models::{Source, Tier};
    use uuid::Uuid;

    fn request() -> DraftRequest {
        DraftRequest {
            topic: "Solar power economics".to_string(),
            language: Language::En,
            tier: Tier::Standard,
            sources: vec![Source {
                job_id: Uuid::nil(),
                position: 1,
                title: "IEA report".to_string(),
                url: "https://example.org/iea".to_string(),
                excerpt: "Utility-scale solar is the cheapest electricity in history.".to_string(),
            }],
        }
    }

    #[test]
    fn v2_states_tier_bounds_and_markers() {
        let prompt = PromptVersion::V2.build_prompt(&request());
        assert!(prompt.contains("8000"));
        assert!(prompt.contains("```mermaid"));
        assert!(prompt.contains("[needs-verification]"));
        assert!(prompt.contains("[1] IEA report"));
    }

    #[test]
    fn v1_is_selectable_and_lists_sources() {
        let prompt = PromptVersion::V1.build_prompt(&request());
        assert!(prompt.contains("Cite sources inline"));
        assert!(prompt.contains("https://example.org/iea"));
    }

    #[test]
    fn build_is_deterministic() {
        let r = request();
        assert_eq!(
            PromptVersion::V2.build_prompt(&r),
            PromptVersion::V2.build_prompt(&r)
        );
    }

    #[test]
    fn unknown_version_is_config_error() {
        assert!(PromptVersion::parse_str("v3").is_err());
    }
}
