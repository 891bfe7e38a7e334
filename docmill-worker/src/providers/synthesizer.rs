//! Deterministic local draft synthesizer
//!
//! The guaranteed backstop of the content cascade: assembles a compliant
//! markdown document from ranked source sentences with no network access and
//! no randomness. Given the same request it always produces the same draft.

use async_trait::async_trait;
use docmill_common::db::models::{Language, Source};
use docmill_common::Result;

use super::generate::{DraftProvider, DraftRequest, ProviderKind};

/// Deterministic draft synthesizer
#[derive(Debug, Clone, Default)]
pub struct LocalSynthesizer;

/// One source sentence with its citation index and rank score
#[derive(Debug, Clone)]
struct RankedSentence {
    text: String,
    citation: i64,
    score: i64,
}

impl LocalSynthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Assemble a full draft meeting the tier's length and structure bounds
    pub fn synthesize(&self, request: &DraftRequest) -> String {
        let sentences = rank_sentences(&request.topic, &request.sources);
        let headings = section_headings(request.language);
        let section_count = request.tier.min_sections().min(headings.len());
        let min_chars = request.tier.min_chars();

        let mut doc = String::new();
        doc.push_str(&format!("# {}\n\n", title_line(request)));
        doc.push_str(&intro_paragraph(request));
        doc.push('\n');

        // Body sections: ranked sentences dealt round-robin, one per paragraph
        let mut cursor = 0usize;
        for heading in headings.iter().take(section_count) {
            doc.push_str(&format!("\n## {}\n\n", heading));
            let per_section = (sentences.len() / section_count).max(1);
            for _ in 0..per_section {
                if let Some(sentence) = sentences.get(cursor % sentences.len().max(1)) {
                    doc.push_str(&format!("{} [{}]\n\n", sentence.text, sentence.citation));
                }
                cursor += 1;
            }
        }

        doc.push_str(&diagram_section(request, section_count, &headings));
        doc.push_str(&source_table(request));

        // Pad with elaboration paragraphs until the tier minimum is met.
        // Each pass adds text, so this terminates even with a single short
        // source.
        let templates = elaboration_templates(request.language);
        let mut pass = 0usize;
        while doc.chars().count() < min_chars {
            let sentence = match sentences.get(pass % sentences.len().max(1)) {
                Some(s) => s.clone(),
                None => RankedSentence {
                    text: fallback_sentence(request),
                    citation: 1,
                    score: 0,
                },
            };
            let template = templates[pass % templates.len()];
            doc.push_str(&format!(
                "{} {} [{}]\n\n",
                template, sentence.text, sentence.citation
            ));
            pass += 1;
        }

        doc.push_str(&references_section(request));
        doc
    }
}

#[async_trait]
impl DraftProvider for LocalSynthesizer {
    fn name(&self) -> &'static str {
        "local-synthesizer"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Synthesizer
    }

    async fn generate(&self, request: &DraftRequest) -> Result<String> {
        Ok(self.synthesize(request))
    }
}

/// Split excerpts into sentences, score by topic-term overlap, stable order
fn rank_sentences(topic: &str, sources: &[Source]) -> Vec<RankedSentence> {
    let terms: Vec<String> = topic
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.chars().count() > 2)
        .map(|w| w.to_string())
        .collect();

    let mut ranked = Vec::new();
    for source in sources {
        for raw in source.excerpt.split_inclusive(['.', '!', '?']) {
            let text = raw.trim();
            if text.chars().count() < 25 {
                continue;
            }
            let lower = text.to_lowercase();
            let term_hits = terms.iter().filter(|t| lower.contains(*t)).count() as i64;
            let score = term_hits * 100 + (text.chars().count().min(240) as i64);
            ranked.push(RankedSentence {
                text: text.to_string(),
                citation: source.position,
                score,
            });
        }
    }

    // Stable sort keeps retrieval order among equal scores
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
}

fn title_line(request: &DraftRequest) -> String {
    match request.language {
        Language::En => format!("{}: A Research Report", request.topic),
        Language::Ko => format!("{} 연구 보고서", request.topic),
    }
}

fn intro_paragraph(request: &DraftRequest) -> String {
    match request.language {
        Language::En => format!(
            "This report examines {} based on {} gathered sources. Citations \
             in the form [n] refer to the numbered entries in the References \
             section.\n",
            request.topic,
            request.sources.len()
        ),
        Language::Ko => format!(
            "본 보고서는 수집된 {}개의 자료를 바탕으로 {}에 대해 분석한다. \
             본문 내 [n] 형식의 표기는 참고문헌 목록의 번호를 가리킨다.\n",
            request.sources.len(),
            request.topic
        ),
    }
}

fn section_headings(language: Language) -> Vec<&'static str> {
    match language {
        Language::En => vec![
            "Overview",
            "Background",
            "Key Findings",
            "Analysis",
            "Comparative Perspective",
            "Implications",
            "Limitations",
            "Outlook",
        ],
        Language::Ko => vec![
            "개요",
            "배경",
            "주요 결과",
            "분석",
            "비교 관점",
            "시사점",
            "한계",
            "전망",
        ],
    }
}

fn elaboration_templates(language: Language) -> Vec<&'static str> {
    match language {
        Language::En => vec![
            "Expanding on this point:",
            "It is worth noting that",
            "The sources further indicate:",
            "From a practical standpoint,",
            "A closer reading suggests:",
        ],
        Language::Ko => vec![
            "이 점을 부연하면,",
            "주목할 만한 사실은",
            "자료에 따르면,",
            "실무적 관점에서 보면,",
            "면밀히 살펴보면,",
        ],
    }
}

fn fallback_sentence(request: &DraftRequest) -> String {
    match request.language {
        Language::En => format!(
            "Available material on {} remains limited; further research is advised.",
            request.topic
        ),
        Language::Ko => format!(
            "{}에 관한 가용 자료가 제한적이므로 추가 조사가 권장된다.",
            request.topic
        ),
    }
}

fn diagram_section(request: &DraftRequest, section_count: usize, headings: &[&str]) -> String {
    let heading = match request.language {
        Language::En => "Document Structure",
        Language::Ko => "문서 구성",
    };
    let mut out = format!("\n## {}\n\n```mermaid\nflowchart TD\n", heading);
    out.push_str("    T[\"Topic\"]\n");
    for (i, section) in headings.iter().take(section_count).enumerate() {
        out.push_str(&format!("    T --> S{}[\"{}\"]\n", i + 1, section));
    }
    out.push_str("```\n\n");
    out
}

fn source_table(request: &DraftRequest) -> String {
    let (heading, col_index, col_title, col_url) = match request.language {
        Language::En => ("Source Summary", "No.", "Title", "URL"),
        Language::Ko => ("자료 요약", "번호", "제목", "URL"),
    };
    let mut out = format!(
        "\n## {}\n\n| {} | {} | {} |\n| --- | --- | --- |\n",
        heading, col_index, col_title, col_url
    );
    for source in &request.sources {
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            source.position,
            source.title.replace('|', "/"),
            source.url
        ));
    }
    out.push('\n');
    out
}

fn references_section(request: &DraftRequest) -> String {
    let heading = match request.language {
        Language::En => "References",
        Language::Ko => "참고문헌",
    };
    let mut out = format!("\n## {}\n\n", heading);
    for source in &request.sources {
        out.push_str(&format!(
            "[{}] {} — {}\n\n",
            source.position, source.title, source.url
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmill_common::db::models::Tier;
    use uuid::Uuid;

    fn source(position: i64, excerpt: &str) -> Source {
        Source {
            job_id: Uuid::nil(),
            position,
            title: format!("Source {}", position),
            url: format!("https://example.org/{}", position),
            excerpt: excerpt.to_string(),
        }
    }

    fn request(tier: Tier) -> DraftRequest {
        DraftRequest {
            topic: "solar power economics".to_string(),
            language: Language::En,
            tier,
            sources: vec![
                source(1, "Solar power costs have fallen by ninety percent over the last decade. \
                           Utility-scale solar is now the cheapest form of new electricity in most markets."),
                source(2, "Grid integration of solar power requires storage investment at high penetration levels. \
                           Economics of storage continue to improve year over year."),
            ],
        }
    }

    #[test]
    fn draft_meets_free_tier_requirements() {
        let synth = LocalSynthesizer::new();
        let req = request(Tier::Free);
        let draft = synth.synthesize(&req);

        assert!(draft.chars().count() >= Tier::Free.min_chars());
        let sections = draft.matches("\n## ").count();
        assert!(sections >= Tier::Free.min_sections());
        assert!(draft.contains("```mermaid"));
        assert!(draft.contains("| --- |"));
        assert!(draft.contains("## References"));
        assert!(draft.contains("[1]"));
        assert!(draft.contains("[2]"));
    }

    #[test]
    fn draft_scales_to_premium_length() {
        let synth = LocalSynthesizer::new();
        let draft = synth.synthesize(&request(Tier::Premium));
        assert!(draft.chars().count() >= Tier::Premium.min_chars());
    }

    #[test]
    fn output_is_deterministic() {
        let synth = LocalSynthesizer::new();
        let req = request(Tier::Free);
        assert_eq!(synth.synthesize(&req), synth.synthesize(&req));
    }

    #[test]
    fn korean_draft_uses_korean_scaffolding() {
        let synth = LocalSynthesizer::new();
        let mut req = request(Tier::Free);
        req.language = Language::Ko;
        let draft = synth.synthesize(&req);
        assert!(draft.contains("참고문헌"));
        assert!(draft.contains("연구 보고서"));
    }

    #[test]
    fn topic_relevant_sentences_rank_first() {
        let sources = vec![
            source(1, "An entirely unrelated sentence about gardening and houseplants in general."),
            source(2, "Solar power economics depend heavily on capital costs and financing terms."),
        ];
        let ranked = rank_sentences("solar power economics", &sources);
        assert_eq!(ranked[0].citation, 2);
    }

    #[test]
    fn synthesizer_copes_with_empty_excerpts() {
        let synth = LocalSynthesizer::new();
        let mut req = request(Tier::Free);
        req.sources = vec![source(1, "")];
        let draft = synth.synthesize(&req);
        assert!(draft.chars().count() >= Tier::Free.min_chars());
    }
}
