//! Render stage: safe draft markdown → themed, sanitized HTML
//!
//! The converter is escape-first: every line of input is HTML-escaped before
//! any markup is emitted, and only an allow-list of structural elements
//! (headings, paragraphs, lists, tables, pre/code including the mermaid
//! container, blockquotes, rules, http(s) links) is ever produced. Raw HTML
//! in the draft therefore renders as text.

use docmill_common::db::models::{ArtifactKind, Job, Language};
use docmill_common::Result;
use regex::Regex;
use sqlx::SqlitePool;

/// Render stage
pub struct RenderStage {
    link: Regex,
    bold: Regex,
    code: Regex,
}

impl RenderStage {
    pub fn new() -> Result<Self> {
        Ok(Self {
            // Applied to escaped text, so delimiters are still literal
            link: Regex::new(r"\[([^\]\[]+)\]\((https?://[^\s)]+)\)")
                .map_err(|e| docmill_common::Error::Internal(format!("link pattern: {}", e)))?,
            bold: Regex::new(r"\*\*([^*]+)\*\*")
                .map_err(|e| docmill_common::Error::Internal(format!("bold pattern: {}", e)))?,
            code: Regex::new(r"`([^`]+)`")
                .map_err(|e| docmill_common::Error::Internal(format!("code pattern: {}", e)))?,
        })
    }

    /// Convert the safe draft, store the FINAL_DOCUMENT artifact, and return
    /// its storage key
    pub async fn run(&self, pool: &SqlitePool, job: &Job, safe_draft: &str) -> Result<String> {
        let body = self.markdown_to_html(safe_draft);
        let html = document_shell(job, &body);

        let storage_key = docmill_common::db::artifacts::insert_artifact(
            pool,
            job.id,
            ArtifactKind::FinalDocument,
            &html,
        )
        .await?;

        tracing::info!(job_id = %job.id, storage_key = %storage_key, "Rendered final document");
        Ok(storage_key)
    }

    /// Line-oriented markdown conversion over escaped input
    pub fn markdown_to_html(&self, markdown: &str) -> String {
        let mut out = String::with_capacity(markdown.len() * 2);
        let lines: Vec<&str> = markdown.lines().collect();
        let mut i = 0;

        while i < lines.len() {
            let line = lines[i];
            let trimmed = line.trim();

            if trimmed.is_empty() {
                i += 1;
                continue;
            }

            // Fenced code blocks (mermaid gets its own container class)
            if let Some(lang) = trimmed.strip_prefix("```") {
                let is_mermaid = lang.trim() == "mermaid";
                if is_mermaid {
                    out.push_str("<pre class=\"mermaid\">\n");
                } else {
                    out.push_str("<pre><code>\n");
                }
                i += 1;
                while i < lines.len() && !lines[i].trim().starts_with("```") {
                    out.push_str(&escape_html(lines[i]));
                    out.push('\n');
                    i += 1;
                }
                i += 1; // closing fence
                if is_mermaid {
                    out.push_str("</pre>\n");
                } else {
                    out.push_str("</code></pre>\n");
                }
                continue;
            }

            // Tables: a pipe row followed by a separator row
            if trimmed.starts_with('|') && i + 1 < lines.len() && is_table_separator(lines[i + 1]) {
                let header = table_cells(trimmed);
                out.push_str("<table>\n<thead>\n<tr>");
                for cell in &header {
                    out.push_str(&format!("<th>{}</th>", self.inline(cell)));
                }
                out.push_str("</tr>\n</thead>\n<tbody>\n");
                i += 2;
                while i < lines.len() && lines[i].trim().starts_with('|') {
                    out.push_str("<tr>");
                    for cell in table_cells(lines[i].trim()) {
                        out.push_str(&format!("<td>{}</td>", self.inline(&cell)));
                    }
                    out.push_str("</tr>\n");
                    i += 1;
                }
                out.push_str("</tbody>\n</table>\n");
                continue;
            }

            // Headings
            if let Some((level, text)) = heading_level(trimmed) {
                out.push_str(&format!("<h{}>{}</h{}>\n", level, self.inline(text), level));
                i += 1;
                continue;
            }

            // Horizontal rule
            if trimmed == "---" || trimmed == "***" {
                out.push_str("<hr>\n");
                i += 1;
                continue;
            }

            // Blockquote
            if let Some(rest) = trimmed.strip_prefix("> ") {
                out.push_str(&format!("<blockquote>{}</blockquote>\n", self.inline(rest)));
                i += 1;
                continue;
            }

            // Unordered list
            if trimmed.starts_with("- ") || trimmed.starts_with("* ") {
                out.push_str("<ul>\n");
                while i < lines.len() {
                    let t = lines[i].trim();
                    if let Some(item) = t.strip_prefix("- ").or_else(|| t.strip_prefix("* ")) {
                        out.push_str(&format!("<li>{}</li>\n", self.inline(item)));
                        i += 1;
                    } else {
                        break;
                    }
                }
                out.push_str("</ul>\n");
                continue;
            }

            // Ordered list
            if is_ordered_item(trimmed) {
                out.push_str("<ol>\n");
                while i < lines.len() && is_ordered_item(lines[i].trim()) {
                    let item = lines[i]
                        .trim()
                        .splitn(2, ". ")
                        .nth(1)
                        .unwrap_or_default();
                    out.push_str(&format!("<li>{}</li>\n", self.inline(item)));
                    i += 1;
                }
                out.push_str("</ol>\n");
                continue;
            }

            // Paragraph: the current line is always consumed, even when it
            // resembles a block start that no branch above accepted (a "#"
            // with no space, a pipe row with no separator), then continue
            // until a blank line or the next block
            let mut paragraph = lines[i].trim().to_string();
            i += 1;
            while i < lines.len() && !lines[i].trim().is_empty() && !is_block_start(lines[i].trim())
            {
                paragraph.push(' ');
                paragraph.push_str(lines[i].trim());
                i += 1;
            }
            out.push_str(&format!("<p>{}</p>\n", self.inline(&paragraph)));
        }

        out
    }

    /// Inline formatting over escaped text: links, bold, code spans
    fn inline(&self, text: &str) -> String {
        let escaped = escape_html(text);
        let linked = self
            .link
            .replace_all(&escaped, "<a href=\"$2\">$1</a>");
        let bolded = self.bold.replace_all(&linked, "<strong>$1</strong>");
        self.code
            .replace_all(&bolded, "<code>$1</code>")
            .into_owned()
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn heading_level(line: &str) -> Option<(usize, &str)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if (1..=6).contains(&hashes) {
        line.get(hashes..)
            .and_then(|rest| rest.strip_prefix(' '))
            .map(|text| (hashes, text))
    } else {
        None
    }
}

fn is_table_separator(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|')
        && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
        && t.contains('-')
}

fn table_cells(line: &str) -> Vec<String> {
    line.trim()
        .trim_matches('|')
        .split('|')
        .map(|c| c.trim().to_string())
        .collect()
}

fn is_ordered_item(line: &str) -> bool {
    let digits: String = line.chars().take_while(|c| c.is_ascii_digit()).collect();
    !digits.is_empty() && line[digits.len()..].starts_with(". ")
}

fn is_block_start(line: &str) -> bool {
    line.starts_with('#')
        || line.starts_with("```")
        || line.starts_with('|')
        || line.starts_with("- ")
        || line.starts_with("* ")
        || line.starts_with("> ")
        || is_ordered_item(line)
}

/// Themed document shell selected by output language
fn document_shell(job: &Job, body: &str) -> String {
    let (lang_attr, font_stack) = match job.language {
        Language::En => ("en", "Georgia, 'Times New Roman', serif"),
        Language::Ko => (
            "ko",
            "'Noto Sans KR', 'Malgun Gothic', 'Apple SD Gothic Neo', sans-serif",
        ),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="{lang}">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>
body {{ max-width: 52rem; margin: 2rem auto; padding: 0 1rem; font-family: {font}; line-height: 1.7; color: #1a1a1a; }}
h1, h2, h3 {{ line-height: 1.3; }}
table {{ border-collapse: collapse; width: 100%; margin: 1rem 0; }}
th, td {{ border: 1px solid #ccc; padding: 0.4rem 0.6rem; text-align: left; }}
thead {{ background: #f3f3f3; }}
pre {{ background: #f7f7f7; padding: 1rem; overflow-x: auto; }}
pre.mermaid {{ background: #f0f6ff; }}
blockquote {{ border-left: 3px solid #ccc; margin-left: 0; padding-left: 1rem; color: #555; }}
</style>
</head>
<body>
{body}
</body>
</html>
"#,
        lang = lang_attr,
        title = escape_html(&job.topic),
        font = font_stack,
        body = body,
    )
}
