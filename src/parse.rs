//! Document parsing: raw source bytes → clean text plus metadata.
//!
//! HTML is parsed with `scraper`; script/style/nav content is dropped and
//! block-level elements become paragraph breaks so the chunker sees the
//! document's structure. Markdown and plain text pass through unchanged
//! (Markdown contributes a title from its first heading).
//!
//! An empty or unextractable document is a permanent input failure — the
//! ingestion pipeline marks the document `Failed` without retrying.

use scraper::{ElementRef, Html};

use crate::error::{RetrievalError, Result};

/// Parsed document: extraction output handed to the chunker.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub text: String,
    pub title: Option<String>,
}

/// Tags whose text content is never document content.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "iframe", "nav", "head"];

/// Tags that terminate a paragraph in the extracted text.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "li", "ul", "ol", "table", "tr", "pre", "blockquote", "h1",
    "h2", "h3", "h4", "h5", "h6", "br",
];

/// Parse a raw document body according to its content type.
///
/// Supported types: `text/html`, `text/markdown`, `text/plain` (the
/// default for unknown types).
pub fn parse(content_type: &str, body: &str) -> Result<ParsedDocument> {
    if body.trim().is_empty() {
        return Err(RetrievalError::permanent("document body is empty"));
    }

    let parsed = match content_type {
        "text/html" => parse_html(body),
        "text/markdown" => ParsedDocument {
            text: body.to_string(),
            title: markdown_title(body),
        },
        _ => ParsedDocument {
            text: body.to_string(),
            title: None,
        },
    };

    if parsed.text.trim().is_empty() {
        return Err(RetrievalError::permanent(
            "no text content could be extracted",
        ));
    }

    Ok(parsed)
}

/// Extract readable text from an HTML document.
///
/// Walks the DOM text nodes, skipping [`SKIPPED_TAGS`] subtrees. Headings
/// and other block elements insert paragraph breaks (`\n\n`) so sections
/// survive as chunking boundaries.
fn parse_html(html: &str) -> ParsedDocument {
    let document = Html::parse_document(html);

    let mut title_parts: Vec<String> = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();

    for node in document.root_element().descendants() {
        if let Some(el) = ElementRef::wrap(node) {
            if BLOCK_TAGS.contains(&el.value().name()) && !current.trim().is_empty() {
                paragraphs.push(std::mem::take(&mut current).trim().to_string());
            }
            continue;
        }

        let Some(text) = node.value().as_text() else {
            continue;
        };

        let mut in_title = false;
        let skipped = node.ancestors().filter_map(ElementRef::wrap).any(|el| {
            let name = el.value().name();
            in_title |= name == "title";
            SKIPPED_TAGS.contains(&name) || name == "title"
        });
        if in_title {
            let t = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if !t.is_empty() {
                title_parts.push(t);
            }
            continue;
        }
        if skipped {
            continue;
        }

        let piece = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if piece.is_empty() {
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&piece);
    }

    if !current.trim().is_empty() {
        paragraphs.push(current.trim().to_string());
    }

    let title = (!title_parts.is_empty()).then(|| title_parts.join(" "));

    ParsedDocument {
        text: paragraphs.join("\n\n"),
        title,
    }
}

/// First `#` heading of a Markdown document, if any.
fn markdown_title(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passthrough() {
        let parsed = parse("text/plain", "Just some notes.").unwrap();
        assert_eq!(parsed.text, "Just some notes.");
        assert!(parsed.title.is_none());
    }

    #[test]
    fn test_empty_body_is_permanent_failure() {
        let err = parse("text/plain", "   \n  ").unwrap_err();
        assert!(matches!(err, RetrievalError::PermanentInput { .. }));
    }

    #[test]
    fn test_markdown_title_from_heading() {
        let parsed = parse("text/markdown", "# Handler Queues\n\nSome body.").unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Handler Queues"));
        assert!(parsed.text.contains("Some body."));
    }

    #[test]
    fn test_html_strips_script_and_style() {
        let html = r#"<html><head><title>Page</title><style>body{color:red}</style></head>
            <body><script>var x = 1;</script><p>Visible text.</p></body></html>"#;
        let parsed = parse("text/html", html).unwrap();
        assert!(parsed.text.contains("Visible text."));
        assert!(!parsed.text.contains("var x"));
        assert!(!parsed.text.contains("color:red"));
        assert_eq!(parsed.title.as_deref(), Some("Page"));
    }

    #[test]
    fn test_html_headings_become_paragraph_breaks() {
        let html = "<body><h2>Setup</h2><p>Install it.</p><h2>Usage</h2><p>Run it.</p></body>";
        let parsed = parse("text/html", html).unwrap();
        let paragraphs: Vec<&str> = parsed.text.split("\n\n").collect();
        assert!(paragraphs.len() >= 3, "expected section breaks: {:?}", parsed.text);
        assert!(parsed.text.contains("Setup"));
        assert!(parsed.text.contains("Usage"));
    }

    #[test]
    fn test_html_without_text_is_permanent_failure() {
        let err = parse("text/html", "<html><body><script>1</script></body></html>").unwrap_err();
        assert!(matches!(err, RetrievalError::PermanentInput { .. }));
    }

    #[test]
    fn test_html_whitespace_normalized() {
        let html = "<p>spaced     out\n\n   text</p>";
        let parsed = parse("text/html", html).unwrap();
        assert_eq!(parsed.text, "spaced out text");
    }
}
