//! Text helpers for the capture pipeline.

use scraper::Html;

/// Elements whose text is never visible.
const INVISIBLE_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

/// Plain text of an HTML document: script/style blocks dropped, tags
/// removed, whitespace collapsed to single spaces.
pub fn strip_markup(html: &str) -> String {
    // Html is not Send; keep it inside this synchronous function.
    let document = Html::parse_document(html);
    let mut parts: Vec<&str> = Vec::new();

    for node in document.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|el| INVISIBLE_ELEMENTS.contains(&el.name()))
                .unwrap_or(false)
        });
        if !hidden {
            parts.push(&**text);
        }
    }

    parts
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
