//! Rendering recognized layout elements as Markdown, HTML or JSON.

use schemars::JsonSchema;

use crate::{format::OutputFormat, layout::BBox, prelude::*};

/// A recognized region of a page.
///
/// Field order here is the key order of our JSON output.
#[derive(Clone, Debug, JsonSchema, PartialEq, Eq, Serialize)]
pub struct LayoutElement {
    /// What kind of region this is (`title`, `para`, `tab`, `equ`, ...).
    pub label: String,

    /// The recognized text.
    pub text: String,

    /// Pixel-space bounding box, `[x1, y1, x2, y2]`.
    pub bbox: BBox,

    /// Position in the layout as emitted by the model. This is the only sort
    /// key used when assembling the document.
    pub reading_order: usize,

    /// Extra tags emitted by the layout pass.
    pub tags: Vec<String>,
}

/// Elements in reading order, skipping any without text.
fn visible_elements(elements: &[LayoutElement]) -> Vec<&LayoutElement> {
    let mut sorted = elements
        .iter()
        .filter(|e| !e.text.trim().is_empty())
        .collect::<Vec<_>>();
    // `sort_by_key` is stable.
    sorted.sort_by_key(|e| e.reading_order);
    sorted
}

/// Render elements in the requested format.
pub fn render_elements(elements: &[LayoutElement], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Markdown => Ok(elements_to_markdown(elements)),
        OutputFormat::Html => Ok(elements_to_html(elements)),
        OutputFormat::Json => elements_to_json(elements),
    }
}

/// Render elements as Markdown.
pub fn elements_to_markdown(elements: &[LayoutElement]) -> String {
    visible_elements(elements)
        .into_iter()
        .map(|elem| {
            let text = elem.text.trim();
            match elem.label.as_str() {
                "equ" if !text.starts_with('$') => format!("$$\n{text}\n$$"),
                "code" if !text.starts_with("```") => format!("```\n{text}\n```"),
                _ => text.to_owned(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render elements as an HTML fragment.
pub fn elements_to_html(elements: &[LayoutElement]) -> String {
    let mut parts = vec!["<div class='document'>".to_owned()];
    for elem in visible_elements(elements) {
        let text = elem.text.trim();
        let [x1, y1, x2, y2] = elem.bbox;
        let bbox = format!("data-bbox='[{x1},{y1},{x2},{y2}]'");
        parts.push(match elem.label.as_str() {
            "equ" => format!("<div class='equation' {bbox}>{text}</div>"),
            "code" => format!("<pre class='code' {bbox}><code>{text}</code></pre>"),
            "tab" => format!("<div class='table' {bbox}>{text}</div>"),
            "fig" => format!("<figure {bbox}>{text}</figure>"),
            "title" => format!("<h1 {bbox}>{text}</h1>"),
            _ => format!("<p {bbox}>{text}</p>"),
        });
    }
    parts.push("</div>".to_owned());
    parts.join("\n")
}

/// Render elements as a JSON document.
pub fn elements_to_json(elements: &[LayoutElement]) -> Result<String> {
    #[derive(Serialize)]
    struct Document<'a> {
        elements: Vec<&'a LayoutElement>,
    }
    let doc = Document {
        elements: visible_elements(elements),
    };
    serde_json::to_string_pretty(&doc).context("failed to serialize elements")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elem(label: &str, text: &str, reading_order: usize) -> LayoutElement {
        LayoutElement {
            label: label.to_owned(),
            text: text.to_owned(),
            bbox: [1, 2, 3, 4],
            reading_order,
            tags: vec![],
        }
    }

    #[test]
    fn markdown_sorts_and_drops_empty() {
        let elements = vec![
            elem("para", "second", 2),
            elem("title", "first", 0),
            elem("para", "   ", 1),
        ];
        assert_eq!(elements_to_markdown(&elements), "first\n\nsecond");
    }

    #[test]
    fn markdown_wraps_equations_and_code_once() {
        let elements = vec![
            elem("equ", "E = mc^2", 0),
            elem("equ", "$$\nx\n$$", 1),
            elem("code", "fn main() {}", 2),
            elem("code", "```rust\nlet x = 1;\n```", 3),
            elem("tab", "<table></table>", 4),
        ];
        assert_eq!(
            elements_to_markdown(&elements),
            "$$\nE = mc^2\n$$\n\n$$\nx\n$$\n\n```\nfn main() {}\n```\n\n```rust\nlet x = 1;\n```\n\n<table></table>"
        );
    }

    #[test]
    fn markdown_rendering_is_idempotent_for_wrapped_elements() {
        let once = elements_to_markdown(&[elem("equ", "a+b", 0)]);
        let twice = elements_to_markdown(&[elem("equ", &once, 0)]);
        assert_eq!(once, twice);

        let once = elements_to_markdown(&[elem("code", "x", 0)]);
        let twice = elements_to_markdown(&[elem("code", &once, 0)]);
        assert_eq!(once, twice);
    }

    #[test]
    fn html_maps_labels_to_tags() {
        let elements = vec![
            elem("title", "T", 0),
            elem("equ", "E", 1),
            elem("code", "C", 2),
            elem("tab", "B", 3),
            elem("fig", "[Figure]", 4),
            elem("para", "P", 5),
        ];
        let html = elements_to_html(&elements);
        let lines = html.lines().collect::<Vec<_>>();
        assert_eq!(lines.first(), Some(&"<div class='document'>"));
        assert_eq!(lines.last(), Some(&"</div>"));
        assert_eq!(lines[1], "<h1 data-bbox='[1,2,3,4]'>T</h1>");
        assert_eq!(lines[2], "<div class='equation' data-bbox='[1,2,3,4]'>E</div>");
        assert_eq!(
            lines[3],
            "<pre class='code' data-bbox='[1,2,3,4]'><code>C</code></pre>"
        );
        assert_eq!(lines[4], "<div class='table' data-bbox='[1,2,3,4]'>B</div>");
        assert_eq!(lines[5], "<figure data-bbox='[1,2,3,4]'>[Figure]</figure>");
        assert_eq!(lines[6], "<p data-bbox='[1,2,3,4]'>P</p>");
    }

    #[test]
    fn json_keeps_key_order_and_unicode() {
        let mut element = elem("para", "Grüße, 世界", 0);
        element.tags = vec!["bold".to_owned()];
        let json = elements_to_json(&[element]).unwrap();
        assert!(json.contains("Grüße, 世界"));
        let label = json.find("\"label\"").unwrap();
        let text = json.find("\"text\"").unwrap();
        let bbox = json.find("\"bbox\"").unwrap();
        let order = json.find("\"reading_order\"").unwrap();
        let tags = json.find("\"tags\"").unwrap();
        assert!(label < text && text < bbox && bbox < order && order < tags);

        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["elements"][0]["bbox"], json!([1, 2, 3, 4]));
    }
}
