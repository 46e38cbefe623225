use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum ReportBlock {
    Heading(String),
    Paragraph(String),
    List(Vec<String>),
}

const BULLET_PREFIXES: [&str; 2] = ["- ", "* "];

/// Turns compliance text into display blocks.
///
/// - a line starting with `- ` or `* ` is a list item; contiguous items
///   share one list
/// - otherwise the first line is the heading and later lines are
///   paragraphs
/// - blank lines close an open list and render nothing
pub fn present_report(text: &str) -> Vec<ReportBlock> {
    let mut blocks = Vec::new();
    let mut list_open = false;
    for (index, raw) in text.split('\n').enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(item) = bullet_item(line) {
            if list_open {
                if let Some(ReportBlock::List(items)) = blocks.last_mut() {
                    items.push(item.to_string());
                    continue;
                }
            }
            blocks.push(ReportBlock::List(vec![item.to_string()]));
            list_open = true;
            continue;
        }
        list_open = false;
        if line.trim().is_empty() {
            continue;
        }
        if index == 0 {
            blocks.push(ReportBlock::Heading(line.to_string()));
        } else {
            blocks.push(ReportBlock::Paragraph(line.to_string()));
        }
    }
    blocks
}

fn bullet_item(line: &str) -> Option<&str> {
    BULLET_PREFIXES
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))
}

pub fn render_report(blocks: &[ReportBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        match block {
            ReportBlock::Heading(text) => {
                out.push_str(text);
                out.push('\n');
            }
            ReportBlock::Paragraph(text) => {
                out.push_str(text);
                out.push('\n');
            }
            ReportBlock::List(items) => {
                for item in items {
                    out.push_str("  ✓ ");
                    out.push_str(item);
                    out.push('\n');
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heading(text: &str) -> ReportBlock {
        ReportBlock::Heading(text.to_string())
    }

    fn paragraph(text: &str) -> ReportBlock {
        ReportBlock::Paragraph(text.to_string())
    }

    fn list(items: &[&str]) -> ReportBlock {
        ReportBlock::List(items.iter().map(|item| item.to_string()).collect())
    }

    #[test]
    fn summary_list_then_trailing_paragraph() {
        let blocks = present_report("Summary line\n- point one\n- point two\nTrailing note");
        assert_eq!(
            blocks,
            vec![
                heading("Summary line"),
                list(&["point one", "point two"]),
                paragraph("Trailing note"),
            ]
        );
    }

    #[test]
    fn non_bullet_line_splits_lists() {
        let blocks = present_report("Head\n* a\nbreak\n- b\n- c");
        assert_eq!(
            blocks,
            vec![heading("Head"), list(&["a"]), paragraph("break"), list(&["b", "c"])]
        );
    }

    #[test]
    fn bullet_on_first_line_opens_a_list() {
        let blocks = present_report("- only bullets\n- here");
        assert_eq!(blocks, vec![list(&["only bullets", "here"])]);
    }

    #[test]
    fn crlf_and_blank_lines_degrade_gracefully() {
        let blocks = present_report("Verdict: pass\r\n\r\n- lighting even\r\nnote\r\n");
        assert_eq!(
            blocks,
            vec![heading("Verdict: pass"), list(&["lighting even"]), paragraph("note")]
        );
    }

    #[test]
    fn blank_line_closes_a_list() {
        let blocks = present_report("Head\n- a\n\n- b");
        assert_eq!(blocks, vec![heading("Head"), list(&["a"]), list(&["b"])]);
    }

    #[test]
    fn markers_without_space_are_plain_text() {
        let blocks = present_report("Head\n-dash\n*star");
        assert_eq!(blocks, vec![heading("Head"), paragraph("-dash"), paragraph("*star")]);
        assert!(present_report("").is_empty());
    }

    #[test]
    fn render_marks_list_items() {
        let rendered = render_report(&present_report("Compliant\n- background white\nDone"));
        assert_eq!(rendered, "Compliant\n  ✓ background white\nDone\n");
    }
}
