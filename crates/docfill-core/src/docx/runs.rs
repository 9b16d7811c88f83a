//! In-place rewriting of run text.
//!
//! A run's text is the concatenation of its direct `w:t` children. Rewriting
//! a run puts the new text into its first `w:t` and empties the others, so
//! run properties (`w:rPr`) and every sibling element stay where they were.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use tracing::trace;

use super::{attribute, is_element, text_of, WordDocument};

/// Event index range (inclusive) of one `w:t` element.
#[derive(Debug, Clone, Copy)]
struct TextSpan {
    start: usize,
    end: usize,
}

#[derive(Debug, Default)]
struct RunTexts {
    spans: Vec<TextSpan>,
}

struct Edit {
    span: TextSpan,
    events: Vec<Event<'static>>,
}

impl WordDocument {
    /// Offer the text of every run to `rewrite`, in document order.
    ///
    /// When `rewrite` returns a different text, the run is updated. Line
    /// breaks in the new text become `w:br` elements. Returns the number of
    /// runs changed.
    pub fn rewrite_runs<F>(&mut self, mut rewrite: F) -> usize
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut edits: Vec<Edit> = Vec::new();
        let mut elements: Vec<Vec<u8>> = Vec::new();
        let mut runs: Vec<RunTexts> = Vec::new();
        let mut open_text: Option<usize> = None;
        let mut changed = 0;

        for (idx, event) in self.events.iter().enumerate() {
            match event {
                Event::Start(e) => {
                    if is_element(e, b"w:r") {
                        runs.push(RunTexts::default());
                    } else if is_element(e, b"w:t") && parent_is_run(&elements) {
                        open_text = Some(idx);
                    }
                    elements.push(e.name().as_ref().to_vec());
                }
                Event::Empty(e) if is_element(e, b"w:t") && parent_is_run(&elements) => {
                    if let Some(run) = runs.last_mut() {
                        run.spans.push(TextSpan { start: idx, end: idx });
                    }
                }
                Event::End(e) => {
                    elements.pop();
                    let name = e.name();
                    if name.as_ref() == b"w:t" {
                        if let (Some(start), Some(run)) = (open_text.take(), runs.last_mut()) {
                            run.spans.push(TextSpan { start, end: idx });
                        }
                    } else if name.as_ref() == b"w:r" {
                        let Some(run) = runs.pop() else { continue };
                        if run.spans.is_empty() {
                            continue;
                        }
                        let current = self.run_text(&run);
                        if let Some(new_text) = rewrite(&current).filter(|t| *t != current) {
                            trace!("Rewriting run {:?} -> {:?}", current, new_text);
                            edits.extend(self.edits_for(&run, &new_text));
                            changed += 1;
                        }
                    }
                }
                _ => {}
            }
        }

        // Spans never overlap; applying back to front keeps indices valid.
        edits.sort_by(|a, b| b.span.start.cmp(&a.span.start));
        for edit in edits {
            self.events
                .splice(edit.span.start..=edit.span.end, edit.events);
        }

        changed
    }

    fn run_text(&self, run: &RunTexts) -> String {
        let mut text = String::new();
        for span in &run.spans {
            for event in &self.events[span.start..=span.end] {
                match event {
                    Event::Text(t) => text.push_str(&text_of(t)),
                    Event::CData(c) => text.push_str(&String::from_utf8_lossy(c)),
                    _ => {}
                }
            }
        }
        text
    }

    fn edits_for(&self, run: &RunTexts, new_text: &str) -> Vec<Edit> {
        run.spans
            .iter()
            .enumerate()
            .map(|(i, span)| {
                let start = match &self.events[span.start] {
                    Event::Start(e) | Event::Empty(e) => e.clone().into_owned(),
                    _ => BytesStart::new("w:t"),
                };
                let events = if i == 0 {
                    text_events(start, new_text)
                } else {
                    vec![Event::Start(start), Event::End(BytesEnd::new("w:t"))]
                };
                Edit {
                    span: *span,
                    events,
                }
            })
            .collect()
    }
}

fn parent_is_run(elements: &[Vec<u8>]) -> bool {
    elements.last().is_some_and(|name| name == b"w:r")
}

/// `w:t` elements for `text`, separated by `w:br` at each line break.
fn text_events(start: BytesStart<'static>, text: &str) -> Vec<Event<'static>> {
    let mut start = start;
    if attribute(&start, b"xml:space").is_none() {
        start.push_attribute(("xml:space", "preserve"));
    }

    let mut events = Vec::new();
    for (i, piece) in text.split('\n').enumerate() {
        if i > 0 {
            events.push(Event::Empty(BytesStart::new("w:br")));
        }
        events.push(Event::Start(start.clone()));
        if !piece.is_empty() {
            events.push(Event::Text(BytesText::new(piece).into_owned()));
        }
        events.push(Event::End(BytesEnd::new("w:t")));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::super::DOCUMENT_PART;
    use super::*;
    use crate::package::Package;

    fn reload(doc: &WordDocument) -> WordDocument {
        WordDocument::from_bytes(&doc.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn test_rewrite_single_run() {
        let mut doc = WordDocument::from_bytes(&docx(&paragraph(&["Кому: {{name}}"]))).unwrap();
        let changed = doc.rewrite_runs(|text| Some(text.replace("{{name}}", "ООО Ромашка")));

        assert_eq!(changed, 1);
        assert_eq!(reload(&doc).body().paragraphs, vec!["Кому: ООО Ромашка"]);
    }

    #[test]
    fn test_unchanged_runs_are_not_counted() {
        let mut doc = WordDocument::from_bytes(&docx(&paragraph(&["a", "b"]))).unwrap();
        assert_eq!(doc.rewrite_runs(|text| Some(text.to_string())), 0);
        assert_eq!(doc.rewrite_runs(|_| None), 0);
    }

    #[test]
    fn test_run_properties_are_kept() {
        let mut doc = WordDocument::from_bytes(&docx(&paragraph(&["{{x}}"]))).unwrap();
        doc.rewrite_runs(|_| Some("1".to_string()));

        let bytes = doc.to_bytes().unwrap();
        let package = Package::from_bytes(&bytes).unwrap();
        let xml = package.get_str(DOCUMENT_PART).unwrap();
        assert!(xml.contains(r#"<w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve">1</w:t></w:r>"#));
    }

    #[test]
    fn test_multiple_text_elements_collapse_into_first() {
        let body = r#"<w:p><w:r><w:t>{{a</w:t><w:t>}} tail</w:t></w:r></w:p>"#;
        let mut doc = WordDocument::from_bytes(&docx(body)).unwrap();
        let mut seen = Vec::new();
        doc.rewrite_runs(|text| {
            seen.push(text.to_string());
            Some(text.replace("{{a}}", "A"))
        });

        assert_eq!(seen, vec!["{{a}} tail"]);
        assert_eq!(reload(&doc).body().paragraphs, vec!["A tail"]);
    }

    #[test]
    fn test_line_breaks_become_br() {
        let mut doc = WordDocument::from_bytes(&docx(&paragraph(&["{{x}}"]))).unwrap();
        doc.rewrite_runs(|_| Some("first\nsecond".to_string()));

        let bytes = doc.to_bytes().unwrap();
        let xml = Package::from_bytes(&bytes)
            .unwrap()
            .get_str(DOCUMENT_PART)
            .unwrap()
            .to_string();
        assert!(xml.contains("<w:br/>"));
        assert_eq!(reload(&doc).body().paragraphs, vec!["first\nsecond"]);
    }

    #[test]
    fn test_runs_in_tables_and_escaping() {
        let body = table(&[&["{{k}}", "keep"]]);
        let mut doc = WordDocument::from_bytes(&docx(&body)).unwrap();
        let changed = doc.rewrite_runs(|text| Some(text.replace("{{k}}", "<A & B>")));

        assert_eq!(changed, 1);
        let table = &reload(&doc).body().tables[0];
        assert_eq!(table.cell(0, 0), Some("<A & B>"));
        assert_eq!(table.cell(0, 1), Some("keep"));
    }

    #[test]
    fn test_empty_text_element() {
        let body = r#"<w:p><w:r><w:t/></w:r><w:r><w:t></w:t></w:r></w:p>"#;
        let mut doc = WordDocument::from_bytes(&docx(body)).unwrap();
        let changed = doc.rewrite_runs(|text| (text.is_empty()).then(|| "x".to_string()));

        assert_eq!(changed, 2);
        assert_eq!(reload(&doc).body().paragraphs, vec!["xx"]);
    }
}
