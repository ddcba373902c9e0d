//! PDF extraction strategy chain
//!
//! The fallback policy is a data structure: an ordered slice of named
//! strategies tried in sequence. Across the whole chain, "parsed but found
//! no text layer" stays distinct from "failed to parse" — the two call for
//! different user action.

use crate::ExtractError;

#[derive(Debug)]
pub enum StrategyError {
    /// The strategy could not read the document at all.
    Parse(String),
    /// The strategy read the document but found no text.
    NoText,
}

pub struct PdfStrategy {
    pub name: &'static str,
    pub run: fn(&[u8]) -> Result<String, StrategyError>,
}

/// Strategies in preference order: `pdf-extract` handles layout and font
/// decoding better; `lopdf` is the lower-level fallback.
pub const PDF_STRATEGIES: &[PdfStrategy] = &[
    PdfStrategy {
        name: "pdf-extract",
        run: run_pdf_extract,
    },
    PdfStrategy {
        name: "lopdf",
        run: run_lopdf,
    },
];

pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    run_chain(PDF_STRATEGIES, bytes)
}

/// Try each strategy in order; first success wins. If no strategy succeeds:
/// `EmptyResult` when at least one parsed the document but found no text,
/// `CorruptInput` when every strategy failed to parse.
pub fn run_chain(strategies: &[PdfStrategy], bytes: &[u8]) -> Result<String, ExtractError> {
    let mut saw_no_text = false;
    let mut last_parse_error: Option<String> = None;

    for strategy in strategies {
        match (strategy.run)(bytes) {
            Ok(text) => {
                tracing::debug!(strategy = strategy.name, chars = text.len(), "pdf text extracted");
                return Ok(text);
            }
            Err(StrategyError::NoText) => {
                tracing::debug!(strategy = strategy.name, "pdf parsed but no text layer found");
                saw_no_text = true;
            }
            Err(StrategyError::Parse(e)) => {
                tracing::warn!(strategy = strategy.name, error = %e, "pdf strategy failed");
                last_parse_error = Some(e);
            }
        }
    }

    if saw_no_text {
        Err(ExtractError::EmptyResult)
    } else {
        Err(ExtractError::CorruptInput(
            last_parse_error.unwrap_or_else(|| "no extraction strategies available".to_string()),
        ))
    }
}

fn non_empty(text: String) -> Result<String, StrategyError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Err(StrategyError::NoText)
    } else {
        Ok(trimmed.to_string())
    }
}

fn run_pdf_extract(bytes: &[u8]) -> Result<String, StrategyError> {
    match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) => non_empty(text),
        Err(e) => Err(StrategyError::Parse(e.to_string())),
    }
}

fn run_lopdf(bytes: &[u8]) -> Result<String, StrategyError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| StrategyError::Parse(e.to_string()))?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Err(StrategyError::NoText);
    }
    let text = doc
        .extract_text(&pages)
        .map_err(|e| StrategyError::Parse(e.to_string()))?;
    non_empty(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// Build a one-page PDF whose content stream carries the given
    /// operations. Using lopdf to author fixtures keeps the tests free of
    /// binary fixture files.
    fn build_pdf(operations: Vec<Operation>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content stream"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("serialize pdf");
        bytes
    }

    fn text_pdf(text: &str) -> Vec<u8> {
        build_pdf(vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 24.into()]),
            Operation::new("Td", vec![100.into(), 600.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ])
    }

    #[test]
    fn extracts_text_from_pdf_with_text_layer() {
        let bytes = text_pdf("Expense total 123.45");
        let text = extract_pdf(&bytes).expect("text-layer pdf should extract");
        assert!(
            text.contains("Expense total 123.45"),
            "unexpected extraction output: {text:?}"
        );
    }

    #[test]
    fn pdf_without_text_layer_is_empty_result_not_corrupt() {
        let bytes = build_pdf(vec![]);
        let result = extract_pdf(&bytes);
        assert!(
            matches!(result, Err(ExtractError::EmptyResult)),
            "expected EmptyResult, got {result:?}"
        );
    }

    #[test]
    fn malformed_pdf_is_corrupt_input() {
        let result = extract_pdf(b"%PDF-1.7 truncated nonsense without structure");
        assert!(
            matches!(result, Err(ExtractError::CorruptInput(_))),
            "expected CorruptInput, got {result:?}"
        );
    }

    #[test]
    fn truncated_real_pdf_is_corrupt_input() {
        let bytes = text_pdf("will be cut off");
        let truncated = &bytes[..bytes.len() / 3];
        let result = extract_pdf(truncated);
        assert!(
            matches!(result, Err(ExtractError::CorruptInput(_))),
            "expected CorruptInput, got {result:?}"
        );
    }

    // --- chain policy, tested in isolation with stub strategies ---

    fn always_text(_: &[u8]) -> Result<String, StrategyError> {
        Ok("from fallback".to_string())
    }

    fn always_parse_error(_: &[u8]) -> Result<String, StrategyError> {
        Err(StrategyError::Parse("boom".to_string()))
    }

    fn always_no_text(_: &[u8]) -> Result<String, StrategyError> {
        Err(StrategyError::NoText)
    }

    #[test]
    fn chain_falls_through_to_secondary_strategy() {
        let strategies = [
            PdfStrategy { name: "primary", run: always_parse_error },
            PdfStrategy { name: "secondary", run: always_text },
        ];
        assert_eq!(run_chain(&strategies, b"x").unwrap(), "from fallback");
    }

    #[test]
    fn chain_prefers_empty_result_over_corrupt_when_one_strategy_parsed() {
        let strategies = [
            PdfStrategy { name: "primary", run: always_no_text },
            PdfStrategy { name: "secondary", run: always_parse_error },
        ];
        let result = run_chain(&strategies, b"x");
        assert!(matches!(result, Err(ExtractError::EmptyResult)));
    }

    #[test]
    fn chain_reports_corrupt_when_nothing_parses() {
        let strategies = [
            PdfStrategy { name: "primary", run: always_parse_error },
            PdfStrategy { name: "secondary", run: always_parse_error },
        ];
        let result = run_chain(&strategies, b"x");
        assert!(matches!(result, Err(ExtractError::CorruptInput(_))));
    }

    #[test]
    fn chain_stops_at_first_success() {
        let strategies = [
            PdfStrategy { name: "primary", run: always_text },
            PdfStrategy { name: "secondary", run: always_parse_error },
        ];
        assert_eq!(run_chain(&strategies, b"x").unwrap(), "from fallback");
    }
}
