use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use crate::generation::GenerateError;

static FENCED_XML: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```\s*xml\s*(.*?)```").unwrap());
static FENCED_ANY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```\s*(.*?)```").unwrap());
static RAW_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<[a-z!?]").unwrap());
static ESCAPED_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)&lt;\s*[a-z!?]").unwrap());

/// Known diagram root tags, followed by whitespace or `>`.
static LIKELY_DIAGRAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<(mxfile|mxGraphModel|diagram)[\s>]").unwrap());

/// Reduce raw model output to a candidate diagram document: prefer the
/// interior of an xml-tagged fence (then any fence), decode escaped markup
/// when no raw tag is present, and drop prose before the first `<`.
pub fn normalize(raw: &str) -> String {
    // BOM and zero-width characters break downstream XML parsing
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '\u{feff}' | '\u{200b}'..='\u{200d}' | '\u{2060}'))
        .collect();

    let mut text = if let Some(caps) = FENCED_XML.captures(&cleaned) {
        caps[1].to_string()
    } else if let Some(caps) = FENCED_ANY.captures(&cleaned) {
        caps[1].to_string()
    } else {
        cleaned
    };

    text = text.trim().to_string();

    if !RAW_TAG.is_match(&text) && ESCAPED_TAG.is_match(&text) {
        text = text
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&")
            .replace("&quot;", "\"")
            .replace("&apos;", "'");
    }

    if let Some(idx) = text.find('<') {
        if idx > 0 {
            text = text[idx..].to_string();
        }
    }

    text.trim().to_string()
}

/// Two-tier acceptance: a strict well-formedness pass, or the known
/// root-tag heuristic. The disjunction avoids rejecting output a diagram
/// editor would still load.
pub fn validate(doc: &str) -> bool {
    is_well_formed(doc) || LIKELY_DIAGRAM.is_match(doc)
}

/// Normalize and validate in one step, failing when neither tier accepts.
pub fn extract(raw: &str) -> Result<String, GenerateError> {
    let doc = normalize(raw);
    if doc.is_empty() || !validate(&doc) {
        return Err(GenerateError::InvalidDocument);
    }
    Ok(doc)
}

fn is_well_formed(doc: &str) -> bool {
    let mut reader = Reader::from_str(doc);
    let mut depth = 0usize;
    let mut seen_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                if !seen_root {
                    seen_root = true;
                    if start.name().as_ref() == b"parsererror" {
                        return false;
                    }
                }
                depth += 1;
            }
            Ok(Event::Empty(start)) => {
                if !seen_root {
                    seen_root = true;
                    if start.name().as_ref() == b"parsererror" {
                        return false;
                    }
                }
            }
            Ok(Event::End(_)) => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Ok(Event::Eof) => return seen_root && depth == 0,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
}
