//! PDF recognition and payload recovery from the invoice service's JSON.
//!
//! The invoice endpoint answers with JSON that embeds the document either as a
//! base64 string (sometimes a `data:` URI, sometimes line-wrapped) or as a link
//! to the file. Which field holds it changes between portal releases, so the
//! search walks every string in the tree instead of naming fields.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::OnceLock;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use regex::Regex;
use serde_json::Value;

/// `%PDF`
pub const PDF_SIGNATURE: [u8; 4] = [0x25, 0x50, 0x44, 0x46];

/// Decoded payloads shorter than this are not considered invoices.
pub const MIN_PDF_BYTES: usize = 512;

/// Payloads arrive both with and without `=` padding.
const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Depth bound for [`search_depth_first`].
pub const MAX_SEARCH_DEPTH: usize = 64;

pub fn is_pdf_signature(bytes: &[u8]) -> bool {
    bytes.len() >= PDF_SIGNATURE.len() && bytes[..PDF_SIGNATURE.len()] == PDF_SIGNATURE
}

/// Decode a base64 (or base64 `data:` URI) string into PDF bytes.
///
/// Returns `None` unless the decoded buffer starts with the PDF signature and
/// is at least [`MIN_PDF_BYTES`] long.
pub fn decode_pdf_payload(raw: &str) -> Option<Vec<u8>> {
    let trimmed = raw.trim();
    let body = match trimmed.strip_prefix("data:") {
        Some(rest) => rest.split_once(',')?.1,
        None => trimmed,
    };

    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    // base64("%PDF") starts with "JVBE"; skip decoding anything else.
    if !compact.starts_with("JVBE") {
        return None;
    }

    let decoded = STANDARD_LENIENT
        .decode(compact.as_bytes())
        .or_else(|_| URL_SAFE_LENIENT.decode(compact.as_bytes()))
        .ok()?;

    (decoded.len() >= MIN_PDF_BYTES && is_pdf_signature(&decoded)).then_some(decoded)
}

/// Absolute http(s) URL that plausibly points at an invoice document.
pub fn looks_like_invoice_url(raw: &str) -> bool {
    static URL: OnceLock<Regex> = OnceLock::new();
    let url = URL.get_or_init(|| {
        Regex::new(r"^https?://[^\s/]+\.[^\s/]+/\S*$").expect("static regex is valid")
    });

    let candidate = raw.trim();
    if !url.is_match(candidate) {
        return false;
    }
    let lower = candidate.to_lowercase();
    ["pdf", "fatura", "boleto", "invoice", "segunda-via", "segundavia"]
        .iter()
        .any(|hint| lower.contains(hint))
}

/// A node of a (possibly cyclic) tree that can be searched for strings.
pub trait SearchNode: Sized {
    /// Stable identity used to avoid visiting a node twice.
    fn identity(&self) -> usize;
    /// Text carried by this node, if it is a string leaf.
    fn text(&self) -> Option<Cow<'_, str>>;
    /// Children in document order.
    fn children(&self) -> Vec<Self>;
}

impl SearchNode for &Value {
    fn identity(&self) -> usize {
        *self as *const Value as usize
    }

    fn text(&self) -> Option<Cow<'_, str>> {
        self.as_str().map(Cow::Borrowed)
    }

    fn children(&self) -> Vec<Self> {
        match *self {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) => map.values().collect(),
            _ => Vec::new(),
        }
    }
}

/// Depth-first, document-order search over every string in the tree.
///
/// Uses an explicit stack and a visited set, so shared or self-referencing
/// nodes are visited once and nesting deeper than `max_depth` is skipped.
pub fn search_depth_first<N, R>(
    root: N,
    max_depth: usize,
    mut test: impl FnMut(&str) -> Option<R>,
) -> Option<R>
where
    N: SearchNode,
{
    let mut visited: HashSet<usize> = HashSet::new();
    let mut stack: Vec<(N, usize)> = vec![(root, 0)];

    while let Some((node, depth)) = stack.pop() {
        if !visited.insert(node.identity()) {
            continue;
        }
        if let Some(text) = node.text() {
            if let Some(found) = test(&text) {
                return Some(found);
            }
            continue;
        }
        if depth >= max_depth {
            continue;
        }
        let children = node.children();
        for child in children.into_iter().rev() {
            stack.push((child, depth + 1));
        }
    }

    None
}

/// First string in `value` that decodes to a PDF.
pub fn find_pdf_payload(value: &Value) -> Option<Vec<u8>> {
    search_depth_first(value, MAX_SEARCH_DEPTH, decode_pdf_payload)
}

/// First string in `value` that looks like a link to the invoice document.
pub fn find_invoice_url(value: &Value) -> Option<String> {
    search_depth_first(value, MAX_SEARCH_DEPTH, |s| {
        looks_like_invoice_url(s).then(|| s.trim().to_string())
    })
}

#[cfg(test)]
pub(crate) fn sample_pdf() -> Vec<u8> {
    let mut bytes = b"%PDF-1.4\n".to_vec();
    bytes.resize(MIN_PDF_BYTES + 64, b'x');
    bytes.extend_from_slice(b"\n%%EOF\n");
    bytes
}
