//! Charset guessing, transcoding and entity encoding.
//!
//! The engine keeps text as Rust strings (UTF-8) internally and converts at
//! the wire: request bodies are brought to UTF-8 before parsing, response
//! documents are entity-escaped so they stay valid in the negotiated charset.
//! Everything here is a pure function over its inputs.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt;

/// The charsets the engine can transcode without an external backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Latin1,
    Ascii,
}

impl Charset {
    /// Resolves a charset name, accepting the common aliases.
    pub fn from_name(name: &str) -> Result<Self, CharsetError> {
        match name.trim().to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Ok(Charset::Utf8),
            "ISO-8859-1" | "ISO8859-1" | "LATIN1" | "LATIN-1" | "ISO-LATIN-1" => {
                Ok(Charset::Latin1)
            }
            "US-ASCII" | "ASCII" | "ANSI_X3.4-1968" => Ok(Charset::Ascii),
            _ => Err(CharsetError::UnsupportedCharset(name.trim().to_string())),
        }
    }

    /// Canonical (IANA) name.
    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "ISO-8859-1",
            Charset::Ascii => "US-ASCII",
        }
    }

    /// Whether a code point is representable without a character reference.
    pub fn contains(&self, c: char) -> bool {
        match self {
            Charset::Utf8 => true,
            Charset::Latin1 => (c as u32) <= 0xFF,
            Charset::Ascii => c.is_ascii(),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors from transcoding and charset resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CharsetError {
    /// No transcoder available for this charset name.
    UnsupportedCharset(String),
    /// A code point has no representation in the target charset.
    Unrepresentable(char),
    /// Input bytes are not valid in the declared source charset.
    InvalidInput(&'static str),
}

impl fmt::Display for CharsetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CharsetError::UnsupportedCharset(name) => {
                write!(f, "no transcoder available for charset {}", name)
            }
            CharsetError::Unrepresentable(c) => {
                write!(f, "U+{:04X} not representable in target charset", *c as u32)
            }
            CharsetError::InvalidInput(detail) => write!(f, "invalid input: {}", detail),
        }
    }
}

impl std::error::Error for CharsetError {}

/// Guesses the charset of a request body.
///
/// Checks, in order: the `charset=` parameter of the Content-Type header,
/// the `encoding=` pseudo-attribute of the XML declaration, a byte-order
/// mark, and finally falls back to UTF-8. The returned name is uppercased
/// but otherwise unvalidated; it may name a charset the engine cannot
/// transcode.
///
/// # Examples
///
/// ```
/// use xmlrpc_core::charset::guess_encoding;
///
/// let body = br#"<?xml version="1.0" encoding="iso-8859-1"?><methodCall/>"#;
/// assert_eq!(guess_encoding(None, body), "ISO-8859-1");
/// assert_eq!(
///     guess_encoding(Some("text/xml; charset=utf-8"), body),
///     "UTF-8"
/// );
/// ```
pub fn guess_encoding(content_type: Option<&str>, body: &[u8]) -> String {
    if let Some(header) = content_type {
        if let Some(charset) = content_type_charset(header) {
            return charset;
        }
    }

    if let Some(encoding) = xml_declaration_encoding(body) {
        return encoding;
    }

    if body.starts_with(&[0xFE, 0xFF]) {
        return "UTF-16BE".to_string();
    }
    if body.starts_with(&[0xFF, 0xFE]) {
        return "UTF-16LE".to_string();
    }
    if body.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return "UTF-8".to_string();
    }

    "UTF-8".to_string()
}

fn content_type_charset(header: &str) -> Option<String> {
    for segment in header.split(';').skip(1) {
        let segment = segment.trim();
        if segment.len() > 8 && segment.as_bytes()[..8].eq_ignore_ascii_case(b"charset=") {
            let value = segment[8..].trim().trim_matches('"').trim_matches('\'');
            if !value.is_empty() {
                return Some(value.to_ascii_uppercase());
            }
        }
    }
    None
}

/// Reads the `encoding=` of the XML declaration, if the body starts with one.
pub fn xml_declaration_encoding(body: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(body);
    let mut buf = Vec::new();
    match reader.read_event_into(&mut buf) {
        Ok(Event::Decl(decl)) => match decl.encoding() {
            Some(Ok(encoding)) => Some(String::from_utf8_lossy(&encoding).to_ascii_uppercase()),
            _ => None,
        },
        _ => None,
    }
}

/// Whether the body begins with an XML declaration.
pub fn has_xml_declaration(body: &[u8]) -> bool {
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(0);
    body[start..].starts_with(b"<?xml")
}

/// Transcodes between the supported charsets, pair-wise.
pub fn transcode(bytes: &[u8], from: Charset, to: Charset) -> Result<Vec<u8>, CharsetError> {
    if from == to {
        return Ok(bytes.to_vec());
    }
    match (from, to) {
        (Charset::Ascii, _) => {
            if bytes.iter().all(|b| b.is_ascii()) {
                Ok(bytes.to_vec())
            } else {
                Err(CharsetError::InvalidInput("non-ASCII byte in US-ASCII input"))
            }
        }
        (Charset::Latin1, Charset::Utf8) => {
            Ok(bytes.iter().map(|&b| b as char).collect::<String>().into_bytes())
        }
        (Charset::Latin1, Charset::Ascii) => {
            match bytes.iter().find(|b| !b.is_ascii()) {
                Some(&b) => Err(CharsetError::Unrepresentable(b as char)),
                None => Ok(bytes.to_vec()),
            }
        }
        (Charset::Latin1, Charset::Latin1) => Ok(bytes.to_vec()),
        (Charset::Utf8, target) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|_| CharsetError::InvalidInput("invalid UTF-8 input"))?;
            let mut out = Vec::with_capacity(bytes.len());
            for c in text.chars() {
                if target.contains(c) {
                    out.push(c as u32 as u8);
                } else {
                    return Err(CharsetError::Unrepresentable(c));
                }
            }
            Ok(out)
        }
    }
}

/// Escapes text for inclusion in an XML document emitted in `target`.
///
/// The five XML metacharacters become named entities; code points the
/// target charset cannot represent become decimal character references.
///
/// # Examples
///
/// ```
/// use xmlrpc_core::charset::{encode_entities, Charset};
///
/// assert_eq!(encode_entities("a<b&c", Charset::Utf8), "a&lt;b&amp;c");
/// assert_eq!(encode_entities("héllo", Charset::Ascii), "h&#233;llo");
/// assert_eq!(encode_entities("héllo", Charset::Latin1), "héllo");
/// ```
pub fn encode_entities(text: &str, target: Charset) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if target.contains(c) => out.push(c),
            c => {
                out.push_str("&#");
                out.push_str(&(c as u32).to_string());
                out.push(';');
            }
        }
    }
    out
}
