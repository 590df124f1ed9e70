//! HTTP transport negotiation.
//!
//! The engine never touches a socket; it works on headers and body bytes the
//! hosting layer already received. This module inflates compressed request
//! bodies, picks the response charset and compression against the client's
//! Accept-* headers, and assembles the response header set.

use crate::charset::Charset;
use crate::fault::{Fault, FaultCode};
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use std::io::{Read, Write};
use tracing::debug;
use xmlrpc_config::CompressionMethod;

/// A case-insensitive header multimap, preserving insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers { entries: Vec::new() }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for a header name, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Headers {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Headers {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        Headers {
            entries: iter
                .into_iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Inflates the request body according to its Content-Encoding.
///
/// An encoding the server does not accept yields `server_cannot_decompress`;
/// a body that fails to inflate yields `server_decompress_fail`. A missing
/// or `identity` Content-Encoding passes the body through untouched.
pub fn decompress_request(
    headers: &Headers,
    body: Vec<u8>,
    accepted: &[CompressionMethod],
) -> Result<Vec<u8>, Fault> {
    let encoding = match headers.get("Content-Encoding") {
        Some(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => return Ok(body),
    };
    if encoding.eq_ignore_ascii_case("identity") {
        return Ok(body);
    }

    let method = match CompressionMethod::from_token(&encoding) {
        Some(method) => method,
        None => {
            return Err(Fault::with_detail(
                FaultCode::ServerCannotDecompress,
                format!("unknown Content-Encoding {}", encoding),
            ));
        }
    };
    if !accepted.contains(&method) {
        return Err(Fault::with_detail(
            FaultCode::ServerCannotDecompress,
            format!("{} not in accepted set", method.as_str()),
        ));
    }

    debug!("inflating {} byte {} request body", body.len(), method.as_str());
    inflate(&body, method)
        .map_err(|e| Fault::with_detail(FaultCode::ServerDecompressFail, e))
}

fn inflate(body: &[u8], method: CompressionMethod) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    match method {
        CompressionMethod::Gzip => {
            GzDecoder::new(body).read_to_end(&mut out)?;
        }
        CompressionMethod::Deflate => {
            // HTTP deflate is zlib-wrapped, but plenty of agents send raw
            // deflate streams; try the wrapper first, then the raw stream.
            if ZlibDecoder::new(body).read_to_end(&mut out).is_err() {
                out.clear();
                DeflateDecoder::new(body).read_to_end(&mut out)?;
            }
        }
    }
    Ok(out)
}

/// Response charset policy, resolved from the configuration string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CharsetPolicy {
    /// Emit no charset declaration at all.
    None,
    /// Use the server's internal encoding.
    Default,
    /// Negotiate against the client's Accept-Charset.
    Auto,
    /// Always use this charset.
    Fixed(String),
}

impl CharsetPolicy {
    pub fn from_config(value: &str) -> Self {
        match value.trim() {
            "" => CharsetPolicy::None,
            v if v.eq_ignore_ascii_case("auto") => CharsetPolicy::Auto,
            v if v.eq_ignore_ascii_case("default") => CharsetPolicy::Default,
            v => CharsetPolicy::Fixed(v.to_string()),
        }
    }
}

/// Picks the response charset.
///
/// Only charsets the codec can actually emit are ever returned, under
/// their canonical names, so the `Content-Type` charset parameter and the
/// XML prologue `encoding=` always agree. A fixed or default charset the
/// codec cannot emit resolves to no charset at all.
///
/// In `Auto` mode the server preference order is the internal encoding,
/// then UTF-8, ISO-8859-1 and US-ASCII, each considered only if present in
/// `accepted`; the first preference that prefix-matches a token of the
/// client's Accept-Charset wins. No match (or no Accept-Charset at all)
/// leaves the charset unset.
pub fn negotiate_response_charset(
    policy: &CharsetPolicy,
    internal: &str,
    accepted: &[String],
    accept_charset: Option<&str>,
) -> Option<String> {
    match policy {
        CharsetPolicy::None => None,
        CharsetPolicy::Default => emittable(internal),
        CharsetPolicy::Fixed(name) => emittable(name),
        CharsetPolicy::Auto => {
            let accept = accept_charset?;
            let mut preferences: Vec<String> = Vec::new();
            for candidate in std::iter::once(internal)
                .chain(["UTF-8", "ISO-8859-1", "US-ASCII"])
            {
                let upper = match emittable(candidate) {
                    Some(name) => name,
                    None => continue,
                };
                if preferences.contains(&upper) {
                    continue;
                }
                if accepted.iter().any(|a| a.eq_ignore_ascii_case(&upper)) {
                    preferences.push(upper);
                }
            }
            let tokens: Vec<String> = accept
                .split(',')
                .map(|t| t.trim().to_ascii_uppercase())
                .collect();
            for preference in &preferences {
                if tokens.iter().any(|t| t.starts_with(preference.as_str())) {
                    debug!("negotiated response charset {}", preference);
                    return Some(preference.clone());
                }
            }
            None
        }
    }
}

/// Canonical name of a charset the codec can emit, or `None`.
fn emittable(name: &str) -> Option<String> {
    match Charset::from_name(name) {
        Ok(charset) => Some(charset.name().to_string()),
        Err(_) => {
            debug!("cannot emit responses in charset {}, leaving charset unset", name);
            None
        }
    }
}

/// Compresses the response body when allowed and worthwhile.
///
/// Returns the (possibly untouched) body and the applied content-coding.
/// Gzip is preferred when the client accepts both. When the hosting layer
/// compresses on our behalf the body passes through untouched.
pub fn compress_response(
    body: Vec<u8>,
    accept_encoding: Option<&str>,
    compress: bool,
    host_compresses: bool,
) -> (Vec<u8>, Option<CompressionMethod>) {
    if !compress || host_compresses {
        return (body, None);
    }
    let accept = match accept_encoding {
        Some(value) => value,
        None => return (body, None),
    };
    let tokens: Vec<CompressionMethod> = accept
        .split(',')
        .filter_map(|t| CompressionMethod::from_token(t.split(';').next().unwrap_or(t)))
        .collect();
    let method = if tokens.contains(&CompressionMethod::Gzip) {
        CompressionMethod::Gzip
    } else if tokens.contains(&CompressionMethod::Deflate) {
        CompressionMethod::Deflate
    } else {
        return (body, None);
    };

    match deflate(&body, method) {
        Ok(compressed) => {
            debug!(
                "compressed response {} -> {} bytes with {}",
                body.len(),
                compressed.len(),
                method.as_str()
            );
            (compressed, Some(method))
        }
        Err(_) => (body, None),
    }
}

fn deflate(body: &[u8], method: CompressionMethod) -> std::io::Result<Vec<u8>> {
    match method {
        CompressionMethod::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(body)?;
            encoder.finish()
        }
        CompressionMethod::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(body)?;
            encoder.finish()
        }
    }
}

/// Assembles the response headers.
///
/// Content-Length is omitted when the hosting layer compresses the body
/// after us, since our length would be wrong on the wire.
pub fn response_headers(
    content_type: &str,
    body_len: usize,
    encoding: Option<CompressionMethod>,
    host_compresses: bool,
) -> Headers {
    let mut headers = Headers::new();
    headers.insert("Content-Type", content_type);
    let vary = if encoding.is_some() {
        "Accept-Charset, Accept-Encoding"
    } else {
        "Accept-Charset"
    };
    headers.insert("Vary", vary);
    if let Some(method) = encoding {
        headers.insert("Content-Encoding", method.as_str());
    }
    if !host_compresses {
        headers.insert("Content-Length", body_len.to_string());
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: [CompressionMethod; 2] = [CompressionMethod::Gzip, CompressionMethod::Deflate];

    fn gzip(data: &[u8]) -> Vec<u8> {
        deflate(data, CompressionMethod::Gzip).unwrap()
    }

    #[test]
    fn test_plain_body_passes_through() {
        let headers = Headers::new();
        let body = b"<methodCall/>".to_vec();
        let out = decompress_request(&headers, body.clone(), &BOTH).unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn test_gzip_request_inflated() {
        let mut headers = Headers::new();
        headers.insert("Content-Encoding", "gzip");
        let out = decompress_request(&headers, gzip(b"<methodCall/>"), &BOTH).unwrap();
        assert_eq!(out, b"<methodCall/>");
    }

    #[test]
    fn test_x_gzip_token_accepted() {
        let mut headers = Headers::new();
        headers.insert("content-encoding", "x-gzip");
        let out = decompress_request(&headers, gzip(b"<a/>"), &BOTH).unwrap();
        assert_eq!(out, b"<a/>");
    }

    #[test]
    fn test_deflate_request_inflated_zlib_and_raw() {
        let mut headers = Headers::new();
        headers.insert("Content-Encoding", "deflate");

        let zlib = deflate(b"<a/>", CompressionMethod::Deflate).unwrap();
        assert_eq!(decompress_request(&headers, zlib, &BOTH).unwrap(), b"<a/>");

        // raw deflate stream without the zlib wrapper
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<a/>").unwrap();
        let raw = encoder.finish().unwrap();
        assert_eq!(decompress_request(&headers, raw, &BOTH).unwrap(), b"<a/>");
    }

    #[test]
    fn test_unaccepted_encoding_faults() {
        let mut headers = Headers::new();
        headers.insert("Content-Encoding", "gzip");
        let err = decompress_request(&headers, gzip(b"<a/>"), &[CompressionMethod::Deflate])
            .unwrap_err();
        assert_eq!(err.code, 106);
    }

    #[test]
    fn test_unknown_encoding_faults() {
        let mut headers = Headers::new();
        headers.insert("Content-Encoding", "br");
        let err = decompress_request(&headers, b"xxxx".to_vec(), &BOTH).unwrap_err();
        assert_eq!(err.code, 106);
    }

    #[test]
    fn test_corrupt_gzip_faults() {
        let mut headers = Headers::new();
        headers.insert("Content-Encoding", "gzip");
        let err = decompress_request(&headers, b"not gzip at all".to_vec(), &BOTH).unwrap_err();
        assert_eq!(err.code, 107);
    }

    #[test]
    fn test_charset_policy_parsing() {
        assert_eq!(CharsetPolicy::from_config(""), CharsetPolicy::None);
        assert_eq!(CharsetPolicy::from_config("auto"), CharsetPolicy::Auto);
        assert_eq!(CharsetPolicy::from_config("Default"), CharsetPolicy::Default);
        assert_eq!(
            CharsetPolicy::from_config("ISO-8859-1"),
            CharsetPolicy::Fixed("ISO-8859-1".to_string())
        );
    }

    fn default_accepted() -> Vec<String> {
        vec![
            "UTF-8".to_string(),
            "ISO-8859-1".to_string(),
            "US-ASCII".to_string(),
        ]
    }

    #[test]
    fn test_fixed_charset_wins() {
        let chosen = negotiate_response_charset(
            &CharsetPolicy::Fixed("iso-8859-1".to_string()),
            "UTF-8",
            &default_accepted(),
            Some("UTF-8"),
        );
        assert_eq!(chosen.as_deref(), Some("ISO-8859-1"));
    }

    #[test]
    fn test_unsupported_charsets_resolve_to_none() {
        // a fixed charset the codec cannot emit must not be advertised
        let chosen = negotiate_response_charset(
            &CharsetPolicy::Fixed("EUC-JP".to_string()),
            "UTF-8",
            &default_accepted(),
            Some("EUC-JP"),
        );
        assert_eq!(chosen, None);

        // same for a default policy over an unsupported internal encoding
        let chosen = negotiate_response_charset(
            &CharsetPolicy::Default,
            "KOI8-R",
            &default_accepted(),
            None,
        );
        assert_eq!(chosen, None);
    }

    #[test]
    fn test_negotiated_names_are_canonical() {
        let chosen = negotiate_response_charset(
            &CharsetPolicy::Fixed("latin1".to_string()),
            "UTF-8",
            &default_accepted(),
            None,
        );
        assert_eq!(chosen.as_deref(), Some("ISO-8859-1"));

        let chosen = negotiate_response_charset(
            &CharsetPolicy::Default,
            "utf8",
            &default_accepted(),
            None,
        );
        assert_eq!(chosen.as_deref(), Some("UTF-8"));
    }

    #[test]
    fn test_auto_walks_preference_order() {
        // client accepts both; internal encoding (UTF-8) is preferred
        let chosen = negotiate_response_charset(
            &CharsetPolicy::Auto,
            "UTF-8",
            &default_accepted(),
            Some("iso-8859-1, utf-8"),
        );
        assert_eq!(chosen.as_deref(), Some("UTF-8"));

        // client only accepts latin-1
        let chosen = negotiate_response_charset(
            &CharsetPolicy::Auto,
            "UTF-8",
            &default_accepted(),
            Some("ISO-8859-1;q=0.8"),
        );
        assert_eq!(chosen.as_deref(), Some("ISO-8859-1"));
    }

    #[test]
    fn test_auto_without_match_leaves_charset_unset() {
        let chosen = negotiate_response_charset(
            &CharsetPolicy::Auto,
            "UTF-8",
            &default_accepted(),
            Some("Shift_JIS"),
        );
        assert_eq!(chosen, None);
        let chosen =
            negotiate_response_charset(&CharsetPolicy::Auto, "UTF-8", &default_accepted(), None);
        assert_eq!(chosen, None);
    }

    #[test]
    fn test_compression_prefers_gzip() {
        let (body, method) = compress_response(
            b"xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx".to_vec(),
            Some("deflate, gzip"),
            true,
            false,
        );
        assert_eq!(method, Some(CompressionMethod::Gzip));
        let mut out = Vec::new();
        GzDecoder::new(&body[..]).read_to_end(&mut out).unwrap();
        assert_eq!(out, b"xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx");
    }

    #[test]
    fn test_compression_respects_accept_encoding() {
        let (_, method) =
            compress_response(b"data".to_vec(), Some("deflate"), true, false);
        assert_eq!(method, Some(CompressionMethod::Deflate));
        let (_, method) = compress_response(b"data".to_vec(), Some("br"), true, false);
        assert_eq!(method, None);
        let (_, method) = compress_response(b"data".to_vec(), None, true, false);
        assert_eq!(method, None);
    }

    #[test]
    fn test_host_compression_suppresses_ours() {
        let (body, method) =
            compress_response(b"data".to_vec(), Some("gzip"), true, true);
        assert_eq!(method, None);
        assert_eq!(body, b"data");
    }

    #[test]
    fn test_response_headers_full_set() {
        let headers = response_headers(
            "text/xml; charset=UTF-8",
            42,
            Some(CompressionMethod::Deflate),
            false,
        );
        assert_eq!(headers.get("content-type"), Some("text/xml; charset=UTF-8"));
        assert_eq!(headers.get("Vary"), Some("Accept-Charset, Accept-Encoding"));
        assert_eq!(headers.get("Content-Encoding"), Some("deflate"));
        assert_eq!(headers.get("Content-Length"), Some("42"));
    }

    #[test]
    fn test_content_length_omitted_when_host_compresses() {
        let headers = response_headers("text/xml", 42, None, true);
        assert_eq!(headers.get("Content-Length"), None);
        assert_eq!(headers.get("Vary"), Some("Accept-Charset"));
        assert_eq!(headers.get("Content-Encoding"), None);
    }

    #[test]
    fn test_headers_case_insensitive_lookup() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/xml");
        assert_eq!(headers.get("content-type"), Some("text/xml"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/xml"));
        assert_eq!(headers.get("Accept"), None);
    }
}
