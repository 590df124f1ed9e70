//! The XML-RPC wire codec.
//!
//! Parsing builds a [`Value`](crate::value::Value) tree from a `<methodCall>`
//! (or `<methodResponse>`) document; serialization emits a complete
//! `<methodResponse>` with all text entity-escaped for the target charset.
//! Parse failures are reported as faults, never as panics.

use crate::charset::{self, Charset};
use crate::fault::{Fault, FaultCode};
use crate::message::{Payload, Request};
use crate::trace::TraceSink;
use crate::value::{Members, Value};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use roxmltree::{Document, Node};
use tracing::debug;

/// Value trees deeper than this are rejected with a parse fault.
pub const MAX_NESTING_DEPTH: usize = 64;

// Offset added to XML_FAULT_BASE for parser-level syntax errors. roxmltree
// reports no numeric error codes, so every syntax failure maps to this one
// offset and the parser's message carries the variant.
const SYNTAX_ERROR_OFFSET: i32 = 2;

/// Parses an XML-RPC request body into a [`Request`].
///
/// `advisory_charset` is the charset guessed from the transport (see
/// [`charset::guess_encoding`]); it is honored when the document itself does
/// not carry an XML declaration. `nil_extension` controls whether `<nil/>`
/// and `<ex:nil/>` are accepted.
pub fn parse_request(
    body: &[u8],
    advisory_charset: &str,
    nil_extension: bool,
) -> Result<Request, Fault> {
    let text = document_text(body, advisory_charset)?;
    let doc = Document::parse(&text)
        .map_err(|e| Fault::parse_error(SYNTAX_ERROR_OFFSET, e))?;

    let root = doc.root_element();
    if root.tag_name().name() != "methodCall" {
        return Err(Fault::with_detail(
            FaultCode::InvalidRequest,
            format!("expected <methodCall> root, got <{}>", root.tag_name().name()),
        ));
    }

    let mut method: Option<String> = None;
    let mut params: Vec<Value> = Vec::new();
    for child in root.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "methodName" => {
                method = Some(text_content(&child).trim().to_string());
            }
            "params" => {
                for param in child.children().filter(Node::is_element) {
                    if param.tag_name().name() != "param" {
                        return Err(Fault::with_detail(
                            FaultCode::InvalidRequest,
                            format!("unexpected <{}> in <params>", param.tag_name().name()),
                        ));
                    }
                    let value_node = single_element_child(&param, "value")?;
                    params.push(parse_value(&value_node, 0, nil_extension)?);
                }
            }
            other => {
                return Err(Fault::with_detail(
                    FaultCode::InvalidRequest,
                    format!("unexpected <{}> in <methodCall>", other),
                ));
            }
        }
    }

    match method {
        Some(name) if !name.is_empty() => {
            debug!("parsed request for {} with {} params", name, params.len());
            Ok(Request::new(name, params))
        }
        _ => Err(Fault::with_detail(
            FaultCode::InvalidRequest,
            "missing <methodName>",
        )),
    }
}

/// Parses a `<methodResponse>` document into its payload.
pub fn parse_response(body: &[u8]) -> Result<Payload, Fault> {
    let text = document_text(body, "UTF-8")?;
    let doc = Document::parse(&text)
        .map_err(|e| Fault::parse_error(SYNTAX_ERROR_OFFSET, e))?;

    let root = doc.root_element();
    if root.tag_name().name() != "methodResponse" {
        return Err(Fault::with_detail(
            FaultCode::InvalidRequest,
            format!(
                "expected <methodResponse> root, got <{}>",
                root.tag_name().name()
            ),
        ));
    }

    let child = single_any_element_child(&root)?;
    match child.tag_name().name() {
        "params" => {
            let param = single_element_child(&child, "param")?;
            let value_node = single_element_child(&param, "value")?;
            Ok(Payload::Success(parse_value(&value_node, 0, true)?))
        }
        "fault" => {
            let value_node = single_element_child(&child, "value")?;
            let value = parse_value(&value_node, 0, true)?;
            let code = value
                .struct_get("faultCode")
                .ok()
                .flatten()
                .and_then(|v| v.as_i32().ok());
            let message = value
                .struct_get("faultString")
                .ok()
                .flatten()
                .and_then(|v| v.as_str().ok());
            match (code, message) {
                (Some(code), Some(message)) => Ok(Payload::Fault(Fault {
                    code,
                    message: message.to_string(),
                })),
                _ => Err(Fault::with_detail(
                    FaultCode::InvalidRequest,
                    "malformed <fault> struct",
                )),
            }
        }
        other => Err(Fault::with_detail(
            FaultCode::InvalidRequest,
            format!("expected <params> or <fault>, got <{}>", other),
        )),
    }
}

/// Brings the document to UTF-8 text.
///
/// When the document carries an XML declaration its `encoding=` governs;
/// otherwise the advisory charset does. A charset the engine cannot
/// transcode is an `invalid_request` fault.
fn document_text(body: &[u8], advisory: &str) -> Result<String, Fault> {
    let name = if charset::has_xml_declaration(body) {
        charset::xml_declaration_encoding(body).unwrap_or_else(|| "UTF-8".to_string())
    } else {
        advisory.to_string()
    };
    let source = Charset::from_name(&name)
        .map_err(|e| Fault::with_detail(FaultCode::InvalidRequest, e))?;
    let utf8 = charset::transcode(body, source, Charset::Utf8)
        .map_err(|e| Fault::with_detail(FaultCode::InvalidRequest, e))?;
    let mut text = String::from_utf8(utf8)
        .map_err(|_| Fault::with_detail(FaultCode::InvalidRequest, "body is not valid UTF-8"))?;
    if text.starts_with('\u{FEFF}') {
        text.remove(0);
    }
    Ok(text)
}

fn text_content(node: &Node) -> String {
    node.children()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .collect()
}

fn single_element_child<'a, 'input>(
    node: &Node<'a, 'input>,
    expected: &str,
) -> Result<Node<'a, 'input>, Fault> {
    let mut elements = node.children().filter(Node::is_element);
    match (elements.next(), elements.next()) {
        (Some(child), None) if child.tag_name().name() == expected => Ok(child),
        (Some(child), None) => Err(Fault::with_detail(
            FaultCode::InvalidRequest,
            format!(
                "expected <{}> in <{}>, got <{}>",
                expected,
                node.tag_name().name(),
                child.tag_name().name()
            ),
        )),
        _ => Err(Fault::with_detail(
            FaultCode::InvalidRequest,
            format!(
                "expected exactly one <{}> in <{}>",
                expected,
                node.tag_name().name()
            ),
        )),
    }
}

fn single_any_element_child<'a, 'input>(
    node: &Node<'a, 'input>,
) -> Result<Node<'a, 'input>, Fault> {
    let mut elements = node.children().filter(Node::is_element);
    match (elements.next(), elements.next()) {
        (Some(child), None) => Ok(child),
        _ => Err(Fault::with_detail(
            FaultCode::InvalidRequest,
            format!("expected exactly one child in <{}>", node.tag_name().name()),
        )),
    }
}

fn parse_value(node: &Node, depth: usize, nil_extension: bool) -> Result<Value, Fault> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Fault::with_detail(
            FaultCode::InvalidRequest,
            "maximum nesting depth exceeded",
        ));
    }

    let elements: Vec<Node> = node.children().filter(Node::is_element).collect();
    match elements.len() {
        // untagged <value> content is a string, per the standard quirk
        0 => Ok(Value::String(text_content(node))),
        1 => {
            let inner = elements[0];
            // anything other than whitespace around the tagged child is bogus
            let stray = text_content(node);
            if !stray.trim().is_empty() {
                return Err(Fault::with_detail(
                    FaultCode::InvalidRequest,
                    "mixed content in <value>",
                ));
            }
            parse_tagged(&inner, depth, nil_extension)
        }
        n => Err(Fault::with_detail(
            FaultCode::InvalidRequest,
            format!("<value> holds {} elements, expected one", n),
        )),
    }
}

fn parse_tagged(node: &Node, depth: usize, nil_extension: bool) -> Result<Value, Fault> {
    let tag = node.tag_name().name();
    match tag {
        "i4" | "int" => {
            let text = text_content(node);
            text.trim().parse::<i32>().map(Value::Int).map_err(|_| {
                Fault::with_detail(
                    FaultCode::InvalidRequest,
                    format!("invalid <{}> value: {}", tag, text.trim()),
                )
            })
        }
        "boolean" => {
            let text = text_content(node);
            match text.trim() {
                "1" => Ok(Value::Bool(true)),
                "0" => Ok(Value::Bool(false)),
                t if t.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
                t if t.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
                t => Err(Fault::with_detail(
                    FaultCode::InvalidRequest,
                    format!("invalid <boolean> value: {}", t),
                )),
            }
        }
        "string" => Ok(Value::String(text_content(node))),
        "double" => {
            let text = text_content(node);
            text.trim().parse::<f64>().map(Value::Double).map_err(|_| {
                Fault::with_detail(
                    FaultCode::InvalidRequest,
                    format!("invalid <double> value: {}", text.trim()),
                )
            })
        }
        "dateTime.iso8601" => Ok(Value::DateTime(text_content(node).trim().to_string())),
        "base64" => {
            let text: String = text_content(node)
                .chars()
                .filter(|c| !c.is_ascii_whitespace())
                .collect();
            BASE64.decode(text.as_bytes()).map(Value::Base64).map_err(|e| {
                Fault::with_detail(FaultCode::InvalidRequest, format!("invalid <base64>: {}", e))
            })
        }
        // covers <nil/> and the namespaced <ex:nil/>
        "nil" => {
            if nil_extension {
                Ok(Value::Nil)
            } else {
                Err(Fault::with_detail(
                    FaultCode::InvalidRequest,
                    "<nil> received but the nil extension is disabled",
                ))
            }
        }
        "array" => {
            let data = single_element_child(node, "data")?;
            let mut elements = Vec::new();
            for child in data.children().filter(Node::is_element) {
                if child.tag_name().name() != "value" {
                    return Err(Fault::with_detail(
                        FaultCode::InvalidRequest,
                        format!("unexpected <{}> in <data>", child.tag_name().name()),
                    ));
                }
                elements.push(parse_value(&child, depth + 1, nil_extension)?);
            }
            Ok(Value::Array(elements))
        }
        "struct" => {
            let mut members = Members::new();
            for member in node.children().filter(Node::is_element) {
                if member.tag_name().name() != "member" {
                    return Err(Fault::with_detail(
                        FaultCode::InvalidRequest,
                        format!("unexpected <{}> in <struct>", member.tag_name().name()),
                    ));
                }
                let mut name: Option<String> = None;
                let mut value: Option<Value> = None;
                for part in member.children().filter(Node::is_element) {
                    match part.tag_name().name() {
                        "name" => name = Some(text_content(&part)),
                        "value" => value = Some(parse_value(&part, depth + 1, nil_extension)?),
                        other => {
                            return Err(Fault::with_detail(
                                FaultCode::InvalidRequest,
                                format!("unexpected <{}> in <member>", other),
                            ));
                        }
                    }
                }
                match (name, value) {
                    (Some(name), Some(value)) => members.insert(name, value),
                    _ => {
                        return Err(Fault::with_detail(
                            FaultCode::InvalidRequest,
                            "<member> needs both <name> and <value>",
                        ));
                    }
                }
            }
            Ok(Value::Struct(members))
        }
        other => Err(Fault::with_detail(
            FaultCode::InvalidRequest,
            format!("unknown value type <{}>", other),
        )),
    }
}

/// Serializes a single value (including its `<value>` frame).
pub fn serialize_value(value: &Value, target: Charset) -> String {
    let mut out = String::new();
    write_value(&mut out, value, target);
    out
}

fn write_value(out: &mut String, value: &Value, target: Charset) {
    out.push_str("<value>");
    match value {
        Value::Int(v) => {
            out.push_str("<int>");
            out.push_str(&v.to_string());
            out.push_str("</int>");
        }
        Value::Bool(v) => {
            out.push_str("<boolean>");
            out.push(if *v { '1' } else { '0' });
            out.push_str("</boolean>");
        }
        Value::String(v) => {
            out.push_str("<string>");
            out.push_str(&charset::encode_entities(v, target));
            out.push_str("</string>");
        }
        Value::Double(v) => {
            out.push_str("<double>");
            out.push_str(&v.to_string());
            out.push_str("</double>");
        }
        Value::DateTime(v) => {
            out.push_str("<dateTime.iso8601>");
            out.push_str(&charset::encode_entities(v, target));
            out.push_str("</dateTime.iso8601>");
        }
        Value::Base64(v) => {
            out.push_str("<base64>");
            out.push_str(&BASE64.encode(v));
            out.push_str("</base64>");
        }
        Value::Nil => out.push_str("<nil/>"),
        Value::Array(elements) => {
            out.push_str("<array><data>");
            for element in elements {
                write_value(out, element, target);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members.iter() {
                out.push_str("<member><name>");
                out.push_str(&charset::encode_entities(name, target));
                out.push_str("</name>");
                write_value(out, member, target);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }
    out.push_str("</value>");
}

/// Serializes a complete `<methodResponse>` document.
///
/// `charset_name` is the negotiated response charset; `None` emits a bare
/// prologue and UTF-8 bytes. Debug-trace comments, when the sink carries
/// any, land directly after the prologue.
pub fn serialize_response(
    payload: &Payload,
    charset_name: Option<&str>,
    trace: Option<&TraceSink>,
) -> Vec<u8> {
    let (target, declared) = match charset_name {
        None => (Charset::Utf8, None),
        Some(name) => match Charset::from_name(name) {
            Ok(cs) => (cs, Some(cs.name())),
            // negotiation never hands us a charset we cannot emit; this
            // guards direct callers, declaring what is actually encoded
            Err(_) => (Charset::Utf8, Some("UTF-8")),
        },
    };

    let mut doc = String::new();
    match declared {
        Some(name) => {
            doc.push_str("<?xml version=\"1.0\" encoding=\"");
            doc.push_str(name);
            doc.push_str("\"?>\n");
        }
        None => doc.push_str("<?xml version=\"1.0\"?>\n"),
    }
    if let Some(sink) = trace {
        doc.push_str(&sink.comments(target));
    }
    doc.push_str("<methodResponse>\n");
    match payload {
        Payload::Success(value) => {
            doc.push_str("<params>\n<param>\n");
            write_value(&mut doc, value, target);
            doc.push_str("\n</param>\n</params>\n");
        }
        Payload::Fault(fault) => {
            let mut members = Members::new();
            members.insert("faultCode", Value::Int(fault.code));
            members.insert("faultString", Value::String(fault.message.clone()));
            doc.push_str("<fault>\n");
            write_value(&mut doc, &Value::Struct(members), target);
            doc.push_str("\n</fault>\n");
        }
    }
    doc.push_str("</methodResponse>");

    charset::transcode(doc.as_bytes(), Charset::Utf8, target)
        .unwrap_or_else(|_| doc.into_bytes())
}
