//! End-to-end tests driving the full request/response cycle:
//! decompress -> parse -> dispatch -> serialize -> compress -> emit.

use flate2::read::ZlibDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use xmlrpc_config::ServerConfig;
use xmlrpc_core::dispatch::{DispatchEntry, Handler, HandlerError, HandlerReturn};
use xmlrpc_core::transport::Headers;
use xmlrpc_core::value::{TypeTag, Value};
use xmlrpc_core::{codec, FaultCode, Payload, Server};

fn build_server(config: ServerConfig) -> Server {
    let mut server = Server::new(config, None);
    server
        .register(
            "echo",
            DispatchEntry::new(Handler::typed(|_, request| {
                Ok(HandlerReturn::Value(
                    request.params.first().cloned().unwrap_or(Value::Nil),
                ))
            }))
            .with_signatures(vec![vec![TypeTag::String, TypeTag::String]])
            .with_doc("Echoes its only argument"),
        )
        .unwrap();
    server
        .register(
            "add",
            DispatchEntry::new(Handler::typed(|_, request| {
                let a = request.params[0].as_i32().map_err(|e| {
                    HandlerError::new(1, e.to_string())
                })?;
                let b = request.params[1].as_i32().map_err(|e| {
                    HandlerError::new(1, e.to_string())
                })?;
                Ok(HandlerReturn::Value(Value::Int(a + b)))
            }))
            .with_signatures(vec![vec![TypeTag::Int, TypeTag::Int, TypeTag::Int]]),
        )
        .unwrap();
    server
}

fn call(server: &Server, headers: &Headers, body: &[u8]) -> (Vec<u8>, Headers, Payload) {
    let outcome = server.service(headers, body).unwrap();
    let wire_payload = {
        let decoded = match outcome.headers.get("Content-Encoding") {
            Some("deflate") => {
                let mut out = Vec::new();
                ZlibDecoder::new(&outcome.body[..])
                    .read_to_end(&mut out)
                    .unwrap();
                out
            }
            Some("gzip") => {
                let mut out = Vec::new();
                flate2::read::GzDecoder::new(&outcome.body[..])
                    .read_to_end(&mut out)
                    .unwrap();
                out
            }
            _ => outcome.body.clone(),
        };
        codec::parse_response(&decoded).unwrap()
    };
    // the parsed wire payload and the returned response object must agree
    assert_eq!(wire_payload.is_fault(), outcome.response.is_fault());
    (outcome.body, outcome.headers, wire_payload)
}

const ECHO_CALL: &[u8] = br#"<?xml version="1.0"?><methodCall><methodName>echo</methodName><params><param><value><string>hi</string></value></param></params></methodCall>"#;

#[test]
fn test_echo_end_to_end() {
    let server = build_server(ServerConfig::default());
    let (body, headers, payload) = call(&server, &Headers::new(), ECHO_CALL);

    assert_eq!(payload, Payload::Success(Value::from("hi")));
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("<methodResponse>"));
    assert!(text.contains("<params>"));
    assert!(text.contains("<value><string>hi</string></value>"));

    assert_eq!(headers.get("Content-Type"), Some("text/xml"));
    assert_eq!(headers.get("Vary"), Some("Accept-Charset"));
    assert_eq!(
        headers.get("Content-Length"),
        Some(text.len().to_string().as_str())
    );
}

#[test]
fn test_raw_body_retained_on_response() {
    let server = build_server(ServerConfig::default());
    let outcome = server.service(&Headers::new(), ECHO_CALL).unwrap();
    assert_eq!(outcome.response.raw_body, ECHO_CALL);
    assert_eq!(outcome.response.content_type, "text/xml");
}

#[test]
fn test_unknown_method_faults() {
    let server = build_server(ServerConfig::default());
    let body = br#"<?xml version="1.0"?><methodCall><methodName>missing</methodName><params/></methodCall>"#;
    let (_, _, payload) = call(&server, &Headers::new(), body);
    let fault = payload.fault().unwrap();
    assert_eq!(fault.code, FaultCode::UnknownMethod.code());
    assert!(fault.message.starts_with("Unknown method"));
}

#[test]
fn test_signature_mismatch_names_offending_param() {
    let server = build_server(ServerConfig::default());
    let body = br#"<?xml version="1.0"?><methodCall><methodName>add</methodName><params><param><value><string>a</string></value></param><param><value><string>b</string></value></param></params></methodCall>"#;
    let (_, _, payload) = call(&server, &Headers::new(), body);
    let fault = payload.fault().unwrap();
    assert_eq!(fault.code, FaultCode::IncorrectParams.code());
    assert!(fault.message.contains("Wanted int, got string at param 1"));
}

#[test]
fn test_fault_framing_on_the_wire() {
    let server = build_server(ServerConfig::default());
    let body =
        br#"<methodCall><methodName>missing</methodName></methodCall>"#;
    let outcome = server.service(&Headers::new(), body).unwrap();
    let text = String::from_utf8(outcome.body).unwrap();
    assert!(text.contains("<fault>"));
    assert!(text.contains("<name>faultCode</name>"));
    assert!(text.contains("<name>faultString</name>"));
    // exactly the two members of the fault struct
    assert_eq!(text.matches("<member>").count(), 2);
}

#[test]
fn test_multicall_end_to_end() {
    let server = build_server(ServerConfig::default());
    let body = br#"<?xml version="1.0"?>
<methodCall>
  <methodName>system.multicall</methodName>
  <params><param><value><array><data>
    <value><struct>
      <member><name>methodName</name><value><string>echo</string></value></member>
      <member><name>params</name><value><array><data><value><string>a</string></value></data></array></value></member>
    </struct></value>
    <value><struct>
      <member><name>params</name><value><array><data/></array></value></member>
    </struct></value>
  </data></array></value></param></params>
</methodCall>"#;
    let (_, _, payload) = call(&server, &Headers::new(), body);
    let results = match payload {
        Payload::Success(Value::Array(results)) => results,
        other => panic!("unexpected payload: {:?}", other),
    };
    assert_eq!(results.len(), 2);

    // element 0: a one-element array wrapping the echoed string
    assert_eq!(results[0], Value::Array(vec![Value::from("a")]));

    // element 1: a fault struct for the missing methodName
    assert_eq!(
        results[1].struct_get("faultCode").unwrap().unwrap(),
        &Value::Int(FaultCode::MulticallNoMethod.code())
    );
    assert!(results[1].struct_get("faultString").unwrap().is_some());
}

#[test]
fn test_compressed_round_trip() {
    let mut config = ServerConfig::default();
    config.compress_response = true;
    let server = build_server(config);

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(ECHO_CALL).unwrap();
    let compressed_request = encoder.finish().unwrap();

    let mut headers = Headers::new();
    headers.insert("Content-Encoding", "gzip");
    headers.insert("Accept-Encoding", "deflate");

    let outcome = server.service(&headers, &compressed_request).unwrap();
    assert_eq!(outcome.headers.get("Content-Encoding"), Some("deflate"));
    assert_eq!(
        outcome.headers.get("Vary"),
        Some("Accept-Charset, Accept-Encoding")
    );
    // the engine is the one compressing, so it still knows the length
    assert_eq!(
        outcome.headers.get("Content-Length"),
        Some(outcome.body.len().to_string().as_str())
    );

    let mut inflated = Vec::new();
    ZlibDecoder::new(&outcome.body[..])
        .read_to_end(&mut inflated)
        .unwrap();
    match codec::parse_response(&inflated).unwrap() {
        Payload::Success(value) => assert_eq!(value, Value::from("hi")),
        Payload::Fault(fault) => panic!("unexpected fault: {}", fault),
    }

    // compression transparency: same bytes as the uncompressed path
    let plain = server.service(&Headers::new(), ECHO_CALL).unwrap();
    assert_eq!(inflated, plain.body);
}

#[test]
fn test_host_compression_omits_content_length() {
    let mut config = ServerConfig::default();
    config.compress_response = true;
    config.host_compresses_response = true;
    let server = build_server(config);

    let mut headers = Headers::new();
    headers.insert("Accept-Encoding", "gzip");
    let outcome = server.service(&headers, ECHO_CALL).unwrap();
    // the host layer compresses; the engine must not double-compress nor
    // claim a length it cannot know
    assert_eq!(outcome.headers.get("Content-Encoding"), None);
    assert_eq!(outcome.headers.get("Content-Length"), None);
    assert!(String::from_utf8(outcome.body).unwrap().contains("<methodResponse>"));
}

#[test]
fn test_unaccepted_request_compression_faults() {
    let mut config = ServerConfig::default();
    config.accepted_compression = vec![];
    let server = build_server(config);

    let mut headers = Headers::new();
    headers.insert("Content-Encoding", "gzip");
    let (_, _, payload) = call(&server, &headers, b"garbage");
    assert_eq!(
        payload.fault().unwrap().code,
        FaultCode::ServerCannotDecompress.code()
    );
}

#[test]
fn test_corrupt_compressed_body_faults() {
    let server = build_server(ServerConfig::default());
    let mut headers = Headers::new();
    headers.insert("Content-Encoding", "gzip");
    let (_, _, payload) = call(&server, &headers, b"definitely not gzip");
    assert_eq!(
        payload.fault().unwrap().code,
        FaultCode::ServerDecompressFail.code()
    );
}

#[test]
fn test_charset_negotiation_ascii_response() {
    let mut config = ServerConfig::default();
    config.response_charset_encoding = "auto".to_string();
    let server = build_server(config);

    let body = br#"<?xml version="1.0"?><methodCall><methodName>echo</methodName><params><param><value><string>h&#233;llo</string></value></param></params></methodCall>"#;
    let mut headers = Headers::new();
    headers.insert("Accept-Charset", "US-ASCII");

    let outcome = server.service(&headers, body).unwrap();
    assert_eq!(
        outcome.headers.get("Content-Type"),
        Some("text/xml; charset=US-ASCII")
    );
    assert!(outcome.body.iter().all(|b| b.is_ascii()));
    let text = String::from_utf8(outcome.body.clone()).unwrap();
    assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"US-ASCII\"?>"));
    assert!(text.contains("&#233;"));

    match codec::parse_response(&outcome.body).unwrap() {
        Payload::Success(value) => assert_eq!(value, Value::from("héllo")),
        Payload::Fault(fault) => panic!("unexpected fault: {}", fault),
    }
}

#[test]
fn test_charset_negotiation_no_match_leaves_charset_out() {
    let mut config = ServerConfig::default();
    config.response_charset_encoding = "auto".to_string();
    let server = build_server(config);

    let mut headers = Headers::new();
    headers.insert("Accept-Charset", "Shift_JIS");
    let outcome = server.service(&headers, ECHO_CALL).unwrap();
    assert_eq!(outcome.headers.get("Content-Type"), Some("text/xml"));
    assert!(String::from_utf8(outcome.body)
        .unwrap()
        .starts_with("<?xml version=\"1.0\"?>"));
}

#[test]
fn test_unsupported_fixed_charset_stays_consistent() {
    // a misconfigured fixed charset must not leave the Content-Type
    // parameter disagreeing with the XML prologue: both stay unset
    let mut config = ServerConfig::default();
    config.response_charset_encoding = "EUC-JP".to_string();
    let server = build_server(config);

    let outcome = server.service(&Headers::new(), ECHO_CALL).unwrap();
    assert_eq!(outcome.headers.get("Content-Type"), Some("text/xml"));
    let text = String::from_utf8(outcome.body).unwrap();
    assert!(text.starts_with("<?xml version=\"1.0\"?>"));
    assert!(!text.contains("encoding="));
}

#[test]
fn test_fixed_charset_prologue_matches_content_type() {
    let mut config = ServerConfig::default();
    config.response_charset_encoding = "latin1".to_string();
    let server = build_server(config);

    let outcome = server.service(&Headers::new(), ECHO_CALL).unwrap();
    // both surfaces carry the same canonical name
    assert_eq!(
        outcome.headers.get("Content-Type"),
        Some("text/xml; charset=ISO-8859-1")
    );
    let text = String::from_utf8(outcome.body).unwrap();
    assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>"));
}

#[test]
fn test_latin1_request_with_advisory_charset() {
    let server = build_server(ServerConfig::default());
    let mut body = b"<methodCall><methodName>echo</methodName><params><param><value><string>caf"
        .to_vec();
    body.push(0xE9);
    body.extend_from_slice(b"</string></value></param></params></methodCall>");

    let mut headers = Headers::new();
    headers.insert("Content-Type", "text/xml; charset=ISO-8859-1");
    let (_, _, payload) = call(&server, &headers, &body);
    assert_eq!(payload, Payload::Success(Value::from("café")));
}

#[test]
fn test_nil_extension_round_trip() {
    let mut config = ServerConfig::default();
    config.nil_extension = true;
    let mut server = Server::new(config, None);
    server
        .register(
            "identity",
            DispatchEntry::new(Handler::typed(|_, request| {
                Ok(HandlerReturn::Value(request.params[0].clone()))
            })),
        )
        .unwrap();

    let body = br#"<methodCall><methodName>identity</methodName><params><param><value><nil/></value></param></params></methodCall>"#;
    let outcome = server.service(&Headers::new(), body).unwrap();
    assert!(String::from_utf8(outcome.body).unwrap().contains("<nil/>"));
}

#[test]
fn test_get_capabilities_end_to_end() {
    let mut config = ServerConfig::default();
    config.nil_extension = true;
    let server = build_server(config);
    let body = br#"<methodCall><methodName>system.getCapabilities</methodName><params/></methodCall>"#;
    let (_, _, payload) = call(&server, &Headers::new(), body);
    let caps = payload.value().unwrap();
    for key in ["xmlrpc", "system.multicall", "introspection", "nil"] {
        let entry = caps
            .struct_get(key)
            .unwrap()
            .unwrap_or_else(|| panic!("missing capability {}", key));
        assert!(entry.struct_get("specUrl").unwrap().unwrap().as_str().is_ok());
        assert!(entry
            .struct_get("specVersion")
            .unwrap()
            .unwrap()
            .as_i32()
            .is_ok());
    }
}

#[test]
fn test_debug_trace_embedded_after_prologue() {
    let mut config = ServerConfig::default();
    config.debug = 2;
    let mut server = Server::new(config, None);
    server
        .register(
            "noisy",
            DispatchEntry::new(Handler::typed(|ctx, _| {
                ctx.debug("handler was here");
                Ok(HandlerReturn::Value(Value::from("done")))
            })),
        )
        .unwrap();

    let body = br#"<methodCall><methodName>noisy</methodName><params/></methodCall>"#;
    let outcome = server.service(&Headers::new(), body).unwrap();
    let text = String::from_utf8(outcome.body).unwrap();

    let prologue_end = text.find("?>").unwrap() + 2;
    let response_start = text.find("<methodResponse>").unwrap();
    let between = &text[prologue_end..response_start];
    assert!(between.contains("<!-- SERVER DEBUG INFO (BASE64 ENCODED):"));
    assert!(between.contains("<!-- DEBUG INFO:"));
    assert!(between.contains("handler was here"));
}

#[test]
fn test_debug_zero_emits_no_comments() {
    let server = build_server(ServerConfig::default());
    let outcome = server.service(&Headers::new(), ECHO_CALL).unwrap();
    assert!(!String::from_utf8(outcome.body).unwrap().contains("<!--"));
}

#[test]
fn test_propagate_policy_escapes_service() {
    let mut config = ServerConfig::default();
    config.exception_handling = xmlrpc_config::ExceptionHandling::Propagate;
    let mut server = Server::new(config, None);
    server
        .register(
            "fail",
            DispatchEntry::new(Handler::typed(|_, _| {
                Err(HandlerError::new(7, "cannot continue"))
            })),
        )
        .unwrap();

    let body = br#"<methodCall><methodName>fail</methodName><params/></methodCall>"#;
    let err = server.service(&Headers::new(), body).unwrap_err();
    assert_eq!(err, HandlerError::new(7, "cannot continue"));
}

#[test]
fn test_concurrent_requests_share_one_server() {
    let server = build_server(ServerConfig::default());
    std::thread::scope(|scope| {
        for i in 0..8 {
            let server = &server;
            scope.spawn(move || {
                let body = format!(
                    "<methodCall><methodName>echo</methodName><params><param>\
                     <value><string>worker {}</string></value></param></params></methodCall>",
                    i
                );
                for _ in 0..50 {
                    let outcome = server.service(&Headers::new(), body.as_bytes()).unwrap();
                    match &outcome.response.payload {
                        Payload::Success(value) => {
                            assert_eq!(value, &Value::from(format!("worker {}", i)));
                        }
                        Payload::Fault(fault) => panic!("unexpected fault: {}", fault),
                    }
                }
            });
        }
    });
}

#[test]
fn test_malformed_xml_answers_with_parse_fault() {
    let server = build_server(ServerConfig::default());
    let (_, headers, payload) = call(&server, &Headers::new(), b"this is not xml");
    let fault = payload.fault().unwrap();
    assert!(fault.code >= 100 && fault.code < 200);
    // transport framing still happens for fault responses
    assert!(headers.get("Content-Length").is_some());
}
