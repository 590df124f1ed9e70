//! Echo Server Example
//!
//! Demonstrates embedding the engine: build a dispatch map, feed it a raw
//! request body the way an HTTP layer would, and inspect the outcome.
//!
//! Run with: cargo run --example echo_server

use xmlrpc_config::ServerConfig;
use xmlrpc_core::dispatch::{DispatchEntry, Handler, HandlerReturn};
use xmlrpc_core::transport::Headers;
use xmlrpc_core::value::{TypeTag, Value};
use xmlrpc_core::Server;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    println!("XML-RPC Echo Server Example\n");

    let mut server = Server::new(ServerConfig::default(), None);
    server.register(
        "echo",
        DispatchEntry::new(Handler::typed(|ctx, request| {
            ctx.debug("echo invoked");
            Ok(HandlerReturn::Value(
                request.params.first().cloned().unwrap_or(Value::Nil),
            ))
        }))
        .with_signatures(vec![vec![TypeTag::String, TypeTag::String]])
        .with_doc("Returns its only argument unchanged"),
    )?;
    server.register_native("sum", |_, params| {
        let total: i64 = params.iter().filter_map(|p| p.as_i64()).sum();
        Ok(HandlerReturn::Native(serde_json::json!(total)))
    })?;

    // 1. A successful call
    println!("1. Calling echo(\"hello world\"):");
    let body = br#"<?xml version="1.0"?>
<methodCall>
  <methodName>echo</methodName>
  <params><param><value><string>hello world</string></value></param></params>
</methodCall>"#;
    let outcome = server.service(&Headers::new(), body)?;
    println!("   headers:");
    for (name, value) in outcome.headers.iter() {
        println!("     {}: {}", name, value);
    }
    println!("   body:\n{}\n", String::from_utf8_lossy(&outcome.body));

    // 2. A fault
    println!("2. Calling an unregistered method:");
    let body = br#"<methodCall><methodName>missing</methodName></methodCall>"#;
    let outcome = server.service(&Headers::new(), body)?;
    if let Some(fault) = outcome.response.payload.fault() {
        println!("   fault {}: {}\n", fault.code, fault.message);
    }

    // 3. Introspection
    println!("3. Asking the server what it serves:");
    let body = br#"<methodCall><methodName>system.listMethods</methodName><params/></methodCall>"#;
    let outcome = server.service(&Headers::new(), body)?;
    if let Some(Value::Array(names)) = outcome.response.payload.value() {
        for name in names {
            if let Ok(name) = name.as_str() {
                println!("   - {}", name);
            }
        }
    }

    println!("\nExample completed successfully!");
    Ok(())
}
