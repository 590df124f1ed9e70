//! Configuration Example
//!
//! Demonstrates loading engine configuration from YAML and how the settings
//! change the wire behavior.
//!
//! Run with: cargo run --example server_config

use xmlrpc_config::ServerConfig;
use xmlrpc_core::transport::Headers;
use xmlrpc_core::Server;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Configuration Example\n");

    // 1. Parse a configuration from YAML
    println!("1. Parsing configuration from YAML:");
    let yaml = r#"
debug: 1
compress_response: true
response_charset_encoding: "auto"
accepted_compression:
  - gzip
nil_extension: true
"#;
    let config = ServerConfig::parse(yaml)?;
    println!("   debug level: {}", config.debug);
    println!("   compress responses: {}", config.compress_response);
    println!("   charset policy: {:?}", config.response_charset_encoding);
    println!("   nil extension: {}", config.nil_extension);

    // 2. Drive a request through a server built from it
    println!("\n2. Serving a request with charset negotiation:");
    let mut server = Server::new(config, None);
    server.register_native("version", |_, _| {
        Ok(xmlrpc_core::dispatch::HandlerReturn::Native(serde_json::json!("1.0.0")))
    })?;

    let mut headers = Headers::new();
    headers.insert("Accept-Charset", "ISO-8859-1");
    let body = br#"<methodCall><methodName>version</methodName><params/></methodCall>"#;
    let outcome = server.service(&headers, body)?;
    println!(
        "   negotiated Content-Type: {}",
        outcome.headers.get("Content-Type").unwrap_or("-")
    );

    // 3. Invalid configuration is rejected
    println!("\n3. Configuration validation:");
    match ServerConfig::parse("debug: 9") {
        Ok(_) => println!("   Unexpectedly accepted an invalid config"),
        Err(e) => println!("   Correctly rejected invalid config: {}", e),
    }

    println!("\nExample completed successfully!");
    Ok(())
}
