//! An XML-RPC server engine.
//!
//! The engine is transport-agnostic: the hosting HTTP layer hands
//! [`Server::service`] the request headers and body it already received and
//! gets back the response body, the response headers and the parsed
//! [`Response`] object. Socket handling, TLS and process bootstrap stay with
//! the host.
//!
//! ```
//! use xmlrpc_core::{Server, ServiceOutcome};
//! use xmlrpc_core::dispatch::{DispatchEntry, Handler, HandlerReturn};
//! use xmlrpc_core::transport::Headers;
//! use xmlrpc_core::value::{TypeTag, Value};
//! use xmlrpc_config::ServerConfig;
//!
//! let mut server = Server::new(ServerConfig::default(), None);
//! server.register(
//!     "echo",
//!     DispatchEntry::new(Handler::typed(|_, request| {
//!         Ok(HandlerReturn::Value(request.params[0].clone()))
//!     }))
//!     .with_signatures(vec![vec![TypeTag::String, TypeTag::String]]),
//! ).unwrap();
//!
//! let body = br#"<?xml version="1.0"?>
//! <methodCall>
//!   <methodName>echo</methodName>
//!   <params><param><value><string>hi</string></value></param></params>
//! </methodCall>"#;
//! let outcome: ServiceOutcome = server.service(&Headers::new(), body).unwrap();
//! assert!(!outcome.response.is_fault());
//! ```

pub mod charset;
pub mod codec;
pub mod dispatch;
pub mod fault;
pub mod introspection;
pub mod message;
pub mod metrics;
pub mod native;
pub mod server;
pub mod trace;
pub mod transport;
pub mod value;

pub use fault::{Fault, FaultCode};
pub use message::{Payload, Request, Response};
pub use server::{Server, ServiceOutcome};
pub use value::{Members, TypeTag, Value};
