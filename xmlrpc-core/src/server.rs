//! The request driver.
//!
//! [`Server`] owns the configuration and the dispatch map and drives one
//! complete request/response cycle per [`Server::service`] call: decompress,
//! parse, dispatch, serialize, compress, emit. Any stage may short-circuit
//! to serialization with a fault; compression and header assembly always
//! run, so even a fault travels back with correct transport headers.

use crate::charset;
use crate::codec;
use crate::dispatch::{
    self, CallContext, DispatchEntry, DispatchMap, Handler, HandlerError, HandlerResult,
    HandlerReturn, JsonValue, RegisterError,
};
use crate::message::{Payload, Request, Response};
use crate::metrics::EngineMetrics;
use crate::trace::TraceSink;
use crate::transport::{self, CharsetPolicy, Headers};
use prometheus::Registry;
use tracing::debug;
use xmlrpc_config::{ParamsType, ServerConfig};

/// An XML-RPC server engine instance.
///
/// The dispatch map is populated before serving and treated as read-only
/// during requests, so a `&Server` can be shared across worker threads.
pub struct Server {
    config: ServerConfig,
    dispatch: DispatchMap,
    metrics: Option<EngineMetrics>,
}

/// What [`Server::service`] hands back: the wire bytes, the response
/// headers, and the response object for callers that want to inspect the
/// outcome without re-parsing it.
#[derive(Debug)]
pub struct ServiceOutcome {
    pub body: Vec<u8>,
    pub headers: Headers,
    pub response: Response,
}

impl Server {
    pub fn new(config: ServerConfig, registry: Option<&Registry>) -> Self {
        let metrics = registry.map(EngineMetrics::new);
        Server {
            config,
            dispatch: DispatchMap::new(),
            metrics,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatch_map(&self) -> &DispatchMap {
        &self.dispatch
    }

    /// Registers a dispatch entry. Names starting with `system.` are
    /// reserved and rejected.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        entry: DispatchEntry,
    ) -> Result<(), RegisterError> {
        self.dispatch.register(name, entry)
    }

    /// Registers a typed-convention handler without metadata.
    pub fn register_typed(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&CallContext<'_>, &Request) -> HandlerResult + Send + Sync + 'static,
    ) -> Result<(), RegisterError> {
        self.register(name, DispatchEntry::new(Handler::typed(f)))
    }

    /// Registers a native-convention handler without metadata.
    pub fn register_native(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&CallContext<'_>, &[JsonValue]) -> HandlerResult + Send + Sync + 'static,
    ) -> Result<(), RegisterError> {
        self.register(name, DispatchEntry::new(Handler::native(f)))
    }

    /// Registers an epi-convention handler without metadata.
    pub fn register_epi(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&CallContext<'_>, &str, &[JsonValue], &JsonValue) -> Result<JsonValue, HandlerError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), RegisterError> {
        self.register(name, DispatchEntry::new(Handler::epi(f)))
    }

    /// Registers a plain function over native values, wrapped under the
    /// server-wide calling convention (`functions_parameters_type`).
    pub fn register_fn(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&CallContext<'_>, &[JsonValue]) -> Result<JsonValue, HandlerError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), RegisterError> {
        let handler = match self.config.functions_parameters_type {
            ParamsType::TypedValue => Handler::typed(move |ctx, request| {
                let params: Vec<JsonValue> = request
                    .params
                    .iter()
                    .map(crate::native::value_to_native)
                    .collect();
                f(ctx, &params).map(HandlerReturn::Native)
            }),
            ParamsType::NativeValue => {
                Handler::native(move |ctx, params| f(ctx, params).map(HandlerReturn::Native))
            }
            ParamsType::Epi => Handler::epi(move |ctx, _method, params, _user_data| f(ctx, params)),
        };
        self.register(name, DispatchEntry::new(handler))
    }

    /// Executes a request directly, outside the HTTP path. No trace is
    /// collected and no transport negotiation happens.
    pub fn execute(&self, request: &Request) -> Result<Payload, HandlerError> {
        let sink = TraceSink::new(0);
        let ctx = CallContext::new(&sink, &self.config.user_data);
        dispatch::execute(self, &ctx, request)
    }

    /// Drives one complete request/response cycle.
    ///
    /// Returns `Err` only when a handler fails under the `Propagate`
    /// exception-handling policy; every other failure is answered with a
    /// fault response on the wire.
    pub fn service(&self, headers: &Headers, body: &[u8]) -> Result<ServiceOutcome, HandlerError> {
        let sink = TraceSink::new(self.config.debug);
        let (payload, raw_body, method) = self.dispatch_body(headers, body, &sink)?;

        match &payload {
            Payload::Success(_) => {
                debug!("{} answered", method.as_deref().unwrap_or("_invalid"))
            }
            Payload::Fault(fault) => debug!(
                "{} resolved to fault {}: {}",
                method.as_deref().unwrap_or("_invalid"),
                fault.code,
                fault.message
            ),
        }

        let policy = CharsetPolicy::from_config(&self.config.response_charset_encoding);
        let charset = transport::negotiate_response_charset(
            &policy,
            &self.config.internal_encoding,
            &self.config.accepted_charset_encodings,
            headers.get("Accept-Charset"),
        );
        let content_type = match &charset {
            Some(name) => format!("text/xml; charset={}", name),
            None => "text/xml".to_string(),
        };
        let xml = codec::serialize_response(&payload, charset.as_deref(), Some(&sink));

        let (wire_body, encoding) = transport::compress_response(
            xml,
            headers.get("Accept-Encoding"),
            self.config.compress_response,
            self.config.host_compresses_response,
        );
        let response_headers = transport::response_headers(
            &content_type,
            wire_body.len(),
            encoding,
            self.config.host_compresses_response,
        );

        if let Some(metrics) = &self.metrics {
            let outcome = if payload.is_fault() { "fault" } else { "ok" };
            metrics.record_request(
                method.as_deref().unwrap_or("_invalid"),
                outcome,
                body.len(),
                wire_body.len(),
            );
            if let Payload::Fault(fault) = &payload {
                metrics.record_fault(fault.code);
            }
        }

        let response = Response::new(payload, raw_body, content_type);
        Ok(ServiceOutcome {
            body: wire_body,
            headers: response_headers,
            response,
        })
    }

    /// Decompress, parse and dispatch; transport and protocol failures come
    /// back as fault payloads with the method name unresolved.
    fn dispatch_body(
        &self,
        headers: &Headers,
        body: &[u8],
        sink: &TraceSink,
    ) -> Result<(Payload, Vec<u8>, Option<String>), HandlerError> {
        let decoded = match transport::decompress_request(
            headers,
            body.to_vec(),
            &self.config.accepted_compression,
        ) {
            Ok(decoded) => decoded,
            Err(fault) => return Ok((Payload::Fault(fault), body.to_vec(), None)),
        };
        sink.record_raw_request(&decoded);

        let advisory = charset::guess_encoding(headers.get("Content-Type"), &decoded);
        sink.trace(format!("request charset guessed as {}", advisory));
        let request = match codec::parse_request(&decoded, &advisory, self.config.nil_extension) {
            Ok(request) => request,
            Err(fault) => return Ok((Payload::Fault(fault), decoded, None)),
        };

        let ctx = CallContext::new(sink, &self.config.user_data);
        let payload = dispatch::execute(self, &ctx, &request)?;
        Ok((payload, decoded, Some(request.method)))
    }
}
