//! The dispatch engine.
//!
//! A name-keyed map of handler entries, a signature checker, and the
//! execution path that marshals parameters per calling convention and
//! normalizes whatever the handler produced into a response payload.
//! Handler failures and panics are converted to faults (or propagated)
//! according to the configured exception-handling policy.

use crate::fault::{Fault, FaultCode};
use crate::introspection;
use crate::message::{Payload, Request};
use crate::native::{native_to_value, value_to_native};
use crate::server::Server;
use crate::trace::TraceSink;
use crate::value::{TypeTag, Value};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use tracing::{debug, warn};
use xmlrpc_config::{ExceptionHandling, ParamsType};

pub type JsonValue = serde_json::Value;

/// Per-request context handed to every handler: the diagnostics sink plus
/// the server's opaque user data.
pub struct CallContext<'a> {
    sink: &'a TraceSink,
    user_data: &'a JsonValue,
}

impl<'a> CallContext<'a> {
    pub fn new(sink: &'a TraceSink, user_data: &'a JsonValue) -> Self {
        CallContext { sink, user_data }
    }

    /// Emits a user-facing debug message (shown at debug level >= 1).
    pub fn debug(&self, message: impl Into<String>) {
        self.sink.debug_msg(message);
    }

    /// Emits a warning captured into the trace at debug level >= 3.
    pub fn warn(&self, message: impl Into<String>) {
        self.sink.warning(message);
    }

    pub fn user_data(&self) -> &JsonValue {
        self.user_data
    }

    pub(crate) fn sink(&self) -> &TraceSink {
        self.sink
    }
}

/// A failure raised by a handler instead of a fault return.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerError {
    pub code: i32,
    pub message: String,
}

impl HandlerError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        HandlerError {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for HandlerError {}

/// What a handler may hand back: a typed value, an explicit fault, or a
/// native value that the engine encodes.
#[derive(Debug)]
pub enum HandlerReturn {
    Value(Value),
    Fault(Fault),
    Native(JsonValue),
}

impl From<Value> for HandlerReturn {
    fn from(value: Value) -> Self {
        HandlerReturn::Value(value)
    }
}

impl From<Fault> for HandlerReturn {
    fn from(fault: Fault) -> Self {
        HandlerReturn::Fault(fault)
    }
}

pub type HandlerResult = Result<HandlerReturn, HandlerError>;

pub type TypedFn = dyn Fn(&CallContext<'_>, &Request) -> HandlerResult + Send + Sync;
pub type NativeFn = dyn Fn(&CallContext<'_>, &[JsonValue]) -> HandlerResult + Send + Sync;
pub type EpiFn = dyn Fn(&CallContext<'_>, &str, &[JsonValue], &JsonValue) -> Result<JsonValue, HandlerError>
    + Send
    + Sync;

/// A registered handler, tagged by its calling convention.
///
/// `Typed` receives the full request; `Native` receives unwrapped native
/// parameters; `Epi` receives `(method, params, user_data)` and returns a
/// native value, where a mapping carrying `faultCode`/`faultString` becomes
/// a fault.
pub enum Handler {
    Typed(Box<TypedFn>),
    Native(Box<NativeFn>),
    Epi(Box<EpiFn>),
}

impl Handler {
    pub fn typed(
        f: impl Fn(&CallContext<'_>, &Request) -> HandlerResult + Send + Sync + 'static,
    ) -> Self {
        Handler::Typed(Box::new(f))
    }

    pub fn native(
        f: impl Fn(&CallContext<'_>, &[JsonValue]) -> HandlerResult + Send + Sync + 'static,
    ) -> Self {
        Handler::Native(Box::new(f))
    }

    pub fn epi(
        f: impl Fn(&CallContext<'_>, &str, &[JsonValue], &JsonValue) -> Result<JsonValue, HandlerError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Handler::Epi(Box::new(f))
    }

    /// The calling convention this handler is invoked under.
    pub fn convention(&self) -> ParamsType {
        match self {
            Handler::Typed(_) => ParamsType::TypedValue,
            Handler::Native(_) => ParamsType::NativeValue,
            Handler::Epi(_) => ParamsType::Epi,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:?})", self.convention())
    }
}

/// One dispatch-map record: the handler plus its introspection metadata.
#[derive(Debug)]
pub struct DispatchEntry {
    pub handler: Handler,
    /// Alternative signatures, each `[return, param1, ...]`.
    pub signatures: Option<Vec<Vec<TypeTag>>>,
    /// Human description served by `system.methodHelp`.
    pub doc: Option<String>,
    /// Per-parameter descriptions, parallel to `signatures`.
    pub signature_docs: Option<Vec<Vec<String>>>,
}

impl DispatchEntry {
    pub fn new(handler: Handler) -> Self {
        DispatchEntry {
            handler,
            signatures: None,
            doc: None,
            signature_docs: None,
        }
    }

    pub fn with_signatures(mut self, signatures: Vec<Vec<TypeTag>>) -> Self {
        self.signatures = Some(signatures);
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn with_signature_docs(mut self, docs: Vec<Vec<String>>) -> Self {
        self.signature_docs = Some(docs);
        self
    }

    /// The effective calling convention for this entry.
    pub fn parameters_type(&self) -> ParamsType {
        self.handler.convention()
    }
}

/// Error from [`DispatchMap::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// The `system.` prefix is reserved for the built-in methods.
    ReservedName(String),
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::ReservedName(name) => {
                write!(f, "method name {} is reserved for system methods", name)
            }
        }
    }
}

impl std::error::Error for RegisterError {}

/// The user dispatch map, preserving registration order for introspection.
///
/// The map is built before serving and treated as read-only during a
/// request; re-registering a name replaces its entry in place.
#[derive(Debug, Default)]
pub struct DispatchMap {
    entries: HashMap<String, DispatchEntry>,
    order: Vec<String>,
}

impl DispatchMap {
    pub fn new() -> Self {
        DispatchMap {
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        entry: DispatchEntry,
    ) -> Result<(), RegisterError> {
        let name = name.into();
        if name.starts_with("system.") {
            return Err(RegisterError::ReservedName(name));
        }
        if self.entries.insert(name.clone(), entry).is_none() {
            self.order.push(name);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DispatchEntry> {
        self.entries.get(name)
    }

    /// Method names in registration order.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Checks the request parameters against the declared signatures.
///
/// Alternatives whose arity differs are skipped. When no alternative
/// matches, the mismatch message is taken from the last alternative that
/// had the right arity; if none did, the arity message is used.
pub(crate) fn check_signature<S: AsRef<[TypeTag]>>(
    signatures: &[S],
    params: &[Value],
) -> Result<(), Fault> {
    let mut last_mismatch: Option<(TypeTag, TypeTag, usize)> = None;
    for signature in signatures {
        let signature = signature.as_ref();
        if signature.len() != params.len() + 1 {
            continue;
        }
        let mut mismatch = None;
        for (index, (declared, param)) in signature[1..].iter().zip(params).enumerate() {
            if !declared.matches(param.type_tag()) {
                mismatch = Some((*declared, param.type_tag(), index + 1));
                break;
            }
        }
        match mismatch {
            None => return Ok(()),
            Some(found) => last_mismatch = Some(found),
        }
    }
    match last_mismatch {
        Some((wanted, got, position)) => Err(Fault::with_detail(
            FaultCode::IncorrectParams,
            format!("Wanted {}, got {} at param {}", wanted, got, position),
        )),
        None => Err(Fault::with_detail(
            FaultCode::IncorrectParams,
            "No method signature matches number of parameters",
        )),
    }
}

/// Executes one request against the server's dispatch maps.
///
/// Returns `Err` only under the `Propagate` exception-handling policy;
/// every other failure becomes a fault payload.
pub fn execute(
    server: &Server,
    ctx: &CallContext<'_>,
    request: &Request,
) -> Result<Payload, HandlerError> {
    if request.method.starts_with("system.") {
        if !server.config().allow_system_funcs {
            return Ok(Payload::Fault(Fault::with_detail(
                FaultCode::UnknownMethod,
                &request.method,
            )));
        }
        let Some(method) = introspection::find(&request.method) else {
            return Ok(Payload::Fault(Fault::with_detail(
                FaultCode::UnknownMethod,
                &request.method,
            )));
        };
        if let Err(fault) = check_signature(method.signatures, &request.params) {
            return Ok(Payload::Fault(fault));
        }
        ctx.sink().trace(format!("dispatching {}", request.method));
        return (method.handler)(server, ctx, request);
    }

    let Some(entry) = server.dispatch_map().get(&request.method) else {
        debug!("no handler for {}", request.method);
        return Ok(Payload::Fault(Fault::with_detail(
            FaultCode::UnknownMethod,
            &request.method,
        )));
    };
    if let Some(signatures) = &entry.signatures {
        if let Err(fault) = check_signature(signatures, &request.params) {
            return Ok(Payload::Fault(fault));
        }
    }
    ctx.sink().trace(format!(
        "dispatching {} ({:?} convention)",
        request.method,
        entry.parameters_type()
    ));
    invoke(server, ctx, entry, request)
}

fn invoke(
    server: &Server,
    ctx: &CallContext<'_>,
    entry: &DispatchEntry,
    request: &Request,
) -> Result<Payload, HandlerError> {
    let policy = server.config().exception_handling;
    let outcome = catch_unwind(AssertUnwindSafe(|| call_handler(server, ctx, entry, request)));
    match outcome {
        Ok(Ok(ret)) => Ok(coerce_return(server, ret)),
        Ok(Err(err)) => {
            warn!("handler for {} failed: {}", request.method, err);
            ctx.sink().warning(format!("{} failed: {}", request.method, err));
            match policy {
                ExceptionHandling::Wrap => {
                    Ok(Payload::Fault(Fault::new(FaultCode::ServerError)))
                }
                ExceptionHandling::WrapWithCode => {
                    Ok(Payload::Fault(Fault::custom(err.code, err.message)))
                }
                ExceptionHandling::Propagate => Err(err),
            }
        }
        Err(panic) => match policy {
            ExceptionHandling::Propagate => resume_unwind(panic),
            ExceptionHandling::Wrap => {
                let message = panic_message(&panic);
                warn!("handler for {} panicked: {}", request.method, message);
                ctx.sink()
                    .warning(format!("{} panicked: {}", request.method, message));
                Ok(Payload::Fault(Fault::new(FaultCode::ServerError)))
            }
            ExceptionHandling::WrapWithCode => {
                let message = panic_message(&panic);
                warn!("handler for {} panicked: {}", request.method, message);
                ctx.sink()
                    .warning(format!("{} panicked: {}", request.method, message));
                Ok(Payload::Fault(Fault::with_detail(
                    FaultCode::ServerError,
                    message,
                )))
            }
        },
    }
}

fn call_handler(
    server: &Server,
    ctx: &CallContext<'_>,
    entry: &DispatchEntry,
    request: &Request,
) -> HandlerResult {
    match &entry.handler {
        Handler::Typed(f) => f(ctx, request),
        Handler::Native(f) => {
            let params: Vec<JsonValue> = request.params.iter().map(value_to_native).collect();
            f(ctx, &params)
        }
        Handler::Epi(f) => {
            let params: Vec<JsonValue> = request.params.iter().map(value_to_native).collect();
            let result = f(ctx, &request.method, &params, &server.config().user_data)?;
            match epi_fault(&result) {
                Some(fault) => Ok(HandlerReturn::Fault(fault)),
                None => Ok(HandlerReturn::Native(result)),
            }
        }
    }
}

/// An epi return shaped `{faultCode, faultString}` is a fault.
fn epi_fault(native: &JsonValue) -> Option<Fault> {
    let map = native.as_object()?;
    let code = map.get("faultCode")?.as_i64()?;
    let message = map.get("faultString")?.as_str()?;
    Some(Fault::custom(code as i32, message))
}

fn coerce_return(server: &Server, ret: HandlerReturn) -> Payload {
    match ret {
        HandlerReturn::Value(value) => Payload::Success(value),
        // zero is reserved for success, so a zero-code fault is re-coded
        HandlerReturn::Fault(fault) => Payload::Fault(Fault::custom(fault.code, fault.message)),
        HandlerReturn::Native(native) => Payload::Success(native_to_value(
            &native,
            &server.config().native_encoding_options,
            server.config().nil_extension,
        )),
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
