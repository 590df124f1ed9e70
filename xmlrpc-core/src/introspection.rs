//! The built-in `system.*` methods.
//!
//! All five are implemented on top of the dispatch engine itself;
//! `system.multicall` re-enters [`dispatch::execute`] per sub-call so
//! signature checking stays active for boxcarred calls.

use crate::dispatch::{self, CallContext, HandlerError};
use crate::fault::{Fault, FaultCode};
use crate::message::{Payload, Request};
use crate::server::Server;
use crate::value::{Members, TypeTag, Value};

/// One built-in method: a plain function taking the server itself as its
/// leading argument, plus its signatures and help text.
pub struct SystemMethod {
    pub name: &'static str,
    pub handler: fn(&Server, &CallContext<'_>, &Request) -> Result<Payload, HandlerError>,
    pub signatures: &'static [&'static [TypeTag]],
    pub doc: &'static str,
}

const SIG_LIST_METHODS: &[&[TypeTag]] = &[&[TypeTag::Array]];
const SIG_METHOD_HELP: &[&[TypeTag]] = &[&[TypeTag::String, TypeTag::String]];
const SIG_METHOD_SIGNATURE: &[&[TypeTag]] = &[&[TypeTag::Array, TypeTag::String]];
const SIG_GET_CAPABILITIES: &[&[TypeTag]] = &[&[TypeTag::Struct]];
const SIG_MULTICALL: &[&[TypeTag]] = &[&[TypeTag::Array, TypeTag::Array]];

pub const SYSTEM_METHODS: &[SystemMethod] = &[
    SystemMethod {
        name: "system.listMethods",
        handler: list_methods,
        signatures: SIG_LIST_METHODS,
        doc: "Lists every method the server knows how to dispatch",
    },
    SystemMethod {
        name: "system.methodHelp",
        handler: method_help,
        signatures: SIG_METHOD_HELP,
        doc: "Returns the help text for the given method, or an empty string when none is set",
    },
    SystemMethod {
        name: "system.methodSignature",
        handler: method_signature,
        signatures: SIG_METHOD_SIGNATURE,
        doc: "Returns an array of known signatures for the given method, or the string 'undef' when none are declared",
    },
    SystemMethod {
        name: "system.getCapabilities",
        handler: get_capabilities,
        signatures: SIG_GET_CAPABILITIES,
        doc: "Describes the optional extensions of the XML-RPC spec this server adheres to",
    },
    SystemMethod {
        name: "system.multicall",
        handler: multicall,
        signatures: SIG_MULTICALL,
        doc: "Boxcars multiple calls in one request and returns the per-call results in order",
    },
];

/// Looks up a built-in method by its full `system.*` name.
pub fn find(name: &str) -> Option<&'static SystemMethod> {
    SYSTEM_METHODS.iter().find(|m| m.name == name)
}

fn list_methods(
    server: &Server,
    _ctx: &CallContext<'_>,
    _request: &Request,
) -> Result<Payload, HandlerError> {
    let mut names: Vec<Value> = server
        .dispatch_map()
        .method_names()
        .map(Value::from)
        .collect();
    for method in SYSTEM_METHODS {
        names.push(Value::from(method.name));
    }
    Ok(Payload::Success(Value::Array(names)))
}

fn requested_method(request: &Request) -> &str {
    // the signature check has already pinned params to a single string
    request
        .params
        .first()
        .and_then(|v| v.as_str().ok())
        .unwrap_or_default()
}

fn method_help(
    server: &Server,
    _ctx: &CallContext<'_>,
    request: &Request,
) -> Result<Payload, HandlerError> {
    let name = requested_method(request);
    if name.starts_with("system.") {
        if let Some(method) = find(name) {
            return Ok(Payload::Success(Value::from(method.doc)));
        }
    } else if let Some(entry) = server.dispatch_map().get(name) {
        let doc = entry.doc.clone().unwrap_or_default();
        return Ok(Payload::Success(Value::String(doc)));
    }
    Ok(Payload::Fault(Fault::with_detail(
        FaultCode::IntrospectUnknown,
        name,
    )))
}

fn signature_value(signatures: &[impl AsRef<[TypeTag]>]) -> Value {
    Value::Array(
        signatures
            .iter()
            .map(|signature| {
                Value::Array(
                    signature
                        .as_ref()
                        .iter()
                        .map(|tag| Value::from(tag.as_str()))
                        .collect(),
                )
            })
            .collect(),
    )
}

fn method_signature(
    server: &Server,
    _ctx: &CallContext<'_>,
    request: &Request,
) -> Result<Payload, HandlerError> {
    let name = requested_method(request);
    if name.starts_with("system.") {
        if let Some(method) = find(name) {
            return Ok(Payload::Success(signature_value(method.signatures)));
        }
    } else if let Some(entry) = server.dispatch_map().get(name) {
        let value = match &entry.signatures {
            Some(signatures) => signature_value(signatures),
            None => Value::from("undef"),
        };
        return Ok(Payload::Success(value));
    }
    Ok(Payload::Fault(Fault::with_detail(
        FaultCode::IntrospectUnknown,
        name,
    )))
}

fn capability(spec_url: &str, spec_version: i32) -> Value {
    let mut entry = Members::new();
    entry.insert("specUrl", Value::from(spec_url));
    entry.insert("specVersion", Value::Int(spec_version));
    Value::Struct(entry)
}

fn get_capabilities(
    server: &Server,
    _ctx: &CallContext<'_>,
    _request: &Request,
) -> Result<Payload, HandlerError> {
    let mut caps = Members::new();
    caps.insert("xmlrpc", capability("http://www.xmlrpc.com/spec", 1));
    caps.insert(
        "system.multicall",
        capability("http://www.xmlrpc.com/discuss/msgReader$1208", 1),
    );
    // v2: signature checks understand the `any` wildcard
    caps.insert(
        "introspection",
        capability("http://xmlrpc-c.sourceforge.net/introspection.html", 2),
    );
    if server.config().nil_extension {
        caps.insert(
            "nil",
            capability("http://www.ontosys.com/xml-rpc/extensions.php", 1),
        );
    }
    Ok(Payload::Success(Value::Struct(caps)))
}

fn fault_struct(fault: &Fault) -> Value {
    let mut members = Members::new();
    members.insert("faultCode", Value::Int(fault.code));
    members.insert("faultString", Value::String(fault.message.clone()));
    Value::Struct(members)
}

fn multicall(
    server: &Server,
    ctx: &CallContext<'_>,
    request: &Request,
) -> Result<Payload, HandlerError> {
    let calls = match request.params.first().and_then(|v| v.as_array().ok()) {
        Some(calls) => calls,
        None => return Ok(Payload::Fault(Fault::new(FaultCode::IncorrectParams))),
    };
    let mut results = Vec::with_capacity(calls.len());
    for (index, call) in calls.iter().enumerate() {
        match multicall_one(server, ctx, call, index)? {
            Payload::Success(value) => results.push(Value::Array(vec![value])),
            Payload::Fault(fault) => results.push(fault_struct(&fault)),
        }
    }
    Ok(Payload::Success(Value::Array(results)))
}

fn multicall_one(
    server: &Server,
    ctx: &CallContext<'_>,
    call: &Value,
    index: usize,
) -> Result<Payload, HandlerError> {
    let position = format!("at call {}", index);
    let members = match call.as_struct() {
        Ok(members) => members,
        Err(_) => {
            return Ok(Payload::Fault(Fault::with_detail(
                FaultCode::MulticallNotStruct,
                position,
            )));
        }
    };
    let method = match members.get("methodName") {
        None => {
            return Ok(Payload::Fault(Fault::with_detail(
                FaultCode::MulticallNoMethod,
                position,
            )));
        }
        Some(value) => match value.as_str() {
            Ok(name) => name,
            Err(_) => {
                return Ok(Payload::Fault(Fault::with_detail(
                    FaultCode::MulticallNotString,
                    position,
                )));
            }
        },
    };
    if method == "system.multicall" {
        return Ok(Payload::Fault(Fault::with_detail(
            FaultCode::MulticallRecursion,
            position,
        )));
    }
    let params = match members.get("params") {
        None => {
            return Ok(Payload::Fault(Fault::with_detail(
                FaultCode::MulticallNoParams,
                position,
            )));
        }
        Some(value) => match value.as_array() {
            Ok(params) => params,
            Err(_) => {
                return Ok(Payload::Fault(Fault::with_detail(
                    FaultCode::MulticallNotArray,
                    position,
                )));
            }
        },
    };
    dispatch::execute(server, ctx, &Request::new(method, params.to_vec()))
}
