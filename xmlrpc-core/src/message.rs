//! Request and response frames exchanged with the engine.

use crate::fault::Fault;
use crate::value::Value;

/// A parsed XML-RPC call: method name plus ordered parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub params: Vec<Value>,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Request {
            method: method.into(),
            params,
        }
    }
}

/// Outcome of a dispatched call: a return value or a fault.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Success(Value),
    Fault(Fault),
}

impl Payload {
    pub fn is_fault(&self) -> bool {
        matches!(self, Payload::Fault(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Payload::Success(value) => Some(value),
            Payload::Fault(_) => None,
        }
    }

    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Payload::Fault(fault) => Some(fault),
            Payload::Success(_) => None,
        }
    }
}

/// A complete response, carrying the payload, the request body it answers
/// (retained for debug dumps) and the negotiated content type.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub payload: Payload,
    /// The decoded request bytes this response answers.
    pub raw_body: Vec<u8>,
    /// Always `text/xml`, with an optional `; charset=…` suffix.
    pub content_type: String,
}

impl Response {
    pub fn new(payload: Payload, raw_body: Vec<u8>, content_type: impl Into<String>) -> Self {
        Response {
            payload,
            raw_body,
            content_type: content_type.into(),
        }
    }

    pub fn is_fault(&self) -> bool {
        self.payload.is_fault()
    }
}
