//! Fault catalog.
//!
//! Faults are the application-level error frame of XML-RPC: a non-zero
//! `faultCode` plus a `faultString`. The symbolic catalog below maps each
//! engine failure to a stable numeric code and a default message; call sites
//! append detail to the default message rather than inventing codes.

use std::fmt;

/// Symbolic fault catalog with stable numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCode {
    UnknownMethod,
    IncorrectParams,
    IntrospectUnknown,
    MulticallNotStruct,
    MulticallNoMethod,
    MulticallNotString,
    MulticallRecursion,
    MulticallNoParams,
    MulticallNotArray,
    InvalidRequest,
    ServerError,
    ServerCannotDecompress,
    ServerDecompressFail,
}

/// Parse faults are reported as this base plus an offset derived from the
/// XML parser error, keeping them apart from the catalog above.
pub const XML_FAULT_BASE: i32 = 100;

impl FaultCode {
    /// Stable numeric code for the wire.
    pub fn code(&self) -> i32 {
        match self {
            FaultCode::UnknownMethod => 1,
            FaultCode::IncorrectParams => 3,
            FaultCode::IntrospectUnknown => 4,
            FaultCode::MulticallNotStruct => 9,
            FaultCode::MulticallNoMethod => 10,
            FaultCode::MulticallNotString => 11,
            FaultCode::MulticallRecursion => 12,
            FaultCode::MulticallNoParams => 13,
            FaultCode::MulticallNotArray => 14,
            FaultCode::InvalidRequest => 15,
            FaultCode::ServerError => 17,
            FaultCode::ServerCannotDecompress => 106,
            FaultCode::ServerDecompressFail => 107,
        }
    }

    /// Default human-readable message.
    pub fn message(&self) -> &'static str {
        match self {
            FaultCode::UnknownMethod => "Unknown method",
            FaultCode::IncorrectParams => "Incorrect parameters passed to method",
            FaultCode::IntrospectUnknown => "Can't introspect: method unknown",
            FaultCode::MulticallNotStruct => "system.multicall expected struct",
            FaultCode::MulticallNoMethod => "Missing methodName",
            FaultCode::MulticallNotString => "methodName is not a string",
            FaultCode::MulticallRecursion => "Recursive system.multicall forbidden",
            FaultCode::MulticallNoParams => "Missing params",
            FaultCode::MulticallNotArray => "params is not an array",
            FaultCode::InvalidRequest => "Invalid request payload",
            FaultCode::ServerError => "Internal server error",
            FaultCode::ServerCannotDecompress => {
                "Request is compressed with a scheme the server does not accept"
            }
            FaultCode::ServerDecompressFail => "Request body could not be decompressed",
        }
    }
}

/// An application-level error response: `(faultCode, faultString)`.
///
/// `faultCode` is never zero; zero is reserved for success on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub code: i32,
    pub message: String,
}

impl Fault {
    /// A fault carrying the catalog entry's default message.
    pub fn new(code: FaultCode) -> Self {
        Fault {
            code: code.code(),
            message: code.message().to_string(),
        }
    }

    /// A catalog fault with call-site detail appended to the default message.
    pub fn with_detail(code: FaultCode, detail: impl fmt::Display) -> Self {
        Fault {
            code: code.code(),
            message: format!("{}: {}", code.message(), detail),
        }
    }

    /// A fault outside the catalog (handler-supplied codes). A zero code is
    /// normalized to the server-error code since zero means success.
    pub fn custom(code: i32, message: impl Into<String>) -> Self {
        let code = if code == 0 {
            FaultCode::ServerError.code()
        } else {
            code
        };
        Fault {
            code,
            message: message.into(),
        }
    }

    /// A parse fault: `XML_FAULT_BASE + offset`, with the parser's own
    /// message as detail.
    pub fn parse_error(offset: i32, detail: impl fmt::Display) -> Self {
        Fault {
            code: XML_FAULT_BASE + offset,
            message: format!("{}: {}", FaultCode::InvalidRequest.message(), detail),
        }
    }

    /// Whether this fault carries the given catalog code.
    pub fn is(&self, code: FaultCode) -> bool {
        self.code == code.code()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fault {}: {}", self.code, self.message)
    }
}

impl std::error::Error for Fault {}
