//! Per-request debug trace.
//!
//! A `TraceSink` accumulates trace lines while a request is processed and
//! renders them as XML comments that the serializer injects right after the
//! prologue. The sink is created per request and handed into dispatch, so
//! nothing here is process-global; the mutexes only exist to keep the sink
//! `Sync` for handlers that fan work out.

use crate::charset::{encode_entities, Charset};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::Mutex;

/// Accumulator for one request's trace lines.
///
/// Levels: 0 collects nothing; 1 keeps user debug messages and the system
/// trace; 2 additionally records the raw request body; 3 additionally keeps
/// warnings captured from handlers.
pub struct TraceSink {
    level: u8,
    system: Mutex<Vec<String>>,
    user: Mutex<Vec<String>>,
}

impl TraceSink {
    pub fn new(level: u8) -> Self {
        TraceSink {
            level,
            system: Mutex::new(Vec::new()),
            user: Mutex::new(Vec::new()),
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Records a user-facing debug message (level >= 1).
    pub fn debug_msg(&self, message: impl Into<String>) {
        if self.level >= 1 {
            if let Ok(mut user) = self.user.lock() {
                user.push(message.into());
            }
        }
    }

    /// Records an engine trace line (level >= 1).
    pub fn trace(&self, line: impl Into<String>) {
        if self.level >= 1 {
            if let Ok(mut system) = self.system.lock() {
                system.push(line.into());
            }
        }
    }

    /// Records a warning captured around a handler call (level >= 3).
    pub fn warning(&self, line: impl Into<String>) {
        if self.level >= 3 {
            if let Ok(mut system) = self.system.lock() {
                system.push(format!("warning: {}", line.into()));
            }
        }
    }

    /// Dumps the raw request body into the system trace (level >= 2).
    pub fn record_raw_request(&self, body: &[u8]) {
        if self.level >= 2 {
            if let Ok(mut system) = self.system.lock() {
                system.push(format!(
                    "+++GOT+++\n{}\n+++END+++",
                    String::from_utf8_lossy(body)
                ));
            }
        }
    }

    /// Renders the accumulated lines as XML comments, or an empty string
    /// when there is nothing to embed. The system trace is BASE64-encoded so
    /// arbitrary payload dumps cannot break the document; the user trace is
    /// entity-encoded for the response charset.
    pub fn comments(&self, charset: Charset) -> String {
        if self.level == 0 {
            return String::new();
        }
        let mut out = String::new();
        if let Ok(system) = self.system.lock() {
            if !system.is_empty() {
                let joined = system.join("\n");
                out.push_str("<!-- SERVER DEBUG INFO (BASE64 ENCODED):\n");
                out.push_str(&BASE64.encode(joined.as_bytes()));
                out.push_str("\n-->\n");
            }
        }
        if let Ok(user) = self.user.lock() {
            if !user.is_empty() {
                let joined = user.join("\n");
                // a literal "--" would terminate the comment early
                let escaped = encode_entities(&joined, charset).replace("--", "__");
                out.push_str("<!-- DEBUG INFO:\n");
                out.push_str(&escaped);
                out.push_str("\n-->\n");
            }
        }
        out
    }
}
