use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// XML-RPC server configuration, loadable from YAML.
///
/// Every field has a default, so an empty mapping (or `ServerConfig::default()`)
/// yields a working server: no debug output, no response compression, system
/// methods enabled, typed-value calling convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Debug level 0-3.
    ///
    /// 0: no debug output. 1: user debug messages are embedded in the
    /// response as an XML comment. 2: adds a dump of the raw request body.
    /// 3: adds warnings captured from handlers during the call.
    pub debug: u8,
    /// What to do when a handler fails instead of returning a fault.
    pub exception_handling: ExceptionHandling,
    /// Compress the response body when the client advertises support.
    pub compress_response: bool,
    /// Request compression schemes the server is willing to inflate.
    pub accepted_compression: Vec<CompressionMethod>,
    /// Character sets the server may emit responses in.
    ///
    /// Must contain at least UTF-8, ISO-8859-1 and US-ASCII.
    pub accepted_charset_encodings: Vec<String>,
    /// Response charset policy: `"auto"` negotiates against the client's
    /// Accept-Charset, `"default"` uses the internal encoding, a charset name
    /// pins it, and the empty string emits no charset declaration at all.
    pub response_charset_encoding: String,
    /// Encoding the server keeps strings in between parse and serialize.
    pub internal_encoding: String,
    /// Serve the built-in `system.*` methods (default: true).
    pub allow_system_funcs: bool,
    /// Server-wide calling convention for registered handlers.
    pub functions_parameters_type: ParamsType,
    /// Hints applied when converting native values back to XML-RPC values.
    pub native_encoding_options: NativeEncodingOptions,
    /// Accept `<nil/>` / `<ex:nil/>` in requests and advertise the
    /// capability (default: false).
    pub nil_extension: bool,
    /// Set when the hosting HTTP layer compresses responses itself; the
    /// engine then skips its own compression and omits Content-Length.
    pub host_compresses_response: bool,
    /// Opaque value handed to `epi`-convention handlers.
    pub user_data: serde_json::Value,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            debug: 0,
            exception_handling: ExceptionHandling::default(),
            compress_response: false,
            accepted_compression: vec![CompressionMethod::Gzip, CompressionMethod::Deflate],
            accepted_charset_encodings: default_charsets(),
            response_charset_encoding: String::new(),
            internal_encoding: "UTF-8".to_string(),
            allow_system_funcs: true,
            functions_parameters_type: ParamsType::default(),
            native_encoding_options: NativeEncodingOptions::default(),
            nil_extension: false,
            host_compresses_response: false,
            user_data: serde_json::Value::Null,
        }
    }
}

fn default_charsets() -> Vec<String> {
    vec![
        "UTF-8".to_string(),
        "ISO-8859-1".to_string(),
        "US-ASCII".to_string(),
    ]
}

impl ServerConfig {
    /// Loads configuration from a YAML file.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use xmlrpc_config::ServerConfig;
    /// use std::path::Path;
    ///
    /// let config = ServerConfig::from_file(Path::new("server.yaml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml_ng::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Examples
    ///
    /// ```
    /// use xmlrpc_config::ServerConfig;
    ///
    /// let yaml = r#"
    /// debug: 2
    /// compress_response: true
    /// response_charset_encoding: "auto"
    /// "#;
    ///
    /// let config = ServerConfig::parse(yaml).unwrap();
    /// assert_eq!(config.debug, 2);
    /// assert!(config.compress_response);
    /// ```
    pub fn parse(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: ServerConfig = serde_yaml_ng::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that the type system cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debug > 3 {
            return Err(ConfigError::DebugOutOfRange(self.debug));
        }
        for required in ["UTF-8", "ISO-8859-1", "US-ASCII"] {
            if !self
                .accepted_charset_encodings
                .iter()
                .any(|c| c.eq_ignore_ascii_case(required))
            {
                return Err(ConfigError::MissingCharset(required));
            }
        }
        Ok(())
    }
}

/// Policy applied when a handler fails (or panics) instead of returning
/// a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionHandling {
    /// Replace the failure with a generic server-error fault.
    #[default]
    Wrap,
    /// Build the fault from the failure's own code and message.
    WrapWithCode,
    /// Let the failure travel past the engine to the caller.
    Propagate,
}

/// Calling convention used to hand parameters to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamsType {
    /// Handler receives the full typed request.
    #[default]
    TypedValue,
    /// Handler receives parameters as plain native values.
    NativeValue,
    /// Handler receives `(method, params, user_data)` and returns a native
    /// value; a mapping with `faultCode`/`faultString` keys becomes a fault.
    Epi,
}

/// HTTP content-coding the engine can inflate and deflate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    Gzip,
    Deflate,
}

impl CompressionMethod {
    /// The token emitted in Content-Encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMethod::Gzip => "gzip",
            CompressionMethod::Deflate => "deflate",
        }
    }

    /// Parses a Content-Encoding token, accepting the legacy `x-` prefix.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        let token = token
            .strip_prefix("x-")
            .or_else(|| token.strip_prefix("X-"))
            .unwrap_or(token);
        if token.eq_ignore_ascii_case("gzip") {
            Some(CompressionMethod::Gzip)
        } else if token.eq_ignore_ascii_case("deflate") {
            Some(CompressionMethod::Deflate)
        } else {
            None
        }
    }
}

/// Hints applied when converting native values to XML-RPC values.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeEncodingOptions {
    /// Encode strings shaped like ISO-8601 timestamps as `dateTime.iso8601`.
    pub auto_dates: bool,
}

/// Errors produced by [`ServerConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `debug` must be 0-3.
    DebugOutOfRange(u8),
    /// `accepted_charset_encodings` must keep the base charset set.
    MissingCharset(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::DebugOutOfRange(level) => {
                write!(f, "debug level {} out of range (expected 0-3)", level)
            }
            ConfigError::MissingCharset(name) => {
                write!(f, "accepted_charset_encodings must include {}", name)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
