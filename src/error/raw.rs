//! Raw failure shapes accepted by the classifier
//!
//! Failures arrive in several differently-shaped forms: HTTP client errors
//! carrying a response, low-level network faults, named application errors and
//! plain error objects. `RawError` is the tagged union over those shapes, and
//! `RawError::from_json` is the single discriminator that decides which shape a
//! loosely-typed JSON payload represents.

use std::collections::BTreeMap;
use std::io;

use serde_json::Value;

use super::ErrorSeverity;

/// An HTTP-client failure that carries a response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HttpErrorShape {
    pub status: u16,
    pub status_text: Option<String>,
    /// Response body.
    pub data: Option<Value>,
    /// Response headers, keyed by lowercase name.
    pub headers: BTreeMap<String, String>,
    /// Client-side message, e.g. "Request failed with status code 500".
    pub message: Option<String>,
}

impl HttpErrorShape {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Adds a header. Names are stored lowercase.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Looks up a header case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }
}

/// A transport-level failure without an HTTP response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkErrorShape {
    /// Error code such as `ECONNABORTED` or `ERR_NETWORK`.
    pub code: Option<String>,
    pub message: String,
    /// True when a request was sent but nothing came back.
    pub has_request: bool,
    /// True when the request was explicitly aborted.
    pub aborted: bool,
}

impl NetworkErrorShape {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_request(mut self) -> Self {
        self.has_request = true;
        self
    }

    pub fn aborted(mut self) -> Self {
        self.aborted = true;
        self
    }
}

/// Application error families with a dedicated error type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AppErrorKind {
    Analysis,
    FileProcessing,
    GoogleDrive,
}

impl AppErrorKind {
    /// Resolves an error `name`/`type` discriminator.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "AnalysisError" | "ANALYSIS_ERROR" => Some(AppErrorKind::Analysis),
            "FileProcessingError" | "FILE_PROCESSING_ERROR" => Some(AppErrorKind::FileProcessing),
            "DriveError" | "GoogleDriveError" | "GOOGLE_DRIVE_ERROR" => {
                Some(AppErrorKind::GoogleDrive)
            }
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AppErrorKind::Analysis => "AnalysisError",
            AppErrorKind::FileProcessing => "FileProcessingError",
            AppErrorKind::GoogleDrive => "DriveError",
        }
    }
}

/// A named application error.
#[derive(Clone, Debug, PartialEq)]
pub struct AppErrorShape {
    pub kind: AppErrorKind,
    pub message: String,
    /// Passed through verbatim when non-empty.
    pub user_message: Option<String>,
    pub details: Option<Value>,
    pub code: Option<String>,
    pub status: Option<u16>,
    /// Overrides the default severity for the kind.
    pub severity: Option<ErrorSeverity>,
}

impl AppErrorShape {
    pub fn new(kind: AppErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            user_message: None,
            details: None,
            code: None,
            status: None,
            severity: None,
        }
    }

    pub fn with_user_message(mut self, user_message: impl Into<String>) -> Self {
        self.user_message = Some(user_message.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// Any other error-like value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenericError {
    pub name: Option<String>,
    pub message: String,
}

impl GenericError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: None,
            message: message.into(),
        }
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            message: message.into(),
        }
    }
}

/// The raw failure handed to the classifier.
#[derive(Clone, Debug, PartialEq)]
pub enum RawError {
    Http(HttpErrorShape),
    Network(NetworkErrorShape),
    App(AppErrorShape),
    Generic(GenericError),
}

impl RawError {
    /// Discriminates a loosely-typed JSON failure into one of the known shapes.
    ///
    /// Never fails: anything unrecognized becomes `RawError::Generic`.
    pub fn from_json(value: &Value) -> Self {
        let obj = match value {
            Value::Object(obj) => obj,
            Value::String(s) => return RawError::Generic(GenericError::new(s.clone())),
            Value::Null => return RawError::Generic(GenericError::new("null")),
            other => return RawError::Generic(GenericError::new(other.to_string())),
        };

        let message = obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(response) = obj.get("response").and_then(Value::as_object) {
            if let Some(status) = response.get("status").and_then(value_as_status) {
                let headers = response
                    .get("headers")
                    .and_then(Value::as_object)
                    .map(|h| {
                        h.iter()
                            .map(|(k, v)| (k.to_ascii_lowercase(), value_to_plain_string(v)))
                            .collect()
                    })
                    .unwrap_or_default();
                return RawError::Http(HttpErrorShape {
                    status,
                    status_text: response
                        .get("statusText")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    data: response.get("data").filter(|d| !d.is_null()).cloned(),
                    headers,
                    message,
                });
            }
        }

        let name = ["name", "type"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str));
        let app_kind = ["name", "type"].iter().find_map(|key| {
            obj.get(*key)
                .and_then(Value::as_str)
                .and_then(AppErrorKind::from_name)
        });

        if let Some(kind) = app_kind {
            return RawError::App(AppErrorShape {
                kind,
                message: message.unwrap_or_else(|| kind.name().to_string()),
                user_message: obj
                    .get("userMessage")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                details: obj.get("details").filter(|d| !d.is_null()).cloned(),
                code: obj.get("code").map(value_to_plain_string),
                status: obj
                    .get("status")
                    .or_else(|| obj.get("statusCode"))
                    .and_then(value_as_status),
                severity: obj
                    .get("severity")
                    .and_then(Value::as_str)
                    .and_then(ErrorSeverity::parse),
            });
        }

        let code = obj.get("code").and_then(Value::as_str).map(str::to_string);
        let has_request = obj.get("request").map(|r| !r.is_null()).unwrap_or(false);
        let aborted = obj.get("aborted").and_then(Value::as_bool).unwrap_or(false);

        if code.is_some() || has_request || aborted {
            return RawError::Network(NetworkErrorShape {
                code,
                message: message.unwrap_or_default(),
                has_request,
                aborted,
            });
        }

        RawError::Generic(GenericError {
            name: name.map(str::to_string),
            message: message.unwrap_or_else(|| value.to_string()),
        })
    }

    /// Converts any error, recognizing I/O failures as network faults.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        match error.downcast_ref::<io::Error>() {
            Some(io_error) => RawError::from_io(io_error),
            None => RawError::Generic(GenericError::new(error.to_string())),
        }
    }

    fn from_io(error: &io::Error) -> Self {
        let code = match error.kind() {
            io::ErrorKind::TimedOut => "ETIMEDOUT",
            io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
            io::ErrorKind::ConnectionReset => "ECONNRESET",
            io::ErrorKind::ConnectionAborted => "ECONNABORTED",
            io::ErrorKind::NotConnected => "ENOTCONN",
            io::ErrorKind::BrokenPipe => "EPIPE",
            _ => return RawError::Generic(GenericError::new(error.to_string())),
        };
        RawError::Network(
            NetworkErrorShape::new(error.to_string())
                .with_code(code)
                .with_request(),
        )
    }

    /// The most descriptive message carried by the shape.
    pub fn message(&self) -> String {
        match self {
            RawError::Http(http) => http.message.clone().unwrap_or_else(|| {
                format!("Request failed with status code {}", http.status)
            }),
            RawError::Network(net) => net.message.clone(),
            RawError::App(app) => app.message.clone(),
            RawError::Generic(generic) => generic.message.clone(),
        }
    }

    /// Short label for the shape, used in diagnostics.
    pub fn shape_name(&self) -> &'static str {
        match self {
            RawError::Http(_) => "http",
            RawError::Network(_) => "network",
            RawError::App(_) => "app",
            RawError::Generic(_) => "generic",
        }
    }
}

impl From<HttpErrorShape> for RawError {
    fn from(shape: HttpErrorShape) -> Self {
        RawError::Http(shape)
    }
}

impl From<NetworkErrorShape> for RawError {
    fn from(shape: NetworkErrorShape) -> Self {
        RawError::Network(shape)
    }
}

impl From<AppErrorShape> for RawError {
    fn from(shape: AppErrorShape) -> Self {
        RawError::App(shape)
    }
}

impl From<GenericError> for RawError {
    fn from(error: GenericError) -> Self {
        RawError::Generic(error)
    }
}

impl From<&Value> for RawError {
    fn from(value: &Value) -> Self {
        RawError::from_json(value)
    }
}

impl From<Value> for RawError {
    fn from(value: Value) -> Self {
        RawError::from_json(&value)
    }
}

impl From<io::Error> for RawError {
    fn from(error: io::Error) -> Self {
        RawError::from_io(&error)
    }
}

impl From<&str> for RawError {
    fn from(message: &str) -> Self {
        RawError::Generic(GenericError::new(message))
    }
}

impl From<String> for RawError {
    fn from(message: String) -> Self {
        RawError::Generic(GenericError::new(message))
    }
}

fn value_as_status(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
