use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum QvmError {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to qubesd at {path}")]
    #[diagnostic(help("is qubesd running? use --transport qrexec when calling from a VM"))]
    Connect {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("got empty response from qubesd")]
    NoResponse,

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("{exc_type}: {message}")]
    Daemon { exc_type: String, message: String },

    #[error("service call error: {stderr}")]
    ServiceCall { stderr: String },

    #[error("{kind} '{name}' does not exist")]
    NotFound { kind: &'static str, name: String },

    #[error("VM '{name}' is not running")]
    #[diagnostic(help("use --autostart to start it on demand"))]
    NotRunning { name: String },

    #[error("{command} failed: {message}")]
    ExternalCommand { command: String, message: String },
}

impl QvmError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        QvmError::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        QvmError::Protocol {
            message: message.into(),
        }
    }
}
