//! Transports carrying management calls to qubesd.
//!
//! In dom0 calls go straight to the qubesd socket. Inside a VM they are
//! tunnelled through qrexec, one `qrexec-client-vm` process per call.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::error::QvmError;
use crate::protocol;

pub const QREXEC_CLIENT_VM: &str = "qrexec-client-vm";

/// How the client talks to qubesd, as selected by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportChoice {
    /// Socket when it exists, qrexec otherwise.
    Auto,
    Socket,
    Qrexec,
}

impl FromStr for TransportChoice {
    type Err = QvmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "socket" => Ok(Self::Socket),
            "qrexec" => Ok(Self::Qrexec),
            other => Err(QvmError::validation(format!(
                "unknown transport '{other}' (use auto, socket or qrexec)"
            ))),
        }
    }
}

/// The transport actually in use. Decides how RPC services are spawned too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Socket,
    Qrexec,
}

#[allow(async_fn_in_trait)] // trait is internal-only
pub trait Transport {
    fn kind(&self) -> TransportKind;

    /// Perform one call and return the reply payload.
    async fn call(
        &self,
        dest: &str,
        method: &str,
        arg: Option<&str>,
        payload: Option<&[u8]>,
    ) -> Result<Vec<u8>, QvmError>;
}

// ── Socket ──────────────────────────────────────────────────────────

pub struct SocketTransport {
    path: PathBuf,
}

impl SocketTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn call(
        &self,
        dest: &str,
        method: &str,
        arg: Option<&str>,
        payload: Option<&[u8]>,
    ) -> Result<Vec<u8>, QvmError> {
        let request = protocol::encode_request(method, dest, arg, payload)?;
        tracing::debug!(method, dest, arg = arg.unwrap_or(""), "qubesd call");

        let mut stream =
            UnixStream::connect(&self.path)
                .await
                .map_err(|source| QvmError::Connect {
                    path: self.path.display().to_string(),
                    source,
                })?;

        stream
            .write_all(&request)
            .await
            .map_err(|e| QvmError::Io {
                context: format!("sending {method} to qubesd"),
                source: e,
            })?;
        stream.shutdown().await.map_err(|e| QvmError::Io {
            context: "closing request stream".into(),
            source: e,
        })?;

        let mut reply = Vec::new();
        stream
            .read_to_end(&mut reply)
            .await
            .map_err(|e| QvmError::Io {
                context: format!("reading reply to {method}"),
                source: e,
            })?;

        protocol::parse_response(&reply)
    }
}

// ── qrexec ──────────────────────────────────────────────────────────

pub struct QrexecTransport {
    program: PathBuf,
}

impl QrexecTransport {
    pub fn new() -> Self {
        Self::with_program(QREXEC_CLIENT_VM)
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for QrexecTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Service name for a call: `method+arg` when an argument is given.
pub fn service_name(method: &str, arg: Option<&str>) -> String {
    match arg {
        Some(arg) => format!("{method}+{arg}"),
        None => method.to_string(),
    }
}

impl Transport for QrexecTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Qrexec
    }

    async fn call(
        &self,
        dest: &str,
        method: &str,
        arg: Option<&str>,
        payload: Option<&[u8]>,
    ) -> Result<Vec<u8>, QvmError> {
        protocol::check_field("method", method)?;
        protocol::check_field("destination", dest)?;
        if let Some(arg) = arg {
            protocol::check_field("argument", arg)?;
        }
        let service = service_name(method, arg);
        tracing::debug!(dest, service = %service, "qrexec call");

        let mut child = tokio::process::Command::new(&self.program)
            .arg(dest)
            .arg(&service)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| QvmError::Io {
                context: format!("running {}", self.program.display()),
                source: e,
            })?;

        let stdin = child.stdin.take();
        let writer = async move {
            if let (Some(mut stdin), Some(payload)) = (stdin, payload) {
                stdin.write_all(payload).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (written, output) = tokio::join!(writer, child.wait_with_output());

        let output = output.map_err(|e| QvmError::Io {
            context: format!("waiting for {}", self.program.display()),
            source: e,
        })?;
        if !output.status.success() {
            return Err(QvmError::ServiceCall {
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        // a service that exits early legitimately closes its stdin
        if let Err(e) = written {
            tracing::debug!(error = %e, "payload not fully consumed by service");
        }

        protocol::parse_response(&output.stdout)
    }
}

// ── Runtime selection ───────────────────────────────────────────────

pub enum AnyTransport {
    Socket(SocketTransport),
    Qrexec(QrexecTransport),
}

impl AnyTransport {
    pub fn select(choice: TransportChoice, socket: &Path) -> Self {
        let use_socket = match choice {
            TransportChoice::Socket => true,
            TransportChoice::Qrexec => false,
            TransportChoice::Auto => socket.exists(),
        };
        if use_socket {
            tracing::debug!(path = %socket.display(), "using qubesd socket");
            AnyTransport::Socket(SocketTransport::new(socket))
        } else {
            tracing::debug!("using qrexec transport");
            AnyTransport::Qrexec(QrexecTransport::new())
        }
    }
}

impl Transport for AnyTransport {
    fn kind(&self) -> TransportKind {
        match self {
            AnyTransport::Socket(t) => t.kind(),
            AnyTransport::Qrexec(t) => t.kind(),
        }
    }

    async fn call(
        &self,
        dest: &str,
        method: &str,
        arg: Option<&str>,
        payload: Option<&[u8]>,
    ) -> Result<Vec<u8>, QvmError> {
        match self {
            AnyTransport::Socket(t) => t.call(dest, method, arg, payload).await,
            AnyTransport::Qrexec(t) => t.call(dest, method, arg, payload).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeQubesd;

    #[test]
    fn transport_choice_parses() {
        assert_eq!("auto".parse::<TransportChoice>().unwrap(), TransportChoice::Auto);
        assert_eq!("qrexec".parse::<TransportChoice>().unwrap(), TransportChoice::Qrexec);
        assert!("tcp".parse::<TransportChoice>().is_err());
    }

    #[test]
    fn service_name_appends_arg() {
        assert_eq!(service_name("mgmt.vm.Start", None), "mgmt.vm.Start");
        assert_eq!(
            service_name("mgmt.vm.volume.Info", Some("root")),
            "mgmt.vm.volume.Info+root"
        );
    }

    #[test]
    fn auto_falls_back_to_qrexec_without_socket() {
        let t = AnyTransport::select(TransportChoice::Auto, Path::new("/nonexistent/qubesd.sock"));
        assert_eq!(t.kind(), TransportKind::Qrexec);
    }

    #[tokio::test]
    async fn socket_call_round_trips_through_fake_daemon() {
        let qubesd = FakeQubesd::start(|req| {
            assert_eq!(req.method, "mgmt.pool.Add");
            assert_eq!(req.arg, "file");
            assert_eq!(req.payload, b"name=x\n");
            b"0\0done".to_vec()
        });
        let t = SocketTransport::new(qubesd.path());
        let reply = t
            .call("dom0", "mgmt.pool.Add", Some("file"), Some(b"name=x\n"))
            .await
            .unwrap();
        assert_eq!(reply, b"done");
    }

    #[tokio::test]
    async fn socket_connect_failure_is_reported() {
        let t = SocketTransport::new("/nonexistent/qubesd.sock");
        let err = t.call("dom0", "mgmt.vm.List", None, None).await.unwrap_err();
        assert!(matches!(err, QvmError::Connect { .. }));
    }

    #[tokio::test]
    async fn qrexec_failure_is_service_call_error() {
        let t = QrexecTransport::with_program("false");
        let err = t.call("dom0", "mgmt.vm.List", None, None).await.unwrap_err();
        assert!(matches!(err, QvmError::ServiceCall { .. }));
    }

    #[tokio::test]
    async fn qrexec_rejects_invalid_fields_before_spawning() {
        // `true` would succeed with no output; validation must come first
        let t = QrexecTransport::with_program("true");
        let err = t.call("wo\0rk", "mgmt.vm.List", None, None).await.unwrap_err();
        assert!(matches!(err, QvmError::Validation { .. }));
        let err = t
            .call("dom0", "mgmt.vm.volume.Info", Some("röot"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, QvmError::Validation { .. }));
    }

    #[tokio::test]
    async fn qrexec_empty_output_is_no_response() {
        let t = QrexecTransport::with_program("true");
        let err = t.call("dom0", "mgmt.vm.List", None, None).await.unwrap_err();
        assert!(matches!(err, QvmError::NoResponse));
    }
}
