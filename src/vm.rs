//! Handle for a single domain.
//!
//! A `Vm` is just a name and a class; every operation takes the transport
//! explicitly so handles can be cached and cloned freely.

use std::fmt;

use crate::domains;
use crate::error::QvmError;
use crate::property::{PropertyHolder, PropertyValue};
use crate::protocol;
use crate::storage::VolumeInfo;
use crate::transport::{QREXEC_CLIENT_VM, Transport, TransportKind};

pub const QREXEC_CLIENT: &str = "qrexec-client";

/// Lifecycle operations that map one-to-one onto `mgmt.vm.<Op>` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOp {
    Start,
    Shutdown,
    Kill,
    Pause,
    Unpause,
}

impl PowerOp {
    fn method(self) -> &'static str {
        match self {
            PowerOp::Start => "mgmt.vm.Start",
            PowerOp::Shutdown => "mgmt.vm.Shutdown",
            PowerOp::Kill => "mgmt.vm.Kill",
            PowerOp::Pause => "mgmt.vm.Pause",
            PowerOp::Unpause => "mgmt.vm.Unpause",
        }
    }
}

impl fmt::Display for PowerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PowerOp::Start => "start",
            PowerOp::Shutdown => "shutdown",
            PowerOp::Kill => "kill",
            PowerOp::Pause => "pause",
            PowerOp::Unpause => "unpause",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vm {
    pub name: String,
    pub class: String,
}

impl Vm {
    pub fn new(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
        }
    }

    fn properties(&self) -> PropertyHolder {
        PropertyHolder::vm(&self.name)
    }

    /// Current power state, fetched fresh from qubesd.
    pub async fn state<T: Transport>(&self, t: &T) -> Result<String, QvmError> {
        let reply = t.call(&self.name, "mgmt.vm.List", None, None).await?;
        let entries = domains::parse_vm_list(&reply)?;
        entries
            .get(&self.name)
            .and_then(|props| props.get("state"))
            .cloned()
            .ok_or_else(|| QvmError::protocol(format!("no state reported for '{}'", self.name)))
    }

    pub async fn is_running<T: Transport>(&self, t: &T) -> Result<bool, QvmError> {
        Ok(is_running_state(&self.state(t).await?))
    }

    pub async fn is_halted<T: Transport>(&self, t: &T) -> Result<bool, QvmError> {
        Ok(self.state(t).await? == "Halted")
    }

    pub async fn power<T: Transport>(&self, t: &T, op: PowerOp) -> Result<(), QvmError> {
        tracing::info!(vm = %self.name, %op, "power operation");
        t.call(&self.name, op.method(), None, None).await?;
        Ok(())
    }

    pub async fn start<T: Transport>(&self, t: &T) -> Result<(), QvmError> {
        self.power(t, PowerOp::Start).await
    }

    pub async fn kill<T: Transport>(&self, t: &T) -> Result<(), QvmError> {
        self.power(t, PowerOp::Kill).await
    }

    pub async fn remove<T: Transport>(&self, t: &T) -> Result<(), QvmError> {
        tracing::info!(vm = %self.name, "removing VM");
        t.call(&self.name, "mgmt.vm.Remove", None, None).await?;
        Ok(())
    }

    // ── properties ──────────────────────────────────────────────────

    pub async fn property_list<T: Transport>(&self, t: &T) -> Result<Vec<String>, QvmError> {
        self.properties().list(t).await
    }

    pub async fn property_get<T: Transport>(
        &self,
        t: &T,
        name: &str,
    ) -> Result<PropertyValue, QvmError> {
        self.properties().get(t, name).await
    }

    pub async fn property_set<T: Transport>(
        &self,
        t: &T,
        name: &str,
        value: &str,
    ) -> Result<(), QvmError> {
        self.properties().set(t, name, value).await
    }

    pub async fn property_reset<T: Transport>(&self, t: &T, name: &str) -> Result<(), QvmError> {
        self.properties().reset(t, name).await
    }

    pub async fn property_help<T: Transport>(&self, t: &T, name: &str) -> Result<String, QvmError> {
        self.properties().help(t, name).await
    }

    pub async fn label<T: Transport>(&self, t: &T) -> Result<String, QvmError> {
        Ok(self.property_get(t, "label").await?.value)
    }

    // ── volumes ─────────────────────────────────────────────────────

    pub async fn volume_list<T: Transport>(&self, t: &T) -> Result<Vec<String>, QvmError> {
        let reply = t
            .call(&self.name, "mgmt.vm.volume.List", None, None)
            .await?;
        protocol::payload_lines(&reply)
    }

    pub async fn volume_info<T: Transport>(
        &self,
        t: &T,
        volume: &str,
    ) -> Result<VolumeInfo, QvmError> {
        let reply = t
            .call(&self.name, "mgmt.vm.volume.Info", Some(volume), None)
            .await?;
        VolumeInfo::parse(&reply)
    }

    /// Replace the volume's content with `data`.
    pub async fn volume_import<T: Transport>(
        &self,
        t: &T,
        volume: &str,
        data: &[u8],
    ) -> Result<(), QvmError> {
        tracing::info!(vm = %self.name, volume, bytes = data.len(), "importing volume data");
        t.call(&self.name, "mgmt.vm.volume.Import", Some(volume), Some(data))
            .await?;
        Ok(())
    }

    pub async fn volume_resize<T: Transport>(
        &self,
        t: &T,
        volume: &str,
        size: u64,
    ) -> Result<(), QvmError> {
        tracing::info!(vm = %self.name, volume, size, "resizing volume");
        t.call(
            &self.name,
            "mgmt.vm.volume.Resize",
            Some(volume),
            Some(size.to_string().as_bytes()),
        )
        .await?;
        Ok(())
    }

    // ── services ────────────────────────────────────────────────────

    /// Build the qrexec client invocation that runs `service` in this VM.
    ///
    /// `user` of `None` runs the service as the VM's default user.
    pub fn service_command(
        &self,
        kind: TransportKind,
        clients: &ServiceClients,
        service: &str,
        user: Option<&str>,
    ) -> ServiceInvocation {
        match kind {
            TransportKind::Socket => clients.dom0.with_args([
                "-d".to_string(),
                self.name.clone(),
                format!("{}:QUBESRPC {service} dom0", user.unwrap_or("DEFAULT")),
            ]),
            // the VM side can't pick a user; policy decides
            TransportKind::Qrexec => clients
                .vm
                .with_args([self.name.clone(), service.to_string()]),
        }
    }
}

pub fn is_running_state(state: &str) -> bool {
    matches!(state, "Running" | "Transient")
}

/// Ask qubesd for a new DisposableVM. Returns its name.
///
/// Without a base the daemon picks the global `default_dispvm`.
pub async fn create_disposable<T: Transport>(
    t: &T,
    base: Option<&str>,
) -> Result<String, QvmError> {
    let dest = base.unwrap_or("dom0");
    let reply = t
        .call(dest, "mgmt.vm.CreateDisposable", None, None)
        .await?;
    let name = String::from_utf8_lossy(&reply).trim().to_string();
    if name.is_empty() {
        return Err(QvmError::protocol("CreateDisposable returned no VM name"));
    }
    tracing::info!(vm = %name, base = dest, "created DisposableVM");
    Ok(name)
}

/// A qrexec client process, described before it is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInvocation {
    pub program: String,
    pub args: Vec<String>,
}

impl ServiceInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Copy of `self` with `extra` appended to the arguments.
    pub fn with_args(&self, extra: impl IntoIterator<Item = String>) -> Self {
        let mut inv = self.clone();
        inv.args.extend(extra);
        inv
    }

    pub fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// Client programs used to reach RPC services: `qrexec-client` in dom0,
/// `qrexec-client-vm` inside a qube.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceClients {
    pub dom0: ServiceInvocation,
    pub vm: ServiceInvocation,
}

impl ServiceClients {
    /// Use `client` for both sides. Its own arguments precede the
    /// per-call ones.
    pub fn uniform(client: ServiceInvocation) -> Self {
        Self {
            dom0: client.clone(),
            vm: client,
        }
    }
}

impl Default for ServiceClients {
    fn default() -> Self {
        Self {
            dom0: ServiceInvocation::new(QREXEC_CLIENT),
            vm: ServiceInvocation::new(QREXEC_CLIENT_VM),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, FakeQubesd};
    use crate::transport::SocketTransport;

    fn work() -> Vm {
        Vm::new("work", "AppVM")
    }

    #[test]
    fn dom0_service_command_defaults_user() {
        let inv = work().service_command(
            TransportKind::Socket,
            &ServiceClients::default(),
            "qubes.VMShell",
            None,
        );
        assert_eq!(inv.program, "qrexec-client");
        assert_eq!(
            inv.args,
            vec!["-d", "work", "DEFAULT:QUBESRPC qubes.VMShell dom0"]
        );
    }

    #[test]
    fn dom0_service_command_with_user() {
        let inv = work().service_command(
            TransportKind::Socket,
            &ServiceClients::default(),
            "qubes.Filecopy",
            Some("root"),
        );
        assert_eq!(
            inv.args,
            vec!["-d", "work", "root:QUBESRPC qubes.Filecopy dom0"]
        );
    }

    #[test]
    fn vm_service_command_uses_qrexec_client_vm() {
        let inv = work().service_command(
            TransportKind::Qrexec,
            &ServiceClients::default(),
            "my.Service",
            Some("root"),
        );
        assert_eq!(inv.program, "qrexec-client-vm");
        assert_eq!(inv.args, vec!["work", "my.Service"]);
    }

    #[test]
    fn client_arguments_precede_call_arguments() {
        let clients = ServiceClients::uniform(ServiceInvocation {
            program: "sh".into(),
            args: vec!["-c".into(), "exit 0".into(), "client".into()],
        });
        let inv = work().service_command(TransportKind::Qrexec, &clients, "my.Service", None);
        assert_eq!(inv.program, "sh");
        assert_eq!(inv.args, vec!["-c", "exit 0", "client", "work", "my.Service"]);
    }

    #[test]
    fn running_states() {
        assert!(is_running_state("Running"));
        assert!(is_running_state("Transient"));
        assert!(!is_running_state("Halted"));
        assert!(!is_running_state("Paused"));
    }

    #[tokio::test]
    async fn state_is_read_from_list_reply() {
        let qubesd = FakeQubesd::start(|_| testing::ok(b"work class=AppVM state=Halted\n"));
        let t = SocketTransport::new(qubesd.path());
        assert!(work().is_halted(&t).await.unwrap());
        assert_eq!(qubesd.requests()[0].dest, "work");
    }

    #[tokio::test]
    async fn resize_sends_decimal_size() {
        let qubesd = FakeQubesd::start(|_| testing::ok(b""));
        let t = SocketTransport::new(qubesd.path());
        work().volume_resize(&t, "private", 4096).await.unwrap();
        let req = &qubesd.requests()[0];
        assert_eq!(req.method, "mgmt.vm.volume.Resize");
        assert_eq!(req.arg, "private");
        assert_eq!(req.payload, b"4096");
    }

    #[tokio::test]
    async fn create_disposable_returns_name() {
        let qubesd = FakeQubesd::start(|_| testing::ok(b"disp1234"));
        let t = SocketTransport::new(qubesd.path());
        let name = create_disposable(&t, Some("fedora-dvm")).await.unwrap();
        assert_eq!(name, "disp1234");
        let req = &qubesd.requests()[0];
        assert_eq!(req.method, "mgmt.vm.CreateDisposable");
        assert_eq!(req.dest, "fedora-dvm");
    }
}
