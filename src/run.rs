//! `qvm run`: execute a shell command or RPC service in qubes.
//!
//! Commands are delivered through the `qubes.VMShell` service: the command
//! line is written first on the service's stdin, followed by whatever the
//! user pipes in. With `--service` the named service is called directly.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use futures_util::future::join_all;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};

use crate::app::Qubes;
use crate::cli::RunArgs;
use crate::config::RunConfig;
use crate::error::QvmError;
use crate::filter::{self, OutputFilter};
use crate::transport::{Transport, TransportKind};
use crate::vm::{self, PowerOp, ServiceClients, Vm};

pub const VMSHELL_SERVICE: &str = "qubes.VMShell";
const WAIT_FOR_SESSION: &str = "+WaitForSession";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Vm(String),
    /// Every running qube except dom0 and the excluded ones.
    All { exclude: Vec<String> },
    /// A fresh DisposableVM, killed once the command finishes.
    Dispvm { base: Option<String> },
}

/// What happens to the service's stdio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoMode {
    /// Remote output is discarded.
    Detached,
    /// Local stdin/stdout/stderr are forwarded.
    PassIo,
    /// Remote stdin/stdout are connected to a local shell command.
    LocalCmd(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub target: Target,
    pub command: String,
    pub user: Option<String>,
    pub autostart: bool,
    pub io: IoMode,
    pub gui: bool,
    pub service: bool,
    pub filter_escape_chars: bool,
    pub colour_output: Option<u8>,
    pub colour_stderr: Option<u8>,
}

impl RunRequest {
    pub fn from_args(
        args: &RunArgs,
        config: &RunConfig,
        stdout_is_tty: bool,
    ) -> Result<Self, QvmError> {
        let mut positional = args.args.iter();

        let target = if args.all {
            Target::All {
                exclude: args.exclude.clone(),
            }
        } else if let Some(base) = &args.dispvm {
            Target::Dispvm {
                base: (!base.is_empty()).then(|| base.clone()),
            }
        } else {
            let name = positional
                .next()
                .ok_or_else(|| QvmError::validation("VM name is required"))?;
            Target::Vm(name.clone())
        };

        let command = positional.map(String::as_str).collect::<Vec<_>>().join(" ");
        if command.trim().is_empty() {
            return Err(QvmError::validation("a command is required"));
        }

        let user = args.user.clone().or_else(|| {
            (!config.default_user.is_empty()).then(|| config.default_user.clone())
        });

        let autostart = if args.no_autostart {
            false
        } else {
            args.autostart || config.autostart
        };

        let io = match (&args.localcmd, args.pass_io) {
            (Some(cmd), _) => IoMode::LocalCmd(cmd.clone()),
            (None, true) => IoMode::PassIo,
            (None, false) => IoMode::Detached,
        };

        let filter_escape_chars = if args.no_filter_escape_chars {
            false
        } else if args.filter_escape_chars {
            true
        } else {
            config.filter_escape_chars.unwrap_or(stdout_is_tty)
        };

        Ok(Self {
            target,
            command,
            user,
            autostart,
            io,
            gui: !args.no_gui,
            service: args.service,
            filter_escape_chars,
            colour_output: args.colour_output.filter(|_| !args.no_colour_output),
            colour_stderr: args.colour_stderr.filter(|_| !args.no_colour_stderr),
        })
    }

    pub fn service_name(&self) -> String {
        if self.service {
            self.command.clone()
        } else if self.gui {
            format!("{VMSHELL_SERVICE}{WAIT_FOR_SESSION}")
        } else {
            VMSHELL_SERVICE.to_string()
        }
    }

    /// Bytes sent ahead of user input: the shell command for VMShell.
    pub fn shell_input(&self) -> Option<String> {
        (!self.service).then(|| format!("{}; exit\n", self.command))
    }
}

/// Execute the request. Returns the exit code to report.
///
/// For a single target that is the remote command's exit code; with
/// `--all` the highest code across targets, a failed dispatch counting as 1.
pub async fn run<T: Transport>(app: &mut Qubes<T>, req: &RunRequest) -> Result<i32, QvmError> {
    let kind = app.transport_kind();
    let clients = app.service_clients.clone();

    match &req.target {
        Target::Vm(name) => {
            let vm = app.domains.get(&app.transport, name).await?;
            ensure_running(&app.transport, &vm, req.autostart).await?;
            dispatch(kind, &clients, &vm, req).await
        }
        Target::Dispvm { base } => {
            let name = vm::create_disposable(&app.transport, base.as_deref()).await?;
            let vm = Vm::new(name, "DispVM");
            let result = async {
                vm.start(&app.transport).await?;
                dispatch(kind, &clients, &vm, req).await
            }
            .await;
            if let Err(e) = vm.kill(&app.transport).await {
                tracing::warn!(vm = %vm.name, error = %e, "failed to clean up DisposableVM");
            }
            result
        }
        Target::All { exclude } => {
            let targets = running_targets(app, exclude).await?;
            if targets.is_empty() {
                tracing::warn!("no running VMs to run the command in");
                return Ok(0);
            }
            let results = join_all(targets.iter().map(|vm| dispatch(kind, &clients, vm, req))).await;

            let mut code = 0;
            for (vm, result) in targets.iter().zip(results) {
                match result {
                    Ok(c) => code = code.max(c),
                    Err(e) => {
                        tracing::error!(vm = %vm.name, error = %e, "command failed");
                        code = code.max(1);
                    }
                }
            }
            Ok(code)
        }
    }
}

/// Running qubes eligible for `--all`, sorted by name.
pub async fn running_targets<T: Transport>(
    app: &mut Qubes<T>,
    exclude: &[String],
) -> Result<Vec<Vm>, QvmError> {
    let mut targets = Vec::new();
    for name in app.domains.names(&app.transport).await? {
        if name == "dom0" || exclude.contains(&name) {
            continue;
        }
        let state = app.domains.state(&app.transport, &name).await?;
        if state.as_deref().is_some_and(vm::is_running_state) {
            targets.push(app.domains.get(&app.transport, &name).await?);
        }
    }
    Ok(targets)
}

/// Make sure `vm` can accept a service call, starting or unpausing it
/// when `autostart` allows.
pub async fn ensure_running<T: Transport>(
    t: &T,
    vm: &Vm,
    autostart: bool,
) -> Result<(), QvmError> {
    let state = vm.state(t).await?;
    if vm::is_running_state(&state) {
        return Ok(());
    }
    if !autostart {
        return Err(QvmError::NotRunning {
            name: vm.name.clone(),
        });
    }
    match state.as_str() {
        "Paused" => vm.power(t, PowerOp::Unpause).await,
        _ => vm.start(t).await,
    }
}

fn missing_pipe(which: &str) -> QvmError {
    QvmError::Io {
        context: format!("child {which} was not captured"),
        source: std::io::Error::other("missing pipe"),
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1)
}

async fn dispatch(
    kind: TransportKind,
    clients: &ServiceClients,
    vm: &Vm,
    req: &RunRequest,
) -> Result<i32, QvmError> {
    let service = req.service_name();
    let invocation = vm.service_command(kind, clients, &service, req.user.as_deref());
    tracing::info!(vm = %vm.name, service = %service, "calling service");

    let mut cmd = invocation.command();
    cmd.stdin(Stdio::piped());
    match &req.io {
        IoMode::PassIo => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        IoMode::LocalCmd(_) => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::inherit());
        }
        IoMode::Detached => {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
    }

    let mut child = cmd.spawn().map_err(|e| QvmError::Io {
        context: format!("running {}", invocation.program),
        source: e,
    })?;

    let mut stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
    if let Some(input) = req.shell_input()
        && let Err(e) = stdin.write_all(input.as_bytes()).await
    {
        // the client may exit without reading; its status still tells why
        tracing::debug!(vm = %vm.name, error = %e, "sending command failed");
    }

    match &req.io {
        IoMode::Detached => drop(stdin),
        IoMode::PassIo => pass_io(&mut child, stdin, req).await?,
        IoMode::LocalCmd(command) => local_cmd(&mut child, stdin, command).await?,
    }

    let status = child.wait().await.map_err(|e| QvmError::Io {
        context: format!("waiting for {}", invocation.program),
        source: e,
    })?;
    let code = exit_code(status);
    tracing::debug!(vm = %vm.name, code, "service finished");
    Ok(code)
}

async fn pass_io(child: &mut Child, stdin: ChildStdin, req: &RunRequest) -> Result<(), QvmError> {
    forward_io(
        child,
        stdin,
        req,
        tokio::io::stdin(),
        tokio::io::stdout(),
        tokio::io::stderr(),
    )
    .await
}

/// Connect the child's stdio to `local_*`, filtering its output.
async fn forward_io<I, O, E>(
    child: &mut Child,
    mut stdin: ChildStdin,
    req: &RunRequest,
    mut local_in: I,
    local_out: O,
    local_err: E,
) -> Result<(), QvmError>
where
    I: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

    // stdin reads can't be cancelled; the task is abandoned once output ends
    let input = tokio::spawn(async move {
        if let Err(e) = tokio::io::copy(&mut local_in, &mut stdin).await {
            tracing::debug!(error = %e, "forwarding stdin stopped");
        }
    });

    let out = filter::forward(
        stdout,
        local_out,
        OutputFilter::new(req.filter_escape_chars, req.colour_output),
    );
    let err = filter::forward(
        stderr,
        local_err,
        OutputFilter::new(req.filter_escape_chars, req.colour_stderr),
    );
    let (out, err) = tokio::join!(out, err);
    input.abort();

    for result in [out, err] {
        result.map_err(|e| QvmError::Io {
            context: "forwarding remote output".into(),
            source: e,
        })?;
    }
    Ok(())
}

async fn pipe<R, W>(mut reader: R, mut writer: W) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let n = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.shutdown().await?;
    Ok(n)
}

async fn local_cmd(child: &mut Child, stdin: ChildStdin, command: &str) -> Result<(), QvmError> {
    let remote_out = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;

    let mut local = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| QvmError::Io {
            context: format!("running local command '{command}'"),
            source: e,
        })?;
    let local_in = local.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
    let local_out = local.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;

    // either side exiting early legitimately breaks the pipe
    let (to_local, to_remote) = tokio::join!(pipe(remote_out, local_in), pipe(local_out, stdin));
    if let Err(e) = to_local {
        tracing::debug!(error = %e, "remote → local pipe closed");
    }
    if let Err(e) = to_remote {
        tracing::debug!(error = %e, "local → remote pipe closed");
    }

    let status = local.wait().await.map_err(|e| QvmError::Io {
        context: format!("waiting for local command '{command}'"),
        source: e,
    })?;
    if !status.success() {
        tracing::warn!(command, code = exit_code(status), "local command failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Command};
    use crate::testing::{self, FakeQubesd, FakeRequest};
    use crate::transport::SocketTransport;
    use crate::vm::ServiceInvocation;

    fn parse_with(args: &[&str], config: &RunConfig, tty: bool) -> Result<RunRequest, QvmError> {
        let cli = Cli::try_parse_from(["qvm", "run"].iter().chain(args)).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("not a run command");
        };
        RunRequest::from_args(&args, config, tty)
    }

    fn parse(args: &[&str]) -> Result<RunRequest, QvmError> {
        parse_with(args, &RunConfig::default(), false)
    }

    fn rejected_by_clap(args: &[&str]) -> bool {
        Cli::try_parse_from(["qvm", "run"].iter().chain(args)).is_err()
    }

    /// Clients that run `script` under `sh`; `$2` is the target VM name.
    fn sh_clients(script: &str) -> ServiceClients {
        ServiceClients::uniform(ServiceInvocation {
            program: "sh".into(),
            args: vec!["-c".into(), script.into(), "qrexec-client".into()],
        })
    }

    fn app_with(qubesd: &FakeQubesd, clients: ServiceClients) -> Qubes<SocketTransport> {
        let mut app = Qubes::new(SocketTransport::new(qubesd.path()));
        app.service_clients = clients;
        app
    }

    fn dispvm_daemon(start_fails: bool) -> impl Fn(&FakeRequest) -> Vec<u8> + Send + Sync {
        move |req| match req.method.as_str() {
            "mgmt.vm.CreateDisposable" => testing::ok(b"disp42"),
            "mgmt.vm.Start" if start_fails => {
                testing::exception("QubesVMError", "not enough memory")
            }
            _ => testing::ok(b""),
        }
    }

    fn daemon(req: &FakeRequest) -> Vec<u8> {
        match (req.method.as_str(), req.dest.as_str()) {
            ("mgmt.vm.List", "dom0") => testing::ok(
                b"dom0 class=AdminVM state=Running\n\
                  work class=AppVM state=Running\n\
                  mail class=AppVM state=Running\n\
                  vault class=AppVM state=Halted\n\
                  paused class=AppVM state=Paused\n",
            ),
            ("mgmt.vm.List", "vault") => testing::ok(b"vault class=AppVM state=Halted\n"),
            ("mgmt.vm.List", "paused") => testing::ok(b"paused class=AppVM state=Paused\n"),
            ("mgmt.vm.List", "work") => testing::ok(b"work class=AppVM state=Running\n"),
            _ => testing::ok(b""),
        }
    }

    #[test]
    fn shell_command_goes_through_vmshell() {
        let req = parse(&["work", "ls", "-la", "/home"]).unwrap();
        assert_eq!(req.target, Target::Vm("work".into()));
        assert_eq!(req.service_name(), "qubes.VMShell+WaitForSession");
        assert_eq!(req.shell_input().as_deref(), Some("ls -la /home; exit\n"));
        assert_eq!(req.io, IoMode::Detached);
        assert!(req.autostart);
    }

    #[test]
    fn no_gui_skips_session_wait() {
        let req = parse(&["--no-gui", "work", "true"]).unwrap();
        assert_eq!(req.service_name(), "qubes.VMShell");
    }

    #[test]
    fn service_mode_has_no_shell_input() {
        let req = parse(&["--service", "work", "qubes.GetDate"]).unwrap();
        assert_eq!(req.service_name(), "qubes.GetDate");
        assert_eq!(req.shell_input(), None);
    }

    #[test]
    fn all_takes_whole_command() {
        let req = parse(&["--all", "--exclude", "mail", "uptime"]).unwrap();
        assert_eq!(
            req.target,
            Target::All {
                exclude: vec!["mail".into()]
            }
        );
        assert_eq!(req.command, "uptime");
    }

    #[test]
    fn dispvm_with_and_without_base() {
        let req = parse(&["--dispvm", "firefox"]).unwrap();
        assert_eq!(req.target, Target::Dispvm { base: None });
        assert_eq!(req.command, "firefox");

        let req = parse(&["--dispvm=fedora-dvm", "xterm"]).unwrap();
        assert_eq!(
            req.target,
            Target::Dispvm {
                base: Some("fedora-dvm".into())
            }
        );
    }

    #[test]
    fn command_is_required() {
        assert!(parse(&["work"]).is_err());
    }

    #[test]
    fn conflicting_options_rejected() {
        assert!(rejected_by_clap(&["--all", "--pass-io", "true"]));
        assert!(rejected_by_clap(&["--all", "--localcmd", "cat", "true"]));
        assert!(rejected_by_clap(&["--all", "--dispvm", "true"]));
        assert!(rejected_by_clap(&["--exclude", "work", "work", "true"]));
        assert!(rejected_by_clap(&["--pass-io", "--localcmd", "cat", "work", "true"]));
    }

    #[test]
    fn escape_filtering_defaults_to_tty() {
        let config = RunConfig::default();
        assert!(parse_with(&["work", "true"], &config, true).unwrap().filter_escape_chars);
        assert!(!parse_with(&["work", "true"], &config, false).unwrap().filter_escape_chars);
        assert!(
            !parse_with(&["--no-filter-escape-chars", "work", "true"], &config, true)
                .unwrap()
                .filter_escape_chars
        );
        assert!(
            parse_with(&["--filter-escape-chars", "work", "true"], &config, false)
                .unwrap()
                .filter_escape_chars
        );
    }

    #[test]
    fn config_supplies_defaults() {
        let config = RunConfig {
            default_user: "root".into(),
            autostart: false,
            filter_escape_chars: Some(true),
        };
        let req = parse_with(&["work", "true"], &config, false).unwrap();
        assert_eq!(req.user.as_deref(), Some("root"));
        assert!(!req.autostart);
        assert!(req.filter_escape_chars);

        let req = parse_with(&["--autostart", "-u", "user", "work", "true"], &config, false).unwrap();
        assert_eq!(req.user.as_deref(), Some("user"));
        assert!(req.autostart);
    }

    #[test]
    fn colours_can_be_disabled() {
        let req = parse(&["--colour-output", "32", "--colour-stderr", "31", "work", "true"]).unwrap();
        assert_eq!(req.colour_output, Some(32));
        assert_eq!(req.colour_stderr, Some(31));

        let req = parse(&["--colour-output", "32", "--no-colour-output", "work", "true"]).unwrap();
        assert_eq!(req.colour_output, None);
    }

    #[test]
    fn localcmd_mode() {
        let req = parse(&["--localcmd", "cat > out.txt", "work", "cat", "/etc/hosts"]).unwrap();
        assert_eq!(req.io, IoMode::LocalCmd("cat > out.txt".into()));
    }

    #[tokio::test]
    async fn halted_vm_is_started_with_autostart() {
        let qubesd = FakeQubesd::start(daemon);
        let t = SocketTransport::new(qubesd.path());
        ensure_running(&t, &Vm::new("vault", "AppVM"), true)
            .await
            .unwrap();
        assert_eq!(qubesd.methods().last().unwrap(), "mgmt.vm.Start");
    }

    #[tokio::test]
    async fn paused_vm_is_unpaused_with_autostart() {
        let qubesd = FakeQubesd::start(daemon);
        let t = SocketTransport::new(qubesd.path());
        ensure_running(&t, &Vm::new("paused", "AppVM"), true)
            .await
            .unwrap();
        assert_eq!(qubesd.methods().last().unwrap(), "mgmt.vm.Unpause");
    }

    #[tokio::test]
    async fn halted_vm_without_autostart_fails() {
        let qubesd = FakeQubesd::start(daemon);
        let t = SocketTransport::new(qubesd.path());
        let err = ensure_running(&t, &Vm::new("vault", "AppVM"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, QvmError::NotRunning { .. }));
    }

    #[tokio::test]
    async fn running_vm_is_left_alone() {
        let qubesd = FakeQubesd::start(daemon);
        let t = SocketTransport::new(qubesd.path());
        ensure_running(&t, &Vm::new("work", "AppVM"), true)
            .await
            .unwrap();
        assert_eq!(qubesd.methods(), vec!["mgmt.vm.List"]);
    }

    #[tokio::test]
    async fn all_targets_running_vms_except_dom0_and_excluded() {
        let qubesd = FakeQubesd::start(daemon);
        let mut app = Qubes::new(SocketTransport::new(qubesd.path()));
        let targets = running_targets(&mut app, &["mail".to_string()])
            .await
            .unwrap();
        let names: Vec<_> = targets.iter().map(|vm| vm.name.as_str()).collect();
        assert_eq!(names, vec!["work"]);
    }

    #[tokio::test]
    async fn unknown_vm_fails_before_any_service_call() {
        let qubesd = FakeQubesd::start(daemon);
        let mut app = Qubes::new(SocketTransport::new(qubesd.path()));
        let req = parse(&["nope", "true"]).unwrap();
        let err = run(&mut app, &req).await.unwrap_err();
        assert!(matches!(err, QvmError::NotFound { .. }));
    }

    #[tokio::test]
    async fn shell_command_arrives_on_service_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let received = dir.path().join("stdin");
        let qubesd = FakeQubesd::start(daemon);
        let script = format!("cat > '{}'; exit 3", received.display());
        let mut app = app_with(&qubesd, sh_clients(&script));

        let req = parse(&["work", "echo", "hi"]).unwrap();
        assert_eq!(run(&mut app, &req).await.unwrap(), 3);
        assert_eq!(std::fs::read_to_string(&received).unwrap(), "echo hi; exit\n");
    }

    #[tokio::test]
    async fn service_killed_by_signal_reports_128_plus_signal() {
        let qubesd = FakeQubesd::start(daemon);
        let mut app = app_with(&qubesd, sh_clients("kill -9 $$"));
        let req = parse(&["work", "true"]).unwrap();
        assert_eq!(run(&mut app, &req).await.unwrap(), 137);
    }

    #[tokio::test]
    async fn client_exiting_without_reading_still_reports_its_code() {
        let qubesd = FakeQubesd::start(daemon);
        let mut app = app_with(&qubesd, sh_clients("exec 0<&-; exit 4"));
        let req = parse(&["work", "true"]).unwrap();
        assert_eq!(run(&mut app, &req).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn all_reports_highest_exit_code() {
        let qubesd = FakeQubesd::start(daemon);
        let script = r#"case "$2" in work) exit 2;; mail) exit 5;; esac"#;
        let mut app = app_with(&qubesd, sh_clients(script));
        let req = parse(&["--all", "true"]).unwrap();
        assert_eq!(run(&mut app, &req).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn all_counts_failed_dispatch_as_one() {
        let qubesd = FakeQubesd::start(daemon);
        let clients = ServiceClients::uniform(ServiceInvocation::new("/nonexistent/qrexec-client"));
        let mut app = app_with(&qubesd, clients);
        let req = parse(&["--all", "true"]).unwrap();
        assert_eq!(run(&mut app, &req).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dispvm_is_killed_after_command() {
        let qubesd = FakeQubesd::start(dispvm_daemon(false));
        let mut app = app_with(&qubesd, sh_clients("exit 7"));
        let req = parse(&["--dispvm", "true"]).unwrap();
        assert_eq!(run(&mut app, &req).await.unwrap(), 7);

        let methods = qubesd.methods();
        assert_eq!(
            methods,
            vec!["mgmt.vm.CreateDisposable", "mgmt.vm.Start", "mgmt.vm.Kill"]
        );
        assert_eq!(qubesd.requests()[2].dest, "disp42");
    }

    #[tokio::test]
    async fn dispvm_is_killed_when_start_fails() {
        let qubesd = FakeQubesd::start(dispvm_daemon(true));
        let mut app = app_with(&qubesd, sh_clients("exit 0"));
        let req = parse(&["--dispvm=fedora-dvm", "true"]).unwrap();
        let err = run(&mut app, &req).await.unwrap_err();
        assert!(matches!(err, QvmError::Daemon { .. }));

        let reqs = qubesd.requests();
        assert_eq!(reqs[0].dest, "fedora-dvm");
        let kill = reqs.last().unwrap();
        assert_eq!(kill.method, "mgmt.vm.Kill");
        assert_eq!(kill.dest, "disp42");
    }

    #[tokio::test]
    async fn localcmd_is_piped_both_ways() {
        let dir = tempfile::tempdir().unwrap();
        let remote_in = dir.path().join("remote-in");
        let local_in = dir.path().join("local-in");
        let qubesd = FakeQubesd::start(daemon);
        let script = format!("echo from-remote; cat > '{}'", remote_in.display());
        let mut app = app_with(&qubesd, sh_clients(&script));

        let local = format!("head -n1 > '{}'; echo from-local", local_in.display());
        let req = parse(&["--localcmd", &local, "work", "true"]).unwrap();
        assert_eq!(run(&mut app, &req).await.unwrap(), 0);

        assert_eq!(std::fs::read_to_string(&local_in).unwrap(), "from-remote\n");
        assert_eq!(
            std::fs::read_to_string(&remote_in).unwrap(),
            "true; exit\nfrom-local\n"
        );
    }

    #[tokio::test]
    async fn pass_io_output_is_filtered_and_coloured() {
        let req = parse(&[
            "--pass-io",
            "--filter-escape-chars",
            "--colour-output",
            "32",
            "work",
            "true",
        ])
        .unwrap();
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(r#"read line; printf 'got %s\033[2J\n' "$line"; printf 'oops\007' >&2"#)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let stdin = child.stdin.take().unwrap();

        let mut out = Vec::new();
        let mut err = Vec::new();
        forward_io(&mut child, stdin, &req, &b"hello\n"[..], &mut out, &mut err)
            .await
            .unwrap();
        assert!(child.wait().await.unwrap().success());

        assert_eq!(out, b"\x1b[0;32mgot hello_[2J\n\x1b[0m");
        assert_eq!(err, b"oops\x07");
    }
}
