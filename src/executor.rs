//! External command execution
//!
//! Every process the grader starts (extraction, build, the submission binary,
//! the assembler, the diff) goes through [`CommandExecutor`]. Commands are
//! structured [`CommandSpec`] descriptors; the executor is the only place that
//! turns a free-form command string into shell syntax.
//!
//! The execution environment is controlled through a shim directory written
//! at construction time and prepended to `PATH`:
//!
//! - each pinned toolchain name (`gcc`, `cc`, ...) is a wrapper that `exec`s
//!   the configured compiler with its fixed flags, so a submission's build
//!   cannot silently pick up another compiler;
//! - under [`CommandPolicy::Restricted`], each disabled command name is a
//!   no-op that exits 0.
//!
//! Each command runs in its own process group under a hard timeout. When the
//! limit is hit the group receives SIGTERM, then SIGKILL after the grace
//! period. Once the leader has exited, whatever is left of the group is
//! killed.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::{ExecutionConfig, ToolPin, ToolchainConfig};
use crate::constants::{NOT_EXECUTABLE_EXIT_CODE, NOT_FOUND_EXIT_CODE, TIMEOUT_EXIT_CODE};

const SPAWN_ATTEMPTS: u32 = 3;

/// What a command runs
#[derive(Debug, Clone)]
enum Program {
    /// A program resolved through `PATH` (or an explicit path)
    Exec(OsString),
    /// A free-form script run by the configured shell
    Shell(String),
}

/// Structured description of one external command
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: Program,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
    stdin: Option<PathBuf>,
    stdout: Option<PathBuf>,
    timeout: Option<Duration>,
    policy: Option<CommandPolicy>,
}

impl CommandSpec {
    /// Run `program` directly with no shell involved
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self::with_program(Program::Exec(program.as_ref().to_os_string()))
    }

    /// Run a free-form command string with the executor's shell
    pub fn shell(script: impl Into<String>) -> Self {
        Self::with_program(Program::Shell(script.into()))
    }

    fn with_program(program: Program) -> Self {
        Self {
            program,
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
            stdin: None,
            stdout: None,
            timeout: None,
            policy: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Feed the file to standard input (default: `/dev/null`)
    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Write standard output to the file instead of capturing it
    pub fn stdout_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Run under `policy` whatever policy the sequence was started with
    pub fn policy(mut self, policy: CommandPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    fn is_shell(&self) -> bool {
        matches!(self.program, Program::Shell(_))
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.program {
            Program::Exec(program) => write!(f, "{}", program.to_string_lossy())?,
            Program::Shell(script) => write!(f, "sh: {}", script)?,
        }
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        if let Some(stdin) = &self.stdin {
            write!(f, " < {}", stdin.display())?;
        }
        if let Some(stdout) = &self.stdout {
            write!(f, " > {}", stdout.display())?;
        }
        Ok(())
    }
}

/// Environment a command runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPolicy {
    /// Toolchain pinning only
    Trusted,
    /// Toolchain pinning plus disabled-command stubs
    Restricted,
}

/// Outcome of one command, or of the command that ended a sequence
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandResult {
    /// 0 on success; 124 on timeout; 128+N when killed by signal N
    pub exit_code: i32,
    /// Combined stdout and stderr, in arrival order
    pub output: Vec<u8>,
    /// Output of the failing command (None on success)
    pub error_output: Option<Vec<u8>>,
    pub timed_out: bool,
    /// Whether `output` hit the capture limit
    pub truncated: bool,
    /// Index of the command in its sequence that produced this result
    pub step: usize,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Failing output (or plain output) cut to at most `limit` bytes for reports
    pub fn diagnostics(&self, limit: usize) -> String {
        let bytes = self.error_output.as_deref().unwrap_or(&self.output);
        truncate_text(&String::from_utf8_lossy(bytes), limit)
    }
}

/// Cut `text` to at most `limit` bytes on a char boundary, marking the cut
pub fn truncate_text(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[... {} bytes truncated]", &text[..end], text.len() - end)
}

/// Errors that prevent a command from being run or observed at all
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Failed to prepare command shims: {0}")]
    Setup(#[source] io::Error),

    #[error("Failed to spawn shell {shell}: {source}")]
    ShellUnavailable {
        shell: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open {} for redirection: {source}", path.display())]
    Redirect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to wait for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Runs external commands under the controlled environment
pub struct CommandExecutor {
    shell: PathBuf,
    trusted_path: OsString,
    restricted_path: OsString,
    default_timeout: Duration,
    kill_grace: Duration,
    output_limit: usize,
    // Owns the shim directories referenced by the two PATH values
    _shims: TempDir,
}

impl CommandExecutor {
    /// Create an executor, writing its toolchain and disabled-command shims
    pub fn new(
        toolchain: &ToolchainConfig,
        execution: &ExecutionConfig,
    ) -> Result<Self, ExecutorError> {
        let shims = tempfile::Builder::new()
            .prefix("autograder-shims-")
            .tempdir()
            .map_err(ExecutorError::Setup)?;

        let toolchain_dir = shims.path().join("toolchain");
        let disabled_dir = shims.path().join("disabled");
        std::fs::create_dir(&toolchain_dir).map_err(ExecutorError::Setup)?;
        std::fs::create_dir(&disabled_dir).map_err(ExecutorError::Setup)?;

        for (name, pin) in &toolchain.pins {
            write_shim(&toolchain_dir, name, &pinned_script(pin))?;
        }
        for name in &toolchain.disabled_commands {
            write_shim(&disabled_dir, name, "#!/bin/sh\nexit 0\n")?;
        }

        let inherited: Vec<PathBuf> = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        let trusted_path = join_search_path([toolchain_dir.clone()], &inherited)?;
        let restricted_path = join_search_path([disabled_dir, toolchain_dir], &inherited)?;

        tracing::debug!(
            shims = %shims.path().display(),
            pinned = toolchain.pins.len(),
            disabled = toolchain.disabled_commands.len(),
            "Command executor ready"
        );

        Ok(Self {
            shell: toolchain.shell.clone(),
            trusted_path,
            restricted_path,
            default_timeout: execution.run_timeout,
            kill_grace: execution.kill_grace,
            output_limit: execution.output_limit_bytes,
            _shims: shims,
        })
    }

    /// Run a single command
    pub async fn run(
        &self,
        command: &CommandSpec,
        policy: CommandPolicy,
    ) -> Result<CommandResult, ExecutorError> {
        self.run_sequence(std::slice::from_ref(command), policy).await
    }

    /// Run commands in order, stopping at the first non-zero exit.
    ///
    /// The failing command's result is returned with `error_output` set and
    /// no later command is started. An empty sequence succeeds.
    pub async fn run_sequence(
        &self,
        commands: &[CommandSpec],
        policy: CommandPolicy,
    ) -> Result<CommandResult, ExecutorError> {
        let mut last = CommandResult::default();

        for (step, command) in commands.iter().enumerate() {
            let mut result = self.run_one(command, policy).await?;
            result.step = step;

            if !result.success() {
                tracing::debug!(
                    command = %command,
                    step,
                    exit_code = result.exit_code,
                    timed_out = result.timed_out,
                    "Command failed, skipping the rest of the sequence"
                );
                result.error_output = Some(result.output.clone());
                return Ok(result);
            }
            last = result;
        }

        Ok(last)
    }

    async fn run_one(
        &self,
        spec: &CommandSpec,
        policy: CommandPolicy,
    ) -> Result<CommandResult, ExecutorError> {
        let policy = spec.policy.unwrap_or(policy);
        tracing::debug!(command = %spec, ?policy, "Running command");

        let mut attempt = 1;
        let mut child = loop {
            let mut cmd = self.prepare(spec, policy)?;
            match cmd.spawn() {
                Ok(child) => break child,
                // A freshly written executable may still be open in a forked sibling
                Err(e)
                    if e.raw_os_error() == Some(nix::libc::ETXTBSY)
                        && attempt < SPAWN_ATTEMPTS =>
                {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => return self.spawn_failure(spec, e),
            }
        };
        // The leader leads its own group; the id stays valid for killpg after it is reaped
        let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));

        let capture = Capture::new(self.output_limit);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(drain(stdout, capture.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(drain(stderr, capture.clone()));
        }

        let limit = spec.timeout.unwrap_or(self.default_timeout);
        let (status, timed_out) =
            self.wait_bounded(&mut child, pgid, limit)
                .await
                .map_err(|source| ExecutorError::Wait {
                    command: spec.to_string(),
                    source,
                })?;

        // Nothing the command started may outlive it
        signal_group(pgid, Signal::SIGKILL);

        for mut reader in readers {
            if timeout(self.kill_grace, &mut reader).await.is_err() {
                tracing::debug!(command = %spec, "Output pipe still open, abandoning reader");
                reader.abort();
            }
        }

        let (mut output, truncated) = capture.take();
        let exit_code = if timed_out {
            output.extend_from_slice(
                format!("\n[terminated after {:.1}s time limit]\n", limit.as_secs_f64()).as_bytes(),
            );
            TIMEOUT_EXIT_CODE
        } else {
            exit_code_of(status)
        };

        Ok(CommandResult {
            exit_code,
            output,
            error_output: None,
            timed_out,
            truncated,
            step: 0,
        })
    }

    fn prepare(&self, spec: &CommandSpec, policy: CommandPolicy) -> Result<Command, ExecutorError> {
        let mut cmd = match &spec.program {
            Program::Exec(program) => Command::new(program),
            Program::Shell(script) => {
                let mut cmd = Command::new(&self.shell);
                cmd.args(["-o", "pipefail", "-c"]).arg(script);
                cmd
            }
        };
        cmd.args(&spec.args);

        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        let search_path = match policy {
            CommandPolicy::Trusted => &self.trusted_path,
            CommandPolicy::Restricted => &self.restricted_path,
        };
        cmd.env("PATH", search_path);
        for (key, value) in &spec.envs {
            cmd.env(key, value);
        }

        let stdin = match &spec.stdin {
            Some(path) => Stdio::from(File::open(path).map_err(|source| ExecutorError::Redirect {
                path: path.clone(),
                source,
            })?),
            None => Stdio::null(),
        };
        let stdout = match &spec.stdout {
            Some(path) => Stdio::from(File::create(path).map_err(|source| {
                ExecutorError::Redirect {
                    path: path.clone(),
                    source,
                }
            })?),
            None => Stdio::piped(),
        };

        cmd.stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        Ok(cmd)
    }

    /// Map a spawn failure onto a shell-style result.
    ///
    /// Only a missing shell is fatal; a missing or non-executable program is
    /// an ordinary command failure.
    fn spawn_failure(
        &self,
        spec: &CommandSpec,
        e: io::Error,
    ) -> Result<CommandResult, ExecutorError> {
        if spec.is_shell() {
            return Err(ExecutorError::ShellUnavailable {
                shell: self.shell.display().to_string(),
                source: e,
            });
        }

        let exit_code = match e.kind() {
            io::ErrorKind::NotFound => NOT_FOUND_EXIT_CODE,
            _ => NOT_EXECUTABLE_EXIT_CODE,
        };
        tracing::debug!(command = %spec, error = %e, exit_code, "Failed to spawn command");

        Ok(CommandResult {
            exit_code,
            output: format!("{}: {}\n", spec, e).into_bytes(),
            error_output: None,
            timed_out: false,
            truncated: false,
            step: 0,
        })
    }

    /// Wait for the child, escalating SIGTERM to SIGKILL once `limit` passes
    async fn wait_bounded(
        &self,
        child: &mut Child,
        pgid: Option<Pid>,
        limit: Duration,
    ) -> io::Result<(ExitStatus, bool)> {
        if let Ok(status) = timeout(limit, child.wait()).await {
            return Ok((status?, false));
        }

        tracing::debug!(limit_ms = limit.as_millis() as u64, "Time limit hit, sending SIGTERM");
        signal_group(pgid, Signal::SIGTERM);

        if let Ok(status) = timeout(self.kill_grace, child.wait()).await {
            return Ok((status?, true));
        }

        tracing::debug!("Process ignored SIGTERM, sending SIGKILL");
        signal_group(pgid, Signal::SIGKILL);
        Ok((child.wait().await?, true))
    }
}

fn signal_group(pgid: Option<Pid>, signal: Signal) {
    let Some(pgid) = pgid else {
        return;
    };
    match killpg(pgid, signal) {
        // Group already empty
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => tracing::debug!(%pgid, ?signal, error = %e, "Failed to signal process group"),
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

/// Wrapper script that replaces `name` with the pinned program
fn pinned_script(pin: &ToolPin) -> String {
    let mut line = format!("exec {}", shell_quote(&pin.program.to_string_lossy()));
    for flag in &pin.flags {
        line.push(' ');
        line.push_str(&shell_quote(flag));
    }
    format!("#!/bin/sh\n{} \"$@\"\n", line)
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn write_shim(dir: &Path, name: &str, script: &str) -> Result<(), ExecutorError> {
    if name.is_empty() || name.contains('/') {
        tracing::warn!(name, "Skipping shim with invalid command name");
        return Ok(());
    }
    let path = dir.join(name);
    std::fs::write(&path, script).map_err(ExecutorError::Setup)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .map_err(ExecutorError::Setup)?;
    Ok(())
}

fn join_search_path<I>(front: I, inherited: &[PathBuf]) -> Result<OsString, ExecutorError>
where
    I: IntoIterator<Item = PathBuf>,
{
    let dirs: Vec<PathBuf> = front.into_iter().chain(inherited.iter().cloned()).collect();
    std::env::join_paths(dirs)
        .map_err(|e| ExecutorError::Setup(io::Error::new(io::ErrorKind::InvalidInput, e)))
}

/// Shared capture buffer for a child's stdout and stderr
#[derive(Clone)]
struct Capture {
    inner: Arc<Mutex<CaptureBuffer>>,
}

struct CaptureBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CaptureBuffer {
                data: Vec::new(),
                limit,
                truncated: false,
            })),
        }
    }

    fn push(&self, chunk: &[u8]) {
        let mut buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let room = buf.limit.saturating_sub(buf.data.len());
        if chunk.len() > room {
            buf.data.extend_from_slice(&chunk[..room]);
            buf.truncated = true;
        } else {
            buf.data.extend_from_slice(chunk);
        }
    }

    fn take(&self) -> (Vec<u8>, bool) {
        let mut buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        (std::mem::take(&mut buf.data), buf.truncated)
    }
}

/// Read a pipe to EOF; bytes past the capture limit are discarded
fn drain<R>(mut reader: R, capture: Capture) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => capture.push(&chunk[..n]),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Instant;

    fn toolchain(pins: BTreeMap<String, ToolPin>, disabled: &[&str]) -> ToolchainConfig {
        ToolchainConfig {
            shell: PathBuf::from("/bin/bash"),
            pins,
            disabled_commands: disabled.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn executor() -> CommandExecutor {
        let execution = ExecutionConfig {
            kill_grace: Duration::from_millis(200),
            ..ExecutionConfig::default()
        };
        CommandExecutor::new(&toolchain(BTreeMap::new(), &[]), &execution).unwrap()
    }

    #[tokio::test]
    async fn test_sequence_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let commands = [
            CommandSpec::shell("touch a").current_dir(dir.path()),
            CommandSpec::shell("echo broken; exit 3").current_dir(dir.path()),
            CommandSpec::shell("touch c").current_dir(dir.path()),
        ];

        let result = executor()
            .run_sequence(&commands, CommandPolicy::Trusted)
            .await
            .unwrap();

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.step, 1);
        assert_eq!(result.error_output.as_deref(), Some(&b"broken\n"[..]));
        assert!(dir.path().join("a").exists());
        assert!(!dir.path().join("c").exists());
    }

    #[tokio::test]
    async fn test_sequence_success_returns_last_output() {
        let commands = [CommandSpec::shell("echo first"), CommandSpec::shell("echo second")];
        let result = executor()
            .run_sequence(&commands, CommandPolicy::Trusted)
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.step, 1);
        assert_eq!(result.output_lossy(), "second\n");
        assert!(result.error_output.is_none());
    }

    #[tokio::test]
    async fn test_empty_sequence_succeeds() {
        let result = executor()
            .run_sequence(&[], CommandPolicy::Trusted)
            .await
            .unwrap();
        assert!(result.success());
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let result = executor()
            .run(&CommandSpec::shell("echo out; echo err >&2"), CommandPolicy::Trusted)
            .await
            .unwrap();
        let output = result.output_lossy();
        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
    }

    #[tokio::test]
    async fn test_pipefail_reports_failing_stage() {
        let result = executor()
            .run(&CommandSpec::shell("false | cat"), CommandPolicy::Trusted)
            .await
            .unwrap();
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_pinned_compiler_replaces_name() {
        let mut pins = BTreeMap::new();
        pins.insert(
            "gcc".to_string(),
            ToolPin::new("/bin/echo").with_flags(["pinned", "-O2"]),
        );
        let exec =
            CommandExecutor::new(&toolchain(pins, &[]), &ExecutionConfig::default()).unwrap();

        let via_shell = exec
            .run(&CommandSpec::shell("gcc main.c"), CommandPolicy::Trusted)
            .await
            .unwrap();
        assert_eq!(via_shell.output_lossy(), "pinned -O2 main.c\n");

        let direct = exec
            .run(&CommandSpec::new("gcc").arg("it's.c"), CommandPolicy::Restricted)
            .await
            .unwrap();
        assert_eq!(direct.output_lossy(), "pinned -O2 it's.c\n");
    }

    #[tokio::test]
    async fn test_restricted_policy_stubs_disabled_commands() {
        let exec = CommandExecutor::new(
            &toolchain(BTreeMap::new(), &["curl", "wget"]),
            &ExecutionConfig::default(),
        )
        .unwrap();

        let result = exec
            .run(
                &CommandSpec::shell("curl https://example.com; wget -q x; echo done"),
                CommandPolicy::Restricted,
            )
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.output_lossy(), "done\n");
    }

    #[tokio::test]
    async fn test_command_policy_overrides_sequence_policy() {
        let exec = CommandExecutor::new(
            &toolchain(BTreeMap::new(), &["git"]),
            &ExecutionConfig::default(),
        )
        .unwrap();
        let commands = [
            CommandSpec::shell(
                r#"case "$(command -v git)" in */disabled/git) ;; *) exit 1 ;; esac"#,
            ),
            CommandSpec::shell(r#"case "$(command -v git)" in */disabled/git) exit 1 ;; esac"#)
                .policy(CommandPolicy::Trusted),
        ];

        let result = exec
            .run_sequence(&commands, CommandPolicy::Restricted)
            .await
            .unwrap();
        assert_eq!(result.step, 1);
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_missing_program_is_not_fatal() {
        let result = executor()
            .run(
                &CommandSpec::new("/nonexistent/definitely-not-here"),
                CommandPolicy::Trusted,
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code, NOT_FOUND_EXIT_CODE);
        assert!(!result.output.is_empty());
    }

    #[tokio::test]
    async fn test_missing_shell_is_fatal() {
        let mut config = toolchain(BTreeMap::new(), &[]);
        config.shell = PathBuf::from("/nonexistent/bash");
        let exec = CommandExecutor::new(&config, &ExecutionConfig::default()).unwrap();

        let result = exec
            .run(&CommandSpec::shell("true"), CommandPolicy::Trusted)
            .await;
        assert!(matches!(result, Err(ExecutorError::ShellUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_redirects_stdin_and_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        std::fs::write(&input, "hello\n").unwrap();

        let result = executor()
            .run(
                &CommandSpec::new("cat").stdin_file(&input).stdout_file(&output),
                CommandPolicy::Trusted,
            )
            .await
            .unwrap();

        assert!(result.success());
        assert!(result.output.is_empty());
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "hello\n");
    }

    #[tokio::test]
    async fn test_timeout_terminates_command() {
        let start = Instant::now();
        let result = executor()
            .run(
                &CommandSpec::shell("sleep 30").timeout(Duration::from_millis(200)),
                CommandPolicy::Restricted,
            )
            .await
            .unwrap();

        assert!(result.timed_out);
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout_escalates_to_sigkill() {
        let start = Instant::now();
        let result = executor()
            .run(
                &CommandSpec::shell("trap '' TERM; sleep 30").timeout(Duration::from_millis(200)),
                CommandPolicy::Restricted,
            )
            .await
            .unwrap();

        assert!(result.timed_out);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    /// Pids whose command line contains `needle` as a separate argument
    fn processes_with_arg(needle: &str) -> Vec<u32> {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str()?.parse::<u32>().ok())
            .filter(|pid| {
                std::fs::read(format!("/proc/{}/cmdline", pid))
                    .map(|cmdline| cmdline.split(|b| *b == 0).any(|arg| arg == needle.as_bytes()))
                    .unwrap_or(false)
            })
            .collect()
    }

    async fn assert_no_process_with_arg(needle: &str) {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let left = processes_with_arg(needle);
            if left.is_empty() {
                return;
            }
            assert!(Instant::now() < deadline, "background process survived: {:?}", left);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn test_background_children_are_killed_after_exit() {
        let result = executor()
            .run(
                &CommandSpec::shell("sleep 41.4213 & echo hi"),
                CommandPolicy::Restricted,
            )
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.output_lossy(), "hi\n");
        assert_no_process_with_arg("41.4213").await;
    }

    #[tokio::test]
    async fn test_term_ignoring_grandchild_is_killed_on_timeout() {
        let start = Instant::now();
        let result = executor()
            .run(
                &CommandSpec::shell("(trap '' TERM; sleep 43.1415) & sleep 30")
                    .timeout(Duration::from_millis(200)),
                CommandPolicy::Restricted,
            )
            .await
            .unwrap();

        assert!(result.timed_out);
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_no_process_with_arg("43.1415").await;
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let execution = ExecutionConfig {
            output_limit_bytes: 16,
            ..ExecutionConfig::default()
        };
        let exec = CommandExecutor::new(&toolchain(BTreeMap::new(), &[]), &execution).unwrap();

        let result = exec
            .run(&CommandSpec::shell("head -c 10000 /dev/zero"), CommandPolicy::Trusted)
            .await
            .unwrap();

        assert!(result.success());
        assert!(result.truncated);
        assert_eq!(result.output.len(), 16);
    }

    #[test]
    fn test_truncate_text_respects_char_boundaries() {
        assert_eq!(truncate_text("short", 10), "short");
        let cut = truncate_text("ééé", 3);
        assert!(cut.starts_with("é\n"));
        assert!(cut.ends_with("[... 4 bytes truncated]"));
    }

    #[test]
    fn test_pinned_script_quotes_arguments() {
        let pin = ToolPin::new("/opt/gcc 12/bin/gcc").with_flags(["-DNAME='x'"]);
        assert_eq!(
            pinned_script(&pin),
            "#!/bin/sh\nexec '/opt/gcc 12/bin/gcc' '-DNAME='\\''x'\\''' \"$@\"\n"
        );
    }
}
