//! Execution environments for the lint oracle.
//!
//! A [`Sandbox`] is bound to one focal project. The host flavour runs the
//! command directly in the project directory; the Docker flavour execs into
//! a long-lived container started from a prebuilt image.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::{SuitegenError, SuitegenResult};

/// Directory the project is mounted at inside a Docker sandbox.
pub const CONTAINER_WORKDIR: &str = "/workspace";

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const DOCKER_CONTROL_TIMEOUT: Duration = Duration::from_secs(60);
/// How long pipe readers may lag behind the deadline.
pub const READER_GRACE: Duration = Duration::from_millis(250);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl SandboxOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

pub trait Sandbox: Send {
    /// Write `contents` at `relative` (relative to the project root) and
    /// return the path the sandboxed command sees.
    fn put_file(&mut self, relative: &str, contents: &str) -> SuitegenResult<String>;

    fn remove_file(&mut self, relative: &str) -> SuitegenResult<()>;

    fn run(&mut self, command: &[String], timeout: Duration) -> SuitegenResult<SandboxOutput>;

    /// Tear the environment down. Called once when the owner unbinds.
    fn shutdown(&mut self) -> SuitegenResult<()> {
        Ok(())
    }
}

/// Per-project view passed to a provisioner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectBinding {
    pub name: String,
    pub root: PathBuf,
    pub sandbox_image: Option<String>,
    /// Directory, relative to the root, that receives artifacts under test.
    pub path_prefix: String,
}

pub trait SandboxProvisioner: Send {
    fn provision(&self, binding: &ProjectBinding) -> SuitegenResult<Box<dyn Sandbox>>;
}

/// Run `command`, killing it once `timeout` elapses. Output is drained on
/// helper threads so a chatty child cannot block on a full pipe.
///
/// On Unix the child leads its own process group and the whole group is
/// killed on timeout, so grandchildren of a shell script die with it. The
/// readers are waited for at most [`READER_GRACE`] past the deadline; output
/// still held by a detached descendant is returned as captured so far.
pub fn run_command_with_timeout(
    command: &mut Command,
    stdin: Option<&str>,
    timeout: Duration,
) -> SuitegenResult<SandboxOutput> {
    own_process_group(command);
    let mut child = command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SuitegenError::Sandbox(format!("failed to start command: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SuitegenError::Sandbox("failed to capture stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| SuitegenError::Sandbox("failed to capture stderr".into()))?;
    let stdout_reader = PipeReader::spawn(stdout);
    let stderr_reader = PipeReader::spawn(stderr);

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        if let Err(e) = pipe.write_all(input.as_bytes()) {
            kill_process_tree(&mut child);
            let _ = child.wait();
            return Err(SuitegenError::Sandbox(format!("failed to write stdin: {e}")));
        }
    }

    let start = Instant::now();
    let deadline = start + timeout;
    let mut timed_out = false;
    let status: Option<ExitStatus> = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    timed_out = true;
                    kill_process_tree(&mut child);
                    break child.wait().ok();
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                kill_process_tree(&mut child);
                return Err(SuitegenError::Sandbox(format!("failed to wait for command: {e}")));
            }
        }
    };

    // A background descendant may keep the pipes open after the child exits.
    let drain_until = deadline.max(Instant::now()) + READER_GRACE;
    let drained = stdout_reader.wait_until(drain_until) & stderr_reader.wait_until(drain_until);
    if !drained {
        debug!("command output still open after {:?}; detaching readers", timeout);
        kill_process_group(child.id());
        timed_out = true;
    }

    Ok(SandboxOutput {
        stdout: stdout_reader.captured(),
        stderr: stderr_reader.captured(),
        exit_code: if timed_out {
            None
        } else {
            status.and_then(|s| s.code())
        },
        timed_out,
    })
}

/// Background reader that appends everything a pipe yields to a shared
/// buffer and signals once the pipe reaches end of file.
struct PipeReader {
    buffer: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<()>,
}

impl PipeReader {
    fn spawn<R: Read + Send + 'static>(mut pipe: R) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();
        let sink = Arc::clone(&buffer);
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
                }
            }
            let _ = tx.send(());
        });
        Self { buffer, done }
    }

    /// `true` when the pipe closed before `deadline`.
    fn wait_until(&self, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.done.recv_timeout(remaining).is_ok()
    }

    fn captured(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).to_string()
    }
}

#[cfg(unix)]
fn own_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_command: &mut Command) {}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // ESRCH once every member is gone.
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!("killpg({pid}) failed: {e}");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

fn kill_process_tree(child: &mut Child) {
    kill_process_group(child.id());
    let _ = child.kill();
}

fn checked_relative(relative: &str) -> SuitegenResult<&Path> {
    let path = Path::new(relative);
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
    if escapes || relative.trim().is_empty() {
        return Err(SuitegenError::Validation(format!(
            "sandbox path must stay inside the project: {relative}"
        )));
    }
    Ok(path)
}

fn program(command: &[String]) -> SuitegenResult<(&String, &[String])> {
    command
        .split_first()
        .ok_or_else(|| SuitegenError::Config("sandbox command is empty".into()))
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Runs commands directly on the host with the project root as working
/// directory.
#[derive(Debug)]
pub struct HostSandbox {
    root: PathBuf,
}

impl HostSandbox {
    pub fn new(root: impl Into<PathBuf>) -> SuitegenResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(SuitegenError::NotExists(format!(
                "project root {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Sandbox for HostSandbox {
    fn put_file(&mut self, relative: &str, contents: &str) -> SuitegenResult<String> {
        let target = self.root.join(checked_relative(relative)?);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, contents)?;
        Ok(target.to_string_lossy().to_string())
    }

    fn remove_file(&mut self, relative: &str) -> SuitegenResult<()> {
        let target = self.root.join(checked_relative(relative)?);
        match std::fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn run(&mut self, command: &[String], timeout: Duration) -> SuitegenResult<SandboxOutput> {
        let (exe, args) = program(command)?;
        let mut cmd = Command::new(exe);
        cmd.args(args).current_dir(&self.root);
        run_command_with_timeout(&mut cmd, None, timeout)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HostProvisioner;

impl SandboxProvisioner for HostProvisioner {
    fn provision(&self, binding: &ProjectBinding) -> SuitegenResult<Box<dyn Sandbox>> {
        debug!("binding host sandbox for {} at {}", binding.name, binding.root.display());
        Ok(Box::new(HostSandbox::new(&binding.root)?))
    }
}

// ---------------------------------------------------------------------------
// Docker
// ---------------------------------------------------------------------------

/// A running container with the project mounted at [`CONTAINER_WORKDIR`].
#[derive(Debug)]
pub struct DockerSandbox {
    docker: String,
    container: String,
    stopped: bool,
}

impl DockerSandbox {
    pub fn attach(docker: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
            container: container.into(),
            stopped: false,
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    fn exec(
        &self,
        args: &[&str],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> SuitegenResult<SandboxOutput> {
        let mut cmd = Command::new(&self.docker);
        cmd.arg("exec");
        if stdin.is_some() {
            cmd.arg("-i");
        }
        cmd.args(["-w", CONTAINER_WORKDIR, self.container.as_str()]).args(args);
        run_command_with_timeout(&mut cmd, stdin, timeout)
    }

    fn exec_checked(&self, args: &[&str], stdin: Option<&str>) -> SuitegenResult<()> {
        let output = self.exec(args, stdin, DOCKER_CONTROL_TIMEOUT)?;
        if output.timed_out {
            return Err(SuitegenError::SandboxTimedOut(
                DOCKER_CONTROL_TIMEOUT.as_millis(),
            ));
        }
        if !output.success() {
            return Err(SuitegenError::Sandbox(format!(
                "docker exec {} failed: {}",
                args.join(" "),
                output.stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Sandbox for DockerSandbox {
    fn put_file(&mut self, relative: &str, contents: &str) -> SuitegenResult<String> {
        let relative = checked_relative(relative)?.to_string_lossy().to_string();
        let target = format!("{CONTAINER_WORKDIR}/{relative}");
        // The path travels as a positional argument, never through the script.
        self.exec_checked(
            &["sh", "-c", "mkdir -p \"$(dirname \"$0\")\" && cat > \"$0\"", target.as_str()],
            Some(contents),
        )?;
        Ok(target)
    }

    fn remove_file(&mut self, relative: &str) -> SuitegenResult<()> {
        let relative = checked_relative(relative)?.to_string_lossy().to_string();
        let target = format!("{CONTAINER_WORKDIR}/{relative}");
        self.exec_checked(&["rm", "-f", target.as_str()], None)
    }

    fn run(&mut self, command: &[String], timeout: Duration) -> SuitegenResult<SandboxOutput> {
        program(command)?;
        let args: Vec<&str> = command.iter().map(String::as_str).collect();
        self.exec(&args, None, timeout)
    }

    fn shutdown(&mut self) -> SuitegenResult<()> {
        if self.stopped {
            return Ok(());
        }
        let mut cmd = Command::new(&self.docker);
        cmd.args(["rm", "-f", self.container.as_str()]);
        let output = run_command_with_timeout(&mut cmd, None, DOCKER_CONTROL_TIMEOUT)?;
        self.stopped = true;
        if !output.success() {
            warn!(
                "failed to remove sandbox container {}: {}",
                self.container,
                output.stderr.trim()
            );
        }
        Ok(())
    }
}

impl Drop for DockerSandbox {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Starts one detached container per binding from `binding.sandbox_image`.
#[derive(Clone, Debug)]
pub struct DockerProvisioner {
    docker: String,
}

impl Default for DockerProvisioner {
    fn default() -> Self {
        Self {
            docker: "docker".to_string(),
        }
    }
}

impl DockerProvisioner {
    pub fn with_binary(docker: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
        }
    }
}

impl SandboxProvisioner for DockerProvisioner {
    fn provision(&self, binding: &ProjectBinding) -> SuitegenResult<Box<dyn Sandbox>> {
        let image = binding.sandbox_image.as_deref().ok_or_else(|| {
            SuitegenError::Config(format!("project {} has no sandbox image", binding.name))
        })?;
        let root = binding.root.canonicalize()?;
        let mount = format!("{}:{CONTAINER_WORKDIR}", root.to_string_lossy());
        let mut cmd = Command::new(&self.docker);
        cmd.args(["run", "-d", "--rm", "-v", mount.as_str(), "-w", CONTAINER_WORKDIR, image])
            .args(["sleep", "infinity"]);
        let output = run_command_with_timeout(&mut cmd, None, DOCKER_CONTROL_TIMEOUT)?;
        if output.timed_out {
            return Err(SuitegenError::SandboxTimedOut(
                DOCKER_CONTROL_TIMEOUT.as_millis(),
            ));
        }
        let container = output.stdout.trim().to_string();
        if !output.success() || container.is_empty() {
            return Err(SuitegenError::Sandbox(format!(
                "failed to start {image}: {}",
                output.stderr.trim()
            )));
        }
        debug!("started sandbox container {container} for {}", binding.name);
        Ok(Box::new(DockerSandbox::attach(&self.docker, container)))
    }
}
