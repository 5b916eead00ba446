//! Command session lifecycle.
//!
//! A session owns one subprocess, two reader threads and, transiently,
//! one init thread. Input is written on the caller's thread; output
//! flows from the reader threads through the classifier into the sink.
//!
//! Cleanup ordering is load-bearing: the done flag flips first (turning
//! later `send_input` calls into no-ops), then the process is
//! destroyed, then both channels are joined, then streams are released,
//! and the done record is pushed last.

use crate::channel::{self, OutputChannel};
use crate::classify::{
    CWD_MARKER_PROBE, CWD_PROMPT_PROBE, LineClassifier, SessionShared,
};
use crate::config::SessionConfig;
use crate::environment::{self, EnvEntry};
use crate::error::{Result, ShellHostError};
use crate::launch::{self, LaunchRequest};
use crate::patterns::LinePatterns;
use crate::sink::RecordSink;
use shellhost_types::{
    CallerIdentity, ClassifiedLine, HostOs, SessionState, ShellKind, StreamRole,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Settle time after the post-command probe, and the interval the init
/// thread waits before issuing startup commands.
const PROBE_SETTLE: Duration = Duration::from_millis(100);
const INIT_DELAY: Duration = Duration::from_secs(1);
const CLEANUP_WAIT: Duration = Duration::from_secs(1);

/// What the caller environment provides to a session.
pub trait HostContext: Send + Sync {
    /// Variables overlaid on the process environment.
    fn inherited_env(&self) -> Vec<EnvEntry>;
    /// Requested working directory, if any.
    fn cwd_hint(&self) -> Option<PathBuf>;
    fn caller_identity(&self) -> CallerIdentity;
}

/// Context built from fixed values.
pub struct StaticContext {
    pub env: Vec<EnvEntry>,
    pub cwd: Option<PathBuf>,
    pub identity: CallerIdentity,
}

impl StaticContext {
    pub fn new(identity: CallerIdentity) -> Self {
        Self {
            env: Vec::new(),
            cwd: None,
            identity,
        }
    }
}

impl HostContext for StaticContext {
    fn inherited_env(&self) -> Vec<EnvEntry> {
        self.env.clone()
    }

    fn cwd_hint(&self) -> Option<PathBuf> {
        self.cwd.clone()
    }

    fn caller_identity(&self) -> CallerIdentity {
        self.identity.clone()
    }
}

// Unbuffered on purpose: a broken pipe must surface on the write, not
// on a later flush.
type SharedStdin = Arc<Mutex<Option<ChildStdin>>>;

/// One running command or interactive shell.
pub struct CommandSession {
    id: Uuid,
    invocation: String,
    host: HostOs,
    shell_kind: ShellKind,
    is_shell: bool,
    is_tty: bool,
    shared: Arc<SessionShared>,
    classifier: Arc<LineClassifier>,
    sink: Arc<dyn RecordSink>,
    patterns: Arc<dyn LinePatterns>,
    stdin: SharedStdin,
    child: Mutex<Option<Child>>,
    stdout_channel: OutputChannel,
    stderr_channel: OutputChannel,
    init_thread: Mutex<Option<JoinHandle<()>>>,
    did_initial_probe: AtomicBool,
    lifecycle: Mutex<SessionState>,
}

impl CommandSession {
    /// Resolve the launch plan, spawn the subprocess and start both
    /// reader threads. Spawn failure is fatal: one synthetic line, an
    /// immediate done record, no threads.
    pub fn start(
        ctx: &dyn HostContext,
        invocation: &str,
        host: HostOs,
        config: SessionConfig,
        patterns: Arc<dyn LinePatterns>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self> {
        // Reject a bad encoding label before anything is spawned.
        channel::encoding_candidates(&config)?;

        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        let cwd = normalize_cwd(ctx.cwd_hint(), &home);

        let system: Vec<EnvEntry> = std::env::vars().collect();
        let merged = environment::merge(&system, &ctx.inherited_env(), host);
        let reported_shell = if host.is_windows() {
            None
        } else {
            environment::get_var(&merged, "SHELL").map(str::to_string)
        };
        let tty_helper = config.tty_helper.clone().filter(|p| p.exists());

        patterns.refresh(&cwd.to_string_lossy());

        let plan = launch::resolve(&LaunchRequest {
            invocation: invocation.to_string(),
            host,
            reported_shell,
            tty_helper,
            identity: ctx.caller_identity(),
            custom_shell: config.custom_shell.clone(),
            cwd,
            env: merged,
        });

        let id = Uuid::new_v4();
        tracing::info!(
            target: "shellhost::session",
            "Starting session {id}: {:?} in {}",
            plan.argv, plan.cwd.display()
        );

        if plan.argv.is_empty() {
            sink.push(ClassifiedLine::plain(
                "Cannot launch an empty invocation",
                StreamRole::Stderr,
            ));
            sink.done("failed to launch process");
            return Err(ShellHostError::SpawnFailed("empty invocation".to_string()));
        }

        let mut command = Command::new(&plan.argv[0]);
        command
            .args(&plan.argv[1..])
            .env_clear()
            .envs(plan.env.iter().cloned())
            .current_dir(&plan.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("Failed to launch {}: {e}", plan.argv.join(" "));
                tracing::error!(target: "shellhost::session", "{message}");
                sink.push(ClassifiedLine::plain(message.clone(), StreamRole::Stderr));
                sink.done("failed to launch process");
                return Err(ShellHostError::SpawnFailed(message));
            }
        };

        let shared = SessionShared::new(plan.cwd.clone(), home.clone());
        let classifier = Arc::new(LineClassifier::new(
            shared.clone(),
            sink.clone(),
            patterns.clone(),
        ));

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ShellHostError::SpawnFailed("no stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ShellHostError::SpawnFailed("no stderr pipe".to_string()))?;
        let stdout_channel = match OutputChannel::spawn(
            stdout,
            StreamRole::Stdout,
            classifier.clone(),
            &config,
        ) {
            Ok(channel) => channel,
            Err(e) => {
                let _ = child.kill();
                return Err(e);
            }
        };
        let stderr_channel = match OutputChannel::spawn(
            stderr,
            StreamRole::Stderr,
            classifier.clone(),
            &config,
        ) {
            Ok(channel) => channel,
            Err(e) => {
                let _ = child.kill();
                stdout_channel.join();
                return Err(e);
            }
        };

        let stdin: SharedStdin = Arc::new(Mutex::new(child.stdin.take()));

        let session = Self {
            id,
            invocation: invocation.to_string(),
            host,
            shell_kind: plan.shell_kind,
            is_shell: plan.is_shell,
            is_tty: plan.is_tty,
            shared,
            classifier,
            sink,
            patterns,
            stdin,
            child: Mutex::new(Some(child)),
            stdout_channel,
            stderr_channel,
            init_thread: Mutex::new(None),
            did_initial_probe: AtomicBool::new(false),
            lifecycle: Mutex::new(SessionState::Running),
        };

        if plan.is_shell && (plan.did_login || plan.is_tty) {
            session.spawn_init_thread(&plan.cwd, &home)?;
        } else if plan.is_shell && !plan.is_tty && !host.is_windows() {
            // Non-TTY shells never print a prompt of their own.
            session.classifier.synthetic_prompt(&plan.cwd);
        }

        Ok(session)
    }

    /// Login shells land in the login directory with a default prompt;
    /// fix both once the shell has had a moment to start.
    fn spawn_init_thread(&self, cwd: &Path, home: &Path) -> Result<()> {
        let stdin = self.stdin.clone();
        let kind = self.shell_kind;
        let cwd = cwd.to_path_buf();
        let home = home.to_path_buf();
        let handle = std::thread::Builder::new()
            .name("shellhost-init".to_string())
            .spawn(move || {
                std::thread::sleep(INIT_DELAY);
                let mut prompt_cmd = "export PS1='$PWD/>'".to_string();
                if kind == ShellKind::Csh {
                    prompt_cmd = rewrite_for_csh(&prompt_cmd);
                }
                if let Err(e) = write_raw(&stdin, &prompt_cmd) {
                    tracing::warn!(target: "shellhost::session", "Init write failed: {e}");
                    return;
                }
                if home != cwd {
                    let cd = format!("cd {}", cwd.display());
                    if let Err(e) = write_raw(&stdin, &cd) {
                        tracing::warn!(target: "shellhost::session", "Init cd failed: {e}");
                    }
                }
            })
            .map_err(ShellHostError::Io)?;
        if let Ok(mut guard) = self.init_thread.lock() {
            *guard = Some(handle);
        }
        Ok(())
    }

    /// Send one command or control token to the subprocess. A no-op
    /// once the session is done.
    pub fn send_input(&self, input: &str) -> Result<()> {
        if self.shared.done.load(Ordering::SeqCst) {
            return Ok(());
        }
        // Startup commands always precede caller commands.
        self.join_init_thread();

        let text = input.trim_end_matches(['\r', '\n']);
        if text == "#enter" {
            return self.write_line("");
        }
        if text == "#break" {
            if self.is_tty {
                // The TTY helper translates the token to an interrupt.
                return self.write_line("#break");
            }
            tracing::debug!(target: "shellhost::session", "Break without TTY, destroying {}", self.id);
            self.cleanup("interrupted");
            return Ok(());
        }

        if self.is_shell {
            // TTY-backed shells echo input themselves; the prompt-text
            // bookkeeping applies only without one.
            if !self.is_tty {
                self.shared.append_to_last_prompt(text);
            }
            self.patterns.update(text);
        }

        let probes = self.is_shell && !self.is_tty && !self.host.is_windows();
        if probes {
            let first = !self.did_initial_probe.swap(true, Ordering::SeqCst);
            if first || is_cd_command(text) {
                self.write_line(CWD_MARKER_PROBE)?;
            }
        }
        self.write_line(text)?;
        if probes {
            self.write_line(CWD_PROMPT_PROBE)?;
            std::thread::sleep(PROBE_SETTLE);
        }
        Ok(())
    }

    /// Politely end a shell session, then force cleanup.
    pub fn exit(&self) {
        if self.shared.done.load(Ordering::SeqCst) {
            return;
        }
        self.join_init_thread();
        if self.is_shell {
            let _ = write_raw(&self.stdin, "exit");
        }
        let deadline = Instant::now() + CLEANUP_WAIT;
        while Instant::now() < deadline {
            if self.channels_finished() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        self.cleanup(&self.finish_cause());
    }

    /// Block until the subprocess exits, drain output, and clean up.
    /// Returns the exit code when the process reported one.
    pub fn wait(&self) -> Option<i32> {
        let mut code = None;
        loop {
            if self.shared.done.load(Ordering::SeqCst) {
                return code;
            }
            let status = self.child.lock().ok().and_then(|mut guard| {
                guard.as_mut().and_then(|c| c.try_wait().ok().flatten())
            });
            if let Some(status) = status {
                code = status.code();
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        // Let the channels drain to end-of-stream before tearing down.
        let deadline = Instant::now() + CLEANUP_WAIT;
        while Instant::now() < deadline && !self.channels_finished() {
            std::thread::sleep(Duration::from_millis(20));
        }

        let cause = match code {
            Some(code) => format!("command finished (exit code {code})"),
            None => "command finished".to_string(),
        };
        self.cleanup(&cause);
        code
    }

    /// Tear the session down. Idempotent; runs the full sequence once.
    pub fn cleanup(&self, cause: &str) {
        if self.shared.done.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(SessionState::Cleaning);
        self.join_init_thread();

        if let Ok(mut guard) = self.child.lock() {
            if let Some(child) = guard.as_mut() {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        tracing::debug!(
                            target: "shellhost::session",
                            "Session {} process already exited: {status}", self.id
                        );
                    }
                    _ => {
                        let _ = child.kill();
                        let _ = child.wait();
                    }
                }
            }
            *guard = None;
        }

        self.stdout_channel.join();
        self.stderr_channel.join();

        if let Ok(mut stdin) = self.stdin.lock() {
            *stdin = None;
        }

        self.set_state(SessionState::Done);
        self.sink.done(cause);
        tracing::info!(target: "shellhost::session", "Session {} done: {cause}", self.id);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn invocation(&self) -> &str {
        &self.invocation
    }

    /// The tracked working directory, as last observed.
    pub fn cwd(&self) -> PathBuf {
        self.shared.cwd()
    }

    pub fn shell_kind(&self) -> ShellKind {
        self.shell_kind
    }

    pub fn is_shell(&self) -> bool {
        self.is_shell
    }

    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    pub fn is_done(&self) -> bool {
        self.shared.done.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle
            .lock()
            .map(|s| *s)
            .unwrap_or(SessionState::Done)
    }

    pub fn channels_finished(&self) -> bool {
        self.stdout_channel.is_finished() && self.stderr_channel.is_finished()
    }

    fn set_state(&self, state: SessionState) {
        if let Ok(mut guard) = self.lifecycle.lock() {
            *guard = state;
        }
    }

    fn join_init_thread(&self) {
        let handle = self.init_thread.lock().ok().and_then(|mut g| g.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Write one line to stdin. Write failures escalate to cleanup.
    fn write_line(&self, text: &str) -> Result<()> {
        match write_raw(&self.stdin, text) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(
                    target: "shellhost::session",
                    "Stdin write failed on {}: {e}", self.id
                );
                self.cleanup("stdin write failed");
                Err(ShellHostError::WriteFailed(e))
            }
        }
    }

    fn finish_cause(&self) -> String {
        let code = self.child.lock().ok().and_then(|mut guard| {
            guard
                .as_mut()
                .and_then(|c| c.try_wait().ok().flatten())
                .and_then(|s| s.code())
        });
        match code {
            Some(code) => format!("command finished (exit code {code})"),
            None => "command finished".to_string(),
        }
    }
}

impl Drop for CommandSession {
    fn drop(&mut self) {
        if !self.is_done() {
            self.cleanup("session released");
        }
    }
}

/// Write `text` plus a newline. Flush failures are logged only.
fn write_raw(stdin: &SharedStdin, text: &str) -> std::io::Result<()> {
    let mut guard = stdin
        .lock()
        .map_err(|_| std::io::Error::other("stdin lock poisoned"))?;
    let Some(writer) = guard.as_mut() else {
        return Err(std::io::Error::other("stdin already released"));
    };
    writer.write_all(text.as_bytes())?;
    writer.write_all(b"\n")?;
    if let Err(e) = writer.flush() {
        tracing::warn!(target: "shellhost::session", "Flush failed: {e}");
    }
    Ok(())
}

fn normalize_cwd(hint: Option<PathBuf>, home: &Path) -> PathBuf {
    let Some(hint) = hint else {
        return home.to_path_buf();
    };
    if hint.is_dir() {
        return hint;
    }
    // A file path falls back to its directory; anything else to home.
    hint.parent()
        .filter(|p| p.is_dir())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| home.to_path_buf())
}

/// Rewrite a POSIX `export NAME=VALUE` assignment for csh/tcsh. Known
/// limitation: the textual `=`→space replacement mangles values that
/// themselves contain `=`.
fn rewrite_for_csh(command: &str) -> String {
    command.replacen("export ", "setenv ", 1).replace('=', " ")
}

fn is_cd_command(text: &str) -> bool {
    text == "cd" || text.starts_with("cd ") || text.starts_with("cd\t")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::DefaultPatterns;
    use crate::sink::MemorySink;
    use tempfile::TempDir;

    fn context() -> StaticContext {
        StaticContext::new(CallerIdentity::same_user("dev"))
    }

    #[test]
    fn test_normalize_cwd_falls_back_to_parent_then_home() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "x").unwrap();
        let home = PathBuf::from("/");
        assert_eq!(normalize_cwd(Some(dir.path().to_path_buf()), &home), dir.path());
        assert_eq!(normalize_cwd(Some(file), &home), dir.path());
        assert_eq!(
            normalize_cwd(Some(PathBuf::from("/no/such/place/at/all")), &home),
            home
        );
        assert_eq!(normalize_cwd(None, &home), home);
    }

    #[test]
    fn test_is_cd_command() {
        assert!(is_cd_command("cd"));
        assert!(is_cd_command("cd /tmp"));
        assert!(!is_cd_command("cdparanoia"));
        assert!(!is_cd_command("echo cd"));
    }

    fn shell_context() -> StaticContext {
        let mut ctx = context();
        ctx.env.push(("SHELL".to_string(), "/bin/sh".to_string()));
        ctx
    }

    #[test]
    fn test_rewrite_for_csh() {
        assert_eq!(
            rewrite_for_csh("export PS1='$PWD/>'"),
            "setenv PS1 '$PWD/>'"
        );
        // The textual rewrite mangles '=' inside values; preserved
        // behavior, not a bug to fix here.
        assert_eq!(rewrite_for_csh("export A='x=y'"), "setenv A 'x y'");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_tty_shell_input_appended_to_prompt_record() {
        let sink = MemorySink::new();
        let session = CommandSession::start(
            &shell_context(),
            ">",
            HostOs::Posix,
            SessionConfig::default(),
            Arc::new(DefaultPatterns),
            sink.clone(),
        )
        .unwrap();
        assert!(session.is_shell());
        assert!(!session.is_tty());

        // The shell is busy sleeping, so the probe response cannot have
        // replaced the prompt record yet when we look at it.
        session.send_input("sleep 2").unwrap();
        let prompt = session.shared.last_prompt().unwrap();
        assert!(prompt.text.ends_with("sleep 2"), "got {:?}", prompt.text);
        session.cleanup("test finished");
    }

    #[cfg(unix)]
    #[test]
    fn test_tty_shell_input_skips_prompt_bookkeeping() {
        let sink = MemorySink::new();
        let mut config = SessionConfig::default();
        // Any existing binary serves as the helper for launch purposes.
        config.tty_helper = Some(PathBuf::from("/bin/cat"));
        let session = CommandSession::start(
            &shell_context(),
            ">",
            HostOs::Posix,
            config,
            Arc::new(DefaultPatterns),
            sink.clone(),
        )
        .unwrap();
        assert!(session.is_tty());

        session.classifier.synthetic_prompt(&session.cwd());
        let before = session.shared.last_prompt().unwrap().text;
        // The write may fail (the fake helper exits at once); the
        // bookkeeping decision happens before the write either way.
        let _ = session.send_input("ls");
        assert_eq!(session.shared.last_prompt().unwrap().text, before);
        session.cleanup("test finished");
    }

    #[test]
    fn test_spawn_failure_is_fatal_and_recorded() {
        let sink = MemorySink::new();
        let mut config = SessionConfig::default();
        config.custom_shell = Some("/no/such/binary/shellhost-test".to_string());
        let result = CommandSession::start(
            &context(),
            ">",
            HostOs::Posix,
            config,
            Arc::new(DefaultPatterns),
            sink.clone(),
        );
        assert!(matches!(result, Err(ShellHostError::SpawnFailed(_))));
        // One synthetic line plus the done record, nothing else.
        assert_eq!(sink.lines().len(), 1);
        assert_eq!(sink.done_cause().as_deref(), Some("failed to launch process"));
    }

    #[test]
    fn test_bad_encoding_label_rejected_before_spawn() {
        let sink = MemorySink::new();
        let mut config = SessionConfig::default();
        config.stdin_encoding = Some("definitely-not-a-charset".to_string());
        let result = CommandSession::start(
            &context(),
            "true",
            HostOs::Posix,
            config,
            Arc::new(DefaultPatterns),
            sink.clone(),
        );
        assert!(matches!(
            result,
            Err(ShellHostError::UnsupportedEncoding(_))
        ));
        assert!(sink.records().is_empty());
    }
}
