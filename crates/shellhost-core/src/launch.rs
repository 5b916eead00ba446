//! Launch policy: maps host, shell, identity and TTY inputs to a
//! concrete process invocation.
//!
//! The checks are mutually exclusive overrides and their order is part
//! of the contract: custom shell, baseline fallback, shell
//! classification, TTY wrapping with login flags, privilege switch,
//! Windows interpreter selection.

use crate::environment::{self, EnvEntry};
use shellhost_types::{CallerIdentity, HostOs, ShellKind};
use std::path::PathBuf;

/// Invocation text meaning "give me an interactive shell".
pub const SHELL_SENTINEL: &str = ">";

/// Column width passed to the TTY helper.
const TTY_COLUMNS: &str = "256";

/// Inputs to the launch decision.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Command text, or [`SHELL_SENTINEL`] for an interactive shell.
    pub invocation: String,
    pub host: HostOs,
    /// `SHELL` from the merged environment, if any.
    pub reported_shell: Option<String>,
    /// Verified-available pseudo-terminal helper.
    pub tty_helper: Option<PathBuf>,
    pub identity: CallerIdentity,
    /// Explicit custom shell invocation; bypasses all detection.
    pub custom_shell: Option<String>,
    pub cwd: PathBuf,
    pub env: Vec<EnvEntry>,
}

/// The concrete invocation decided by the policy.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub argv: Vec<String>,
    pub env: Vec<EnvEntry>,
    pub cwd: PathBuf,
    pub shell_kind: ShellKind,
    pub is_shell: bool,
    pub is_tty: bool,
    pub did_login: bool,
}

/// Classify a reported shell path into exactly one shell kind.
pub fn classify_shell(shell: &str, host: HostOs) -> ShellKind {
    let restricted = host.is_constrained_charset();
    if shell.ends_with("bash") {
        if restricted {
            ShellKind::BashRestrictedHost
        } else {
            ShellKind::Bash
        }
    } else if shell.ends_with("csh") {
        // csh and tcsh both end in "csh".
        ShellKind::Csh
    } else if shell.ends_with("sh") {
        if restricted {
            ShellKind::ShRestrictedHost
        } else {
            ShellKind::Generic
        }
    } else {
        ShellKind::Generic
    }
}

/// Decide the concrete invocation for a request.
pub fn resolve(req: &LaunchRequest) -> LaunchPlan {
    // 1. A configured custom shell bypasses everything below.
    if let Some(custom) = &req.custom_shell {
        let argv: Vec<String> = custom.split_whitespace().map(str::to_string).collect();
        tracing::debug!(target: "shellhost::launch", "Using custom shell invocation: {:?}", argv);
        let mut env = req.env.clone();
        environment::apply_session_vars(&mut env, req.host, false);
        return LaunchPlan {
            argv,
            env,
            cwd: req.cwd.clone(),
            shell_kind: ShellKind::Generic,
            is_shell: true,
            is_tty: false,
            did_login: false,
        };
    }

    if req.host.is_windows() {
        return resolve_windows(req);
    }
    resolve_posix(req)
}

fn resolve_windows(req: &LaunchRequest) -> LaunchPlan {
    // 6. cmd for NT-family hosts, start for 95/98/ME.
    let (shell, flag) = match req.host {
        HostOs::WindowsLegacy => ("start", "/B"),
        _ => ("cmd", "/C"),
    };

    let is_shell = req.invocation == SHELL_SENTINEL;
    let mut argv = vec![shell.to_string(), flag.to_string()];
    if !is_shell {
        argv.push(req.invocation.clone());
    }

    let mut env = req.env.clone();
    environment::apply_session_vars(&mut env, req.host, false);

    LaunchPlan {
        argv,
        env,
        cwd: req.cwd.clone(),
        shell_kind: if is_shell {
            ShellKind::CmdWindows
        } else {
            ShellKind::None
        },
        is_shell,
        is_tty: false,
        did_login: false,
    }
}

fn resolve_posix(req: &LaunchRequest) -> LaunchPlan {
    let is_sentinel = req.invocation == SHELL_SENTINEL;

    // 2. No reported shell plus the sentinel falls back to the baseline
    // shell for the OS class.
    let (shell, shell_kind) = match &req.reported_shell {
        Some(reported) => (reported.clone(), classify_shell(reported, req.host)),
        None => (
            "sh".to_string(),
            if req.host.is_constrained_charset() {
                ShellKind::ShRestrictedHost
            } else {
                ShellKind::Generic
            },
        ),
    };

    let (mut argv, is_shell, is_tty, did_login, kind) = if is_sentinel {
        // 3/4. Interactive shell: classified kind decides the login flag.
        let mut argv = vec![shell];
        if let Some(flag) = shell_kind.login_flag() {
            argv.push(flag.to_string());
        }
        let is_tty = req.tty_helper.is_some();
        (argv, true, is_tty, shell_kind.is_login_capable(), shell_kind)
    } else if req.reported_shell.is_some() {
        // One-shot command run through the reported shell. Never
        // TTY-wrapped.
        let argv = vec![shell, "-c".to_string(), req.invocation.clone()];
        (argv, false, false, false, ShellKind::None)
    } else {
        // Bare command, no shell involved.
        let argv = req
            .invocation
            .split_whitespace()
            .map(str::to_string)
            .collect();
        (argv, false, false, false, ShellKind::None)
    };

    // 4/5. Wrap with the TTY helper and the privilege switch. Restricted
    // host shells fold the switch before the helper; everything else
    // folds it after.
    let needs_switch = req.identity.needs_switch();
    if is_tty {
        let helper = req
            .tty_helper
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        if needs_switch && !kind.is_restricted_host() {
            argv = switch_user(&req.identity.caller_user, argv);
        }
        let mut wrapped = vec![
            helper,
            "-w".to_string(),
            TTY_COLUMNS.to_string(),
        ];
        wrapped.extend(argv);
        argv = wrapped;
        if needs_switch && kind.is_restricted_host() {
            argv = switch_user(&req.identity.caller_user, argv);
        }
    } else if needs_switch {
        argv = switch_user(&req.identity.caller_user, argv);
    }

    let mut env = req.env.clone();
    environment::apply_session_vars(&mut env, req.host, is_tty);

    tracing::debug!(
        target: "shellhost::launch",
        "Resolved launch plan: argv={:?} kind={:?} tty={} login={}",
        argv, kind, is_tty, did_login
    );

    LaunchPlan {
        argv,
        env,
        cwd: req.cwd.clone(),
        shell_kind: kind,
        is_shell,
        is_tty,
        did_login,
    }
}

fn switch_user(user: &str, argv: Vec<String>) -> Vec<String> {
    vec![
        "su".to_string(),
        "-".to_string(),
        user.to_string(),
        "-c".to_string(),
        argv.join(" "),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(host: HostOs, invocation: &str, shell: Option<&str>) -> LaunchRequest {
        LaunchRequest {
            invocation: invocation.to_string(),
            host,
            reported_shell: shell.map(str::to_string),
            tty_helper: None,
            identity: CallerIdentity::same_user("dev"),
            custom_shell: None,
            cwd: PathBuf::from("/tmp"),
            env: Vec::new(),
        }
    }

    #[test]
    fn test_windows_modern_sentinel_uses_cmd() {
        let plan = resolve(&request(HostOs::WindowsModern, SHELL_SENTINEL, None));
        assert_eq!(&plan.argv[..2], &["cmd".to_string(), "/C".to_string()]);
        assert!(plan.is_shell);
        assert_eq!(plan.shell_kind, ShellKind::CmdWindows);
    }

    #[test]
    fn test_windows_legacy_sentinel_uses_start() {
        let plan = resolve(&request(HostOs::WindowsLegacy, SHELL_SENTINEL, None));
        assert_eq!(&plan.argv[..2], &["start".to_string(), "/B".to_string()]);
    }

    #[test]
    fn test_posix_bash_login_shell() {
        let plan = resolve(&request(HostOs::Posix, SHELL_SENTINEL, Some("/bin/bash")));
        assert_eq!(plan.argv, vec!["/bin/bash".to_string(), "-l".to_string()]);
        assert!(plan.is_shell);
        assert!(plan.did_login);
        assert!(!plan.is_tty);
        assert_eq!(plan.shell_kind, ShellKind::Bash);
    }

    #[test]
    fn test_restricted_host_sh_takes_different_login_flag() {
        let plan = resolve(&request(
            HostOs::RestrictedPosix,
            SHELL_SENTINEL,
            Some("/bin/sh"),
        ));
        assert_eq!(plan.argv, vec!["/bin/sh".to_string(), "-L".to_string()]);
        assert_eq!(plan.shell_kind, ShellKind::ShRestrictedHost);
        assert!(plan.did_login);
    }

    #[test]
    fn test_no_reported_shell_sentinel_defaults_to_sh() {
        let plan = resolve(&request(HostOs::Posix, SHELL_SENTINEL, None));
        assert_eq!(plan.argv, vec!["sh".to_string()]);
        assert!(plan.is_shell);
        assert!(!plan.did_login);
    }

    #[test]
    fn test_one_shot_command_runs_through_reported_shell() {
        let plan = resolve(&request(HostOs::Posix, "make all", Some("/bin/bash")));
        assert_eq!(
            plan.argv,
            vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                "make all".to_string()
            ]
        );
        assert!(!plan.is_shell);
        assert_eq!(plan.shell_kind, ShellKind::None);
    }

    #[test]
    fn test_custom_shell_bypasses_detection() {
        let mut req = request(HostOs::Posix, SHELL_SENTINEL, Some("/bin/bash"));
        req.custom_shell = Some("/opt/weird/shell --interactive".to_string());
        let plan = resolve(&req);
        assert_eq!(
            plan.argv,
            vec![
                "/opt/weird/shell".to_string(),
                "--interactive".to_string()
            ]
        );
        assert!(!plan.did_login);
    }

    #[test]
    fn test_tty_helper_wraps_shell_with_width() {
        let mut req = request(HostOs::Posix, SHELL_SENTINEL, Some("/bin/bash"));
        req.tty_helper = Some(PathBuf::from("/opt/hostterm"));
        let plan = resolve(&req);
        assert_eq!(
            plan.argv,
            vec![
                "/opt/hostterm".to_string(),
                "-w".to_string(),
                "256".to_string(),
                "/bin/bash".to_string(),
                "-l".to_string()
            ]
        );
        assert!(plan.is_tty);
        // TTY sessions force the prompt-format variable.
        assert_eq!(
            crate::environment::get_var(&plan.env, "PS1"),
            Some("$PWD/>")
        );
    }

    #[test]
    fn test_privilege_switch_sits_inside_tty_helper() {
        let mut req = request(HostOs::Posix, SHELL_SENTINEL, Some("/bin/bash"));
        req.tty_helper = Some(PathBuf::from("/opt/hostterm"));
        req.identity = CallerIdentity {
            caller_user: "alice".to_string(),
            process_user: "daemon".to_string(),
        };
        let plan = resolve(&req);
        assert_eq!(plan.argv[0], "/opt/hostterm");
        assert_eq!(plan.argv[3], "su");
        assert_eq!(plan.argv[5], "alice");
    }

    #[test]
    fn test_restricted_host_switch_wraps_tty_helper() {
        let mut req = request(HostOs::RestrictedPosix, SHELL_SENTINEL, Some("/bin/sh"));
        req.tty_helper = Some(PathBuf::from("/opt/hostterm"));
        req.identity = CallerIdentity {
            caller_user: "alice".to_string(),
            process_user: "daemon".to_string(),
        };
        let plan = resolve(&req);
        assert_eq!(plan.argv[0], "su");
        assert!(plan.argv[4].starts_with("/opt/hostterm"));
    }

    #[test]
    fn test_privilege_switch_without_helper() {
        let mut req = request(HostOs::Posix, "ls", Some("/bin/sh"));
        req.identity = CallerIdentity {
            caller_user: "alice".to_string(),
            process_user: "daemon".to_string(),
        };
        let plan = resolve(&req);
        assert_eq!(
            plan.argv,
            vec![
                "su".to_string(),
                "-".to_string(),
                "alice".to_string(),
                "-c".to_string(),
                "/bin/sh -c ls".to_string()
            ]
        );
    }

    #[test]
    fn test_classify_shell_kinds() {
        assert_eq!(classify_shell("/bin/bash", HostOs::Posix), ShellKind::Bash);
        assert_eq!(
            classify_shell("/bin/bash", HostOs::RestrictedPosix),
            ShellKind::BashRestrictedHost
        );
        assert_eq!(classify_shell("/bin/tcsh", HostOs::Posix), ShellKind::Csh);
        assert_eq!(classify_shell("/bin/csh", HostOs::Posix), ShellKind::Csh);
        assert_eq!(
            classify_shell("/bin/sh", HostOs::RestrictedPosix),
            ShellKind::ShRestrictedHost
        );
        assert_eq!(
            classify_shell("/bin/zsh", HostOs::Posix),
            ShellKind::Generic
        );
        assert_eq!(
            classify_shell("/usr/bin/fish", HostOs::Posix),
            ShellKind::Generic
        );
    }
}
