/// System module: privileged command execution and logging macros
///
/// Every filesystem operation outside the application sandbox (creating the
/// module directory, copying, probing and deleting persisted modules) and
/// every root daemon call goes through a `PrivilegedExecutor`.

use futures::future::BoxFuture;
use std::process::Stdio;
use std::time::Duration;

use crate::error::ExecError;

/// Default bound on a single privileged command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Logging macros for convenient access
/// `log_parsed!` records milestones under target "parsed"
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::log::info!("{}", msg);
    }}
}

#[macro_export]
macro_rules! log_parsed {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        // Use target="parsed" for high-level events
        $crate::log::info!(target: "parsed", "{}", msg);
    }}
}

/// Captured result of one privileged command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Process exit code; `-1` when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stderr when present, otherwise stdout, trimmed.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Trait for running commands with elevated privileges
///
/// Implementations must never block the calling thread; the returned future
/// resolves once the command exits or its time bound expires.
pub trait PrivilegedExecutor: Send + Sync {
    fn run(&self, argv: Vec<String>) -> BoxFuture<'static, Result<ExecOutput, ExecError>>;
}

/// Quote one argument for a POSIX shell.
///
/// The whole value is wrapped in single quotes; embedded single quotes become `'\''`.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

/// Join an argv into one shell command line with every element quoted.
pub fn join_command(argv: &[String]) -> String {
    argv.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Production executor: runs `<su> -c '<quoted argv>'`
///
/// # Initialization
///
/// ```ignore
/// let executor = SuExecutor::new("su", Duration::from_secs(30));
/// let out = executor.run(vec!["ls".into(), "/data/adb/kpm/demo.kpm".into()]).await?;
/// ```
#[derive(Debug, Clone)]
pub struct SuExecutor {
    su_binary: String,
    timeout: Duration,
}

impl SuExecutor {
    pub fn new(su_binary: impl Into<String>, timeout: Duration) -> Self {
        SuExecutor {
            su_binary: su_binary.into(),
            timeout,
        }
    }
}

impl Default for SuExecutor {
    fn default() -> Self {
        SuExecutor::new("su", DEFAULT_COMMAND_TIMEOUT)
    }
}

impl PrivilegedExecutor for SuExecutor {
    fn run(&self, argv: Vec<String>) -> BoxFuture<'static, Result<ExecOutput, ExecError>> {
        let su_binary = self.su_binary.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            if argv.is_empty() {
                return Err(ExecError::EmptyCommand);
            }

            // SAFE: every element is single-quoted, the shell never re-splits ids or paths
            let command_line = join_command(&argv);
            log::debug!("[SuExecutor] {} -c {}", su_binary, command_line);

            let mut command = tokio::process::Command::new(&su_binary);
            command
                .arg("-c")
                .arg(&command_line)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                // Dropping the output future on timeout kills the child
                .kill_on_drop(true);

            let output = match tokio::time::timeout(timeout, command.output()).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    let err = if e.kind() == std::io::ErrorKind::NotFound {
                        ExecError::Spawn {
                            program: su_binary.clone(),
                            reason: e.to_string(),
                        }
                    } else {
                        ExecError::Io(e.to_string())
                    };
                    log::warn!("[SuExecutor] [ERROR] {}", err);
                    return Err(err);
                }
                Err(_) => {
                    log::warn!(
                        "[SuExecutor] [TIMEOUT] '{}' did not finish within {:?}, killed",
                        argv[0],
                        timeout
                    );
                    return Err(ExecError::TimedOut {
                        command: argv[0].clone(),
                        timeout,
                    });
                }
            };

            let result = ExecOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            };

            if !result.stderr.trim().is_empty() {
                log::debug!("[SuExecutor] stderr: {}", result.stderr.trim());
            }
            log::debug!("[SuExecutor] '{}' exited with {}", argv[0], result.exit_code);
            Ok(result)
        })
    }
}
