use std::fmt;
use std::time::Duration;

/// Failure of a single call into the container runtime.
///
/// Inspecting something absent is not an error here: inspect calls return
/// `Ok(None)` and leave it to the caller whether absence matters.
#[derive(Debug)]
pub enum RuntimeError {
    /// No answer within the client's deadline.
    Timeout { command: String, timeout: Duration },

    /// The runtime answered with a non-zero status.
    CommandFailed {
        command: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    /// The `docker` process could not be spawned.
    ExecFailed {
        command: String,
        source: std::io::Error,
    },

    /// Inspect or list output that does not decode.
    MalformedOutput { command: String, reason: String },

    /// A call that needs the container found none.
    ContainerNotFound { container: String },

    /// Create or rename hit a name that is taken.
    NameConflict { name: String },
}

impl RuntimeError {
    pub fn timeout(cmd: impl Into<String>, dur: Duration) -> Self {
        RuntimeError::Timeout {
            command: cmd.into(),
            timeout: dur,
        }
    }

    /// Status and trimmed stderr of a finished `docker` process.
    pub fn failed(cmd: impl Into<String>, output: &std::process::Output) -> Self {
        RuntimeError::CommandFailed {
            command: cmd.into(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            exit_code: output.status.code(),
        }
    }

    pub fn cmd_failed(
        cmd: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        RuntimeError::CommandFailed {
            command: cmd.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn exec_failed(cmd: impl Into<String>, err: std::io::Error) -> Self {
        RuntimeError::ExecFailed {
            command: cmd.into(),
            source: err,
        }
    }

    pub fn malformed(cmd: impl Into<String>, reason: impl Into<String>) -> Self {
        RuntimeError::MalformedOutput {
            command: cmd.into(),
            reason: reason.into(),
        }
    }

    /// True when the runtime reported that the object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            RuntimeError::ContainerNotFound { .. } => true,
            RuntimeError::CommandFailed { stderr, .. } => {
                stderr.contains("No such container")
                    || stderr.contains("No such image")
                    || stderr.contains("No such object")
            }
            _ => false,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Timeout { command, timeout } => {
                write!(f, "{}: no answer after {:?}", command, timeout)
            }
            RuntimeError::CommandFailed {
                command,
                stderr,
                exit_code: Some(code),
            } => write!(f, "{}: exited with {}: {}", command, code, stderr),
            RuntimeError::CommandFailed {
                command, stderr, ..
            } => write!(f, "{}: {}", command, stderr),
            RuntimeError::ExecFailed { command, source } => {
                write!(f, "cannot run {}: {}", command, source)
            }
            RuntimeError::MalformedOutput { command, reason } => {
                write!(f, "{}: unreadable output: {}", command, reason)
            }
            RuntimeError::ContainerNotFound { container } => {
                write!(f, "No such container: {}", container)
            }
            RuntimeError::NameConflict { name } => {
                write!(f, "container name \"{}\" is already in use", name)
            }
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuntimeError::ExecFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_detected_from_stderr() {
        let err = RuntimeError::cmd_failed("docker inspect x", "Error: No such container: x", Some(1));
        assert!(err.is_not_found());

        let err = RuntimeError::cmd_failed("docker pull x", "denied", Some(1));
        assert!(!err.is_not_found());
    }

    #[test]
    fn display_names_command_and_exit_code() {
        let err = RuntimeError::cmd_failed("docker stop web", "boom", Some(2));
        assert_eq!(err.to_string(), "docker stop web: exited with 2: boom");

        let err = RuntimeError::timeout("docker pull nginx", Duration::from_secs(3));
        assert_eq!(err.to_string(), "docker pull nginx: no answer after 3s");
    }
}
