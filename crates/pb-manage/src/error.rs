use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Invocation(String),

    #[error("invalid {what} '{value}': {reason}")]
    Invalid {
        what: &'static str,
        value: String,
        reason: String,
    },

    #[error("remote command failed (exit {code}): {command}{}", format_output(.output))]
    Remote {
        command: String,
        code: i32,
        output: String,
    },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Precondition(String),

    #[error("step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{}: {source}", .path.display())]
    Path {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Msg(String),
}

fn format_output(output: &str) -> String {
    let output = output.trim();
    if output.is_empty() {
        String::new()
    } else {
        format!(": {output}")
    }
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::Msg(msg.into())
    }

    pub fn config<M: Into<String>>(msg: M) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid(what: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            what,
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn path(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Path {
            path: path.into(),
            source,
        }
    }

    /// Innermost error, looking through `Step` wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Exit code for the CLI: 2 for usage/config problems, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self.root() {
            Error::Config(_) | Error::Invocation(_) | Error::Invalid { .. } => 2,
            _ => 1,
        }
    }

    /// Exit code of a failed remote command, if that is what this error is.
    pub fn remote_code(&self) -> Option<i32> {
        match self.root() {
            Error::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when a remote failure only says the container is already gone
    /// or already stopped. A transport failure never qualifies, whatever
    /// its output says.
    pub fn is_container_absent(&self) -> bool {
        match self.root() {
            Error::Remote { code, output, .. } if *code != SSH_TRANSPORT_EXIT => {
                is_container_absent_text(output)
            }
            _ => false,
        }
    }
}

/// `ssh` exits with 255 when the connection or authentication fails.
const SSH_TRANSPORT_EXIT: i32 = 255;

fn is_container_absent_text(msg: &str) -> bool {
    let m = msg.to_ascii_lowercase();
    m.contains("no such container")
        || m.contains("no such object")
        || (m.contains("container") && m.contains("is not running"))
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
