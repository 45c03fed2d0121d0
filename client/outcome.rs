// Tri-state command outcome surfaced to the user
use std::fmt;

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Warning,
    Error,
}

#[derive(Debug)]
pub struct CommandResult {
    pub status: Status,
    pub message: String,
    pub cause: Option<ClientError>,
}

impl CommandResult {
    pub fn success(message: impl Into<String>) -> Self {
        CommandResult {
            status: Status::Success,
            message: message.into(),
            cause: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        CommandResult {
            status: Status::Warning,
            message: message.into(),
            cause: None,
        }
    }

    pub fn failure(message: impl Into<String>, cause: Option<ClientError>) -> Self {
        CommandResult {
            status: Status::Error,
            message: message.into(),
            cause,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }
}

impl From<ClientError> for CommandResult {
    fn from(err: ClientError) -> Self {
        match err {
            // usage problems carry their own text
            ClientError::Usage(msg) => CommandResult::failure(msg, None),
            other => CommandResult::failure("operation failed", Some(other)),
        }
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let icon = match self.status {
            Status::Success => "[ok]",
            Status::Warning => "[!!]",
            Status::Error => "[xx]",
        };
        write!(f, "{} {}", icon, self.message)?;
        if let Some(ref cause) = self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}
