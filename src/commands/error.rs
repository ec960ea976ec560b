//! Errors a command reports back to its client.
//!
//! None of these end the connection. Each one renders as a single error
//! line: `WRONGTYPE ...` for type mismatches, `ERR ...` for everything else.

use crate::protocol::RespValue;
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("command '{0}' is not implemented")]
    UnknownCommand(String),

    #[error("empty command")]
    EmptyCommand,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("syntax error")]
    Syntax,

    #[error("key already exists")]
    KeyExists,

    #[error("DB index is out of range")]
    DbIndexOutOfRange,

    #[error("{0}")]
    Persistence(String),
}

pub type CommandResult<T = RespValue> = Result<T, CommandError>;

impl CommandError {
    pub fn category(&self) -> &'static str {
        match self {
            CommandError::Storage(StorageError::WrongType) => "WRONGTYPE",
            _ => "ERR",
        }
    }

    pub fn to_resp(&self) -> RespValue {
        RespValue::error_with(self.category(), self.to_string())
    }
}

impl From<CommandError> for RespValue {
    fn from(e: CommandError) -> Self {
        e.to_resp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_lines() {
        assert_eq!(
            CommandError::WrongArity("get".into()).to_resp(),
            RespValue::error("ERR wrong number of arguments for 'get' command")
        );
        assert_eq!(
            CommandError::from(StorageError::WrongType).to_resp(),
            RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value")
        );
        assert_eq!(
            CommandError::from(StorageError::NotInteger).to_resp(),
            RespValue::error("ERR value is not an integer or out of range")
        );
        assert_eq!(
            CommandError::UnknownCommand("HSET".into()).to_resp(),
            RespValue::error("ERR command 'HSET' is not implemented")
        );
    }
}
