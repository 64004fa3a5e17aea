//! CLI error taxonomy mapped to the three exit codes the interface promises:
//! 0 success, 2 missing/invalid arguments, 1 everything else.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    MissingArgument(String),

    #[error("{0}")]
    Runtime(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::MissingArgument(_) => 2,
            CliError::Runtime(_) => 1,
        }
    }
}

impl From<boardmesh_types::BoardError> for CliError {
    fn from(e: boardmesh_types::BoardError) -> Self {
        CliError::Runtime(e.to_string())
    }
}

impl From<anyhow::Error> for CliError {
    fn from(e: anyhow::Error) -> Self {
        CliError::Runtime(e.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Runtime(e.to_string())
    }
}

pub type CliResult<T = ()> = Result<T, CliError>;
