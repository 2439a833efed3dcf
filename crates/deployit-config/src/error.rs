//! Errors raised while reading a deployment file.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read deployment file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("deployment file is not valid KDL: {0}")]
    Syntax(#[from] kdl::KdlError),

    #[error("{0} is required")]
    MissingField(String),

    #[error("{field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("{0} is declared more than once")]
    Redeclared(String),

    #[error(
        "{field}: '{raw}' must be a whole ${{secrets.NAME}} or ${{resource.output}} reference"
    )]
    InvalidReference { field: String, raw: String },

    #[error("stack '{0}' is not declared in the deployment file")]
    UnknownStack(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
