use std::{fmt, io, num::ParseIntError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SDPError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("fmt error: {0}")]
    FMTError(#[from] fmt::Error),
    #[error("parse string to integer failed: {0}")]
    ParseToIntegerFailed(#[from] ParseIntError),
    #[error("parse url failed: {0}")]
    ParseUrlFailed(#[from] url::ParseError),
    #[error("invalid attribute line: {0}")]
    InvalidAttributeLine(String),
    #[error("syntax error: {0}")]
    SyntaxError(String),
    #[error("invalid format parameter: {0}")]
    InvalidFormatParameter(String),
}

pub type SDPResult<T> = Result<T, SDPError>;
