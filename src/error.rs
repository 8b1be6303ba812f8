use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    /// The subtitle text contains a malformed time range or timestamp.
    Format(String),
    /// The template is not a readable workbook, or lacks a required sheet.
    Template(String),
}

impl Error for ConvertError {}

impl fmt::Display for ConvertError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConvertError::Format(msg) => write!(fmt, "Invalid subtitle format: {}", msg),
            ConvertError::Template(msg) => write!(fmt, "Invalid template: {}", msg),
        }
    }
}
