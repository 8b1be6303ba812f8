//! Turns SRT subtitles into timecoded rows of a spreadsheet template.
//!
//! [`parser`] reads the subtitles into [`srt::Subtitle`] records, [`patcher`]
//! writes them into the template's `raw` sheet and links the `canvas` sheet
//! to them, and [`processor`] runs both in one go.

pub mod error;
pub mod formula;
pub mod parser;
pub mod patcher;
pub mod processor;
pub mod serialiser;
pub mod sheet;
pub mod srt;
pub mod workbook;

pub use error::ConvertError;
