use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

/// A single subtitle event, ready to be written into the `raw` sheet.
///
/// The `id` is synthesized: it counts emitted records from 1 upward and never
/// echoes the sequence number written in the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtitle {
    pub id: usize,
    pub start: Timecode,
    pub end: Timecode,
    pub text: String,
}

/// Wall-clock position quantized to a frame index, rendered as `HH:MM:SS:FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timecode {
    hours: u64,
    minutes: u64,
    seconds: u64,
    frame: u64,
}

impl Timecode {
    /// Quantizes `timestamp` at `fps`, truncating the sub-second remainder.
    pub fn from_duration(timestamp: Duration, fps: NonZeroU32) -> Self {
        let fps = u128::from(fps.get());
        let total_secs = timestamp.as_secs();
        let frame = (timestamp.as_millis() * fps / 1000) % fps;
        Timecode {
            hours: total_secs / 3600,
            minutes: (total_secs % 3600) / 60,
            seconds: total_secs % 60,
            frame: frame as u64,
        }
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "{:02}:{:02}:{:02}:{:02}",
            self.hours, self.minutes, self.seconds, self.frame
        )
    }
}
