use crate::error::ConvertError;
use crate::srt::{Subtitle, Timecode};

use std::mem;
use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::Context;
use nom::bytes::complete::{tag, take_while_m_n};
use nom::combinator::{all_consuming, map_res, verify};
use nom::error::{convert_error, VerboseError};
use nom::{Err, IResult};
use tracing::trace;

const TIME_RANGE_MARKER: &str = "-->";
const TIME_RANGE_SEPARATOR: &str = " --> ";

/// Walks SRT text line by line and turns every block that carries text into
/// a [`Subtitle`].
///
/// Numeric lines close the pending block, time-range lines replace the pending
/// timestamps, and any other non-blank line is collected as subtitle text.
/// Blank lines carry no meaning.
pub struct Parser {
    fps: NonZeroU32,
}

impl Parser {
    pub fn new(fps: NonZeroU32) -> Self {
        Self { fps }
    }

    pub fn parse(&self, input: &str) -> Result<Vec<Subtitle>, anyhow::Error> {
        let input = input.strip_prefix('\u{FEFF}').unwrap_or(input);

        let mut subs = Vec::new();
        let mut pending = PendingBlock::default();
        let mut line_no = 0;

        for line in input.lines() {
            line_no += 1;
            let line = line.trim();
            if is_seq_num(line) {
                if let Some(sub) = self.emit(&mut pending, subs.len() + 1, line_no)? {
                    subs.push(sub);
                }
            } else if line.contains(TIME_RANGE_MARKER) {
                let (start, end) = match time_range(line, self.fps) {
                    Ok(range) => range,
                    Err(msg) => {
                        return Err(ConvertError::Format(format!("line {}: {}", line_no, msg)))
                            .context("Failed to parse SRT file");
                    }
                };
                pending.start = Some(start);
                pending.end = Some(end);
            } else if !line.is_empty() {
                pending.text.push(line.to_string());
            }
        }

        if let Some(sub) = self.emit(&mut pending, subs.len() + 1, line_no)? {
            subs.push(sub);
        }

        Ok(subs)
    }

    fn emit(
        &self,
        pending: &mut PendingBlock,
        id: usize,
        line_no: usize,
    ) -> Result<Option<Subtitle>, anyhow::Error> {
        if pending.text.is_empty() {
            return Ok(None);
        }
        let (start, end) = match (pending.start, pending.end) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                let msg = format!("line {}: subtitle text precedes any time range", line_no);
                return Err(ConvertError::Format(msg)).context("Failed to parse SRT file");
            }
        };
        let text = mem::take(&mut pending.text).join(" ");
        trace!(id, %start, %end, "Parsed subtitle");
        Ok(Some(Subtitle {
            id,
            start,
            end,
            text,
        }))
    }
}

/// Timestamps survive across blocks; only the text is reset once emitted.
#[derive(Default)]
struct PendingBlock {
    start: Option<Timecode>,
    end: Option<Timecode>,
    text: Vec<String>,
}

/// Sequence numbers are plain ASCII digits. Lines like `½` or `Ⅲ` are text.
fn is_seq_num(line: &str) -> bool {
    !line.is_empty() && line.bytes().all(|b| b.is_ascii_digit())
}

fn time_range(line: &str, fps: NonZeroU32) -> Result<(Timecode, Timecode), String> {
    let mut parts = line.split(TIME_RANGE_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(show), Some(hide), None) => {
            let show_at = full_timestamp(show)?;
            let hide_at = full_timestamp(hide)?;
            Ok((
                Timecode::from_duration(show_at, fps),
                Timecode::from_duration(hide_at, fps),
            ))
        }
        _ => Err(format!(
            "expected two timestamps separated by '{}', found '{}'",
            TIME_RANGE_SEPARATOR, line
        )),
    }
}

fn full_timestamp(input: &str) -> Result<Duration, String> {
    match all_consuming(timestamp)(input) {
        Ok((_, duration)) => Ok(duration),
        Err(Err::Error(err)) | Err(Err::Failure(err)) => Err(convert_error(input, err)),
        Err(Err::Incomplete(_)) => {
            unreachable!("Incomplete data received by non-streaming parser.")
        }
    }
}

fn timestamp(input: &str) -> IResult<&str, Duration, VerboseError<&str>> {
    const MILLIS_MAX: usize = 3;
    let take_millis = || {
        map_res(
            take_while_m_n(1, MILLIS_MAX, |c: char| c.is_ascii_digit()),
            |s: &str| {
                // A short fraction such as `,2` is read as `,200`.
                format!("{:0<3}", s).parse::<u64>()
            },
        )
    };

    const HMS_MAX: usize = 2;
    let take_hms = |limit: u64| {
        verify(
            map_res(
                take_while_m_n(1, HMS_MAX, |c: char| c.is_ascii_digit()),
                |s: &str| s.parse::<u64>(),
            ),
            move |value: &u64| *value < limit,
        )
    };

    let (input, hours) = take_hms(24)(input)?;
    let (input, _) = tag(":")(input)?;
    let (input, minutes) = take_hms(60)(input)?;
    let (input, _) = tag(":")(input)?;
    let (input, seconds) = take_hms(60)(input)?;
    let (input, _) = tag(",")(input)?;
    let (input, millis) = take_millis()(input)?;

    Ok((
        input,
        Duration::from_millis(
            millis + seconds * 1000 + minutes * 60 * 1000 + hours * 60 * 60 * 1000,
        ),
    ))
}
