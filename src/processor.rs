use crate::parser::Parser;
use crate::patcher;
use crate::srt::Subtitle;
use crate::workbook::Workbook;

use std::num::NonZeroU32;

use anyhow::{Context, Result};
use tracing::info;

pub const DEFAULT_FPS: NonZeroU32 = match NonZeroU32::new(25) {
    Some(fps) => fps,
    None => unreachable!(),
};

pub struct ProcessOpts {
    pub fps: NonZeroU32,
}

/// Result of one conversion: the records that went into the `raw` sheet and
/// the patched spreadsheet package.
pub struct Conversion {
    pub subs: Vec<Subtitle>,
    pub workbook: Vec<u8>,
}

/// Runs the whole pipeline: parse the subtitles, patch the template, and
/// serialise the result. Nothing is produced unless every step succeeds.
pub fn process(subtitles: &str, template: Vec<u8>, opts: &ProcessOpts) -> Result<Conversion> {
    let subs = Parser::new(opts.fps).parse(subtitles)?;
    info!(count = subs.len(), fps = opts.fps.get(), "Parsed subtitles");

    let workbook = Workbook::from_bytes(template)?;
    let workbook = patcher::patch(workbook, &subs)?
        .to_bytes()
        .context("Failed to write the patched workbook")?;

    Ok(Conversion { subs, workbook })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvertError;
    use crate::sheet::CellValue;
    use crate::workbook::fixture::{template, worksheet};

    fn opts() -> ProcessOpts {
        ProcessOpts { fps: DEFAULT_FPS }
    }

    fn sheets() -> Vec<(&'static str, String)> {
        vec![
            ("raw", worksheet("")),
            (
                "canvas",
                worksheet(r#"<row r="2"><c r="A2"><v>1</v></c></row>"#),
            ),
        ]
    }

    #[test]
    fn converts_subtitles_into_template() {
        let srt = "1\n00:00:00,000 --> 00:00:01,040\nFirst\n\n2\n00:00:02,000 --> 00:00:03,000\nSecond\n";

        let conversion = process(srt, template(&sheets()), &opts()).expect("converts");

        assert_eq!(conversion.subs.len(), 2);
        let mut workbook = Workbook::from_bytes(conversion.workbook).expect("valid output");
        let raw = workbook.sheet_mut("raw").expect("raw");
        assert_eq!(raw.cell(2, 2), Some(&CellValue::Text("00:00:00:00".to_string())));
        assert_eq!(raw.cell(2, 3), Some(&CellValue::Text("00:00:01:01".to_string())));
        assert_eq!(raw.cell(3, 4), Some(&CellValue::Text("Second".to_string())));
        let canvas = workbook.sheet_mut("canvas").expect("canvas");
        assert_eq!(
            canvas.cell(2, 2).and_then(CellValue::formula).as_deref(),
            Some("=VLOOKUP(A2, raw!A:D, 2, FALSE)")
        );
    }

    #[test]
    fn bad_subtitles_abort_before_touching_template() {
        let srt = "1\n00:00:01 --> 00:00:02\nText\n";

        let err = process(srt, b"not a workbook".to_vec(), &opts()).err().expect("fails");

        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::Format(_))
        ));
    }

    #[test]
    fn bad_template_is_reported() {
        let err = process("", b"not a workbook".to_vec(), &opts()).err().expect("fails");

        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::Template(_))
        ));
    }
}
