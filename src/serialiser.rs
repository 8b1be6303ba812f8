use crate::srt::Subtitle;

use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

const HEADER: [&str; 4] = ["ID", "Start Timecode", "End Timecode", "Subtitle Text"];

/// Writes the intermediate table (one CSV row per subtitle) to `output`.
pub fn serialise<P: AsRef<Path>>(subs: &[Subtitle], output: P) -> Result<()> {
    let file = std::fs::File::create(output).context("Failed to create file!")?;
    let mut writer = BufWriter::new(file);
    write_table(&mut writer, subs).context("Failed to write to output file.")?;
    writer.flush().context("Failed to write to output file.")?;
    Ok(())
}

pub fn write_table<W: Write>(buf: &mut W, subs: &[Subtitle]) -> Result<()> {
    write_row(buf, &HEADER)?;
    for sub in subs {
        write_sub(buf, sub)?;
    }
    Ok(())
}

fn write_sub<W: Write>(buf: &mut W, sub: &Subtitle) -> Result<()> {
    let id = sub.id.to_string();
    let start = sub.start.to_string();
    let end = sub.end.to_string();
    write_row(buf, &[id.as_str(), start.as_str(), end.as_str(), sub.text.as_str()])
}

fn write_row<W: Write>(buf: &mut W, fields: &[&str]) -> Result<()> {
    for (idx, field) in fields.iter().enumerate() {
        if idx > 0 {
            write!(buf, ",")?;
        }
        write_field(buf, field)?;
    }
    // CSV records end in CRLF.
    write!(buf, "\r\n")?;
    Ok(())
}

fn write_field<W: Write>(buf: &mut W, field: &str) -> Result<()> {
    if field.contains(|c: char| matches!(c, ',' | '"' | '\r' | '\n')) {
        write!(buf, "\"{}\"", field.replace('"', "\"\""))?;
    } else {
        write!(buf, "{}", field)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srt::Timecode;
    use std::io::Cursor;
    use std::num::NonZeroU32;
    use std::time::Duration;

    macro_rules! test_write_field {
        ($($name:ident: $value:expr,)*) => {
        $(
            #[test]
            fn $name() {
                let (input, expected) = $value;

                let mut buf = Cursor::new(vec![]);

                write_field(&mut buf, input).expect("Failed to write to buffer");

                assert_eq!(String::from_utf8(buf.into_inner()).unwrap(), expected);
            }
        )*
        }
    }

    test_write_field! {
        test_write_field_plain: ("Hello world", "Hello world"),
        test_write_field_empty: ("", ""),
        test_write_field_comma: ("Yes, sir", "\"Yes, sir\""),
        test_write_field_quote: ("She said \"no\"", "\"She said \"\"no\"\"\""),
        test_write_field_newline: ("a\nb", "\"a\nb\""),
    }

    #[test]
    fn writes_header_and_rows() {
        let fps = NonZeroU32::new(25).unwrap();
        let subs = vec![Subtitle {
            id: 1,
            start: Timecode::from_duration(Duration::from_millis(1_040), fps),
            end: Timecode::from_duration(Duration::from_millis(2_000), fps),
            text: "Well, hello".to_string(),
        }];
        let mut buf = Cursor::new(vec![]);

        write_table(&mut buf, &subs).expect("Failed to write to buffer");

        assert_eq!(
            String::from_utf8(buf.into_inner()).unwrap(),
            "ID,Start Timecode,End Timecode,Subtitle Text\r\n\
             1,00:00:01:01,00:00:02:00,\"Well, hello\"\r\n"
        );
    }
}
