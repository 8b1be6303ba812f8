use crate::sheet::column_name;

use nom::branch::alt;
use nom::bytes::complete::take_while_m_n;
use nom::character::complete::{char, digit1};
use nom::combinator::{map, map_res, opt};
use nom::sequence::{pair, separated_pair};
use nom::IResult;

const MAX_ROW: i64 = 1_048_576;
const MAX_COLUMN: i64 = 16_384;

/// One coordinate of an A1 reference; `$` pins it in place.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Anchor {
    absolute: bool,
    index: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Reference {
    Cell { col: Anchor, row: Anchor },
    Columns(Anchor, Anchor),
    Rows(Anchor, Anchor),
}

/// Moves the relative references in `expr` by `rows` and `cols`, the way a
/// formula changes when it is copied to another cell.
///
/// String literals, quoted sheet names and structured references pass through
/// untouched. A reference pushed off the grid becomes `#REF!`.
pub fn translate(expr: &str, rows: i64, cols: i64) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut rest = expr;

    while let Some(c) = rest.chars().next() {
        let len = match c {
            '"' | '\'' => quoted_len(rest, c),
            '[' => bracketed_len(rest),
            _ => match reference(rest) {
                Ok((tail, found)) if !tail.starts_with(|c: char| is_name_char(c) || c == '(' || c == '!') => {
                    out.push_str(&shift(found, rows, cols));
                    rest = tail;
                    continue;
                }
                _ => rest
                    .find(|c: char| !is_name_char(c))
                    .unwrap_or(rest.len())
                    .max(c.len_utf8()),
            },
        };
        out.push_str(&rest[..len]);
        rest = &rest[len..];
    }
    out
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || c == '\\'
}

/// Length of a literal opened by `quote`, where a doubled quote is an escape.
fn quoted_len(input: &str, quote: char) -> usize {
    let mut chars = input.char_indices().skip(1).peekable();
    while let Some((idx, c)) = chars.next() {
        if c == quote {
            match chars.peek() {
                Some((_, next)) if *next == quote => {
                    chars.next();
                }
                _ => return idx + c.len_utf8(),
            }
        }
    }
    input.len()
}

fn bracketed_len(input: &str) -> usize {
    let mut depth = 0;
    for (idx, c) in input.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return idx + 1;
                }
            }
            _ => {}
        }
    }
    input.len()
}

fn reference(input: &str) -> IResult<&str, Reference> {
    alt((
        map(pair(column, row), |(col, row)| Reference::Cell { col, row }),
        map(separated_pair(column, char(':'), column), |(a, b)| {
            Reference::Columns(a, b)
        }),
        map(separated_pair(row, char(':'), row), |(a, b)| Reference::Rows(a, b)),
    ))(input)
}

fn column(input: &str) -> IResult<&str, Anchor> {
    map(
        pair(
            opt(char('$')),
            map_res(take_while_m_n(1, 3, |c: char| c.is_ascii_alphabetic()), column_index),
        ),
        |(pin, index)| Anchor {
            absolute: pin.is_some(),
            index,
        },
    )(input)
}

fn row(input: &str) -> IResult<&str, Anchor> {
    map(
        pair(opt(char('$')), map_res(digit1, str::parse::<i64>)),
        |(pin, index)| Anchor {
            absolute: pin.is_some(),
            index,
        },
    )(input)
}

fn column_index(letters: &str) -> Result<i64, String> {
    let index = letters
        .chars()
        .fold(0, |acc, c| acc * 26 + i64::from(c.to_ascii_uppercase() as u8 - b'A' + 1));
    if index > MAX_COLUMN {
        return Err(format!("column '{}' is out of range", letters));
    }
    Ok(index)
}

fn shift(reference: Reference, rows: i64, cols: i64) -> String {
    let moved = match reference {
        Reference::Cell { col, row } => move_anchor(col, cols, MAX_COLUMN)
            .zip(move_anchor(row, rows, MAX_ROW))
            .map(|(col, row)| format!("{}{}", render_column(col), render_row(row))),
        Reference::Columns(a, b) => move_anchor(a, cols, MAX_COLUMN)
            .zip(move_anchor(b, cols, MAX_COLUMN))
            .map(|(a, b)| format!("{}:{}", render_column(a), render_column(b))),
        Reference::Rows(a, b) => move_anchor(a, rows, MAX_ROW)
            .zip(move_anchor(b, rows, MAX_ROW))
            .map(|(a, b)| format!("{}:{}", render_row(a), render_row(b))),
    };
    moved.unwrap_or_else(|| String::from("#REF!"))
}

fn move_anchor(anchor: Anchor, by: i64, max: i64) -> Option<Anchor> {
    if anchor.absolute {
        return Some(anchor);
    }
    let index = anchor.index + by;
    (1..=max).contains(&index).then_some(Anchor { index, ..anchor })
}

fn render_column(anchor: Anchor) -> String {
    let pin = if anchor.absolute { "$" } else { "" };
    format!("{}{}", pin, column_name(anchor.index as u32))
}

fn render_row(anchor: Anchor) -> String {
    let pin = if anchor.absolute { "$" } else { "" };
    format!("{}{}", pin, anchor.index)
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! test_translate {
        ($($name:ident: $value:expr,)*) => {
        $(
            #[test]
            fn $name() {
                let (expr, rows, cols, expected) = $value;

                assert_eq!(translate(expr, rows, cols), expected);
            }
        )*
        }
    }

    test_translate! {
        test_translate_cell: ("A2*2", 1, 2, "C3*2"),
        test_translate_in_place: ("SUM(A1:B2)", 0, 0, "SUM(A1:B2)"),
        test_translate_range: ("SUM(A1:B2)", 2, 0, "SUM(A3:B4)"),
        test_translate_absolute: ("$A$1+A$1+$A1", 1, 1, "$A$1+B$1+$A2"),
        test_translate_columns: ("VLOOKUP(A2, raw!A:D, 2, FALSE)", 1, 1, "VLOOKUP(B3, raw!B:E, 2, FALSE)"),
        test_translate_rows: ("SUM(2:3)", 2, 5, "SUM(4:5)"),
        test_translate_string: ("\"A1\"&A1", 1, 0, "\"A1\"&A2"),
        test_translate_escaped_quote: ("\"say \"\"B2\"\"\"&B2", 0, 1, "\"say \"\"B2\"\"\"&C2"),
        test_translate_quoted_sheet: ("'Q1 B2'!B2", 1, 0, "'Q1 B2'!B3"),
        test_translate_sheet_like_cell: ("Q1!B2", 0, 1, "Q1!C2"),
        test_translate_function_name: ("LOG10(A1)+ATAN2(B1,C1)", 1, 0, "LOG10(A2)+ATAN2(B2,C2)"),
        test_translate_number: ("A1*1.5+2E3", 0, 1, "B1*1.5+2E3"),
        test_translate_structured: ("SUM(Table1[A1])+A1", 0, 1, "SUM(Table1[A1])+B1"),
        test_translate_off_grid: ("A1+B2", -1, 0, "#REF!+B1"),
        test_translate_lowercase: ("a1", 0, 1, "B1"),
        test_translate_unicode: ("\"ä\"&Ä1&A1", 0, 1, "\"ä\"&Ä1&B1"),
    }
}
