use crate::formula;

use std::collections::BTreeMap;
use std::mem;

use anyhow::{anyhow, bail, Context, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

pub type Attributes = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    SharedString(usize),
    Bool(bool),
    Error(String),
    /// ISO 8601 date/time, stored as text with `t="d"`.
    Date(String),
    Formula(Formula),
}

impl CellValue {
    /// The formula source with its leading `=`, if this cell holds one.
    pub fn formula(&self) -> Option<String> {
        match self {
            CellValue::Formula(f) => Some(f.source()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    expr: String,
    attrs: Attributes,
    cached: Option<CachedValue>,
}

#[derive(Debug, Clone, PartialEq)]
struct CachedValue {
    kind: Option<String>,
    value: String,
}

impl Formula {
    /// A fresh formula without a cached result. A leading `=` is optional.
    pub fn new(source: &str) -> Self {
        Formula {
            expr: source.strip_prefix('=').unwrap_or(source).to_string(),
            attrs: Vec::new(),
            cached: None,
        }
    }

    pub fn source(&self) -> String {
        format!("={}", self.expr)
    }

    /// Group id of a shared formula, if this cell belongs to one.
    fn shared_index(&self) -> Option<&str> {
        let shared = self.attrs.iter().any(|(k, v)| k == "t" && v == "shared");
        self.attrs
            .iter()
            .find(|(k, _)| k == "si")
            .map(|(_, v)| v.as_str())
            .filter(|_| shared)
    }
}

#[derive(Debug, Clone, Default)]
struct Cell {
    attrs: Attributes,
    value: CellValue,
}

#[derive(Debug, Clone, Default)]
struct Row {
    attrs: Attributes,
    cells: BTreeMap<u32, Cell>,
}

/// One worksheet part, with `sheetData` decoded into rows and cells.
///
/// Everything around `sheetData` is kept as raw XML events and written back
/// untouched, apart from the `dimension` reference.
#[derive(Debug, Clone)]
pub struct Worksheet {
    head: Vec<Event<'static>>,
    data: BytesStart<'static>,
    rows: BTreeMap<u32, Row>,
    tail: Vec<Event<'static>>,
}

impl Worksheet {
    /// Shared formulas are expanded into standalone ones while parsing, so
    /// cells can be replaced or cleared one at a time.
    pub fn parse(xml: &[u8]) -> Result<Self> {
        let mut reader = Reader::from_reader(xml);
        let mut head = Vec::new();
        let mut tail = Vec::new();
        let mut data = None;
        let mut rows = BTreeMap::new();

        loop {
            match reader.read_event()? {
                Event::Eof => break,
                Event::Start(e) if data.is_none() && e.local_name().as_ref() == b"sheetData" => {
                    rows = read_rows(&mut reader)?;
                    data = Some(e.into_owned());
                }
                Event::Empty(e) if data.is_none() && e.local_name().as_ref() == b"sheetData" => {
                    data = Some(e.into_owned());
                }
                event if data.is_none() => head.push(event.into_owned()),
                event => tail.push(event.into_owned()),
            }
        }

        let data = data.ok_or_else(|| anyhow!("worksheet has no sheetData element"))?;
        let expanded = expand_shared_formulas(&mut rows);
        if expanded > 0 {
            debug!(cells = expanded, "Expanded shared formulas");
        }
        Ok(Worksheet {
            head,
            data,
            rows,
            tail,
        })
    }

    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Vec::new());
        for event in &self.head {
            match event {
                Event::Empty(e) if e.local_name().as_ref() == b"dimension" => {
                    let mut tag = BytesStart::new(qualified_name(e));
                    tag.push_attribute(("ref", self.dimension().as_str()));
                    writer.write_event(Event::Empty(tag))?;
                }
                event => writer.write_event(event.clone())?,
            }
        }

        if self.rows.is_empty() {
            writer.write_event(Event::Empty(self.data.clone()))?;
        } else {
            writer.write_event(Event::Start(self.data.clone()))?;
            let prefix = prefix_of(&self.data);
            for (idx, row) in &self.rows {
                write_row(&mut writer, &prefix, *idx, row)?;
            }
            writer.write_event(Event::End(self.data.to_end()))?;
        }

        for event in &self.tail {
            writer.write_event(event.clone())?;
        }
        Ok(writer.into_inner())
    }

    /// Highest row index holding at least one cell, or 0 for an empty sheet.
    pub fn last_row(&self) -> u32 {
        self.rows
            .iter()
            .rev()
            .find(|(_, row)| !row.cells.is_empty())
            .map(|(idx, _)| *idx)
            .unwrap_or(0)
    }

    pub fn cell(&self, row: u32, col: u32) -> Option<&CellValue> {
        self.rows
            .get(&row)
            .and_then(|r| r.cells.get(&col))
            .map(|c| &c.value)
    }

    /// Replaces a cell's value, keeping its style and other attributes.
    pub fn set_cell(&mut self, row: u32, col: u32, value: CellValue) {
        let cell = self
            .rows
            .entry(row)
            .or_default()
            .cells
            .entry(col)
            .or_default();
        cell.value = value;
    }

    pub fn clear_cell(&mut self, row: u32, col: u32) {
        if let Some(cell) = self.rows.get_mut(&row).and_then(|r| r.cells.get_mut(&col)) {
            cell.value = CellValue::Empty;
        }
    }

    /// Clears every cell from `first_row` downward.
    pub fn clear_rows_from(&mut self, first_row: u32) {
        for row in self.rows.range_mut(first_row..).map(|(_, row)| row) {
            for cell in row.cells.values_mut() {
                cell.value = CellValue::Empty;
            }
        }
    }

    fn dimension(&self) -> String {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (row_idx, row) in &self.rows {
            for col in row.cells.keys() {
                let (r0, c0, r1, c1) = bounds.unwrap_or((*row_idx, *col, *row_idx, *col));
                bounds = Some((r0.min(*row_idx), c0.min(*col), r1.max(*row_idx), c1.max(*col)));
            }
        }
        match bounds {
            Some((r0, c0, r1, c1)) if (r0, c0) != (r1, c1) => {
                format!("{}:{}", cell_reference(r0, c0), cell_reference(r1, c1))
            }
            Some((r0, c0, _, _)) => cell_reference(r0, c0),
            None => "A1".to_string(),
        }
    }
}

/// Gives every member of a shared formula group its own copy of the anchor's
/// expression, moved to the member's position. Members whose anchor is
/// missing are left as they are.
fn expand_shared_formulas(rows: &mut BTreeMap<u32, Row>) -> usize {
    let mut anchors: BTreeMap<String, (u32, u32, String)> = BTreeMap::new();
    for (row_idx, row) in rows.iter() {
        for (col, cell) in &row.cells {
            if let CellValue::Formula(f) = &cell.value {
                match f.shared_index() {
                    Some(si) if !f.expr.is_empty() => {
                        anchors
                            .entry(si.to_string())
                            .or_insert_with(|| (*row_idx, *col, f.expr.clone()));
                    }
                    _ => {}
                }
            }
        }
    }
    if anchors.is_empty() {
        return 0;
    }

    let mut expanded = 0;
    for (row_idx, row) in rows.iter_mut() {
        for (col, cell) in row.cells.iter_mut() {
            let f = match &mut cell.value {
                CellValue::Formula(f) => f,
                _ => continue,
            };
            let anchor = f.shared_index().and_then(|si| anchors.get(si)).cloned();
            if let Some((anchor_row, anchor_col, expr)) = anchor {
                f.expr = formula::translate(
                    &expr,
                    i64::from(*row_idx) - i64::from(anchor_row),
                    i64::from(*col) - i64::from(anchor_col),
                );
                f.attrs.retain(|(k, _)| !matches!(k.as_str(), "t" | "ref" | "si"));
                expanded += 1;
            }
        }
    }
    expanded
}

fn read_rows(reader: &mut Reader<&[u8]>) -> Result<BTreeMap<u32, Row>> {
    let mut rows = BTreeMap::new();
    let mut last_idx = 0;
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"row" => {
                let (idx, attrs) = row_header(&e, last_idx)?;
                let cells = read_cells(reader)?;
                rows.insert(idx, Row { attrs, cells });
                last_idx = idx;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                let (idx, attrs) = row_header(&e, last_idx)?;
                rows.insert(
                    idx,
                    Row {
                        attrs,
                        cells: BTreeMap::new(),
                    },
                );
                last_idx = idx;
            }
            Event::End(e) if e.local_name().as_ref() == b"sheetData" => return Ok(rows),
            Event::Eof => bail!("unexpected end of worksheet inside sheetData"),
            _ => {}
        }
    }
}

/// Rows without an `r` attribute follow the previous row. `spans` is only an
/// optimisation hint and goes stale once cells change, so it is dropped.
fn row_header(tag: &BytesStart, last_idx: u32) -> Result<(u32, Attributes)> {
    let mut idx = last_idx + 1;
    let mut attrs = Vec::new();
    for (key, value) in attributes(tag)? {
        match key.as_str() {
            "r" => {
                idx = value
                    .parse()
                    .with_context(|| format!("invalid row number '{}'", value))?
            }
            "spans" => {}
            _ => attrs.push((key, value)),
        }
    }
    Ok((idx, attrs))
}

fn read_cells(reader: &mut Reader<&[u8]>) -> Result<BTreeMap<u32, Cell>> {
    let mut cells = BTreeMap::new();
    let mut last_col = 0;
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                let (col, kind, attrs) = cell_header(&e, last_col)?;
                let value = read_cell_value(reader, kind)?;
                cells.insert(col, Cell { attrs, value });
                last_col = col;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                let (col, _, attrs) = cell_header(&e, last_col)?;
                cells.insert(
                    col,
                    Cell {
                        attrs,
                        value: CellValue::Empty,
                    },
                );
                last_col = col;
            }
            Event::End(e) if e.local_name().as_ref() == b"row" => return Ok(cells),
            Event::Eof => bail!("unexpected end of worksheet inside a row"),
            _ => {}
        }
    }
}

fn cell_header(tag: &BytesStart, last_col: u32) -> Result<(u32, Option<String>, Attributes)> {
    let mut col = last_col + 1;
    let mut kind = None;
    let mut attrs = Vec::new();
    for (key, value) in attributes(tag)? {
        match key.as_str() {
            "r" => {
                col = parse_reference(&value)
                    .map(|(_, col)| col)
                    .ok_or_else(|| anyhow!("invalid cell reference '{}'", value))?
            }
            "t" => kind = Some(value),
            _ => attrs.push((key, value)),
        }
    }
    Ok((col, kind, attrs))
}

#[derive(Clone, Copy, PartialEq)]
enum Capture {
    Value,
    Formula,
    InlineText,
}

fn read_cell_value(reader: &mut Reader<&[u8]>, kind: Option<String>) -> Result<CellValue> {
    let mut capture = None;
    let mut text = String::new();
    let mut value = None;
    let mut formula: Option<(Attributes, String)> = None;
    let mut formula_attrs = Vec::new();
    let mut inline = String::new();
    let mut in_phonetic = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"v" => capture = Some(Capture::Value),
                b"f" => {
                    formula_attrs = attributes(&e)?;
                    capture = Some(Capture::Formula);
                }
                b"rPh" => in_phonetic = true,
                b"t" if !in_phonetic => capture = Some(Capture::InlineText),
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"f" => {
                formula = Some((attributes(&e)?, String::new()));
            }
            Event::Text(e) if capture.is_some() => text.push_str(&e.unescape()?),
            Event::CData(e) if capture.is_some() => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()))
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" => {
                    value = Some(mem::take(&mut text));
                    capture = None;
                }
                b"f" => {
                    formula = Some((mem::take(&mut formula_attrs), mem::take(&mut text)));
                    capture = None;
                }
                b"t" if capture == Some(Capture::InlineText) => {
                    inline.push_str(&mem::take(&mut text));
                    capture = None;
                }
                b"rPh" => in_phonetic = false,
                b"c" => break,
                _ => {}
            },
            Event::Eof => bail!("unexpected end of worksheet inside a cell"),
            _ => {}
        }
    }

    if let Some((attrs, expr)) = formula {
        return Ok(CellValue::Formula(Formula {
            expr,
            attrs,
            cached: value.map(|value| CachedValue { kind, value }),
        }));
    }
    if kind.as_deref() == Some("inlineStr") {
        return Ok(CellValue::Text(inline));
    }
    let value = match value {
        Some(value) => value,
        None => return Ok(CellValue::Empty),
    };
    let cell = match kind.as_deref() {
        None | Some("n") => CellValue::Number(
            value
                .trim()
                .parse()
                .with_context(|| format!("invalid numeric cell '{}'", value))?,
        ),
        Some("s") => CellValue::SharedString(
            value
                .trim()
                .parse()
                .with_context(|| format!("invalid shared string index '{}'", value))?,
        ),
        Some("b") => CellValue::Bool(value.trim() == "1"),
        Some("e") => CellValue::Error(value),
        Some("d") => CellValue::Date(value),
        Some("str") => CellValue::Text(value),
        Some(other) => bail!("unsupported cell type '{}'", other),
    };
    Ok(cell)
}

fn write_row(writer: &mut Writer<Vec<u8>>, prefix: &str, idx: u32, row: &Row) -> Result<()> {
    let name = format!("{}row", prefix);
    let mut tag = BytesStart::new(name.as_str());
    tag.push_attribute(("r", idx.to_string().as_str()));
    for (key, value) in &row.attrs {
        tag.push_attribute((key.as_str(), value.as_str()));
    }
    if row.cells.is_empty() {
        writer.write_event(Event::Empty(tag))?;
        return Ok(());
    }
    writer.write_event(Event::Start(tag))?;
    for (col, cell) in &row.cells {
        write_cell(writer, prefix, &cell_reference(idx, *col), cell)?;
    }
    writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
    Ok(())
}

fn write_cell(writer: &mut Writer<Vec<u8>>, prefix: &str, reference: &str, cell: &Cell) -> Result<()> {
    let name = format!("{}c", prefix);
    let mut tag = BytesStart::new(name.as_str());
    tag.push_attribute(("r", reference));
    for (key, value) in &cell.attrs {
        tag.push_attribute((key.as_str(), value.as_str()));
    }

    let kind = match &cell.value {
        CellValue::Empty => {
            writer.write_event(Event::Empty(tag))?;
            return Ok(());
        }
        CellValue::Number(_) => None,
        CellValue::Text(_) => Some("inlineStr"),
        CellValue::SharedString(_) => Some("s"),
        CellValue::Bool(_) => Some("b"),
        CellValue::Error(_) => Some("e"),
        CellValue::Date(_) => Some("d"),
        CellValue::Formula(f) => f.cached.as_ref().and_then(|c| c.kind.as_deref()),
    };
    if let Some(kind) = kind {
        tag.push_attribute(("t", kind));
    }
    writer.write_event(Event::Start(tag))?;

    match &cell.value {
        CellValue::Empty => {}
        CellValue::Number(n) => write_element(writer, prefix, "v", &n.to_string())?,
        CellValue::Text(s) => {
            let is = format!("{}is", prefix);
            let t = format!("{}t", prefix);
            writer.write_event(Event::Start(BytesStart::new(is.as_str())))?;
            let mut t_tag = BytesStart::new(t.as_str());
            t_tag.push_attribute(("xml:space", "preserve"));
            writer.write_event(Event::Start(t_tag))?;
            writer.write_event(Event::Text(BytesText::new(s)))?;
            writer.write_event(Event::End(BytesEnd::new(t.as_str())))?;
            writer.write_event(Event::End(BytesEnd::new(is.as_str())))?;
        }
        CellValue::SharedString(idx) => write_element(writer, prefix, "v", &idx.to_string())?,
        CellValue::Bool(b) => write_element(writer, prefix, "v", if *b { "1" } else { "0" })?,
        CellValue::Error(e) | CellValue::Date(e) => write_element(writer, prefix, "v", e)?,
        CellValue::Formula(f) => {
            let f_name = format!("{}f", prefix);
            let mut f_tag = BytesStart::new(f_name.as_str());
            for (key, value) in &f.attrs {
                f_tag.push_attribute((key.as_str(), value.as_str()));
            }
            if f.expr.is_empty() {
                writer.write_event(Event::Empty(f_tag))?;
            } else {
                writer.write_event(Event::Start(f_tag))?;
                writer.write_event(Event::Text(BytesText::new(&f.expr)))?;
                writer.write_event(Event::End(BytesEnd::new(f_name.as_str())))?;
            }
            if let Some(cached) = &f.cached {
                write_element(writer, prefix, "v", &cached.value)?;
            }
        }
    }

    writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
    Ok(())
}

fn write_element(writer: &mut Writer<Vec<u8>>, prefix: &str, local: &str, text: &str) -> Result<()> {
    let name = format!("{}{}", prefix, local);
    writer.write_event(Event::Start(BytesStart::new(name.as_str())))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
    Ok(())
}

pub(crate) fn attributes(tag: &BytesStart) -> Result<Attributes> {
    let mut attrs = Vec::new();
    for attr in tag.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attrs.push((key, value));
    }
    Ok(attrs)
}

fn qualified_name(tag: &BytesStart) -> String {
    String::from_utf8_lossy(tag.name().as_ref()).into_owned()
}

/// Namespace prefix (with trailing `:`) used by the sheet's own elements.
fn prefix_of(tag: &BytesStart) -> String {
    match qualified_name(tag).split_once(':') {
        Some((prefix, _)) => format!("{}:", prefix),
        None => String::new(),
    }
}

pub fn column_name(mut col: u32) -> String {
    let mut name = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        name.push(char::from(b'A' + rem as u8));
        col = (col - 1) / 26;
    }
    name.iter().rev().collect()
}

pub fn cell_reference(row: u32, col: u32) -> String {
    format!("{}{}", column_name(col), row)
}

/// Parses an `A1`-style reference into `(row, col)`, both 1-based.
pub fn parse_reference(reference: &str) -> Option<(u32, u32)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() || letters.len() > 3 || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let col = letters
        .chars()
        .fold(0, |acc, c| acc * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1));
    let row = digits.parse().ok().filter(|row| *row > 0)?;
    Some((row, col))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><dimension ref="A1:C3"/><sheetViews><sheetView workbookViewId="0"/></sheetViews><sheetData><row r="1" spans="1:3"><c r="A1" t="inlineStr"><is><t>Key</t></is></c><c r="B1" t="s"><v>0</v></c></row><row r="2" ht="20" customHeight="1"><c r="A2" s="4"><v>1.5</v></c><c r="B2" t="str"><f>A2&amp;"x"</f><v>1.5x</v></c><c r="C2" s="2"/></row><row r="3"><c r="A3" t="b"><v>1</v></c><c r="C3" t="e"><v>#N/A</v></c></row></sheetData><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/></worksheet>"#;

    macro_rules! test_reference {
        ($($name:ident: $value:expr,)*) => {
        $(
            #[test]
            fn $name() {
                let (input, expected) = $value;

                assert_eq!(parse_reference(input), expected);
                if let Some((row, col)) = expected {
                    assert_eq!(cell_reference(row, col), input);
                }
            }
        )*
        }
    }

    test_reference! {
        test_reference_a1: ("A1", Some((1, 1))),
        test_reference_z9: ("Z9", Some((9, 26))),
        test_reference_aa10: ("AA10", Some((10, 27))),
        test_reference_xfd: ("XFD1048576", Some((1048576, 16384))),
        test_reference_no_row: ("B", None),
        test_reference_no_col: ("12", None),
        test_reference_row_zero: ("A0", None),
    }

    #[test]
    fn decodes_cell_values() {
        let sheet = Worksheet::parse(SHEET.as_bytes()).expect("valid sheet");

        assert_eq!(sheet.cell(1, 1), Some(&CellValue::Text("Key".to_string())));
        assert_eq!(sheet.cell(1, 2), Some(&CellValue::SharedString(0)));
        assert_eq!(sheet.cell(2, 1), Some(&CellValue::Number(1.5)));
        assert_eq!(
            sheet.cell(2, 2).and_then(CellValue::formula).as_deref(),
            Some("=A2&\"x\"")
        );
        assert_eq!(sheet.cell(2, 3), Some(&CellValue::Empty));
        assert_eq!(sheet.cell(3, 1), Some(&CellValue::Bool(true)));
        assert_eq!(sheet.cell(3, 3), Some(&CellValue::Error("#N/A".to_string())));
        assert_eq!(sheet.cell(4, 1), None);
        assert_eq!(sheet.last_row(), 3);
    }

    #[test]
    fn rewrites_sheet_data_and_keeps_surroundings() {
        let mut sheet = Worksheet::parse(SHEET.as_bytes()).expect("valid sheet");
        sheet.set_cell(5, 4, CellValue::Text("a < b".to_string()));
        sheet.clear_cell(2, 1);

        let xml = String::from_utf8(sheet.to_xml().expect("serialises")).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>"));
        assert!(xml.contains("<dimension ref=\"A1:D5\"/>"));
        assert!(xml.contains("<sheetViews><sheetView workbookViewId=\"0\"/></sheetViews>"));
        assert!(xml.contains("<row r=\"2\" ht=\"20\" customHeight=\"1\"><c r=\"A2\" s=\"4\"/>"));
        assert!(xml.contains("<c r=\"D5\" t=\"inlineStr\"><is><t xml:space=\"preserve\">a &lt; b</t></is></c>"));
        assert!(xml.contains("<f>A2&amp;&quot;x&quot;</f><v>1.5x</v>") || xml.contains("<f>A2&amp;\"x\"</f><v>1.5x</v>"));
        assert!(xml.ends_with("<pageMargins left=\"0.7\" right=\"0.7\" top=\"0.75\" bottom=\"0.75\" header=\"0.3\" footer=\"0.3\"/></worksheet>"));

        let reparsed = Worksheet::parse(xml.as_bytes()).expect("reparses");
        assert_eq!(reparsed.cell(5, 4), Some(&CellValue::Text("a < b".to_string())));
        assert_eq!(reparsed.cell(2, 1), Some(&CellValue::Empty));
        assert_eq!(
            reparsed.cell(2, 2).and_then(CellValue::formula).as_deref(),
            Some("=A2&\"x\"")
        );
        assert_eq!(reparsed.last_row(), 5);
    }

    #[test]
    fn clears_rows_but_keeps_styles() {
        let mut sheet = Worksheet::parse(SHEET.as_bytes()).expect("valid sheet");

        sheet.clear_rows_from(2);

        assert_eq!(sheet.cell(1, 1), Some(&CellValue::Text("Key".to_string())));
        assert_eq!(sheet.cell(2, 1), Some(&CellValue::Empty));
        assert_eq!(sheet.cell(3, 3), Some(&CellValue::Empty));
        let xml = String::from_utf8(sheet.to_xml().expect("serialises")).unwrap();
        assert!(xml.contains("<c r=\"A2\" s=\"4\"/>"));
        assert!(!xml.contains("#N/A"));
    }

    #[test]
    fn numbers_rows_and_cells_without_references() {
        let xml = r#"<worksheet><sheetData><row><c><v>1</v></c><c><v>2</v></c></row><row><c r="C2"><v>3</v></c><c><v>4</v></c></row></sheetData></worksheet>"#;

        let sheet = Worksheet::parse(xml.as_bytes()).expect("valid sheet");

        assert_eq!(sheet.cell(1, 2), Some(&CellValue::Number(2.0)));
        assert_eq!(sheet.cell(2, 3), Some(&CellValue::Number(3.0)));
        assert_eq!(sheet.cell(2, 4), Some(&CellValue::Number(4.0)));
    }

    #[test]
    fn empty_sheet_data_expands_when_written() {
        let xml = r#"<x:worksheet xmlns:x="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><x:dimension ref="A1"/><x:sheetData/></x:worksheet>"#;
        let mut sheet = Worksheet::parse(xml.as_bytes()).expect("valid sheet");
        assert_eq!(sheet.last_row(), 0);

        sheet.set_cell(2, 2, CellValue::Formula(Formula::new("=SUM(A1:A2)")));

        let xml = String::from_utf8(sheet.to_xml().expect("serialises")).unwrap();
        assert!(xml.contains("<x:dimension ref=\"B2\"/>"));
        assert!(xml.contains("<x:sheetData><x:row r=\"2\"><x:c r=\"B2\"><x:f>SUM(A1:A2)</x:f></x:c></x:row></x:sheetData>"));
    }

    #[test]
    fn keeps_date_cells() {
        let xml = r#"<worksheet><sheetData><row r="1"><c r="A1" t="d" s="5"><v>2024-03-01T00:00:00</v></c><c r="B1" t="str"><v>note</v></c></row></sheetData></worksheet>"#;
        let mut sheet = Worksheet::parse(xml.as_bytes()).expect("valid sheet");

        assert_eq!(
            sheet.cell(1, 1),
            Some(&CellValue::Date("2024-03-01T00:00:00".to_string()))
        );
        assert_eq!(sheet.cell(1, 2), Some(&CellValue::Text("note".to_string())));
        sheet.set_cell(2, 1, CellValue::Number(1.0));

        let xml = String::from_utf8(sheet.to_xml().expect("serialises")).unwrap();
        assert!(xml.contains(r#"<c r="A1" s="5" t="d"><v>2024-03-01T00:00:00</v></c>"#));
        let reparsed = Worksheet::parse(xml.as_bytes()).expect("reparses");
        assert_eq!(
            reparsed.cell(1, 1),
            Some(&CellValue::Date("2024-03-01T00:00:00".to_string()))
        );
    }

    #[test]
    fn expands_shared_formulas() {
        let xml = r#"<worksheet><sheetData><row r="2"><c r="G2"><f t="shared" ref="G2:I3" si="0">A2*2+$B$1</f><v>4</v></c><c r="H2"><f t="shared" si="0"/><v>6</v></c><c r="I2"><f t="shared" si="0"/></c></row><row r="3"><c r="G3"><f t="shared" si="0"/></c><c r="I3" s="2"><f t="shared" si="0"/><v>8</v></c><c r="J3"><f t="shared" si="7"/></c></row></sheetData></worksheet>"#;

        let sheet = Worksheet::parse(xml.as_bytes()).expect("valid sheet");

        let formula = |row, col| sheet.cell(row, col).and_then(CellValue::formula);
        assert_eq!(formula(2, 7).as_deref(), Some("=A2*2+$B$1"));
        assert_eq!(formula(2, 8).as_deref(), Some("=B2*2+$B$1"));
        assert_eq!(formula(2, 9).as_deref(), Some("=C2*2+$B$1"));
        assert_eq!(formula(3, 7).as_deref(), Some("=A3*2+$B$1"));
        assert_eq!(formula(3, 9).as_deref(), Some("=C3*2+$B$1"));

        let xml = String::from_utf8(sheet.to_xml().expect("serialises")).unwrap();
        assert!(xml.contains(r#"<c r="G2"><f>A2*2+$B$1</f><v>4</v></c>"#));
        assert!(xml.contains(r#"<c r="I3" s="2"><f>C3*2+$B$1</f><v>8</v></c>"#));
        // A member whose anchor is missing has nothing to copy from.
        assert!(xml.contains(r#"<c r="J3"><f t="shared" si="7"/></c>"#));
    }

    #[test]
    fn clearing_shared_anchor_keeps_members() {
        let xml = r#"<worksheet><sheetData><row r="2"><c r="G2"><f t="shared" ref="G2:G3" si="1">A2</f></c></row><row r="3"><c r="G3"><f t="shared" si="1"/></c></row></sheetData></worksheet>"#;
        let mut sheet = Worksheet::parse(xml.as_bytes()).expect("valid sheet");

        sheet.clear_cell(2, 7);

        let xml = String::from_utf8(sheet.to_xml().expect("serialises")).unwrap();
        assert!(xml.contains(r#"<c r="G2"/>"#));
        assert!(xml.contains(r#"<c r="G3"><f>A3</f></c>"#));
        assert!(!xml.contains("shared"));
    }

    #[test]
    fn rejects_sheet_without_data() {
        assert!(Worksheet::parse(b"<worksheet><dimension ref=\"A1\"/></worksheet>").is_err());
    }
}
