use crate::error::ConvertError;
use crate::sheet::{attributes, Attributes, CellValue, Worksheet};

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use anyhow::{anyhow, Context, Result};
use quick_xml::events::Event;
use quick_xml::{Reader, Writer};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const CONTENT_TYPES: &str = "[Content_Types].xml";
const PACKAGE_RELS: &str = "_rels/.rels";
const OFFICE_DOCUMENT: &str = "/officeDocument";
const WORKSHEET: &str = "/worksheet";
const SHARED_STRINGS: &str = "/sharedStrings";
const CALC_CHAIN: &str = "/calcChain";

/// An xlsx/xlsm package held in memory.
///
/// Worksheets are decoded on first access and only those are re-encoded on
/// save; every other part is copied over as stored in the template.
pub struct Workbook {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    sheets: Vec<SheetEntry>,
    shared_strings: Vec<String>,
    workbook_rels: String,
    calc_chain: Option<String>,
    edited: BTreeMap<String, Worksheet>,
}

struct SheetEntry {
    name: String,
    path: String,
}

struct Relationship {
    id: String,
    kind: String,
    target: String,
}

impl Workbook {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        match Self::load(bytes) {
            Ok(workbook) => Ok(workbook),
            Err(err) => Err(ConvertError::Template(format!("{:#}", err)))
                .context("Failed to open template workbook"),
        }
    }

    fn load(bytes: Vec<u8>) -> Result<Self> {
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).context("Not a spreadsheet package")?;

        let package_rels = relationships(&read_entry(&mut archive, PACKAGE_RELS)?)?;
        let main_part = package_rels
            .iter()
            .find(|rel| rel.kind.ends_with(OFFICE_DOCUMENT))
            .map(|rel| resolve_target("", &rel.target))
            .ok_or_else(|| anyhow!("package has no main workbook part"))?;
        let workbook_rels = rels_path(&main_part);
        let base = parent_dir(&main_part);

        let rels = relationships(&read_entry(&mut archive, &workbook_rels)?)?;
        let mut sheets = Vec::new();
        for (name, id) in sheet_entries(&read_entry(&mut archive, &main_part)?)? {
            let rel = rels
                .iter()
                .find(|rel| rel.id == id)
                .ok_or_else(|| anyhow!("sheet '{}' has no relationship '{}'", name, id))?;
            // Chart, macro and dialog sheets hold no cell grid.
            if !rel.kind.ends_with(WORKSHEET) {
                debug!(sheet = %name, kind = %rel.kind, "Skipping non-worksheet sheet");
                continue;
            }
            sheets.push(SheetEntry {
                name,
                path: resolve_target(base, &rel.target),
            });
        }

        let shared_strings = match rels.iter().find(|rel| rel.kind.ends_with(SHARED_STRINGS)) {
            Some(rel) => {
                let path = resolve_target(base, &rel.target);
                shared_string_table(&read_entry(&mut archive, &path)?)?
            }
            None => Vec::new(),
        };
        let calc_chain = rels
            .iter()
            .find(|rel| rel.kind.ends_with(CALC_CHAIN))
            .map(|rel| resolve_target(base, &rel.target));

        debug!(
            sheets = ?sheets.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            shared_strings = shared_strings.len(),
            "Loaded workbook"
        );

        Ok(Workbook {
            archive,
            sheets,
            shared_strings,
            workbook_rels,
            calc_chain,
            edited: BTreeMap::new(),
        })
    }

    pub fn has_sheet(&self, name: &str) -> bool {
        self.sheets.iter().any(|s| s.name == name)
    }

    pub fn sheet_mut(&mut self, name: &str) -> Result<&mut Worksheet> {
        let path = match self.sheets.iter().find(|s| s.name == name) {
            Some(entry) => entry.path.clone(),
            None => {
                return Err(ConvertError::Template(format!("missing sheet '{}'", name)))
                    .context("Failed to open worksheet")
            }
        };
        match self.edited.entry(path) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let parsed = read_entry(&mut self.archive, entry.key())
                    .and_then(|xml| Worksheet::parse(&xml));
                match parsed {
                    Ok(sheet) => Ok(entry.insert(sheet)),
                    Err(err) => Err(ConvertError::Template(format!(
                        "sheet '{}' is unreadable: {:#}",
                        name, err
                    )))
                    .context("Failed to open worksheet"),
                }
            }
        }
    }

    /// Renders a cell value as text, resolving shared strings.
    pub fn display(&self, value: &CellValue) -> Option<String> {
        match value {
            CellValue::Empty => None,
            CellValue::Number(n) => Some(n.to_string()),
            CellValue::Text(s) => Some(s.clone()),
            CellValue::SharedString(idx) => self.shared_strings.get(*idx).cloned(),
            CellValue::Bool(b) => Some(String::from(if *b { "TRUE" } else { "FALSE" })),
            CellValue::Error(e) | CellValue::Date(e) => Some(e.clone()),
            CellValue::Formula(_) => value.formula(),
        }
    }

    /// Writes the package out again. The calculation chain is dropped since
    /// it may name formula cells that no longer exist.
    pub fn to_bytes(mut self) -> Result<Vec<u8>> {
        let calc_chain = self.calc_chain.clone();
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        for idx in 0..self.archive.len() {
            let name = self.archive.by_index_raw(idx)?.name().to_string();
            let replacement = if calc_chain.as_deref() == Some(name.as_str()) {
                debug!(part = %name, "Dropping calculation chain");
                continue;
            } else if let Some(sheet) = self.edited.get(&name) {
                Some(sheet.to_xml()?)
            } else if calc_chain.is_some() && name == CONTENT_TYPES {
                let part_name = format!("/{}", calc_chain.as_deref().unwrap_or_default());
                let xml = read_entry(&mut self.archive, &name)?;
                Some(drop_elements(&xml, b"Override", |attrs| {
                    Ok(has_attribute(attrs, "PartName", |v| v == part_name))
                })?)
            } else if calc_chain.is_some() && name == self.workbook_rels {
                let xml = read_entry(&mut self.archive, &name)?;
                Some(drop_elements(&xml, b"Relationship", |attrs| {
                    Ok(has_attribute(attrs, "Type", |v| v.ends_with(CALC_CHAIN)))
                })?)
            } else {
                None
            };

            match replacement {
                Some(data) => {
                    let options =
                        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
                    writer.start_file(name.as_str(), options)?;
                    writer.write_all(&data)?;
                }
                None => {
                    let entry = self.archive.by_index_raw(idx)?;
                    writer.raw_copy_file(entry)?;
                }
            }
        }

        Ok(writer.finish()?.into_inner())
    }
}

fn read_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Result<Vec<u8>> {
    let mut file = archive
        .by_name(name)
        .with_context(|| format!("Missing package part '{}'", name))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .with_context(|| format!("Failed to read package part '{}'", name))?;
    Ok(buf)
}

fn relationships(xml: &[u8]) -> Result<Vec<Relationship>> {
    let mut reader = Reader::from_reader(xml);
    let mut rels = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let mut rel = Relationship {
                    id: String::new(),
                    kind: String::new(),
                    target: String::new(),
                };
                for (key, value) in attributes(&e)? {
                    match key.as_str() {
                        "Id" => rel.id = value,
                        "Type" => rel.kind = value,
                        "Target" => rel.target = value,
                        _ => {}
                    }
                }
                rels.push(rel);
            }
            Event::Eof => return Ok(rels),
            _ => {}
        }
    }
}

/// Sheet names paired with their relationship ids, in workbook order.
fn sheet_entries(xml: &[u8]) -> Result<Vec<(String, String)>> {
    let mut reader = Reader::from_reader(xml);
    let mut sheets = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let attrs = attributes(&e)?;
                let name = attrs.iter().find(|(k, _)| k == "name").map(|(_, v)| v.clone());
                let id = attrs.iter().find(|(k, _)| k.ends_with(":id")).map(|(_, v)| v.clone());
                match (name, id) {
                    (Some(name), Some(id)) => sheets.push((name, id)),
                    _ => return Err(anyhow!("sheet entry without name or relationship id")),
                }
            }
            Event::Eof => return Ok(sheets),
            _ => {}
        }
    }
}

/// Plain text of every `si` entry; phonetic runs are skipped.
fn shared_string_table(xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"rPh" => in_phonetic = true,
                b"t" if !in_phonetic => in_text = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(e) if in_text => current.push_str(&e.unescape()?),
            Event::CData(e) if in_text => {
                current.push_str(&String::from_utf8_lossy(&e.into_inner()))
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Eof => return Ok(strings),
            _ => {}
        }
    }
}

/// Copies `xml` through, leaving out `local` elements whose attributes match.
fn drop_elements<F>(xml: &[u8], local: &[u8], predicate: F) -> Result<Vec<u8>>
where
    F: Fn(&Attributes) -> Result<bool>,
{
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::new());
    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Empty(e) if e.local_name().as_ref() == local && predicate(&attributes(&e)?)? => {}
            Event::Start(e) if e.local_name().as_ref() == local && predicate(&attributes(&e)?)? => {
                reader.read_to_end(e.name())?;
            }
            event => writer.write_event(event)?,
        }
    }
    Ok(writer.into_inner())
}

fn has_attribute<P>(attrs: &Attributes, key: &str, predicate: P) -> bool
where
    P: Fn(&str) -> bool,
{
    attrs.iter().any(|(k, v)| k == key && predicate(v))
}

fn parent_dir(part: &str) -> &str {
    part.rfind('/').map(|idx| &part[..idx]).unwrap_or("")
}

/// `xl/workbook.xml` keeps its relationships in `xl/_rels/workbook.xml.rels`.
fn rels_path(part: &str) -> String {
    match part.rfind('/') {
        Some(idx) => format!("{}/_rels/{}.rels", &part[..idx], &part[idx + 1..]),
        None => format!("_rels/{}.rels", part),
    }
}

/// Resolves a relationship target against the directory of its source part.
fn resolve_target(base: &str, target: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    let joined = match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None if base.is_empty() => target.to_string(),
        None => format!("{}/{}", base, target),
    };
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    segments.join("/")
}
