use anyhow::{Context, Result, anyhow};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::xml::{DRAWINGML, Dialect, WORDPROCESSINGML, XmlPart};
use super::{Extraction, TranslatableDocument};
use crate::classifier::is_translatable;

const PRESENTATION_PART: &str = "ppt/presentation.xml";
const PRESENTATION_RELS: &str = "ppt/_rels/presentation.xml.rels";
const SLIDE_PREFIX: &str = "ppt/slides/slide";
const DOCUMENT_PART: &str = "word/document.xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfficeKind {
    Docx,
    Pptx,
}

impl OfficeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfficeKind::Docx => "docx",
            OfficeKind::Pptx => "pptx",
        }
    }

    fn dialect(&self) -> &'static Dialect {
        match self {
            OfficeKind::Docx => &WORDPROCESSINGML,
            OfficeKind::Pptx => &DRAWINGML,
        }
    }
}

/// Points at one paragraph of one translatable part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParagraphHandle {
    pub part: usize,
    pub paragraph: usize,
}

struct Entry {
    name: String,
    compression: CompressionMethod,
    is_dir: bool,
    data: Vec<u8>,
}

struct TextPart {
    entry: usize,
    xml: XmlPart,
}

/// A DOCX or PPTX package held in memory. Only the selected text parts are
/// parsed; every other entry is written back byte for byte.
pub struct OfficeDocument {
    kind: OfficeKind,
    entries: Vec<Entry>,
    parts: Vec<TextPart>,
}

impl OfficeDocument {
    /// Reads a package. For presentations `part_limit` caps how many slides
    /// (in presentation order) are opened for translation.
    pub fn from_bytes(bytes: &[u8], kind: OfficeKind, part_limit: Option<usize>) -> Result<Self> {
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).with_context(|| "failed to read zip archive")?;
        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .with_context(|| "failed to read zip entry")?;
            let mut data = Vec::new();
            file.read_to_end(&mut data)
                .with_context(|| format!("failed to read zip entry content: {}", file.name()))?;
            entries.push(Entry {
                name: file.name().to_string(),
                compression: file.compression(),
                is_dir: file.is_dir(),
                data,
            });
        }

        let index = entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.name.clone(), idx))
            .collect::<HashMap<_, _>>();
        let mut selected = match kind {
            OfficeKind::Docx => {
                let entry = index
                    .get(DOCUMENT_PART)
                    .copied()
                    .ok_or_else(|| anyhow!("missing {}", DOCUMENT_PART))?;
                vec![entry]
            }
            OfficeKind::Pptx => slide_entries(&entries, &index)?,
        };
        if let Some(limit) = part_limit {
            selected.truncate(limit);
        }

        let parts = selected
            .into_iter()
            .map(|entry| {
                let xml = XmlPart::parse(&entries[entry].data, kind.dialect())
                    .with_context(|| format!("failed to parse {}", entries[entry].name))?;
                Ok(TextPart { entry, xml })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            kind,
            entries,
            parts,
        })
    }

    pub fn kind(&self) -> OfficeKind {
        self.kind
    }

    /// Names of the parts open for translation, in extraction order.
    pub fn part_names(&self) -> Vec<&str> {
        self.parts
            .iter()
            .map(|part| self.entries[part.entry].name.as_str())
            .collect()
    }

    pub fn paragraph_text(&self, handle: ParagraphHandle) -> Option<String> {
        self.parts
            .get(handle.part)
            .filter(|part| handle.paragraph < part.xml.paragraph_count())
            .map(|part| part.xml.paragraph_text(handle.paragraph))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let rewritten = self
            .parts
            .iter()
            .map(|part| Ok((part.entry, part.xml.to_bytes()?)))
            .collect::<Result<HashMap<_, _>>>()?;

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (idx, entry) in self.entries.iter().enumerate() {
            let options = FileOptions::default().compression_method(entry.compression);
            if entry.is_dir {
                writer
                    .add_directory(entry.name.clone(), options)
                    .with_context(|| "failed to write zip directory")?;
                continue;
            }
            let data = rewritten.get(&idx).unwrap_or(&entry.data);
            writer
                .start_file(entry.name.clone(), options)
                .with_context(|| "failed to write zip entry")?;
            writer
                .write_all(data)
                .with_context(|| "failed to write zip content")?;
        }
        let bytes = writer
            .finish()
            .with_context(|| "failed to finalize zip output")?
            .into_inner();
        Ok(bytes)
    }
}

impl TranslatableDocument for OfficeDocument {
    type Handle = ParagraphHandle;

    fn extract(&self) -> Extraction<ParagraphHandle> {
        let mut extraction = Extraction::default();
        for (part_idx, part) in self.parts.iter().enumerate() {
            for paragraph in 0..part.xml.paragraph_count() {
                let text = part.xml.paragraph_text(paragraph);
                if is_translatable(&text) {
                    extraction.push(
                        text,
                        ParagraphHandle {
                            part: part_idx,
                            paragraph,
                        },
                    );
                }
            }
        }
        extraction
    }

    fn replace_text(&mut self, handle: ParagraphHandle, text: &str) -> Result<()> {
        let part = self
            .parts
            .get_mut(handle.part)
            .ok_or_else(|| anyhow!("part {} is not open for translation", handle.part))?;
        part.xml.replace_paragraph_text(handle.paragraph, text)
    }
}

/// Slide parts in presentation order: `p:sldIdLst` resolved through the
/// presentation relationships, or slide number order when those are absent.
fn slide_entries(entries: &[Entry], index: &HashMap<String, usize>) -> Result<Vec<usize>> {
    let presentation = index
        .get(PRESENTATION_PART)
        .map(|idx| &entries[*idx])
        .ok_or_else(|| anyhow!("missing {}", PRESENTATION_PART))?;

    let ordered = match index.get(PRESENTATION_RELS) {
        Some(rels) => {
            let ids = slide_relationship_ids(&presentation.data)?;
            let targets = relationship_targets(&entries[*rels].data)?;
            ids.iter()
                .filter_map(|id| targets.get(id))
                .filter_map(|target| index.get(&resolve_target("ppt", target)).copied())
                .collect::<Vec<_>>()
        }
        None => Vec::new(),
    };
    if !ordered.is_empty() {
        return Ok(ordered);
    }

    let mut numbered = entries
        .iter()
        .enumerate()
        .filter_map(|(idx, entry)| slide_number(&entry.name).map(|number| (number, idx)))
        .collect::<Vec<_>>();
    numbered.sort();
    Ok(numbered.into_iter().map(|(_, idx)| idx).collect())
}

fn slide_number(name: &str) -> Option<u32> {
    name.strip_prefix(SLIDE_PREFIX)?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

fn slide_relationship_ids(xml: &[u8]) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    scan_elements(xml, |local, e| {
        if local == b"sldId" {
            for attr in e.attributes().flatten() {
                if attr.key.prefix().is_some() && attr.key.local_name().as_ref() == b"id" {
                    ids.push(attr.unescape_value()?.into_owned());
                }
            }
        }
        Ok(())
    })
    .with_context(|| format!("failed to read {}", PRESENTATION_PART))?;
    Ok(ids)
}

fn relationship_targets(xml: &[u8]) -> Result<HashMap<String, String>> {
    let mut targets = HashMap::new();
    scan_elements(xml, |local, e| {
        if local == b"Relationship" {
            let mut id = None;
            let mut target = None;
            for attr in e.attributes().flatten() {
                match attr.key.as_ref() {
                    b"Id" => id = Some(attr.unescape_value()?.into_owned()),
                    b"Target" => target = Some(attr.unescape_value()?.into_owned()),
                    _ => {}
                }
            }
            if let (Some(id), Some(target)) = (id, target) {
                targets.insert(id, target);
            }
        }
        Ok(())
    })
    .with_context(|| format!("failed to read {}", PRESENTATION_RELS))?;
    Ok(targets)
}

fn scan_elements<F>(xml: &[u8], mut visit: F) -> Result<()>
where
    F: FnMut(&[u8], &quick_xml::events::BytesStart<'_>) -> Result<()>,
{
    let mut reader = Reader::from_reader(Cursor::new(xml));
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                visit(e.local_name().as_ref(), &e)?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(anyhow!("failed to parse xml: {}", err)),
        }
        buf.clear();
    }
    Ok(())
}

/// Resolves a relationship target against the directory of its source part.
fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments = base_dir
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in files {
            writer
                .start_file(*name, FileOptions::default())
                .expect("start file");
            writer.write_all(content.as_bytes()).expect("write file");
        }
        writer.finish().expect("finish").into_inner()
    }

    fn slide(text: &str) -> String {
        format!(
            r#"<p:sld xmlns:a="a" xmlns:p="p"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#,
            text
        )
    }

    const PRESENTATION: &str = r#"<p:presentation xmlns:p="p" xmlns:r="r"><p:sldIdLst><p:sldId id="256" r:id="rId7"/><p:sldId id="257" r:id="rId2"/></p:sldIdLst></p:presentation>"#;
    const RELS: &str = r#"<Relationships xmlns="rels"><Relationship Id="rId2" Type="slide" Target="slides/slide1.xml"/><Relationship Id="rId7" Type="slide" Target="/ppt/slides/slide2.xml"/></Relationships>"#;

    #[test]
    fn slides_follow_presentation_order() {
        let bytes = package(&[
            ("ppt/slides/slide1.xml", slide("Listed second").as_str()),
            ("ppt/slides/slide2.xml", slide("Listed first").as_str()),
            (PRESENTATION_PART, PRESENTATION),
            (PRESENTATION_RELS, RELS),
        ]);
        let document = OfficeDocument::from_bytes(&bytes, OfficeKind::Pptx, None).unwrap();
        assert_eq!(
            document.part_names(),
            vec!["ppt/slides/slide2.xml", "ppt/slides/slide1.xml"]
        );
        let extraction = document.extract();
        assert_eq!(extraction.units, vec!["Listed first", "Listed second"]);
    }

    #[test]
    fn slide_number_order_without_relationships() {
        let bytes = package(&[
            ("ppt/slides/slide10.xml", slide("Tenth slide").as_str()),
            ("ppt/slides/slide2.xml", slide("Second slide").as_str()),
            (PRESENTATION_PART, "<p:presentation xmlns:p=\"p\"/>"),
        ]);
        let document = OfficeDocument::from_bytes(&bytes, OfficeKind::Pptx, Some(1)).unwrap();
        assert_eq!(document.part_names(), vec!["ppt/slides/slide2.xml"]);
    }

    #[test]
    fn untouched_entries_are_copied_verbatim() {
        let bytes = package(&[
            (DOCUMENT_PART, r#"<w:document><w:body><w:p><w:r><w:t>Hello there</w:t></w:r></w:p></w:body></w:document>"#),
            ("word/media/logo.bin", "\u{1}\u{2}binary"),
        ]);
        let mut document = OfficeDocument::from_bytes(&bytes, OfficeKind::Docx, None).unwrap();
        assert_eq!(document.kind(), OfficeKind::Docx);
        let handle = document.extract().handles[0];
        assert_eq!(document.paragraph_text(handle).as_deref(), Some("Hello there"));
        document.replace_text(handle, "Hallo").unwrap();
        assert_eq!(document.paragraph_text(handle).as_deref(), Some("Hallo"));
        assert_eq!(
            document.paragraph_text(ParagraphHandle { part: 0, paragraph: 5 }),
            None
        );

        let output = document.to_bytes().unwrap();
        let mut archive = ZipArchive::new(Cursor::new(output)).unwrap();
        let mut media = String::new();
        archive
            .by_name("word/media/logo.bin")
            .unwrap()
            .read_to_string(&mut media)
            .unwrap();
        assert_eq!(media, "\u{1}\u{2}binary");
        let mut main = String::new();
        archive
            .by_name(DOCUMENT_PART)
            .unwrap()
            .read_to_string(&mut main)
            .unwrap();
        assert!(main.contains("<w:t>Hallo</w:t>"));
    }

    #[test]
    fn missing_main_part_is_rejected() {
        let bytes = package(&[("hello.txt", "hi")]);
        assert!(OfficeDocument::from_bytes(&bytes, OfficeKind::Docx, None).is_err());
        assert!(OfficeDocument::from_bytes(&bytes, OfficeKind::Pptx, None).is_err());
        assert!(OfficeDocument::from_bytes(b"not a zip", OfficeKind::Pptx, None).is_err());
    }

    #[test]
    fn relationship_targets_resolve_relative_paths() {
        assert_eq!(resolve_target("ppt", "slides/slide1.xml"), "ppt/slides/slide1.xml");
        assert_eq!(resolve_target("ppt", "../ppt/slides/slide3.xml"), "ppt/slides/slide3.xml");
        assert_eq!(resolve_target("ppt", "/ppt/slides/slide4.xml"), "ppt/slides/slide4.xml");
    }
}
