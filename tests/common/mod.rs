#![allow(dead_code)]

use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use doc_translator::providers::{Provider, ProviderFuture, ProviderResponse};
use doc_translator::{Pipeline, PipelineOptions, SplitStrategy, Translator};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

pub const SEPARATOR: &str = "<--!brk!-->";

type Reply = dyn Fn(usize, &str) -> Result<String, String> + Send + Sync;

/// Answers from a closure and records every user message it receives.
#[derive(Clone)]
pub struct FakeProvider {
    reply: Arc<Reply>,
    sent: Arc<Mutex<Vec<String>>>,
    user_input: Option<String>,
}

impl FakeProvider {
    pub fn new<F>(reply: F) -> Self
    where
        F: Fn(usize, &str) -> Result<String, String> + Send + Sync + 'static,
    {
        Self {
            reply: Arc::new(reply),
            sent: Arc::new(Mutex::new(Vec::new())),
            user_input: None,
        }
    }

    /// Prefixes every segment line with `KO:`.
    pub fn prefixing() -> Self {
        Self::new(|_, input| {
            Ok(input
                .lines()
                .map(|line| {
                    if line.trim().is_empty() || line.trim() == SEPARATOR {
                        line.to_string()
                    } else {
                        format!("KO:{}", line)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"))
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl Provider for FakeProvider {
    fn append_system_input(self, _input: String) -> Self {
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.user_input = Some(input);
        self
    }

    fn complete(self) -> ProviderFuture {
        let input = self.user_input.unwrap_or_default();
        let call = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(input.clone());
            sent.len() - 1
        };
        let reply = (self.reply)(call, &input);
        Box::pin(async move {
            Ok(ProviderResponse {
                content: reply.map_err(|message| anyhow!(message))?,
                model: Some("fake".to_string()),
                usage: None,
            })
        })
    }
}

pub fn pipeline(provider: FakeProvider, options: PipelineOptions) -> Pipeline<FakeProvider> {
    Pipeline::new(
        Translator::new(provider, SplitStrategy::default(), Duration::ZERO),
        options,
    )
}

const DRAWINGML_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const PRESENTATIONML_NS: &str = "http://schemas.openxmlformats.org/presentationml/2006/main";
const RELATIONSHIPS_NS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// A slide whose shape tree holds `shapes` verbatim.
pub fn slide(shapes: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:sld xmlns:a="{}" xmlns:p="{}" xmlns:r="{}"><p:cSld><p:spTree>{}</p:spTree></p:cSld></p:sld>"#,
        DRAWINGML_NS, PRESENTATIONML_NS, RELATIONSHIPS_NS, shapes
    )
}

/// A text box with one `a:p` per entry; entries are raw paragraph content.
pub fn text_box(paragraphs: &[&str]) -> String {
    let body = paragraphs
        .iter()
        .map(|paragraph| format!("<a:p>{}</a:p>", paragraph))
        .collect::<String>();
    format!(
        "<p:sp><p:nvSpPr><p:cNvPr id=\"2\" name=\"Text\"/></p:nvSpPr><p:txBody><a:bodyPr/>{}</p:txBody></p:sp>",
        body
    )
}

pub fn run(text: &str) -> String {
    format!("<a:r><a:rPr lang=\"en-US\"/><a:t>{}</a:t></a:r>", text)
}

/// A table with one row per entry and one cell per string in the row.
pub fn table(rows: &[&[&str]]) -> String {
    let rows = rows
        .iter()
        .map(|cells| {
            let cells = cells
                .iter()
                .map(|cell| {
                    format!(
                        "<a:tc><a:txBody><a:bodyPr/><a:p>{}</a:p></a:txBody></a:tc>",
                        run(cell)
                    )
                })
                .collect::<String>();
            format!("<a:tr h=\"370840\">{}</a:tr>", cells)
        })
        .collect::<String>();
    format!(
        "<p:graphicFrame><a:graphic><a:graphicData><a:tbl>{}</a:tbl></a:graphicData></a:graphic></p:graphicFrame>",
        rows
    )
}

/// A presentation package with `slides` in order.
pub fn pptx(slides: &[String]) -> Vec<u8> {
    let ids = (0..slides.len())
        .map(|idx| format!(r#"<p:sldId id="{}" r:id="rId{}"/>"#, 256 + idx, idx + 2))
        .collect::<String>();
    let presentation = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:presentation xmlns:a="{}" xmlns:p="{}" xmlns:r="{}"><p:sldIdLst>{}</p:sldIdLst></p:presentation>"#,
        DRAWINGML_NS, PRESENTATIONML_NS, RELATIONSHIPS_NS, ids
    );
    let relationships = (0..slides.len())
        .map(|idx| {
            format!(
                r#"<Relationship Id="rId{}" Type="{}/slide" Target="slides/slide{}.xml"/>"#,
                idx + 2,
                RELATIONSHIPS_NS,
                idx + 1
            )
        })
        .collect::<String>();
    let rels = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{}</Relationships>"#,
        relationships
    );

    let mut files = vec![
        ("ppt/presentation.xml".to_string(), presentation),
        ("ppt/_rels/presentation.xml.rels".to_string(), rels),
    ];
    for (idx, slide) in slides.iter().enumerate() {
        files.push((format!("ppt/slides/slide{}.xml", idx + 1), slide.clone()));
    }
    package(&files)
}

/// A document package whose body holds `body` verbatim.
pub fn docx(body: &str) -> Vec<u8> {
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:m="http://schemas.openxmlformats.org/officeDocument/2006/math"><w:body>{}</w:body></w:document>"#,
        body
    );
    package(&[("word/document.xml".to_string(), document)])
}

fn package(files: &[(String, String)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in files {
        writer
            .start_file(name.clone(), FileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn read_part(path: &Path, name: &str) -> String {
    let bytes = std::fs::read(path).unwrap();
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut content = String::new();
    archive
        .by_name(name)
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    content
}
