use anyhow::{Context, Result, anyhow};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

/// Element names of one OOXML text vocabulary.
#[derive(Debug)]
pub(crate) struct Dialect {
    pub(crate) paragraph: &'static str,
    pub(crate) run: &'static str,
    pub(crate) text: &'static str,
    /// Must stay the last child of a paragraph; created runs go before it.
    pub(crate) paragraph_end_props: Option<&'static str>,
    pub(crate) math: &'static [&'static str],
    pub(crate) preserve_space: bool,
}

pub(crate) const DRAWINGML: Dialect = Dialect {
    paragraph: "a:p",
    run: "a:r",
    text: "a:t",
    paragraph_end_props: Some("a:endParaRPr"),
    math: &["a14:m", "m:oMathPara", "m:oMath"],
    preserve_space: false,
};

pub(crate) const WORDPROCESSINGML: Dialect = Dialect {
    paragraph: "w:p",
    run: "w:r",
    text: "w:t",
    paragraph_end_props: None,
    math: &["m:oMathPara", "m:oMath"],
    preserve_space: true,
};

enum Token {
    Event(Event<'static>),
    /// Content of one run text element.
    Slot(usize),
    /// Where a run is created when the paragraph had none.
    Anchor(usize),
}

#[derive(Debug, Default)]
struct Paragraph {
    slots: Vec<usize>,
    created: Option<String>,
}

/// One XML part split into pass-through events and editable run texts,
/// grouped by paragraph in document order.
pub(crate) struct XmlPart {
    dialect: &'static Dialect,
    tokens: Vec<Token>,
    slots: Vec<String>,
    paragraphs: Vec<Paragraph>,
}

impl XmlPart {
    pub(crate) fn parse(xml: &[u8], dialect: &'static Dialect) -> Result<Self> {
        let mut reader = Reader::from_reader(Cursor::new(xml));
        reader.trim_text(false);
        let mut buf = Vec::new();

        let mut part = XmlPart {
            dialect,
            tokens: Vec::new(),
            slots: Vec::new(),
            paragraphs: Vec::new(),
        };
        let mut open_paragraphs: Vec<(usize, bool)> = Vec::new();
        let mut run_depth = 0usize;
        let mut math_depth = 0usize;
        let mut open_slot: Option<usize> = None;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = e.name();
                    let name = name.as_ref();
                    if dialect.math.iter().any(|math| math.as_bytes() == name) {
                        math_depth += 1;
                    }
                    if name == dialect.paragraph.as_bytes() {
                        open_paragraphs.push((part.paragraphs.len(), false));
                        part.paragraphs.push(Paragraph::default());
                    } else if name == dialect.run.as_bytes() {
                        run_depth += 1;
                    } else if part.is_end_props(name) {
                        part.anchor_before_end_props(&mut open_paragraphs, run_depth);
                    }
                    let is_slot = name == dialect.text.as_bytes()
                        && run_depth > 0
                        && math_depth == 0;
                    part.tokens.push(Token::Event(Event::Start(e.into_owned())));
                    if is_slot && let Some(&(paragraph, _)) = open_paragraphs.last() {
                        open_slot = Some(part.open_slot(paragraph));
                    }
                }
                Ok(Event::Empty(e)) => {
                    let name = e.name();
                    let name = name.as_ref();
                    if part.is_end_props(name) {
                        part.anchor_before_end_props(&mut open_paragraphs, run_depth);
                    }
                    let is_slot = name == dialect.text.as_bytes()
                        && run_depth > 0
                        && math_depth == 0;
                    match open_paragraphs.last() {
                        Some(&(paragraph, _)) if is_slot => {
                            // An empty run text is still a place to write into.
                            let end = BytesEnd::new(dialect.text);
                            part.tokens.push(Token::Event(Event::Start(e.into_owned())));
                            part.open_slot(paragraph);
                            part.tokens.push(Token::Event(Event::End(end)));
                        }
                        _ => part.tokens.push(Token::Event(Event::Empty(e.into_owned()))),
                    }
                }
                Ok(Event::End(e)) => {
                    let name = e.name();
                    let name = name.as_ref();
                    if name == dialect.text.as_bytes() {
                        open_slot = None;
                    }
                    if dialect.math.iter().any(|math| math.as_bytes() == name) {
                        math_depth = math_depth.saturating_sub(1);
                    }
                    if name == dialect.paragraph.as_bytes() {
                        if let Some((paragraph, anchored)) = open_paragraphs.pop()
                            && !anchored
                        {
                            part.tokens.push(Token::Anchor(paragraph));
                        }
                    } else if name == dialect.run.as_bytes() {
                        run_depth = run_depth.saturating_sub(1);
                    }
                    part.tokens.push(Token::Event(Event::End(e.into_owned())));
                }
                Ok(Event::Text(e)) => match open_slot {
                    Some(slot) => {
                        let text = e.unescape().with_context(|| "failed to decode run text")?;
                        part.slots[slot].push_str(&text);
                    }
                    None => part.tokens.push(Token::Event(Event::Text(e.into_owned()))),
                },
                Ok(Event::CData(e)) => match open_slot {
                    Some(slot) => {
                        let raw = e.into_inner();
                        part.slots[slot].push_str(&String::from_utf8_lossy(raw.as_ref()));
                    }
                    None => part.tokens.push(Token::Event(Event::CData(e.into_owned()))),
                },
                Ok(Event::Eof) => break,
                Ok(event) => part.tokens.push(Token::Event(event.into_owned())),
                Err(err) => return Err(anyhow!("failed to parse xml: {}", err)),
            }
            buf.clear();
        }
        Ok(part)
    }

    fn is_end_props(&self, name: &[u8]) -> bool {
        self.dialect
            .paragraph_end_props
            .is_some_and(|props| props.as_bytes() == name)
    }

    fn anchor_before_end_props(&mut self, open: &mut [(usize, bool)], run_depth: usize) {
        if run_depth > 0 {
            return;
        }
        if let Some((paragraph, anchored)) = open.last_mut()
            && !*anchored
        {
            self.tokens.push(Token::Anchor(*paragraph));
            *anchored = true;
        }
    }

    fn open_slot(&mut self, paragraph: usize) -> usize {
        let slot = self.slots.len();
        self.slots.push(String::new());
        self.paragraphs[paragraph].slots.push(slot);
        self.tokens.push(Token::Slot(slot));
        slot
    }

    pub(crate) fn paragraph_count(&self) -> usize {
        self.paragraphs.len()
    }

    /// Concatenated run text of a paragraph; math text is never included.
    pub(crate) fn paragraph_text(&self, paragraph: usize) -> String {
        let Some(paragraph) = self.paragraphs.get(paragraph) else {
            return String::new();
        };
        if let Some(created) = &paragraph.created {
            return created.clone();
        }
        paragraph
            .slots
            .iter()
            .map(|slot| self.slots[*slot].as_str())
            .collect()
    }

    /// Puts `text` into the first run and empties every other run of the
    /// paragraph, creating a run when there is none.
    pub(crate) fn replace_paragraph_text(&mut self, paragraph: usize, text: &str) -> Result<()> {
        let Self {
            paragraphs, slots, ..
        } = self;
        let paragraph = paragraphs
            .get_mut(paragraph)
            .ok_or_else(|| anyhow!("paragraph {} does not exist", paragraph))?;
        match paragraph.slots.split_first() {
            Some((first, rest)) => {
                slots[*first] = text.to_string();
                for slot in rest {
                    slots[*slot].clear();
                }
            }
            None => paragraph.created = Some(text.to_string()),
        }
        Ok(())
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Vec::new());
        for token in &self.tokens {
            match token {
                Token::Event(event) => writer.write_event(event.clone())?,
                Token::Slot(slot) => {
                    let text = &self.slots[*slot];
                    if !text.is_empty() {
                        writer.write_event(Event::Text(BytesText::new(text)))?;
                    }
                }
                Token::Anchor(paragraph) => {
                    if let Some(text) = &self.paragraphs[*paragraph].created {
                        self.write_created_run(&mut writer, text)?;
                    }
                }
            }
        }
        Ok(writer.into_inner())
    }

    fn write_created_run(&self, writer: &mut Writer<Vec<u8>>, text: &str) -> Result<()> {
        let mut text_start = BytesStart::new(self.dialect.text);
        if self.dialect.preserve_space {
            text_start.push_attribute(("xml:space", "preserve"));
        }
        writer.write_event(Event::Start(BytesStart::new(self.dialect.run)))?;
        writer.write_event(Event::Start(text_start))?;
        writer.write_event(Event::Text(BytesText::new(text)))?;
        writer.write_event(Event::End(BytesEnd::new(self.dialect.text)))?;
        writer.write_event(Event::End(BytesEnd::new(self.dialect.run)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLIDE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:sld xmlns:a="a" xmlns:p="p"><p:cSld><p:spTree><p:sp><p:txBody><a:bodyPr/><a:p><a:r><a:rPr lang="en-US" b="1"/><a:t>Hello </a:t></a:r><a:r><a:rPr lang="en-US"/><a:t>world &amp; friends</a:t></a:r><a:endParaRPr lang="en-US"/></a:p><a:p><a:endParaRPr lang="en-US"/></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#;

    fn render(part: &XmlPart) -> String {
        String::from_utf8(part.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn untouched_part_round_trips() {
        let part = XmlPart::parse(SLIDE.as_bytes(), &DRAWINGML).unwrap();
        assert_eq!(render(&part), SLIDE);
    }

    #[test]
    fn paragraph_text_joins_runs() {
        let part = XmlPart::parse(SLIDE.as_bytes(), &DRAWINGML).unwrap();
        assert_eq!(part.paragraph_count(), 2);
        assert_eq!(part.paragraph_text(0), "Hello world & friends");
        assert_eq!(part.paragraph_text(1), "");
    }

    #[test]
    fn replacement_fills_first_run_and_clears_the_rest() {
        let mut part = XmlPart::parse(SLIDE.as_bytes(), &DRAWINGML).unwrap();
        part.replace_paragraph_text(0, "안녕 <세상>").unwrap();
        let xml = render(&part);
        assert!(xml.contains(r#"<a:rPr lang="en-US" b="1"/><a:t>안녕 &lt;세상&gt;</a:t>"#));
        assert!(xml.contains(r#"<a:rPr lang="en-US"/><a:t></a:t>"#));
        assert!(!xml.contains("world"));

        let reparsed = XmlPart::parse(xml.as_bytes(), &DRAWINGML).unwrap();
        assert_eq!(reparsed.paragraph_text(0), "안녕 <세상>");
    }

    #[test]
    fn run_is_created_before_end_paragraph_properties() {
        let mut part = XmlPart::parse(SLIDE.as_bytes(), &DRAWINGML).unwrap();
        part.replace_paragraph_text(1, "Neu").unwrap();
        let xml = render(&part);
        assert!(xml.contains(r#"<a:p><a:r><a:t>Neu</a:t></a:r><a:endParaRPr lang="en-US"/></a:p>"#));
        assert_eq!(part.paragraph_text(1), "Neu");
    }

    #[test]
    fn empty_text_elements_are_slots() {
        let xml = r#"<a:p xmlns:a="a"><a:r><a:t/></a:r></a:p>"#;
        let mut part = XmlPart::parse(xml.as_bytes(), &DRAWINGML).unwrap();
        part.replace_paragraph_text(0, "filled").unwrap();
        assert_eq!(render(&part), r#"<a:p xmlns:a="a"><a:r><a:t>filled</a:t></a:r></a:p>"#);
    }

    #[test]
    fn math_text_is_neither_read_nor_written() {
        let xml = r#"<w:document><w:body><w:p><w:r><w:t>Area is </w:t></w:r><m:oMath><m:r><w:r><w:t>πr²</w:t></w:r><m:t>x</m:t></m:r></m:oMath><w:r><w:t> always</w:t></w:r></w:p></w:body></w:document>"#;
        let mut part = XmlPart::parse(xml.as_bytes(), &WORDPROCESSINGML).unwrap();
        assert_eq!(part.paragraph_text(0), "Area is  always");
        part.replace_paragraph_text(0, "Fläche ist immer").unwrap();
        let out = render(&part);
        assert!(out.contains("<w:t>πr²</w:t>"));
        assert!(out.contains("<m:t>x</m:t>"));
        assert!(out.contains("<w:t>Fläche ist immer</w:t>"));
        assert!(out.contains("<w:t></w:t></w:r></w:p>"));
    }

    #[test]
    fn nested_text_box_paragraphs_are_separate() {
        let xml = r#"<w:body><w:p><w:r><w:t>Outer</w:t><w:pict><w:txbxContent><w:p><w:r><w:t>Inner</w:t></w:r></w:p></w:txbxContent></w:pict></w:r><w:r><w:t> tail</w:t></w:r></w:p></w:body>"#;
        let part = XmlPart::parse(xml.as_bytes(), &WORDPROCESSINGML).unwrap();
        assert_eq!(part.paragraph_count(), 2);
        assert_eq!(part.paragraph_text(0), "Outer tail");
        assert_eq!(part.paragraph_text(1), "Inner");
    }

    #[test]
    fn created_word_runs_preserve_space() {
        let xml = r#"<w:body><w:p><w:pPr/></w:p></w:body>"#;
        let mut part = XmlPart::parse(xml.as_bytes(), &WORDPROCESSINGML).unwrap();
        part.replace_paragraph_text(0, "Hallo").unwrap();
        assert_eq!(
            render(&part),
            r#"<w:body><w:p><w:pPr/><w:r><w:t xml:space="preserve">Hallo</w:t></w:r></w:p></w:body>"#
        );
    }

    #[test]
    fn malformed_xml_is_an_error() {
        let err = XmlPart::parse(b"<a:p><a:r></a:p>", &DRAWINGML)
            .err()
            .expect("parse error");
        assert!(err.to_string().contains("failed to parse xml"));
    }
}
