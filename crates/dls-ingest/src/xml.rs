//! Streaming XML helpers
//!
//! Documents are read with a forward-only `quick_xml::Reader`. When a parser
//! reaches an element it cares about (a `Code`, a `Series`, ...) it calls
//! [`read_subtree`] to materialise just that element as a small [`Element`]
//! tree, uses it and drops it, so memory stays bounded by the largest
//! subtree rather than the document.

use flate2::read::GzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor};
use std::path::Path;

use crate::error::XmlError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Boxed document source handed to the parsers
pub type DocumentSource = Box<dyn BufRead + Send>;

/// Wrap a reader, transparently inflating gzip content
pub fn decompressing<R: BufRead + Send + 'static>(mut inner: R) -> io::Result<DocumentSource> {
    let gzipped = inner.fill_buf()?.starts_with(&GZIP_MAGIC);
    if gzipped {
        Ok(Box::new(BufReader::new(GzDecoder::new(inner))))
    } else {
        Ok(Box::new(inner))
    }
}

pub fn open_document(path: impl AsRef<Path>) -> io::Result<DocumentSource> {
    decompressing(BufReader::new(File::open(path)?))
}

pub fn document_from_bytes(bytes: impl Into<Vec<u8>>) -> io::Result<DocumentSource> {
    decompressing(Cursor::new(bytes.into()))
}

pub fn new_reader<R: BufRead>(source: R) -> Reader<R> {
    let mut reader = Reader::from_reader(source);
    reader.config_mut().trim_text(true);
    reader
}

/// Local part of a possibly prefixed name
pub fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

/// A materialised element
///
/// Element names are local names; attribute names are kept qualified
/// (`xml:lang`, `xsi:type`) since unprefixed SDMX attributes never clash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn from_start(start: &BytesStart<'_>) -> Result<Self, XmlError> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name: local_name(start),
            attributes,
            children: Vec::new(),
            text: String::new(),
        })
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follow a path of child names
    pub fn path(&self, names: &[&str]) -> Option<&Element> {
        names
            .iter()
            .try_fold(self, |element, name| element.child(name))
    }

    pub fn text(&self) -> &str {
        self.text.trim()
    }

    /// Text of the `name` child in English, else the first one
    pub fn localized(&self, name: &str) -> Option<String> {
        let mut first = None;
        for child in self.children_named(name) {
            if child.attr("xml:lang") == Some("en") {
                return Some(child.text().to_string());
            }
            if first.is_none() {
                first = Some(child);
            }
        }
        first.map(|c| c.text().to_string())
    }
}

/// Consume the rest of the element opened by `root` and return it filled in
pub fn read_subtree<R: BufRead>(reader: &mut Reader<R>, root: Element) -> Result<Element, XmlError> {
    let mut stack = vec![root];
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => stack.push(Element::from_start(&e)?),
            Event::Empty(e) => {
                let child = Element::from_start(&e)?;
                if let Some(top) = stack.last_mut() {
                    top.children.push(child);
                }
            },
            Event::Text(t) => {
                let text = t.unescape()?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            },
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c);
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            },
            Event::End(_) => {
                let Some(done) = stack.pop() else {
                    return Err(XmlError::UnexpectedEof(String::new()));
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(done),
                    None => return Ok(done),
                }
            },
            Event::Eof => {
                let name = stack.first().map(|e| e.name.clone()).unwrap_or_default();
                return Err(XmlError::UnexpectedEof(name));
            },
            _ => {},
        }
    }
}

/// Skip everything up to and including the end of the current element
pub fn skip_subtree<R: BufRead>(reader: &mut Reader<R>) -> Result<(), XmlError> {
    let mut depth = 1usize;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            },
            Event::Eof => return Err(XmlError::UnexpectedEof(String::new())),
            _ => {},
        }
    }
}

/// Read up to the document element and return it without children
pub fn read_root<R: BufRead>(reader: &mut Reader<R>) -> Result<Element, XmlError> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => return Element::from_start(&e),
            Event::Eof => return Err(XmlError::Empty),
            _ => {},
        }
    }
}
