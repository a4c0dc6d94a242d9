//! Exclusive canonicalization.
//!
//! Produces the deterministic byte form that digests and signatures are
//! computed over. The transform covers the documents this system itself
//! renders (standalone, no DTD, no default-attribute magic):
//!
//! - XML declaration, comments, and processing instructions are dropped;
//! - whitespace-only text between elements is dropped;
//! - empty-element tags are expanded to start/end pairs;
//! - namespace declarations precede other attributes, each group sorted
//!   lexicographically;
//! - text and attribute values are re-escaped canonically;
//! - CDATA sections are folded into escaped text.
//!
//! Canonicalizing already-canonical input is a no-op.

use quick_xml::{Reader, events::Event};

use crate::{Error, Result};

/// Canonicalize a document (or a standalone element such as `SignedInfo`).
pub fn canonicalize(xml: &str) -> Result<String> {
  let mut reader = Reader::from_str(xml);
  let mut out = String::with_capacity(xml.len());

  loop {
    match reader.read_event() {
      Ok(Event::Start(ref e)) => {
        write_open_tag(&mut out, e)?;
      }
      Ok(Event::Empty(ref e)) => {
        // Expanded form is required for byte-stable digests.
        write_open_tag(&mut out, e)?;
        out.push_str("</");
        out.push_str(std::str::from_utf8(e.name().as_ref()).map_err(bad_utf8)?);
        out.push('>');
      }
      Ok(Event::End(ref e)) => {
        out.push_str("</");
        out.push_str(std::str::from_utf8(e.name().as_ref()).map_err(bad_utf8)?);
        out.push('>');
      }
      Ok(Event::Text(ref t)) => {
        let text = t.xml_content().map_err(|e| Error::Xml(e.to_string()))?;
        if !text.trim().is_empty() {
          escape_text(&mut out, &text);
        }
      }
      Ok(Event::CData(ref c)) => {
        let raw = String::from_utf8(c.clone().into_inner().into_owned())
          .map_err(|_| Error::Malformed("CDATA is not UTF-8".into()))?;
        escape_text(&mut out, &raw);
      }
      // Declaration, comments, PIs, and DOCTYPE do not survive C14N.
      Ok(Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_)) => {}
      Ok(Event::GeneralRef(_)) => {
        return Err(Error::Malformed("unresolved general entity".into()));
      }
      Ok(Event::Eof) => break,
      Err(e) => return Err(Error::Xml(e.to_string())),
    }
  }

  Ok(out)
}

fn bad_utf8(_: std::str::Utf8Error) -> Error {
  Error::Malformed("tag name is not UTF-8".into())
}

fn write_open_tag(
  out: &mut String,
  e: &quick_xml::events::BytesStart<'_>,
) -> Result<()> {
  let name = std::str::from_utf8(e.name().as_ref()).map_err(bad_utf8)?.to_owned();

  // Namespace declarations first, then ordinary attributes, each group in
  // lexicographic order of the full attribute name.
  let mut ns_decls: Vec<(String, String)> = Vec::new();
  let mut attrs: Vec<(String, String)> = Vec::new();
  for attr in e.attributes() {
    let attr = attr.map_err(|e| Error::Xml(e.to_string()))?;
    let key = std::str::from_utf8(attr.key.as_ref())
      .map_err(|_| Error::Malformed("attribute name is not UTF-8".into()))?
      .to_owned();
    let value = attr
      .unescape_value()
      .map_err(|e| Error::Xml(e.to_string()))?
      .into_owned();
    if key == "xmlns" || key.starts_with("xmlns:") {
      ns_decls.push((key, value));
    } else {
      attrs.push((key, value));
    }
  }
  ns_decls.sort();
  attrs.sort();

  out.push('<');
  out.push_str(&name);
  for (key, value) in ns_decls.iter().chain(attrs.iter()) {
    out.push(' ');
    out.push_str(key);
    out.push_str("=\"");
    escape_attr(out, value);
    out.push('"');
  }
  out.push('>');
  Ok(())
}

/// Canonical text escaping: `&`, `<`, `>`, and carriage return.
fn escape_text(out: &mut String, text: &str) {
  for ch in text.chars() {
    match ch {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '\r' => out.push_str("&#xD;"),
      other => out.push(other),
    }
  }
}

/// Canonical attribute escaping: `&`, `<`, `"`, tab, CR, LF.
fn escape_attr(out: &mut String, value: &str) {
  for ch in value.chars() {
    match ch {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '"' => out.push_str("&quot;"),
      '\t' => out.push_str("&#x9;"),
      '\n' => out.push_str("&#xA;"),
      '\r' => out.push_str("&#xD;"),
      other => out.push(other),
    }
  }
}
