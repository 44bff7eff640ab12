use std::fs;
use std::io::Cursor;
use std::path::Path;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::Result;

const DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n";

/// Small indenting XML builder shared by the manifest, audit log and
/// table exports.
pub struct XmlDoc {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl Default for XmlDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlDoc {
    pub fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2),
        }
    }

    pub fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut element = BytesStart::new(name);
        for attr in attrs {
            element.push_attribute(*attr);
        }
        self.writer.write_event(Event::Start(element))?;
        Ok(())
    }

    pub fn end(&mut self, name: &str) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    pub fn text_element(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<()> {
        self.start(name, attrs)?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    pub fn into_string(self) -> String {
        let body = self.writer.into_inner().into_inner();
        let mut out = String::from(DECLARATION);
        out.push_str(&String::from_utf8_lossy(&body));
        out.push('\n');
        out
    }

    pub fn save(self, path: &Path) -> Result<()> {
        fs::write(path, self.into_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_document() {
        let mut doc = XmlDoc::new();
        doc.start("Project", &[]).unwrap();
        doc.text_element("Meta", &[("name", "Site")], "CBW05583-028079")
            .unwrap();
        doc.text_element("Marker", &[("id", "a&b")], "x").unwrap();
        doc.end("Project").unwrap();
        let xml = doc.into_string();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(xml.contains(r#"<Meta name="Site">CBW05583-028079</Meta>"#));
        assert!(xml.contains(r#"<Marker id="a&amp;b">x</Marker>"#));
    }

    #[test]
    fn test_text_is_escaped() {
        let mut doc = XmlDoc::new();
        doc.text_element("Message", &[], "depth < 0 & > 5").unwrap();
        let xml = doc.into_string();
        assert!(xml.contains("depth &lt; 0 &amp; &gt; 5"));
    }
}
