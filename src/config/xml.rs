//! A small DOM over quick-xml: configuration files are read into a node
//! tree and written back from one, keeping the schema code free of
//! streaming-parser state.

use crate::error::{Error, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

/// One XML element: name, attributes in document order, children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn set_attr(&mut self, name: &str, value: impl ToString) -> &mut Self {
        self.attrs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn add_child(&mut self, child: XmlNode) -> &mut Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn req_attr(&self, name: &str) -> Result<&str> {
        self.attr(name).ok_or_else(|| {
            Error::Config(format!("element {} is missing attribute {name}", self.name))
        })
    }

    pub fn attr_f64(&self, name: &str) -> Result<f64> {
        let raw = self.req_attr(name)?;
        raw.parse().map_err(|_| {
            Error::Config(format!(
                "element {}: attribute {name}={raw} is not a number",
                self.name
            ))
        })
    }

    pub fn attr_u32(&self, name: &str) -> Result<u32> {
        let raw = self.req_attr(name)?;
        raw.parse().map_err(|_| {
            Error::Config(format!(
                "element {}: attribute {name}={raw} is not an integer",
                self.name
            ))
        })
    }

    pub fn opt_attr_f64(&self, name: &str) -> Result<Option<f64>> {
        match self.attr(name) {
            None => Ok(None),
            Some(_) => self.attr_f64(name).map(Some),
        }
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn req_child(&self, name: &str) -> Result<&XmlNode> {
        self.child(name).ok_or_else(|| {
            Error::Config(format!("element {} is missing child {name}", self.name))
        })
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Read a 3-vector from `x`/`y`/`z` attributes.
    pub fn vec3(&self) -> Result<[f64; 3]> {
        Ok([
            self.attr_f64("x")?,
            self.attr_f64("y")?,
            self.attr_f64("z")?,
        ])
    }

    /// Parse a document and return its root element.
    pub fn parse(data: &str) -> Result<XmlNode> {
        let mut reader = Reader::from_str(data);
        reader.config_mut().trim_text(true);
        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader
                .read_event()
                .map_err(|e| Error::Config(format!("XML parse error: {e}")))?
            {
                Event::Start(e) => {
                    stack.push(node_from_start(&e)?);
                }
                Event::Empty(e) => {
                    let node = node_from_start(&e)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| Error::Config("unbalanced XML end tag".into()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
                Event::Eof => break,
                // Text, comments and declarations carry no schema content.
                _ => {}
            }
        }
        if !stack.is_empty() {
            return Err(Error::Config("unterminated XML element".into()));
        }
        root.ok_or_else(|| Error::Config("empty XML document".into()))
    }

    /// Serialise this node as an indented document with a prolog.
    pub fn to_document(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| Error::Config(format!("XML write error: {e}")))?;
        write_node(&mut writer, self)?;
        let bytes = writer.into_inner();
        String::from_utf8(bytes).map_err(|e| Error::Config(format!("XML encoding error: {e}")))
    }
}

fn node_from_start(e: &BytesStart<'_>) -> Result<XmlNode> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut node = XmlNode::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(|e| Error::Config(format!("XML attribute error: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::Config(format!("XML attribute error: {e}")))?
            .into_owned();
        node.attrs.push((key, value));
    }
    Ok(node)
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &XmlNode) -> Result<()> {
    let mut start = BytesStart::new(node.name.as_str());
    for (k, v) in &node.attrs {
        start.push_attribute((k.as_str(), v.as_str()));
    }
    if node.children.is_empty() {
        writer
            .write_event(Event::Empty(start))
            .map_err(|e| Error::Config(format!("XML write error: {e}")))?;
    } else {
        writer
            .write_event(Event::Start(start))
            .map_err(|e| Error::Config(format!("XML write error: {e}")))?;
        for child in &node.children {
            write_node(writer, child)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(node.name.as_str())))
            .map_err(|e| Error::Config(format!("XML write error: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_query() -> Result<()> {
        let doc = r#"<Root version="1.5.0">
            <Child Name="a" Value="2.5"/>
            <Child Name="b" Value="3"/>
            <Vec x="1" y="-2" z="0.5"/>
        </Root>"#;
        let root = XmlNode::parse(doc)?;
        assert_eq!(root.name, "Root");
        assert_eq!(root.req_attr("version")?, "1.5.0");
        assert_eq!(root.children_named("Child").count(), 2);
        assert_eq!(root.req_child("Vec")?.vec3()?, [1.0, -2.0, 0.5]);
        Ok(())
    }

    #[test]
    fn missing_attr_is_config_error() {
        let root = XmlNode::parse("<Root/>").unwrap();
        assert!(root.req_attr("version").is_err());
        assert!(root.req_child("Child").is_err());
    }

    #[test]
    fn document_round_trip() -> Result<()> {
        let mut root = XmlNode::new("Root");
        root.set_attr("version", "1.5.0");
        let mut child = XmlNode::new("Pt");
        child.set_attr("ID", 3u32);
        child.set_attr("x", 0.1_f64);
        root.add_child(child);
        let doc = root.to_document()?;
        let reparsed = XmlNode::parse(&doc)?;
        assert_eq!(reparsed, root);
        Ok(())
    }

    #[test]
    fn float_attrs_round_trip_exactly() -> Result<()> {
        let value = 0.1234567890123456789_f64;
        let mut root = XmlNode::new("Root");
        root.set_attr("v", value);
        let reparsed = XmlNode::parse(&root.to_document()?)?;
        assert_eq!(reparsed.attr_f64("v")?, value);
        Ok(())
    }
}
