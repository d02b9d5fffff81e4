//! XML node rewriting
//!
//! Nodes are located with XPath 1.0 expressions. A matched element or text
//! node has its text replaced; a matched attribute has its value replaced.

use serde_json::Value;
use sxd_document::dom::Document;
use sxd_xpath::nodeset::Node;
use sxd_xpath::Factory;

use super::document::not_found;
use crate::common::{Error, Result};

/// Check that `locator` compiles as XPath
pub(super) fn check_locator(locator: &str) -> Result<()> {
    Factory::new().build(locator).map(|_| ()).map_err(|e| {
        Error::Configuration(format!(
            "document rewrite: invalid XPath '{}': {}",
            locator, e
        ))
    })
}

/// Apply every rule to the XML document in `raw` and serialize the result
pub(super) fn rewrite(raw: &[u8], rules: &[(&str, Value)]) -> Result<Vec<u8>> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| Error::Load("XML document is not valid UTF-8".to_string()))?;
    let package = sxd_document::parser::parse(text)
        .map_err(|e| Error::Load(format!("Invalid XML document: {:?}", e)))?;
    let doc = package.as_document();

    for (locator, replacement) in rules {
        let replaced = replace_matches(&doc, locator, &text_of(replacement))?;
        if replaced == 0 {
            return Err(not_found(locator));
        }
        tracing::debug!("Rewrote {} node(s) at {}", replaced, locator);
    }

    let mut out = Vec::new();
    sxd_document::writer::format_document(&doc, &mut out)?;
    Ok(out)
}

fn replace_matches<'d>(doc: &'d Document<'d>, locator: &str, text: &str) -> Result<usize> {
    let value = sxd_xpath::evaluate_xpath(doc, locator)
        .map_err(|e| Error::Load(format!("XPath '{}' failed: {}", locator, e)))?;
    let sxd_xpath::Value::Nodeset(nodes) = value else {
        return Err(Error::Load(format!(
            "XPath '{}' selects a value, not nodes",
            locator
        )));
    };

    let mut replaced = 0;
    for node in nodes.document_order() {
        match node {
            Node::Element(element) => {
                element.set_text(text);
            }
            Node::Attribute(attribute) => match attribute.parent() {
                Some(element) => {
                    element.set_attribute_value(attribute.name(), text);
                }
                None => continue,
            },
            Node::Text(node) => node.set_text(text),
            _ => continue,
        }
        replaced += 1;
    }
    Ok(replaced)
}

/// Strings are inserted as-is, anything else in its JSON form
fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
