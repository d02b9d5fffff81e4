//! Structured document loader with node rewriting
//!
//! Loads a JSON, YAML or XML document and rewrites selected nodes before
//! emitting it. JSON and YAML nodes are located with JSON Pointer syntax
//! (RFC 6901), where a `*` token matches every member of an object or every
//! element of an array. XML nodes are located with XPath. A rule whose
//! locator matches nothing fails the load: the payload is never emitted
//! silently unmodified.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{xml, ByteSource, ByteStream, DataLoader};
use crate::common::{Error, Result};
use crate::context::{Context, ContextValue};

/// Serialization format of a structured document
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Json,
    Yaml,
    Xml,
}

impl DocumentFormat {
    /// Guess the format from a file extension, defaulting to JSON
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::Yaml,
            Some("xml") => Self::Xml,
            _ => Self::Json,
        }
    }

    /// Parse `raw`, apply each `(locator, replacement)` in order and render
    /// the document back in the same format
    fn rewrite_all(&self, raw: &[u8], rules: &[(&str, Value)]) -> Result<Vec<u8>> {
        let mut doc: Value = match self {
            Self::Json => serde_json::from_slice(raw)
                .map_err(|e| Error::Load(format!("Invalid JSON document: {}", e)))?,
            Self::Yaml => serde_yaml::from_slice(raw)
                .map_err(|e| Error::Load(format!("Invalid YAML document: {}", e)))?,
            Self::Xml => return xml::rewrite(raw, rules),
        };

        for (locator, replacement) in rules {
            let replaced = rewrite(&mut doc, locator, replacement)?;
            if replaced == 0 {
                return Err(not_found(locator));
            }
            tracing::debug!("Rewrote {} node(s) at {}", replaced, locator);
        }

        match self {
            Self::Yaml => Ok(serde_yaml::to_string(&doc)?.into_bytes()),
            _ => Ok(serde_json::to_vec_pretty(&doc)?),
        }
    }
}

pub(super) fn not_found(locator: &str) -> Error {
    Error::Load(format!("node not found: {}", locator))
}

/// One node rewrite
#[derive(Deserialize, Debug, Clone)]
pub struct RewriteRule {
    /// JSON Pointer (or XPath for XML) to the node(s) to replace
    pub locator: String,
    /// Literal replacement
    pub value: Option<Value>,
    /// Context key whose current value replaces the node
    pub context_key: Option<String>,
}

impl RewriteRule {
    fn validate(&self, format: DocumentFormat) -> Result<()> {
        if self.locator.is_empty() {
            return Err(Error::missing_field("document rewrite", "locator"));
        }
        if format == DocumentFormat::Xml {
            xml::check_locator(&self.locator)?;
        } else if !self.locator.starts_with('/') {
            return Err(Error::Configuration(format!(
                "document rewrite: locator '{}' must start with '/'",
                self.locator
            )));
        }
        match (&self.value, &self.context_key) {
            (Some(_), None) => Ok(()),
            (None, Some(key)) if !key.is_empty() => Ok(()),
            (None, Some(_)) => Err(Error::missing_field("document rewrite", "context_key")),
            _ => Err(Error::Configuration(format!(
                "document rewrite '{}': exactly one of 'value' or 'context_key' must be set",
                self.locator
            ))),
        }
    }

    fn replacement(&self, ctx: &Context) -> Result<Value> {
        if let Some(value) = &self.value {
            return Ok(value.clone());
        }
        let key = self.context_key.as_deref().unwrap_or_default();
        match ctx.get(key)? {
            None => Err(Error::Load(format!("context key '{}' is not set", key))),
            Some(ContextValue::Text(s)) => Ok(Value::String(s)),
            Some(ContextValue::Integer(i)) => Ok(Value::from(i)),
            Some(ContextValue::Boolean(b)) => Ok(Value::Bool(b)),
            Some(ContextValue::Bytes(b)) => String::from_utf8(b).map(Value::String).map_err(|_| {
                Error::Load(format!("context key '{}' does not hold UTF-8 text", key))
            }),
            Some(other) => Err(Error::type_mismatch(key, "text", other.kind())),
        }
    }
}

/// Where the document comes from
#[derive(Debug, Clone)]
pub enum DocumentOrigin {
    File(PathBuf),
    Inline(String),
}

/// Loads a structured document and applies rewrite rules
pub struct DocumentLoader {
    origin: DocumentOrigin,
    format: DocumentFormat,
    rewrites: Vec<RewriteRule>,
    source: Arc<dyn ByteSource>,
}

impl DocumentLoader {
    pub fn new(
        origin: DocumentOrigin,
        format: Option<DocumentFormat>,
        rewrites: Vec<RewriteRule>,
        source: Arc<dyn ByteSource>,
    ) -> Self {
        let format = format.unwrap_or_else(|| match &origin {
            DocumentOrigin::File(path) => DocumentFormat::from_path(path),
            DocumentOrigin::Inline(_) => DocumentFormat::Json,
        });
        Self {
            origin,
            format,
            rewrites,
            source,
        }
    }
}

#[async_trait]
impl DataLoader for DocumentLoader {
    fn describe(&self) -> String {
        match &self.origin {
            DocumentOrigin::File(path) => format!("document {}", path.display()),
            DocumentOrigin::Inline(_) => "inline document".to_string(),
        }
    }

    fn validate(&self, _ctx: &Context) -> Result<()> {
        if let DocumentOrigin::File(path) = &self.origin {
            if path.as_os_str().is_empty() {
                return Err(Error::missing_field("document", "path"));
            }
        }
        self.rewrites
            .iter()
            .try_for_each(|rule| rule.validate(self.format))
    }

    async fn load(&self, ctx: &Context) -> Result<ByteStream> {
        let raw = match &self.origin {
            DocumentOrigin::File(path) => self.source.read(path).await?,
            DocumentOrigin::Inline(text) => text.as_bytes().to_vec(),
        };
        let rules = self
            .rewrites
            .iter()
            .map(|rule| Ok((rule.locator.as_str(), rule.replacement(ctx)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(ByteStream::new(self.format.rewrite_all(&raw, &rules)?))
    }
}

/// Split a JSON Pointer into unescaped reference tokens
fn pointer_tokens(locator: &str) -> Result<Vec<String>> {
    let rest = locator.strip_prefix('/').ok_or_else(|| {
        Error::Configuration(format!("locator '{}' must start with '/'", locator))
    })?;
    Ok(rest
        .split('/')
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect())
}

/// Replace every node matched by `locator`, returning how many were replaced
pub fn rewrite(doc: &mut Value, locator: &str, replacement: &Value) -> Result<usize> {
    let tokens = pointer_tokens(locator)?;
    Ok(replace_matches(doc, &tokens, replacement))
}

fn replace_matches(node: &mut Value, tokens: &[String], replacement: &Value) -> usize {
    let Some((head, rest)) = tokens.split_first() else {
        *node = replacement.clone();
        return 1;
    };

    match node {
        Value::Object(members) if head == "*" => members
            .values_mut()
            .map(|child| replace_matches(child, rest, replacement))
            .sum(),
        Value::Object(members) => members
            .get_mut(head.as_str())
            .map_or(0, |child| replace_matches(child, rest, replacement)),
        Value::Array(items) if head == "*" => items
            .iter_mut()
            .map(|child| replace_matches(child, rest, replacement))
            .sum(),
        Value::Array(items) => head
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get_mut(i))
            .map_or(0, |child| replace_matches(child, rest, replacement)),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loaders::MemorySource;
    use serde_json::json;

    fn inline(doc: &str, rewrites: Vec<RewriteRule>) -> DocumentLoader {
        DocumentLoader::new(
            DocumentOrigin::Inline(doc.to_string()),
            None,
            rewrites,
            Arc::new(MemorySource::new()),
        )
    }

    fn literal(locator: &str, value: Value) -> RewriteRule {
        RewriteRule {
            locator: locator.to_string(),
            value: Some(value),
            context_key: None,
        }
    }

    #[test]
    fn test_rewrite_single_node() {
        let mut doc = json!({"order": {"id": 1, "items": [{"sku": "a"}]}});
        let n = rewrite(&mut doc, "/order/id", &json!(42)).unwrap();
        assert_eq!(n, 1);
        assert_eq!(doc["order"]["id"], 42);
    }

    #[test]
    fn test_rewrite_wildcard_and_escapes() {
        let mut doc = json!({"items": [{"sku": "a"}, {"sku": "b"}], "a/b": {"~x": 0}});
        assert_eq!(rewrite(&mut doc, "/items/*/sku", &json!("z")).unwrap(), 2);
        assert_eq!(doc["items"][1]["sku"], "z");
        assert_eq!(rewrite(&mut doc, "/a~1b/~0x", &json!(1)).unwrap(), 1);
        assert_eq!(doc["a/b"]["~x"], 1);
    }

    #[test]
    fn test_rewrite_no_match() {
        let mut doc = json!({"items": []});
        assert_eq!(rewrite(&mut doc, "/items/0", &json!(1)).unwrap(), 0);
        assert_eq!(rewrite(&mut doc, "/missing/x", &json!(1)).unwrap(), 0);
    }

    #[test]
    fn test_rule_needs_exactly_one_replacement() {
        let ctx = Context::new();
        let both = RewriteRule {
            locator: "/a".to_string(),
            value: Some(json!(1)),
            context_key: Some("k".to_string()),
        };
        let loader = inline("{}", vec![both]);
        assert!(matches!(loader.validate(&ctx), Err(Error::Configuration(_))));

        let relative = literal("a", json!(1));
        let loader = inline("{}", vec![relative]);
        assert!(matches!(loader.validate(&ctx), Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_load_applies_context_value() {
        let ctx = Context::new();
        ctx.set("customer", "ACME").unwrap();
        let rule = RewriteRule {
            locator: "/customer".to_string(),
            value: None,
            context_key: Some("customer".to_string()),
        };
        let loader = inline(r#"{"customer": "placeholder"}"#, vec![rule]);
        loader.validate(&ctx).unwrap();

        let stream = loader.load(&ctx).await.unwrap();
        assert_eq!(stream.position(), 0);
        let doc: Value = serde_json::from_slice(&stream.into_inner()).unwrap();
        assert_eq!(doc["customer"], "ACME");
    }

    #[tokio::test]
    async fn test_load_fails_when_node_not_found() {
        let ctx = Context::new();
        let loader = inline(r#"{"a": 1}"#, vec![literal("/b", json!(2))]);
        loader.validate(&ctx).unwrap();

        let err = loader.load(&ctx).await.unwrap_err();
        match err {
            Error::Load(msg) => assert!(msg.contains("node not found")),
            other => panic!("Expected Load error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_xml_file_is_rewritten_by_xpath() {
        let source = MemorySource::new()
            .with_file("order.xml", r#"<order><id>0</id><customer ref="x"/></order>"#);
        let ctx = Context::new();
        ctx.set("customer", "ACME").unwrap();
        let rules = vec![
            literal("/order/id", json!(42)),
            RewriteRule {
                locator: "/order/customer/@ref".to_string(),
                value: None,
                context_key: Some("customer".to_string()),
            },
        ];
        let loader = DocumentLoader::new(
            DocumentOrigin::File(PathBuf::from("order.xml")),
            None,
            rules,
            Arc::new(source),
        );
        loader.validate(&ctx).unwrap();

        let text = String::from_utf8(loader.load(&ctx).await.unwrap().into_inner()).unwrap();
        assert!(text.contains("<id>42</id>"), "{text}");
        assert!(text.contains("ACME"), "{text}");
    }

    #[tokio::test]
    async fn test_xml_rule_without_match_fails_load() {
        let loader = DocumentLoader::new(
            DocumentOrigin::Inline("<order/>".to_string()),
            Some(DocumentFormat::Xml),
            vec![literal("/order/id", json!(1))],
            Arc::new(MemorySource::new()),
        );
        let ctx = Context::new();
        loader.validate(&ctx).unwrap();

        match loader.load(&ctx).await.unwrap_err() {
            Error::Load(msg) => assert!(msg.contains("node not found")),
            other => panic!("Expected Load error, got {other:?}"),
        }
    }

    #[test]
    fn test_xml_locator_must_be_xpath() {
        let loader = DocumentLoader::new(
            DocumentOrigin::Inline("<order/>".to_string()),
            Some(DocumentFormat::Xml),
            vec![literal("/order[", json!(1))],
            Arc::new(MemorySource::new()),
        );
        assert!(matches!(
            loader.validate(&Context::new()),
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_yaml_file_round_trips_in_yaml() {
        let source = MemorySource::new().with_file("msg.yaml", "greeting: hi\n");
        let loader = DocumentLoader::new(
            DocumentOrigin::File(PathBuf::from("msg.yaml")),
            None,
            vec![literal("/greeting", json!("bye"))],
            Arc::new(source),
        );
        let ctx = Context::new();
        let bytes = loader.load(&ctx).await.unwrap().into_inner();
        assert_eq!(String::from_utf8(bytes).unwrap().trim(), "greeting: bye");
    }
}
