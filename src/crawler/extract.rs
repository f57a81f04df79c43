//! HTML extraction for crawled pages
//!
//! This module pulls structured data out of HTML documents:
//! - JSON-LD blocks (`<script type="application/ld+json">`)
//! - OpenGraph properties (`<meta property="og:...">`)
//! - Named meta tags and the page title
//! - Arbitrary elements by CSS selector
//! - Values addressed by dotted paths such as `jsonld.Product.name`

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Structured metadata found in a page
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructuredData {
    /// Parsed JSON-LD items; top-level arrays are flattened
    pub jsonld: Vec<Value>,

    /// OpenGraph properties without the `og:` prefix
    pub opengraph: BTreeMap<String, String>,

    /// `<meta name=...>` tags plus `title`
    pub meta: BTreeMap<String, String>,
}

impl StructuredData {
    pub fn is_empty(&self) -> bool {
        self.jsonld.is_empty() && self.opengraph.is_empty() && self.meta.is_empty()
    }
}

/// The first element matched by a CSS selector
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ElementData {
    /// Concatenated, trimmed text content
    pub text: String,

    /// Inner HTML
    pub html: String,

    /// Attributes of the element
    pub attributes: BTreeMap<String, String>,
}

/// The extraction service used on successful HTML responses
pub trait Extractor: Send + Sync {
    /// Extracts JSON-LD, OpenGraph and meta data
    fn extract_structured(&self, html: &str) -> StructuredData;

    /// Returns the first element matching `selector`, if any
    fn extract_element(&self, html: &str, selector: &str) -> Option<ElementData>;

    /// Resolves a dotted path against the page's structured data
    fn extract_path(&self, html: &str, path: &str) -> Option<Value>;
}

/// scraper-backed extractor
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExtractor;

impl Extractor for HtmlExtractor {
    fn extract_structured(&self, html: &str) -> StructuredData {
        let document = Html::parse_document(html);
        StructuredData {
            jsonld: extract_jsonld(&document),
            opengraph: extract_opengraph(&document),
            meta: extract_meta(&document),
        }
    }

    fn extract_element(&self, html: &str, selector: &str) -> Option<ElementData> {
        let selector = Selector::parse(selector).ok()?;
        let document = Html::parse_document(html);
        let element = document.select(&selector).next()?;
        Some(element_data(element))
    }

    fn extract_path(&self, html: &str, path: &str) -> Option<Value> {
        let mut segments = path.split('.').filter(|s| !s.is_empty());
        let source = segments.next()?;
        let rest: Vec<&str> = segments.collect();

        let structured = self.extract_structured(html);
        match source {
            "jsonld" => resolve_jsonld(&structured.jsonld, &rest),
            "opengraph" | "og" => lookup_single(&structured.opengraph, &rest),
            "meta" => lookup_single(&structured.meta, &rest),
            _ => None,
        }
    }
}

/// How a configured extraction field is evaluated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldExpr {
    /// Dotted structured-data path
    Path(String),
    /// CSS selector; the element's text is taken
    Css(String),
}

impl FieldExpr {
    pub fn parse(expr: &str) -> Self {
        let expr = expr.trim();
        let is_path = ["jsonld.", "opengraph.", "og.", "meta."]
            .iter()
            .any(|prefix| expr.starts_with(prefix));
        if is_path {
            FieldExpr::Path(expr.to_string())
        } else {
            FieldExpr::Css(expr.to_string())
        }
    }
}

/// Evaluates every configured field against a page
///
/// Fields that do not resolve are present with a `null` value.
pub fn extract_fields(
    extractor: &dyn Extractor,
    html: &str,
    fields: &BTreeMap<String, String>,
) -> BTreeMap<String, Value> {
    fields
        .iter()
        .map(|(name, expr)| {
            let value = match FieldExpr::parse(expr) {
                FieldExpr::Path(path) => extractor.extract_path(html, &path),
                FieldExpr::Css(selector) => extractor
                    .extract_element(html, &selector)
                    .map(|element| Value::String(element.text)),
            };
            (name.clone(), value.unwrap_or(Value::Null))
        })
        .collect()
}

fn extract_jsonld(document: &Html) -> Vec<Value> {
    let Ok(selector) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for script in document.select(&selector) {
        let text: String = script.text().collect();
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(Value::Array(values)) => items.extend(values),
            Ok(value) => items.push(value),
            Err(e) => tracing::trace!("Skipping invalid JSON-LD block: {}", e),
        }
    }
    items
}

fn extract_opengraph(document: &Html) -> BTreeMap<String, String> {
    let Ok(selector) = Selector::parse(r#"meta[property^="og:"]"#) else {
        return BTreeMap::new();
    };

    let mut properties = BTreeMap::new();
    for element in document.select(&selector) {
        let value = element.value();
        if let (Some(property), Some(content)) = (value.attr("property"), value.attr("content")) {
            let key = property.trim_start_matches("og:").to_string();
            properties.entry(key).or_insert_with(|| content.to_string());
        }
    }
    properties
}

fn extract_meta(document: &Html) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();

    if let Ok(selector) = Selector::parse("meta[name]") {
        for element in document.select(&selector) {
            let value = element.value();
            if let (Some(name), Some(content)) = (value.attr("name"), value.attr("content")) {
                meta.entry(name.to_ascii_lowercase())
                    .or_insert_with(|| content.to_string());
            }
        }
    }

    if let Ok(selector) = Selector::parse("title") {
        let title = document
            .select(&selector)
            .next()
            .map(|element| element.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(title) = title {
            meta.entry("title".to_string()).or_insert(title);
        }
    }

    meta
}

fn element_data(element: ElementRef<'_>) -> ElementData {
    ElementData {
        text: element.text().collect::<String>().trim().to_string(),
        html: element.inner_html(),
        attributes: element
            .value()
            .attrs()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
    }
}

/// `jsonld` alone returns every item; `jsonld.<Type>...` picks the first
/// item of that `@type` (also searching `@graph`) and walks the rest.
fn resolve_jsonld(items: &[Value], path: &[&str]) -> Option<Value> {
    let Some((type_name, fields)) = path.split_first() else {
        return Some(Value::Array(items.to_vec()));
    };

    let item = items
        .iter()
        .flat_map(|item| match item.get("@graph") {
            Some(Value::Array(graph)) => graph.iter().collect::<Vec<_>>(),
            _ => vec![item],
        })
        .find(|item| has_type(item, type_name))?;

    walk(item, fields)
}

fn has_type(item: &Value, type_name: &str) -> bool {
    match item.get("@type") {
        Some(Value::String(t)) => t == type_name,
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some(type_name)),
        _ => false,
    }
}

fn walk(value: &Value, fields: &[&str]) -> Option<Value> {
    let mut current = value;
    for field in fields {
        current = match current {
            Value::Array(items) => items.get(field.parse::<usize>().ok()?)?,
            Value::Object(map) => map.get(*field)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

fn lookup_single(map: &BTreeMap<String, String>, path: &[&str]) -> Option<Value> {
    match path {
        [key] => map.get(*key).map(|v| Value::String(v.clone())),
        _ => None,
    }
}
