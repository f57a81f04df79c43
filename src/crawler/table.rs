//! Table extraction from crawled pages
//!
//! Turns one table on a page into named columns and rows:
//! - An HTML `<table>`, picked by CSS selector and match index
//! - A JSON value assigned to a script variable (`js=name`)
//!
//! Column types are inferred from the cell text so rows can be emitted as
//! integers, floats or strings.

use crate::crawler::extract::HtmlExtractor;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::{json, Map, Number, Value};
use std::collections::BTreeSet;
use thiserror::Error;

/// Prefix selecting a script variable instead of an HTML table
const VARIABLE_PREFIX: &str = "js=";

/// Largest `colspan` honored; wider cells are clamped
const MAX_COLSPAN: usize = 100;

/// Errors that can occur while extracting a table
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("Invalid CSS selector: '{0}'")]
    InvalidSelector(String),

    #[error("No table matches '{selector}' (match #{index})")]
    NotFound { selector: String, index: usize },

    #[error("Script variable not found or not JSON: {0}")]
    VariableNotFound(String),

    #[error("Table has no columns")]
    NoColumns,
}

/// Inferred type of a table column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Varchar,
    Bigint,
    Double,
}

impl ColumnType {
    /// Narrowest type every non-empty value parses as
    ///
    /// A column with no non-empty values stays `Varchar`.
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut any = false;
        let mut integers = true;
        let mut floats = true;

        for value in values.into_iter().map(str::trim).filter(|v| !v.is_empty()) {
            any = true;
            integers = integers && value.parse::<i64>().is_ok();
            floats = floats && value.parse::<f64>().is_ok();
            if !integers && !floats {
                break;
            }
        }

        match (any, integers, floats) {
            (false, _, _) => ColumnType::Varchar,
            (true, true, _) => ColumnType::Bigint,
            (true, false, true) => ColumnType::Double,
            _ => ColumnType::Varchar,
        }
    }

    /// Converts one cell; empty or unparsable cells become `null`
    pub fn convert(self, cell: &str) -> Value {
        let cell = cell.trim();
        if cell.is_empty() {
            return Value::Null;
        }
        match self {
            ColumnType::Varchar => Value::String(cell.to_string()),
            ColumnType::Bigint => cell.parse::<i64>().map_or(Value::Null, Value::from),
            ColumnType::Double => cell
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map_or(Value::Null, Value::Number),
        }
    }
}

/// A table read from a page
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HtmlTable {
    /// Column names, never empty and free of spaces and punctuation
    pub headers: Vec<String>,

    /// One inferred type per column
    pub column_types: Vec<ColumnType>,

    /// Cell text, one entry per column in every row
    pub rows: Vec<Vec<String>>,
}

impl HtmlTable {
    /// Builds a table, padding ragged rows and inferring column types
    fn new(mut headers: Vec<String>, mut rows: Vec<Vec<String>>) -> Result<Self, TableError> {
        let width = rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(headers.len()))
            .max()
            .unwrap_or(0);
        if width == 0 {
            return Err(TableError::NoColumns);
        }

        headers.resize(width, String::new());
        let headers = headers
            .iter()
            .enumerate()
            .map(|(i, name)| column_name(name, i))
            .collect();
        for row in &mut rows {
            row.resize(width, String::new());
        }

        let column_types = (0..width)
            .map(|col| ColumnType::infer(rows.iter().map(|row| row[col].as_str())))
            .collect();

        Ok(Self {
            headers,
            column_types,
            rows,
        })
    }

    /// Rows with every cell converted to its column's type
    pub fn typed_rows(&self) -> Vec<Vec<Value>> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&self.column_types)
                    .map(|(cell, column_type)| column_type.convert(cell))
                    .collect()
            })
            .collect()
    }

    /// Rows as JSON objects keyed by column name
    pub fn records(&self) -> Vec<Value> {
        self.typed_rows()
            .into_iter()
            .map(|row| {
                let record: Map<String, Value> = self.headers.iter().cloned().zip(row).collect();
                Value::Object(record)
            })
            .collect()
    }

    /// Headers, types and typed rows as one JSON value
    pub fn to_json(&self) -> Value {
        json!({
            "headers": self.headers,
            "column_types": self.column_types,
            "rows": self.typed_rows(),
        })
    }
}

impl HtmlExtractor {
    /// Extracts a table from a page
    ///
    /// # Arguments
    ///
    /// * `html` - The page body
    /// * `selector` - CSS selector for the table (or an element containing
    ///   it), or `js=name` / `script@js=name` for a script variable
    /// * `index` - Which match to use, 0-based; ignored for variables
    pub fn extract_table(&self, html: &str, selector: &str, index: usize) -> Result<HtmlTable, TableError> {
        read_table(html, selector, index)
    }
}

/// Extracts a table from a page; see [`HtmlExtractor::extract_table`]
pub fn read_table(html: &str, selector: &str, index: usize) -> Result<HtmlTable, TableError> {
    let document = Html::parse_document(html);

    if let Some(pos) = selector.find(VARIABLE_PREFIX) {
        let name = selector[pos + VARIABLE_PREFIX.len()..].trim();
        let value = find_script_variable(&document, name)
            .ok_or_else(|| TableError::VariableNotFound(name.to_string()))?;
        return json_table(&value);
    }

    let css = Selector::parse(selector).map_err(|_| TableError::InvalidSelector(selector.to_string()))?;
    let not_found = || TableError::NotFound {
        selector: selector.to_string(),
        index,
    };
    let matched = document.select(&css).nth(index).ok_or_else(not_found)?;
    let table = if matched.value().name() == "table" {
        matched
    } else {
        let table_selector = Selector::parse("table").map_err(|_| not_found())?;
        matched.select(&table_selector).next().ok_or_else(not_found)?
    };

    html_table(table)
}

fn html_table(table: ElementRef<'_>) -> Result<HtmlTable, TableError> {
    let Ok(tr) = Selector::parse("tr") else {
        return Err(TableError::NoColumns);
    };

    let mut headers = Vec::new();
    let mut rows = Vec::new();
    for row in table.select(&tr).filter(|row| belongs_to(*row, table)) {
        let cells: Vec<ElementRef<'_>> = row
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|cell| matches!(cell.value().name(), "th" | "td"))
            .collect();
        if cells.is_empty() {
            continue;
        }

        let is_header = cells.iter().all(|cell| cell.value().name() == "th");
        let texts: Vec<String> = cells.iter().flat_map(|cell| spanned_text(*cell)).collect();
        if is_header && headers.is_empty() && rows.is_empty() {
            headers = texts;
        } else {
            rows.push(texts);
        }
    }

    HtmlTable::new(headers, rows)
}

/// Whether `table` is the row's closest enclosing table, so rows of nested
/// tables are skipped
fn belongs_to(row: ElementRef<'_>, table: ElementRef<'_>) -> bool {
    row.ancestors()
        .find(|node| node.value().as_element().is_some_and(|e| e.name() == "table"))
        .is_some_and(|node| node.id() == table.id())
}

/// Cell text, repeated once per spanned column
fn spanned_text(cell: ElementRef<'_>) -> Vec<String> {
    let text = cell.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ");
    let span = cell
        .value()
        .attr("colspan")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(1)
        .clamp(1, MAX_COLSPAN);
    vec![text; span]
}

/// Finds `name = <json>` in an inline script and parses the JSON value
fn find_script_variable(document: &Html, name: &str) -> Option<Value> {
    if name.is_empty() {
        return None;
    }
    let scripts = Selector::parse("script:not([src])").ok()?;

    document.select(&scripts).find_map(|script| {
        let source: String = script.text().collect();
        let mut from = 0;
        while let Some(found) = source[from..].find(name) {
            let start = from + found;
            from = start + name.len();

            let preceded_by_ident = source[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$');
            if preceded_by_ident {
                continue;
            }
            let rest = source[from..].trim_start();
            let Some(rest) = rest.strip_prefix('=') else {
                continue;
            };
            if rest.starts_with('=') {
                continue;
            }

            let mut values = serde_json::Deserializer::from_str(rest.trim_start()).into_iter::<Value>();
            if let Some(Ok(value)) = values.next() {
                return Some(value);
            }
        }
        None
    })
}

/// Lays a JSON value out as a table
///
/// Arrays of objects become one column per key (sorted), other arrays a
/// single `value` column, objects `key`/`value` rows and scalars one cell.
fn json_table(value: &Value) -> Result<HtmlTable, TableError> {
    match value {
        Value::Array(items) => {
            let keys: BTreeSet<&String> = items
                .iter()
                .filter_map(Value::as_object)
                .flat_map(|object| object.keys())
                .collect();

            if keys.is_empty() {
                let rows = items.iter().map(|item| vec![cell_text(item)]).collect();
                return HtmlTable::new(vec!["value".to_string()], rows);
            }

            let rows = items
                .iter()
                .map(|item| {
                    keys.iter()
                        .map(|key| item.get(key.as_str()).map(cell_text).unwrap_or_default())
                        .collect()
                })
                .collect();
            HtmlTable::new(keys.into_iter().cloned().collect(), rows)
        }
        Value::Object(object) => {
            let rows = object
                .iter()
                .map(|(key, value)| vec![key.clone(), cell_text(value)])
                .collect();
            HtmlTable::new(vec!["key".to_string(), "value".to_string()], rows)
        }
        scalar => HtmlTable::new(vec!["value".to_string()], vec![vec![cell_text(scalar)]]),
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Usable column name: punctuation replaced, blanks numbered from 1
fn column_name(name: &str, index: usize) -> String {
    let name = name.trim();
    if name.is_empty() {
        return format!("column{}", index + 1);
    }
    name.chars()
        .map(|c| match c {
            ' ' | '-' | '/' | '\\' | '(' | ')' | ',' => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRICES: &str = r#"<html><body>
        <table id="nav"><tr><td>menu</td></tr></table>
        <table class="prices">
          <thead><tr><th>Item name</th><th>Qty</th><th>Price (USD)</th><th>Note</th></tr></thead>
          <tbody>
            <tr><td>Widget</td><td>3</td><td>2.50</td><td></td></tr>
            <tr><td>Gadget</td><td>10</td><td>4</td><td>new</td></tr>
            <tr><td>Gizmo</td><td></td><td>n/a</td></tr>
          </tbody>
        </table>
    </body></html>"#;

    #[test]
    fn test_column_type_inference() {
        assert_eq!(ColumnType::infer(["1", "-2", " 30 "]), ColumnType::Bigint);
        assert_eq!(ColumnType::infer(["1", "2.5", ""]), ColumnType::Double);
        assert_eq!(ColumnType::infer(["1", "two"]), ColumnType::Varchar);
        assert_eq!(ColumnType::infer(["", ""]), ColumnType::Varchar);
    }

    #[test]
    fn test_extract_table_by_selector() {
        let table = HtmlExtractor.extract_table(PRICES, "table.prices", 0).unwrap();

        assert_eq!(table.headers, vec!["Item_name", "Qty", "Price__USD_", "Note"]);
        assert_eq!(
            table.column_types,
            vec![
                ColumnType::Varchar,
                ColumnType::Bigint,
                ColumnType::Varchar,
                ColumnType::Varchar
            ]
        );
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[2], vec!["Gizmo", "", "n/a", ""]);

        let typed = table.typed_rows();
        assert_eq!(typed[0][1], json!(3));
        assert_eq!(typed[2][1], Value::Null);
    }

    #[test]
    fn test_extract_table_by_index() {
        let table = read_table(PRICES, "table", 1).unwrap();
        assert_eq!(table.headers[0], "Item_name");

        let first = read_table(PRICES, "table", 0).unwrap();
        assert_eq!(first.headers, vec!["column1"]);
        assert_eq!(first.rows, vec![vec!["menu"]]);

        assert!(matches!(
            read_table(PRICES, "table", 2),
            Err(TableError::NotFound { index: 2, .. })
        ));
    }

    #[test]
    fn test_container_selector_and_colspan() {
        let html = r#"<div id="stats"><table>
            <tr><th>Year</th><th colspan="2">Score</th></tr>
            <tr><td>2023</td><td>1.5</td><td>2</td></tr>
            <tr><td>2024</td><td>3</td><td>4</td></tr>
        </table></div>"#;
        let table = read_table(html, "#stats", 0).unwrap();

        assert_eq!(table.headers, vec!["Year", "Score", "Score"]);
        assert_eq!(
            table.column_types,
            vec![ColumnType::Bigint, ColumnType::Double, ColumnType::Bigint]
        );
        assert_eq!(table.records()[0]["Year"], json!(2023));
    }

    #[test]
    fn test_nested_table_rows_are_not_mixed_in() {
        let html = r#"<table id="outer">
            <tr><td>a</td><td><table><tr><td>inner</td></tr></table></td></tr>
        </table>"#;
        let table = read_table(html, "#outer", 0).unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][0], "a");
    }

    #[test]
    fn test_script_variable_array_of_objects() {
        let html = r#"<html><head><script>
            var config = {"debug": false};
            window.products = [{"name": "Widget", "price": 2.5}, {"name": "Gadget", "stock": 7}];
        </script></head></html>"#;
        let table = read_table(html, "js=products", 0).unwrap();

        assert_eq!(table.headers, vec!["name", "price", "stock"]);
        assert_eq!(table.rows[1], vec!["Gadget", "", "7"]);
        assert_eq!(
            table.column_types,
            vec![ColumnType::Varchar, ColumnType::Double, ColumnType::Bigint]
        );
    }

    #[test]
    fn test_script_variable_object_and_scalars() {
        let html = r#"<script>const totals = {"visits": 10, "bounce": 0.4};
            let tags = ["a", "b"];</script>"#;

        let totals = read_table(html, "script@js=totals", 0).unwrap();
        assert_eq!(totals.headers, vec!["key", "value"]);
        assert_eq!(totals.rows.len(), 2);

        let tags = read_table(html, "js=tags", 0).unwrap();
        assert_eq!(tags.headers, vec!["value"]);
        assert_eq!(tags.rows, vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_script_variable_errors() {
        let html = r#"<script>var other = 1; if (missing == 2) {}</script>"#;
        assert!(matches!(
            read_table(html, "js=missing", 0),
            Err(TableError::VariableNotFound(_))
        ));
        assert!(matches!(
            read_table(html, "js=absent", 0),
            Err(TableError::VariableNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_selector_and_empty_table() {
        assert!(matches!(
            read_table(PRICES, "table[", 0),
            Err(TableError::InvalidSelector(_))
        ));
        assert_eq!(
            read_table("<table></table>", "table", 0),
            Err(TableError::NoColumns)
        );
    }
}
