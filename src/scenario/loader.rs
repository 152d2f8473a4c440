//! Scenario documents
//!
//! Two formats are accepted. A JSON object keyed by hotkey name:
//!
//! ```json
//! { "F1": "Dear team,\nplease find...", "F3": "SELECT * FROM users;" }
//! ```
//!
//! or the XML layout with one `Key` element per hotkey under the root:
//!
//! ```xml
//! <AutoTyper>
//!   <Key value="F1"><![CDATA[Dear team,
//! please find...]]></Key>
//! </AutoTyper>
//! ```
//!
//! Unknown hotkey names and non-text bodies are skipped. Line breaks are
//! normalized to the platform line break before the text reaches the engine.

use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::store::{ScenarioStore, Slot};

/// Errors that make a whole scenario document unusable
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read scenario file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid scenario document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid scenario document: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("scenario text is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("scenario document must be an object keyed by hotkey name")]
    NotAnObject,

    #[error("scenario document has no root element")]
    MissingRoot,

    #[error("scenario document ends inside an element")]
    Unterminated,
}

/// Line break produced for every line break in a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn platform() -> Self {
        if cfg!(windows) {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        }
    }
}

/// On-disk layout of a scenario document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Xml,
}

impl Format {
    /// Pick by extension, falling back to the first non-blank character
    pub fn detect(path: &Path, raw: &str) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("xml") => Format::Xml,
            Some("json") => Format::Json,
            _ => {
                if raw.trim_start_matches('\u{feff}').trim_start().starts_with('<') {
                    Format::Xml
                } else {
                    Format::Json
                }
            }
        }
    }
}

/// Load a scenario file using the platform line ending
pub fn load(path: &Path) -> Result<ScenarioStore, ScenarioError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let format = Format::detect(path, &raw);
    let store = parse(&raw, format, LineEnding::platform())?;
    info!(
        path = %path.display(),
        ?format,
        assigned = store.assigned_count(),
        "scenarios loaded"
    );
    Ok(store)
}

/// Parse a scenario document in the given format
pub fn parse(
    raw: &str,
    format: Format,
    line_ending: LineEnding,
) -> Result<ScenarioStore, ScenarioError> {
    match format {
        Format::Json => parse_json(raw, line_ending),
        Format::Xml => parse_xml(raw, line_ending),
    }
}

fn parse_json(raw: &str, line_ending: LineEnding) -> Result<ScenarioStore, ScenarioError> {
    let document: Value = serde_json::from_str(raw)?;
    let entries: Map<String, Value> = match document {
        Value::Object(entries) => entries,
        _ => return Err(ScenarioError::NotAnObject),
    };

    let mut store = ScenarioStore::empty();
    for (name, body) in entries {
        let Some(slot) = Slot::from_hotkey_name(&name) else {
            warn!(hotkey = %name, "skipping scenario for unknown hotkey");
            continue;
        };
        match body {
            Value::String(text) => {
                debug!(%slot, chars = text.chars().count(), "scenario assigned");
                store.assign(slot, normalize_newlines(&text, line_ending));
            }
            Value::Null => {
                debug!(%slot, "scenario left unassigned");
            }
            other => {
                warn!(%slot, kind = value_kind(&other), "skipping non-text scenario body");
            }
        }
    }
    Ok(store)
}

/// Read `<Key value="F1"><![CDATA[...]]></Key>` children of the root
///
/// Only the first CDATA section directly inside a `Key` counts; plain text
/// and nested elements are ignored.
fn parse_xml(raw: &str, line_ending: LineEnding) -> Result<ScenarioStore, ScenarioError> {
    let mut reader = Reader::from_str(raw);
    let mut store = ScenarioStore::empty();
    let mut depth = 0usize;
    let mut saw_root = false;
    // Slot of the open `Key` element until its text has been taken
    let mut pending: Option<Slot> = None;

    loop {
        match reader.read_event()? {
            Event::Start(element) => {
                depth += 1;
                match depth {
                    1 => saw_root = true,
                    2 if element.name().as_ref() == b"Key" => pending = key_slot(&element)?,
                    _ => {}
                }
            }
            Event::End(_) => {
                if depth == 2 {
                    pending = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Empty(_) if depth == 0 => saw_root = true,
            Event::CData(cdata) if depth == 2 => {
                if let Some(slot) = pending.take() {
                    let text = std::str::from_utf8(&cdata)?;
                    debug!(%slot, chars = text.chars().count(), "scenario assigned");
                    store.assign(slot, normalize_newlines(text, line_ending));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(ScenarioError::Unterminated);
    }
    if !saw_root {
        return Err(ScenarioError::MissingRoot);
    }
    Ok(store)
}

fn key_slot(element: &BytesStart<'_>) -> Result<Option<Slot>, ScenarioError> {
    let attribute = element
        .try_get_attribute("value")
        .map_err(quick_xml::Error::from)?;
    let Some(attribute) = attribute else {
        warn!("skipping Key element without a value attribute");
        return Ok(None);
    };
    let name = attribute.unescape_value().map_err(quick_xml::Error::from)?;
    let slot = Slot::from_hotkey_name(&name);
    if slot.is_none() {
        warn!(hotkey = %name, "skipping scenario for unknown hotkey");
    }
    Ok(slot)
}

/// Rewrite every line break (`\n` or `\r\n`) as `line_ending`
pub fn normalize_newlines(text: &str, line_ending: LineEnding) -> String {
    let unified = text.replace("\r\n", "\n");
    match line_ending {
        LineEnding::Lf => unified,
        LineEnding::CrLf => unified.replace('\n', "\r\n"),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
