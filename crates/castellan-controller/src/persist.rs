//! The configuration persister capability.
//!
//! The controller calls `store` after every successful mutating
//! operation; a store failure is logged and never fails the operation.
//! `load` yields the operations that rebuild the model at boot.

use std::io::Write;
use std::path::PathBuf;

use castellan_value::Value;

use crate::address::PathAddress;
use crate::error::PersistenceError;
use crate::keys;

pub trait ConfigurationPersister: Send + Sync {
    /// Persists the full model after a successful mutation.
    fn store(&self, model: &Value) -> Result<(), PersistenceError>;

    /// Returns the boot operation list that recreates the persisted
    /// model.
    fn load(&self) -> Result<Vec<Value>, PersistenceError>;

    /// Renders the model as an XML document for diagnostic export.
    fn marshal_as_xml(
        &self,
        model: &Value,
        out: &mut dyn Write,
    ) -> Result<(), PersistenceError>;
}

/// Persister that drops everything. Used by tests and by working-model
/// execution inside composites (via the recording variant in the
/// composite engine).
pub struct NullPersister;

impl ConfigurationPersister for NullPersister {
    fn store(&self, _model: &Value) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn load(&self) -> Result<Vec<Value>, PersistenceError> {
        Ok(Vec::new())
    }

    fn marshal_as_xml(
        &self,
        model: &Value,
        out: &mut dyn Write,
    ) -> Result<(), PersistenceError> {
        write_xml(model, "server", out)
    }
}

/// Stores the model as pretty JSON at a fixed path, atomically
/// (write-to-temp then rename). `load` replays the snapshot as a single
/// root `write-model` operation.
pub struct FilePersister {
    path: PathBuf,
}

impl FilePersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FilePersister { path: path.into() }
    }
}

impl ConfigurationPersister for FilePersister {
    fn store(&self, model: &Value) -> Result<(), PersistenceError> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, model.to_json_string(true))?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<Value>, PersistenceError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        let model = Value::from_json_str(&text)
            .map_err(|e| PersistenceError::Malformed(e.to_string()))?;
        let mut op = crate::address::operation(keys::WRITE_MODEL, &PathAddress::root());
        op.insert(keys::MODEL, model)
            .map_err(|e| PersistenceError::Malformed(e.to_string()))?;
        Ok(vec![op])
    }

    fn marshal_as_xml(
        &self,
        model: &Value,
        out: &mut dyn Write,
    ) -> Result<(), PersistenceError> {
        write_xml(model, "server", out)
    }
}

/// Minimal generic element rendering. Keys become elements, scalars
/// become text content; this is an export format, not a round-trip one.
fn write_xml(value: &Value, tag: &str, out: &mut dyn Write) -> Result<(), PersistenceError> {
    let tag = sanitize_tag(tag);
    match value {
        Value::Object(map) => {
            writeln!(out, "<{tag}>")?;
            for (key, child) in map {
                if child.is_defined() {
                    write_xml(child, key, out)?;
                }
            }
            writeln!(out, "</{tag}>")?;
        }
        Value::List(items) => {
            writeln!(out, "<{tag}>")?;
            for item in items {
                write_xml(item, "item", out)?;
            }
            writeln!(out, "</{tag}>")?;
        }
        Value::Undefined => {}
        scalar => {
            let text = match scalar {
                Value::String(s) => s.clone(),
                other => other.to_json_string(false),
            };
            writeln!(out, "<{tag}>{}</{tag}>", escape_text(&text))?;
        }
    }
    Ok(())
}

fn sanitize_tag(tag: &str) -> String {
    let cleaned: String = tag
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if cleaned.chars().next().map(|c| c.is_alphabetic()).unwrap_or(false) {
        cleaned
    } else {
        format!("x{cleaned}")
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_persister_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let persister = FilePersister::new(&path);

        let mut model = Value::empty_object();
        model
            .get_mut("subsystem")
            .unwrap()
            .get_mut("web")
            .unwrap()
            .insert("port", 8080)
            .unwrap();
        persister.store(&model).unwrap();

        let ops = persister.load().unwrap();
        assert_eq!(ops.len(), 1);
        let op = &ops[0];
        assert_eq!(op.require(keys::OP).unwrap().as_str().unwrap(), keys::WRITE_MODEL);
        assert_eq!(op.require(keys::MODEL).unwrap(), &model);
    }

    #[test]
    fn test_load_without_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let persister = FilePersister::new(dir.path().join("missing.json"));
        assert!(persister.load().unwrap().is_empty());
    }

    #[test]
    fn test_xml_export_escapes_text() {
        let mut model = Value::empty_object();
        model.insert("motd", "a < b & c").unwrap();
        let mut out = Vec::new();
        NullPersister.marshal_as_xml(&model, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("&lt;"));
        assert!(text.contains("&amp;"));
        assert!(text.starts_with("<server>"));
    }
}
