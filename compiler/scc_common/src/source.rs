//! Source file registry
//!
//! Maps the `file_id` carried by every [`Span`](crate::Span) back to a file
//! name and its text, so diagnostics can be rendered as
//! `file:line:column: message` and tooling can re-read the offending line.

use serde::{Deserialize, Serialize};

/// A single registered source file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

/// Registry of all source files seen by one compiler run.
///
/// File ids are dense and assigned in registration order; id 0 is the first
/// registered file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source file and return its id.
    pub fn add(&mut self, name: impl Into<String>, text: impl Into<String>) -> u32 {
        let id = self.files.len() as u32;
        self.files.push(SourceFile { name: name.into(), text: text.into() });
        id
    }

    /// File name for `file_id`, or `"<unknown>"` for an unregistered id.
    pub fn name(&self, file_id: u32) -> &str {
        self.files.get(file_id as usize).map_or("<unknown>", |f| f.name.as_str())
    }

    pub fn text(&self, file_id: u32) -> Option<&str> {
        self.files.get(file_id as usize).map(|f| f.text.as_str())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_and_in_registration_order() {
        let mut map = SourceMap::new();
        let a = map.add("a.c", "int x;");
        let b = map.add("b.c", "int y;");
        assert_eq!((a, b), (0, 1));
        assert_eq!(map.name(a), "a.c");
        assert_eq!(map.name(b), "b.c");
        assert_eq!(map.name(99), "<unknown>");
    }
}
