use monet_model::FileRecord;
use serde_json::Value;

use crate::error::Result;

/// Fields every loaded record needs for identity and validation.
pub const REQUIRED_FIELDS: &[&str] = &[
    "history",
    "version",
    "hash",
    "type",
    "stat",
    "content",
    "metadata.version",
];

/// A reduced view of a stored document, expressed as excluded dotted paths.
///
/// Exclusions that would remove a required field, or one of its ancestors,
/// are dropped when the projection is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    excluded: Vec<String>,
}

impl Projection {
    /// Every field.
    pub fn full() -> Self {
        Self::default()
    }

    pub fn excluding<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut excluded: Vec<String> = Vec::new();
        for field in fields {
            let field = field.into().trim().trim_matches('.').to_string();
            if field.is_empty() || is_protected(&field) || excluded.contains(&field) {
                continue;
            }
            excluded.push(field);
        }
        Self { excluded }
    }

    pub fn is_full(&self) -> bool {
        self.excluded.is_empty()
    }

    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// Each exclusion split into its path segments.
    pub fn excluded_segments(&self) -> impl Iterator<Item = Vec<&str>> {
        self.excluded.iter().map(|field| field.split('.').collect())
    }

    pub fn apply(&self, document: &mut Value) {
        for segments in self.excluded_segments() {
            remove_path(document, &segments);
        }
    }

    /// Reduce an in-memory record to this view. Non-full views are marked
    /// partial so they cannot be persisted over the full document.
    pub fn apply_to_record(&self, record: FileRecord) -> Result<FileRecord> {
        if self.is_full() {
            return Ok(record);
        }
        let id = record.id;
        let mut document = serde_json::to_value(&record)?;
        self.apply(&mut document);
        let mut projected: FileRecord = serde_json::from_value(document)?;
        projected.id = id;
        projected.mark_partial();
        Ok(projected)
    }
}

fn is_protected(field: &str) -> bool {
    REQUIRED_FIELDS.iter().any(|required| {
        *required == field
            || required
                .strip_prefix(field)
                .is_some_and(|rest| rest.starts_with('.'))
    })
}

fn remove_path(value: &mut Value, segments: &[&str]) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut cursor = value;
    for segment in parents {
        match cursor.get_mut(*segment) {
            Some(next) => cursor = next,
            None => return,
        }
    }
    if let Some(object) = cursor.as_object_mut() {
        object.remove(*last);
    }
}
