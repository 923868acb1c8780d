//! Sectioned snapshot of a live query.

use crate::db::DataContext;
use crate::model::entity::Entity;
use crate::model::key::key_identity;
use crate::repo::entity_repo::{decode_record, fetch_stored, RepoResult};
use crate::repo::query::{field_path, Query, QueryResult, SortKey};
use serde_json::Value as JsonValue;

/// Position of a row in a sectioned layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexPath {
    pub section: usize,
    pub row: usize,
}

impl IndexPath {
    pub fn new(section: usize, row: usize) -> Self {
        Self { section, row }
    }
}

/// What a live query fetches and how it groups rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveRequest {
    pub query: Query,
    /// Field whose value names the section of each row. `None` renders one
    /// untitled section.
    pub section_by: Option<String>,
}

impl LiveRequest {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            section_by: None,
        }
    }

    pub fn section_by(mut self, field: impl Into<String>) -> Self {
        self.section_by = Some(field.into());
        self
    }

    /// Checks field paths and predicate operands without touching the store.
    pub fn validate(&self) -> QueryResult<()> {
        if let Some(predicate) = &self.query.predicate {
            predicate.compile()?;
        }
        for key in &self.query.sort_by {
            field_path(&key.field)?;
        }
        if let Some(field) = &self.section_by {
            field_path(field)?;
        }
        Ok(())
    }

    /// Sorts by `default_field` when no sort keys were given, and by the
    /// section field first so that equal titles stay contiguous.
    pub(crate) fn normalized(&self, default_field: &str) -> Self {
        let mut request = self.clone();
        if request.query.sort_by.is_empty() {
            request.query.sort_by.push(SortKey::ascending(default_field));
        }
        if let Some(field) = &request.section_by {
            let leads = request
                .query
                .sort_by
                .first()
                .is_some_and(|key| &key.field == field);
            if !leads {
                request.query.sort_by.insert(0, SortKey::ascending(field.clone()));
            }
        }
        request
    }
}

/// One fetched row: stable key identity, stored JSON body, decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutRow<T> {
    key: String,
    body: String,
    record: T,
}

impl<T> LayoutRow<T> {
    pub fn key_identity(&self) -> &str {
        &self.key
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn record(&self) -> &T {
        &self.record
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section<T> {
    title: String,
    rows: Vec<LayoutRow<T>>,
}

impl<T> Section<T> {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn rows(&self) -> &[LayoutRow<T>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Ordered sections of ordered rows, as a view renders them.
///
/// Sections are never empty, except that an unsectioned layout always has
/// exactly one (possibly empty) untitled section.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout<T> {
    sections: Vec<Section<T>>,
}

impl<T> Default for Layout<T> {
    fn default() -> Self {
        Self {
            sections: Vec::new(),
        }
    }
}

impl<T> Layout<T> {
    /// Layout with no sections.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn sections(&self) -> &[Section<T>] {
        &self.sections
    }

    pub fn number_of_sections(&self) -> usize {
        self.sections.len()
    }

    /// Row count of `section`, `0` when out of range.
    pub fn rows_in_section(&self, section: usize) -> usize {
        self.sections.get(section).map_or(0, Section::len)
    }

    pub fn section_title(&self, section: usize) -> Option<&str> {
        self.sections.get(section).map(Section::title)
    }

    pub fn row(&self, path: IndexPath) -> Option<&LayoutRow<T>> {
        self.sections.get(path.section)?.rows.get(path.row)
    }

    pub fn record_at(&self, path: IndexPath) -> Option<&T> {
        self.row(path).map(LayoutRow::record)
    }

    pub fn contains(&self, path: IndexPath) -> bool {
        self.row(path).is_some()
    }

    pub fn total_rows(&self) -> usize {
        self.sections.iter().map(Section::len).sum()
    }

    /// Rows in display order with their positions.
    pub fn rows(&self) -> impl Iterator<Item = (IndexPath, &LayoutRow<T>)> {
        self.sections.iter().enumerate().flat_map(|(section, entry)| {
            entry
                .rows
                .iter()
                .enumerate()
                .map(move |(row, item)| (IndexPath::new(section, row), item))
        })
    }

    /// Uppercased first letter of each section title, deduplicated in
    /// section order. Untitled sections contribute nothing.
    pub fn section_index_titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = Vec::new();
        for section in &self.sections {
            let Some(title) = index_title(&section.title) else {
                continue;
            };
            if !titles.contains(&title) {
                titles.push(title);
            }
        }
        titles
    }

    /// First section whose index title is `title`.
    pub fn section_for_index_title(&self, title: &str) -> Option<usize> {
        self.sections
            .iter()
            .position(|section| index_title(&section.title).as_deref() == Some(title))
    }

    pub(crate) fn from_sections(sections: Vec<Section<T>>) -> Self {
        Self { sections }
    }
}

fn index_title(title: &str) -> Option<String> {
    title
        .chars()
        .next()
        .map(|first| first.to_uppercase().collect())
}

/// Fetches `request` and groups consecutive rows by section title.
///
/// `request` must already be normalized so that the section field leads the
/// sort order.
pub(crate) fn fetch_layout<T: Entity>(
    ctx: &DataContext,
    collection: &str,
    request: &LiveRequest,
) -> RepoResult<Layout<T>> {
    let stored = fetch_stored(ctx, collection, &request.query)?;

    let mut sections: Vec<Section<T>> = Vec::new();
    if request.section_by.is_none() {
        sections.push(Section {
            title: String::new(),
            rows: Vec::with_capacity(stored.len()),
        });
    }

    for entry in stored {
        let record = decode_record::<T>(collection, &entry.body)?;
        let title = match &request.section_by {
            Some(field) => section_value(&entry.body, field),
            None => String::new(),
        };
        let row = LayoutRow {
            key: key_identity(&entry.key),
            body: entry.body,
            record,
        };

        match sections.last_mut() {
            Some(section) if section.title == title => section.rows.push(row),
            _ => sections.push(Section {
                title,
                rows: vec![row],
            }),
        }
    }

    Ok(Layout::from_sections(sections))
}

/// Text of a dotted field inside a JSON body; `""` when missing or null.
pub(crate) fn section_value(body: &str, field: &str) -> String {
    let Ok(document) = serde_json::from_str::<JsonValue>(body) else {
        return String::new();
    };

    let mut current = &document;
    for segment in field.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }

    match current {
        JsonValue::Null => String::new(),
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}
