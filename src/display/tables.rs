//! Table formatting utilities for structured output.

use comfy_table::{
    Attribute, Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};

use crate::search::SearchResult;
use crate::types::{Document, Library};
use crate::vector::IndexMetadata;

const SNIPPET_CHARS: usize = 60;

/// Builder for creating formatted tables.
pub struct TableBuilder {
    table: Table,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    /// Create a new table builder.
    pub fn new() -> Self {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        // Apply rounded corners
        table.apply_modifier(UTF8_ROUND_CORNERS);
        Self { table }
    }

    /// Set the table headers.
    pub fn set_headers(mut self, headers: Vec<&str>) -> Self {
        let header_cells: Vec<Cell> = headers
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect();
        self.table.set_header(header_cells);
        self
    }

    /// Add a row to the table.
    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.table.add_row(row);
        self
    }

    /// Add a row of pre-styled cells.
    pub fn add_cells(mut self, row: Vec<Cell>) -> Self {
        self.table.add_row(row);
        self
    }

    /// Build and return the formatted table.
    pub fn build(self) -> String {
        self.table.to_string()
    }
}

/// First characters of `text` on a single line.
fn snippet(text: &str) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SNIPPET_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(SNIPPET_CHARS).collect();
        format!("{cut}…")
    }
}

pub fn create_library_table(libraries: &[Library], document_counts: &[usize]) -> String {
    libraries
        .iter()
        .zip(document_counts)
        .fold(
            TableBuilder::new().set_headers(vec!["ID", "Name", "Documents", "Created"]),
            |table, (library, count)| {
                table.add_row(vec![
                    library.id.to_string(),
                    library.name.clone(),
                    count.to_string(),
                    library.created_at.format("%Y-%m-%d %H:%M").to_string(),
                ])
            },
        )
        .build()
}

pub fn create_document_table(documents: &[Document]) -> String {
    documents
        .iter()
        .fold(
            TableBuilder::new().set_headers(vec!["ID", "Title", "Content", "Updated"]),
            |table, document| {
                table.add_row(vec![
                    document.id.to_string(),
                    document.title.clone(),
                    snippet(&document.content),
                    document.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                ])
            },
        )
        .build()
}

/// Ranked search results; the score column is colored by strength.
pub fn create_search_table(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .fold(
            TableBuilder::new().set_headers(vec!["#", "Score", "Chunks", "Title", "Document"]),
            |table, (rank, result)| {
                let color = if result.score >= 0.75 {
                    Color::Green
                } else if result.score >= 0.4 {
                    Color::Yellow
                } else {
                    Color::Reset
                };
                table.add_cells(vec![
                    Cell::new(rank + 1),
                    Cell::new(format!("{:.3}", result.score)).fg(color),
                    Cell::new(result.matching_chunks),
                    Cell::new(&result.document.title).add_attribute(Attribute::Bold),
                    Cell::new(result.document.id),
                ])
            },
        )
        .build()
}

pub fn create_index_table(indexes: &[IndexMetadata]) -> String {
    indexes
        .iter()
        .fold(
            TableBuilder::new().set_headers(vec![
                "Library",
                "Kind",
                "Vectors",
                "Dimension",
                "Updated",
            ]),
            |table, metadata| {
                table.add_row(vec![
                    metadata.library_id.to_string(),
                    metadata.index_type.to_string(),
                    metadata.num_vectors.to_string(),
                    metadata
                        .vector_dimension
                        .map_or_else(|| "-".to_string(), |d| d.to_string()),
                    metadata.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                ])
            },
        )
        .build()
}
