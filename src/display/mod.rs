//! Table output for the command-line interface.

pub mod tables;

pub use tables::{
    TableBuilder, create_document_table, create_index_table, create_library_table,
    create_search_table,
};
