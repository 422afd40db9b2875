//! Offline processing of annotation streams
//!
//! The reader ingests self-describing text streams into a fresh
//! metadata database, executes a declarative query against the
//! records (filter, group-by, aggregate, sort), and renders the
//! result as a table, tree, JSON, or a new stream.

pub mod aggregator;
pub mod cali_reader;
pub mod cali_writer;
pub mod calql;
pub mod expand;
pub mod filter;
pub mod format;
pub mod json;
pub mod json_split;
pub mod metadata;
pub mod pipeline;
pub mod preprocessor;
pub mod query_spec;
pub mod sorter;
pub mod table;
pub mod tree_format;
pub mod user_format;

pub use aggregator::Aggregator;
pub use cali_reader::read_stream;
pub use cali_writer::CaliWriter;
pub use calql::parse_query;
pub use filter::RecordSelector;
pub use format::Formatter;
pub use metadata::MetadataDb;
pub use pipeline::QueryProcessor;
pub use query_spec::QuerySpec;
