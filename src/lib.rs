pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod fetch;
pub mod merge;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod reference;
pub mod schema;

pub use config::{AppConfig, ParseConfig, ParseMode};
pub use document::{Document, Element, Node};
pub use error::{Diagnostic, ParseError};
pub use merge::merge;
pub use parser::{ParseOutput, Parser};
pub use schema::{project, CanonicalRecord, DataSource, PartialRecord};
