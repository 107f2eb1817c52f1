//! HTML parsing infrastructure
//!
//! Profile-driven extraction of raw product records from listing pages.

pub mod context;
pub mod error;
pub mod product_list_parser;
pub mod selector_chain;

pub use context::ParseContext;
pub use error::{ParsingError, ParsingResult};
pub use product_list_parser::{ListingPage, ProductListParser, resolve_url};
pub use selector_chain::{CompiledRule, FieldChain};
