//! Annotated Markdown documents: reading, annotation resolution, sections
//! and imports. Execution lives in the `engine` crate.

pub mod annotation;
pub mod ast;
pub mod document;
pub mod emoji;
pub mod envsubst;
mod invoke;
pub mod loader;
pub mod parser;
pub mod section;
pub mod transform;

pub use ast::{Ast, NodeId, NodeKind};
pub use document::{Document, Section};
pub use loader::{LoadError, Loaded};
pub use parser::ParseError;
pub use section::{OptionSpec, OptionType};
