pub mod error;
mod reader;

pub use error::ParseError;

use crate::ast::Ast;
use crate::transform;

/// Parser entry point.
pub struct Parser {
    source: String,
    file_id: usize,
}

impl Parser {
    pub fn new(source: String, file_id: usize) -> Self {
        Parser { source, file_id }
    }

    /// Read the Markdown without resolving annotations.
    pub fn read(&self) -> (Ast, Vec<ParseError>) {
        reader::read(&self.source, self.file_id)
    }

    /// Read and transform the source into an executable tree. Problems are
    /// returned alongside the tree rather than instead of it.
    pub fn parse(&self) -> (Ast, Vec<ParseError>) {
        let (mut ast, mut diagnostics) = self.read();
        diagnostics.extend(transform::transform(&mut ast, &self.source, self.file_id));
        (ast, diagnostics)
    }
}
