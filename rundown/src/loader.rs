//! Loading a document together with the documents it imports.

use std::collections::HashSet;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::document::{Document, Section};
use crate::parser::ParseError;

/// File names searched for when no document is given.
pub const DEFAULT_DOCUMENTS: &[&str] = &["RUNDOWN.md", "README.md"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot import '{target}': {reason}")]
    Import {
        target: String,
        reason: String,
        file_id: usize,
        span: Range<usize>,
    },

    #[error("no {} found in '{}' or its parents", DEFAULT_DOCUMENTS.join(" or "), start.display())]
    NoDocument { start: PathBuf },
}

impl LoadError {
    /// Source location, when the error points into a document.
    pub fn location(&self) -> Option<(usize, Range<usize>)> {
        match self {
            LoadError::Import { file_id, span, .. } => Some((*file_id, span.clone())),
            _ => None,
        }
    }
}

/// A root document plus its imports. File ids are indices into `documents`.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub documents: Vec<Document>,
}

impl Loaded {
    pub fn root(&self) -> &Document {
        &self.documents[0]
    }

    pub fn document(&self, file_id: usize) -> Option<&Document> {
        self.documents.get(file_id)
    }

    /// Find a section in the root document, then in the imports.
    pub fn find_section(&self, name: &str) -> Option<(&Document, Section<'_>)> {
        self.documents
            .iter()
            .find_map(|doc| doc.section(name).map(|s| (doc, s)))
    }

    pub fn section_names(&self) -> Vec<String> {
        self.documents
            .iter()
            .flat_map(|doc| doc.sections().into_iter().map(|s| s.name().to_string()))
            .collect()
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &ParseError> {
        self.documents.iter().flat_map(|d| d.diagnostics.iter())
    }
}

/// Load the document at `path` and everything it imports.
pub fn load(path: &Path) -> Result<Loaded, LoadError> {
    let source = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    load_source(source, path)
}

/// Like [`load`], for a document already in memory. Imports resolve
/// relative to `path`.
pub fn load_source(source: String, path: &Path) -> Result<Loaded, LoadError> {
    let root = Document::parse(source, path, 0);
    let mut loaded = Loaded {
        documents: vec![root],
    };
    let mut seen: HashSet<PathBuf> = HashSet::new();
    if let Ok(canonical) = path.canonicalize() {
        seen.insert(canonical);
    }

    let base_dir = loaded.root().base_dir().to_path_buf();
    for import in loaded.root().imports() {
        let Some(target) = import.target.clone() else {
            warn!("import without a target is ignored");
            continue;
        };
        let resolved = resolve_import(&base_dir, &target);
        let canonical = match resolved.canonicalize() {
            Ok(canonical) => canonical,
            Err(e) if import.ignore_missing => {
                debug!(import = %target, error = %e, "skipping missing optional import");
                continue;
            }
            Err(e) => {
                return Err(LoadError::Import {
                    target,
                    reason: e.to_string(),
                    file_id: 0,
                    span: import.span,
                });
            }
        };
        if !seen.insert(canonical.clone()) {
            continue;
        }
        let source = std::fs::read_to_string(&canonical).map_err(|e| LoadError::Import {
            target: target.clone(),
            reason: e.to_string(),
            file_id: 0,
            span: import.span.clone(),
        })?;

        let file_id = loaded.documents.len();
        let mut doc = Document::parse(source, canonical, file_id);
        if !doc.imports().is_empty() {
            warn!(import = %target, "imports inside imported documents are not followed");
        }
        doc.apply_prefix(&import.prefix);
        debug!(import = %target, file_id, "imported document");
        loaded.documents.push(doc);
    }
    Ok(loaded)
}

/// Resolve an import target relative to the importing document; a missing
/// extension means `.md`.
fn resolve_import(base_dir: &Path, target: &str) -> PathBuf {
    let resolved = base_dir.join(target);
    if resolved.extension().is_none() {
        resolved.with_extension("md")
    } else {
        resolved
    }
}

/// Search `start` and its parents for a default document.
pub fn find_document(start: &Path) -> Result<PathBuf, LoadError> {
    for dir in start.ancestors() {
        for name in DEFAULT_DOCUMENTS {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    Err(LoadError::NoDocument {
        start: start.to_path_buf(),
    })
}
