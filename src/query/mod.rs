//! Predicate expressions for filtered indexes.
//!
//! A predicate is a small JavaScript-flavoured boolean expression over one
//! object, bound to the implicit parameter `obj`:
//!
//! ```text
//! obj.status === "published" && obj.tags.includes("maps")
//! return obj.year >= 2000;
//! ```
//!
//! Expressions are parsed once into an AST and evaluated by a tree walker.
//! There is no access to anything but `obj`: no globals, no assignment, no
//! function definitions. A predicate must produce a boolean.

mod eval;
mod lexer;
mod parser;

use serde_json::Value;
use thiserror::Error;

pub use eval::{loose_eq, truthy, type_name};

/// Errors from compiling or evaluating a predicate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("cannot compile predicate at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("predicate returned {found}, expected a boolean")]
    NotBoolean { found: &'static str },

    #[error("predicate evaluation failed: {message}")]
    Evaluation { message: String },
}

/// A compiled predicate.
#[derive(Clone, Debug)]
pub struct Predicate {
    source: String,
    expr: parser::Expr,
}

impl Predicate {
    /// Compile `source`.
    ///
    /// # Errors
    /// [`QueryError::Syntax`] with the byte offset of the problem.
    pub fn compile(source: &str) -> Result<Self, QueryError> {
        let tokens = lexer::tokenize(source)?;
        let expr = parser::parse(tokens)?;
        Ok(Self {
            source: source.to_owned(),
            expr,
        })
    }

    /// The text this predicate was compiled from, verbatim.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against one object.
    ///
    /// # Errors
    /// [`QueryError::Evaluation`] on type errors and
    /// [`QueryError::NotBoolean`] when the result is not a boolean.
    pub fn matches(&self, object: &Value) -> Result<bool, QueryError> {
        match eval::eval(&self.expr, object)? {
            Value::Bool(b) => Ok(b),
            other => Err(QueryError::NotBoolean {
                found: type_name(&other),
            }),
        }
    }
}
