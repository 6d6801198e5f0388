//! Intermediate representation for the kiln backend.
//!
//! This crate provides the target-independent vocabulary consumed by every
//! emitter: procedures, cells, expressions, statements and class tables.
//! It has no knowledge of any particular target.

mod binary;
mod builder;
mod cell;
mod class;
mod expr;
mod procedure;
mod stmt;

pub use binary::*;
pub use builder::*;
pub use cell::*;
pub use class::*;
pub use expr::*;
pub use procedure::*;
pub use stmt::*;

use thiserror::Error;

/// IR construction and resolution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("procedure {proc} already resolved")]
    AlreadyResolved { proc: String },
    #[error("procedure {proc}: missing label {label}")]
    MissingLabel { proc: String, label: String },
    #[error("procedure {proc}: duplicate label {label}")]
    DuplicateLabel { proc: String, label: String },
}

pub type Result<T> = std::result::Result<T, IrError>;
