#![allow(clippy::result_large_err)]
//! rdl-core: register-description elaborator core library.
//!
//! Turns parsed component declarations (fields, registers, register files,
//! address maps, memories, signals) into a fully elaborated, address-resolved
//! and validated design tree.
//!
//! # Public API
//!
//! Key types are re-exported at the crate root for convenience:
//!
//! - [`RdlCompiler`] -- compiler session (`compile_unit`, `elaborate`)
//! - [`Design`] / [`Node`] -- read-only view of an elaborated design
//! - [`CompileError`], [`Diagnostic`], [`ErrorKind`] -- diagnostics
//! - [`PropertyRuleBook`] -- property catalog and precedence rules
//! - Parse tree types: [`ParseUnit`], [`RawItem`], [`RawComponent`],
//!   [`RawInstance`], [`RawExpr`]
//!
//! The walker and listener types are public so embedders can run their own
//! passes over an instance tree.

pub mod ast;
pub mod compiler;
pub mod component;
pub mod elaborate;
pub mod error;
pub mod expr;
pub mod instance;
pub mod messages;
pub mod namespace;
pub mod node;
pub mod pass1_construct;
pub mod pass2_expressions;
pub mod pass3_placement;
pub mod pass4_validate;
pub mod properties;
pub mod walker;

// ── Convenience re-exports: key types ────────────────────────────────

pub use ast::{ParseUnit, RawComponent, RawExpr, RawInstance, RawItem, SourceRef};
pub use component::ComponentKind;
pub use error::{CompileError, Diagnostic, ErrorKind, Severity};
pub use expr::Value;
pub use messages::{CollectingPrinter, LogPrinter, MessagePrinter, StderrPrinter};
pub use node::{Design, Node};
pub use properties::{PropertyError, PropertyRuleBook};

// ── Convenience re-exports: entry points ─────────────────────────────

pub use compiler::RdlCompiler;
pub use walker::{Listener, WalkContext, Walker, WalkerAction};
