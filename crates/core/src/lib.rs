//! Lyre Core: object model for an embeddable Lisp interpreter
//!
//! This crate provides the representation layer the rest of the
//! interpreter is built on:
//!
//! - `value`: one-word tagged values (fixnum, symbol id, heap handle,
//!   singleton markers)
//! - `object`: typed heap object kinds (pairs, strings, vectors, closures,
//!   continuations, ...)
//! - `heap`: slot-table heap with a non-moving mark-sweep collector
//! - `symbols`: intern table and `gensym`
//! - `table`: bucketed hash tables with eq/equal/string key policies
//! - `utf8`: code point encode/decode for character literals
//! - `error`: the shared failure vocabulary (read, compile, runtime, file)

pub mod error;
pub mod heap;
pub mod object;
pub mod symbols;
pub mod table;
pub mod utf8;
pub mod value;

pub use error::{ErrorInfo, ErrorKind, ReadError, RuntimeKind};
pub use heap::{Heap, HeapStats};
pub use object::{ClosureData, ContData, NativeData, ObjKind, SavedFrame};
pub use symbols::SymbolManager;
pub use table::{HashPolicy, TableData, str_hash};
pub use utf8::{utf8_decode, utf8_encode};
pub use value::{ObjRef, SymbolId, Value};
