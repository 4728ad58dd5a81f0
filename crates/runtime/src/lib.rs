//! Lyre Runtime: an embeddable Scheme-like interpreter
//!
//! Pipeline: source bytes -> [`reader`] -> value tree -> `compiler` ->
//! bytecode vector -> `vm` -> result value. The same bytecode may be
//! serialized through [`writer`] and reloaded later (the boot image path),
//! because compiled code is ordinary readable data: vectors, symbols and
//! fixnums.
//!
//! Hosts interact through [`Interp`]: evaluate source, call script
//! functions, register native callbacks, inspect the error slot. See the
//! module docs on [`interp`] for an embedding example.

pub mod interp;
pub mod prelude;
pub mod reader;
pub mod writer;

mod arithmetic;
mod compiler;
mod io;
mod list_ops;
mod ops;
mod predicates;
mod string_ops;
mod sys;
mod table_ops;
mod vector_ops;
mod vm;

pub use interp::{Interp, NativeFn};
pub use reader::{ReadSource, Reader, SliceSource, Source, read_str};
pub use writer::{display_string, write_shared_string, write_string};

// Re-export the core vocabulary so embedders need only this crate.
pub use lyre_core::{
    ErrorInfo, ErrorKind, HashPolicy, HeapStats, ObjKind, ReadError, RuntimeKind, SymbolId, Value,
};
