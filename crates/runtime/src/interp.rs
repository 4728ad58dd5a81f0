//! The interpreter instance and its embedding API.
//!
//! An [`Interp`] owns everything: heap, symbol table, global environment,
//! native registry and VM state. Nothing is process-wide, so hosts may
//! create as many instances as they like (one per thread for parallelism;
//! a single instance is not safe for concurrent access).
//!
//! # Embedding
//!
//! ```no_run
//! use lyre_runtime::Interp;
//! use lyre_core::Value;
//!
//! let mut interp = Interp::new();
//! interp.define_native("square", |it| {
//!     let x = it.get_arg(0).to_fixnum().unwrap_or(0);
//!     Ok(Value::Fixnum(x * x))
//! }, 1, Some(1));
//! let v = interp.run_source(b"(square 1111)").unwrap();
//! assert_eq!(v, Value::Fixnum(1234321));
//! ```

use crate::ops::Ops;
use crate::reader::{Reader, SliceSource};
use crate::vm::VmState;
use crate::writer;
use crate::{arithmetic, io, list_ops, predicates, prelude, string_ops, sys, table_ops, vector_ops};
use lyre_core::{
    ClosureData, ErrorInfo, ErrorKind, Heap, HeapStats, NativeData, ObjKind, ObjRef, ReadError,
    RuntimeKind, SymbolId, SymbolManager, TableData, Value,
};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Signature of a registered host callback. Arguments are read through
/// [`Interp::get_arg`]; the callback returns one value or an error that the
/// VM records in the error slot before halting the current run.
pub type NativeFn = fn(&mut Interp) -> Result<Value, ErrorInfo>;

pub(crate) struct NativeEntry {
    pub name: String,
    pub func: NativeFn,
}

pub struct Interp {
    pub(crate) heap: Heap,
    pub(crate) symbols: SymbolManager,
    pub(crate) globals: HashMap<SymbolId, Value>,
    pub(crate) natives: Vec<NativeEntry>,
    pub(crate) ops: Ops,
    pub(crate) vm: VmState,
    /// Values kept alive while not yet reachable from any other root:
    /// the reader's and compiler's in-progress structures, plus values
    /// pinned by host code through `push_root`/`pop_root`.
    pub(crate) temp_roots: Vec<Value>,
    error: Option<ErrorInfo>,
}

impl Default for Interp {
    fn default() -> Interp {
        Interp::new()
    }
}

impl Interp {
    pub fn new() -> Interp {
        Interp::with_heap(Heap::new())
    }

    /// Create an instance with explicit GC tuning (see [`Heap::with_config`]).
    pub fn with_gc_config(growth: f64, min_threshold: usize) -> Interp {
        Interp::with_heap(Heap::with_config(growth, min_threshold))
    }

    fn with_heap(heap: Heap) -> Interp {
        let mut symbols = SymbolManager::new();
        let ops = Ops::new(&mut symbols);
        let mut interp = Interp {
            heap,
            symbols,
            globals: HashMap::new(),
            natives: Vec::new(),
            ops,
            vm: VmState::new(),
            temp_roots: Vec::new(),
            error: None,
        };
        arithmetic::install(&mut interp);
        predicates::install(&mut interp);
        list_ops::install(&mut interp);
        string_ops::install(&mut interp);
        vector_ops::install(&mut interp);
        table_ops::install(&mut interp);
        io::install(&mut interp);
        sys::install(&mut interp);
        prelude::install(&mut interp);
        interp
    }

    // ---- symbols ----------------------------------------------------------

    /// Intern a name as a symbol value. `"nil"` interns to the nil
    /// singleton, matching the original runtime.
    pub fn intern(&mut self, name: &str) -> Value {
        if name == "nil" {
            return Value::Nil;
        }
        Value::Symbol(self.symbols.intern(name))
    }

    pub fn intern_id(&mut self, name: &str) -> SymbolId {
        self.symbols.intern(name)
    }

    pub fn symbol_name(&self, id: SymbolId) -> &str {
        self.symbols.name(id)
    }

    pub fn gensym(&mut self) -> Value {
        Value::Symbol(self.symbols.gensym())
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    // ---- allocation -------------------------------------------------------

    /// Allocate a heap object, collecting first when the trigger point has
    /// been reached. Values that will flow into `kind` must be reachable
    /// from a root at the time of the call; the typed constructors below
    /// take care of that.
    pub(crate) fn alloc(&mut self, kind: ObjKind) -> Value {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        Value::Obj(self.heap.alloc(kind))
    }

    pub fn cons(&mut self, car: Value, cdr: Value) -> Value {
        self.temp_roots.push(car);
        self.temp_roots.push(cdr);
        let v = self.alloc(ObjKind::Cell { car, cdr });
        self.temp_roots.truncate(self.temp_roots.len() - 2);
        v
    }

    pub fn string(&mut self, s: &str) -> Value {
        self.string_from_bytes(s.as_bytes().to_vec())
    }

    pub fn string_from_bytes(&mut self, bytes: Vec<u8>) -> Value {
        self.alloc(ObjKind::Str(bytes.into_boxed_slice()))
    }

    pub fn flonum(&mut self, f: f64) -> Value {
        self.alloc(ObjKind::Flonum(f))
    }

    pub fn vector(&mut self, elems: Vec<Value>) -> Value {
        let mark = self.temp_roots.len();
        self.temp_roots.extend_from_slice(&elems);
        let v = self.alloc(ObjKind::Vector(elems));
        self.temp_roots.truncate(mark);
        v
    }

    pub fn make_table(&mut self, policy: lyre_core::HashPolicy) -> Value {
        self.alloc(ObjKind::Table(TableData::new(policy)))
    }

    pub(crate) fn make_closure(
        &mut self,
        code: Value,
        free: Vec<Value>,
        min_args: usize,
        has_rest: bool,
    ) -> Value {
        let mark = self.temp_roots.len();
        self.temp_roots.push(code);
        self.temp_roots.extend_from_slice(&free);
        let v = self.alloc(ObjKind::Closure(ClosureData {
            code,
            free: free.into_boxed_slice(),
            min_args,
            has_rest,
        }));
        self.temp_roots.truncate(mark);
        v
    }

    pub(crate) fn make_box(&mut self, value: Value) -> Value {
        self.temp_roots.push(value);
        let v = self.alloc(ObjKind::Box(value));
        self.temp_roots.pop();
        v
    }

    /// Build a proper (or, with a non-nil `tail`, dotted) list.
    pub fn list_from_slice(&mut self, items: &[Value], tail: Value) -> Value {
        let mark = self.temp_roots.len();
        self.temp_roots.extend_from_slice(items);
        self.temp_roots.push(tail);
        let mut acc = tail;
        for &item in items.iter().rev() {
            acc = self.cons(item, acc);
            // Keep the partially built spine alive for the next cons.
            self.temp_roots.push(acc);
        }
        self.temp_roots.truncate(mark);
        acc
    }

    /// Split a list into its cell elements and final tail (nil for a proper
    /// list, the non-nil cdr for a dotted one).
    pub fn list_elements(&self, mut v: Value) -> (Vec<Value>, Value) {
        let mut items = Vec::new();
        loop {
            match v.to_obj().map(|r| self.heap.kind(r)) {
                Some(ObjKind::Cell { car, cdr }) => {
                    items.push(*car);
                    v = *cdr;
                }
                _ => return (items, v),
            }
        }
    }

    /// Number of cells in the spine, like the original's `length` (a dotted
    /// tail is not counted).
    pub fn list_length(&self, v: Value) -> usize {
        self.list_elements(v).0.len()
    }

    pub fn car(&self, v: Value) -> Result<Value, ErrorInfo> {
        match v.to_obj().map(|r| self.heap.kind(r)) {
            Some(ObjKind::Cell { car, .. }) => Ok(*car),
            _ => Err(self.type_error("pair", v)),
        }
    }

    pub fn cdr(&self, v: Value) -> Result<Value, ErrorInfo> {
        match v.to_obj().map(|r| self.heap.kind(r)) {
            Some(ObjKind::Cell { cdr, .. }) => Ok(*cdr),
            _ => Err(self.type_error("pair", v)),
        }
    }

    /// Structural equality over the heap.
    pub fn equal(&self, a: Value, b: Value) -> bool {
        self.heap.equal_values(a, b)
    }

    // ---- garbage collection -----------------------------------------------

    pub fn collect_garbage(&mut self) {
        let Interp { heap, globals, vm, temp_roots, error, .. } = self;
        let roots = globals
            .values()
            .copied()
            .chain(vm.stack.iter().copied())
            .chain(vm.frames.iter().flat_map(|f| [f.code, f.clos]))
            .chain([vm.a, vm.code, vm.clos])
            .chain(temp_roots.iter().copied())
            // The faulting value in the error slot stays inspectable until
            // the host resets the error.
            .chain(error.iter().filter_map(|e| e.value));
        heap.collect(roots);
    }

    pub fn gc_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Pin a value against collection until the matching `pop_root`.
    pub fn push_root(&mut self, v: Value) {
        self.temp_roots.push(v);
    }

    pub fn pop_root(&mut self) -> Option<Value> {
        self.temp_roots.pop()
    }

    // ---- globals and natives ----------------------------------------------

    pub fn define_global(&mut self, sym: SymbolId, value: Value) {
        self.globals.insert(sym, value);
    }

    pub fn refer_global(&self, sym: SymbolId) -> Option<Value> {
        self.globals.get(&sym).copied()
    }

    /// Bind a host callback under a global name. `max_args` of `None`
    /// makes the callback variadic beyond `min_args`.
    pub fn define_native(
        &mut self,
        name: &str,
        func: NativeFn,
        min_args: usize,
        max_args: Option<usize>,
    ) {
        let index = self.natives.len() as u32;
        self.natives.push(NativeEntry { name: name.to_string(), func });
        let obj = self.alloc(ObjKind::Native(NativeData { index, min_args, max_args }));
        let sym = self.symbols.intern(name);
        self.globals.insert(sym, obj);
    }

    /// Read argument `i` of the current native call.
    pub fn get_arg(&self, i: usize) -> Value {
        self.vm.stack[self.vm.fp + i]
    }

    pub fn arg_count(&self) -> usize {
        self.vm.argc
    }

    // ---- error slot -------------------------------------------------------

    pub(crate) fn set_error(&mut self, e: ErrorInfo) {
        debug!(error = %e, "error slot set");
        self.error = Some(e);
    }

    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    /// Clear the error slot after a failed top-level call; the instance is
    /// usable again afterwards.
    pub fn reset_error(&mut self) {
        self.error = None;
    }

    /// Build a `TypeMismatch` error naming the expected kind; handy in
    /// native callbacks.
    pub fn type_error(&self, expected: &str, got: Value) -> ErrorInfo {
        ErrorInfo::with_value(
            ErrorKind::Runtime(RuntimeKind::TypeMismatch),
            format!("expected {}, got {}", expected, writer::write_string(self, got)),
            got,
        )
    }

    // ---- evaluation -------------------------------------------------------

    /// Read, compile and execute every top-level form in `source`,
    /// returning the value of the last one.
    pub fn run_source(&mut self, source: &[u8]) -> Result<Value, ErrorInfo> {
        let mut reader = Reader::new(SliceSource::new(source));
        // The running result is kept rooted: a later form's read or
        // collection must not reclaim it.
        let slot = self.temp_roots.len();
        self.temp_roots.push(Value::Nil);
        let result = loop {
            match reader.read(self) {
                Err(ReadError::EndOfFile) => break Ok(self.temp_roots[slot]),
                Err(e) => {
                    let info = ErrorInfo::read(e);
                    self.set_error(info.clone());
                    break Err(info);
                }
                Ok(expr) => match self.eval(expr) {
                    Ok(v) => self.temp_roots[slot] = v,
                    Err(e) => break Err(e),
                },
            }
        };
        self.temp_roots.truncate(slot);
        result
    }

    /// Compile and run one expression.
    pub fn eval(&mut self, expr: Value) -> Result<Value, ErrorInfo> {
        let code = self.compile(expr)?;
        self.run_bytecode(code)
    }

    /// Compile an expression to a bytecode vector. On failure the error
    /// slot holds the diagnostic and the interpreter state is unchanged.
    pub fn compile(&mut self, expr: Value) -> Result<Value, ErrorInfo> {
        match crate::compiler::compile(self, expr) {
            Ok(code) => Ok(code),
            Err(e) => {
                self.set_error(e.clone());
                Err(e)
            }
        }
    }

    /// Execute a stream of precompiled bytecode values (the boot image
    /// format: bytecode serialized in the reader's text grammar).
    pub fn load_boot_image(&mut self, image: &[u8]) -> Result<Value, ErrorInfo> {
        let mut reader = Reader::new(SliceSource::new(image));
        let slot = self.temp_roots.len();
        self.temp_roots.push(Value::Nil);
        let result = loop {
            match reader.read(self) {
                Err(ReadError::EndOfFile) => break Ok(self.temp_roots[slot]),
                Err(e) => {
                    let info = ErrorInfo::read(e);
                    self.set_error(info.clone());
                    break Err(info);
                }
                Ok(code) => match self.run_bytecode(code) {
                    Ok(v) => self.temp_roots[slot] = v,
                    Err(e) => break Err(e),
                },
            }
        };
        self.temp_roots.truncate(slot);
        result
    }

    pub fn run_file(&mut self, path: &Path) -> Result<Value, ErrorInfo> {
        let bytes = self.read_file(path)?;
        self.run_source(&bytes)
    }

    pub fn load_bytecode_file(&mut self, path: &Path) -> Result<Value, ErrorInfo> {
        let bytes = self.read_file(path)?;
        self.load_boot_image(&bytes)
    }

    fn read_file(&mut self, path: &Path) -> Result<Vec<u8>, ErrorInfo> {
        std::fs::read(path).map_err(|_| {
            let info =
                ErrorInfo::new(ErrorKind::FileNotFound, path.display().to_string());
            self.set_error(info.clone());
            info
        })
    }

    // ---- printing ---------------------------------------------------------

    pub fn display_string(&self, v: Value) -> String {
        writer::display_string(self, v)
    }

    pub fn write_string(&self, v: Value) -> String {
        writer::write_string(self, v)
    }

    /// `write/ss`: shared and cyclic structure rendered with `#n=`/`#n#`.
    pub fn write_shared_string(&self, v: Value) -> String {
        writer::write_shared_string(self, v)
    }

    // ---- internal helpers --------------------------------------------------

    pub(crate) fn obj_kind(&self, v: Value) -> Option<&ObjKind> {
        v.to_obj().map(|r| self.heap.kind(r))
    }

    pub(crate) fn expect_table(&self, v: Value) -> Result<ObjRef, ErrorInfo> {
        match v.to_obj() {
            Some(r) if matches!(self.heap.kind(r), ObjKind::Table(_)) => Ok(r),
            _ => Err(self.type_error("hash-table", v)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_nil_is_singleton() {
        let mut interp = Interp::new();
        assert_eq!(interp.intern("nil"), Value::Nil);
        let s = interp.intern("symbol");
        assert_eq!(s, interp.intern("symbol"));
        assert_ne!(s, interp.intern("otherSymbol"));
    }

    #[test]
    fn test_cons_car_cdr() {
        let mut interp = Interp::new();
        let v = interp.cons(Value::Fixnum(1), Value::Fixnum(2));
        assert_eq!(interp.car(v).unwrap(), Value::Fixnum(1));
        assert_eq!(interp.cdr(v).unwrap(), Value::Fixnum(2));
        assert!(interp.car(Value::Fixnum(3)).is_err());

        let v2 = interp.cons(Value::Fixnum(1), Value::Fixnum(2));
        assert_ne!(v, v2);
        assert!(interp.equal(v, v2));
        let v3 = interp.cons(Value::Fixnum(10), Value::Fixnum(20));
        assert!(!interp.equal(v, v3));
    }

    #[test]
    fn test_list_builders() {
        let mut interp = Interp::new();
        let items = [Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3)];
        let l = interp.list_from_slice(&items, Value::Nil);
        assert_eq!(interp.list_length(l), 3);
        let (elems, tail) = interp.list_elements(l);
        assert_eq!(elems, items);
        assert_eq!(tail, Value::Nil);

        // Dotted: (1 . 2) has one spine cell, like the original's length.
        let dotted = interp.cons(Value::Fixnum(1), Value::Fixnum(2));
        assert_eq!(interp.list_length(dotted), 1);
    }

    #[test]
    fn test_rooted_values_survive_collection() {
        let mut interp = Interp::new();
        let keep = interp.cons(Value::Fixnum(7), Value::Nil);
        interp.push_root(keep);
        for i in 0..10_000 {
            interp.cons(Value::Fixnum(i), Value::Nil);
        }
        interp.collect_garbage();
        assert_eq!(interp.car(keep).unwrap(), Value::Fixnum(7));
        interp.pop_root();
    }

    #[test]
    fn test_error_slot_reset() {
        let mut interp = Interp::new();
        assert!(interp.run_source(b"(undefined-global-xyz)").is_err());
        assert!(interp.last_error().is_some());
        interp.reset_error();
        assert!(interp.last_error().is_none());
        // The instance keeps working after a failure.
        assert_eq!(interp.run_source(b"(+ 1 2)").unwrap(), Value::Fixnum(3));
    }
}
