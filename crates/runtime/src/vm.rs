//! Bytecode virtual machine.
//!
//! A stack VM with registers `A` (accumulator), `PC`/current code vector,
//! `C` (current closure), `FP` (operand-stack index of the current argument
//! block) and `ARGC`. The operand stack and the frame stack are growable
//! vectors owned by the interpreter, never the host call stack, so a
//! continuation can snapshot both by copy and be re-entered any number of
//! times.
//!
//! The collector runs between instructions (and inside any allocating
//! instruction); every value the VM holds is reachable from the registers,
//! the two stacks, or the interpreter's temp roots at those points.

use crate::interp::Interp;
use crate::ops::Op;
use crate::writer;
use lyre_core::{
    ContData, ErrorInfo, ErrorKind, ObjKind, ObjRef, RuntimeKind, SavedFrame, SymbolId, Value,
};
use tracing::trace;

/// Hard ceilings; exceeding either raises `StackOverflow` instead of
/// exhausting host memory on runaway non-tail recursion.
const STACK_LIMIT: usize = 1 << 22;
const FRAME_LIMIT: usize = 1 << 16;

/// `ret_pc` marker for the sentinel frame a re-entrant `funcall` plants
/// under the call; returning through it ends that run.
const HALT_FRAME: usize = usize::MAX;

pub(crate) struct VmState {
    pub a: Value,
    pub code: Value,
    pub pc: usize,
    pub clos: Value,
    pub fp: usize,
    pub argc: usize,
    pub stack: Vec<Value>,
    pub frames: Vec<SavedFrame>,
}

/// Register snapshot for nested runs.
pub(crate) struct Regs {
    a: Value,
    code: Value,
    pc: usize,
    clos: Value,
    fp: usize,
    argc: usize,
}

impl VmState {
    pub fn new() -> VmState {
        VmState {
            a: Value::Nil,
            code: Value::Nil,
            pc: 0,
            clos: Value::Nil,
            fp: 0,
            argc: 0,
            stack: Vec::new(),
            frames: Vec::new(),
        }
    }

    fn save(&self) -> Regs {
        Regs {
            a: self.a,
            code: self.code,
            pc: self.pc,
            clos: self.clos,
            fp: self.fp,
            argc: self.argc,
        }
    }

    fn restore(&mut self, regs: Regs) {
        self.a = regs.a;
        self.code = regs.code;
        self.pc = regs.pc;
        self.clos = regs.clos;
        self.fp = regs.fp;
        self.argc = regs.argc;
    }
}

/// Resolved callee, copied out of the heap before registers move.
enum Callee {
    Closure { code: Value, min: usize, rest: bool },
    Native(lyre_core::NativeData),
    Cont(ObjRef),
}

impl Interp {
    /// Execute a compiled code vector and return the value left in `A` by
    /// its final `halt`. Re-entrant: native callbacks may call back in.
    pub fn run_bytecode(&mut self, code: Value) -> Result<Value, ErrorInfo> {
        if !matches!(self.obj_kind(code), Some(ObjKind::Vector(_))) {
            let e = self.type_error("bytecode vector", code);
            self.set_error(e.clone());
            return Err(e);
        }
        let regs = self.vm.save();
        let stack_len = self.vm.stack.len();
        let frames_len = self.vm.frames.len();

        self.vm.a = Value::Nil;
        self.vm.code = code;
        self.vm.pc = 0;
        self.vm.clos = Value::Nil;
        self.vm.fp = stack_len;
        self.vm.argc = 0;

        let result = self.run_loop();

        self.vm.restore(regs);
        self.vm.stack.truncate(stack_len);
        if self.vm.frames.len() > frames_len {
            self.vm.frames.truncate(frames_len);
        }
        match result {
            Ok(v) => Ok(v),
            Err(e) => {
                self.set_error(e.clone());
                Err(e)
            }
        }
    }

    /// Call any callable value from the host (or from a native callback;
    /// this path is explicitly re-entrant).
    pub fn funcall(&mut self, f: Value, args: &[Value]) -> Result<Value, ErrorInfo> {
        let regs = self.vm.save();
        let stack_len = self.vm.stack.len();
        let frames_len = self.vm.frames.len();

        self.vm.frames.push(SavedFrame {
            ret_pc: HALT_FRAME,
            code: self.vm.code,
            clos: self.vm.clos,
            fp: self.vm.fp,
            argc: self.vm.argc,
            sp: stack_len,
        });
        self.vm.stack.extend_from_slice(args);
        self.vm.a = f;

        let result = match self.apply_value(args.len(), false) {
            Ok(true) => Ok(self.vm.a),
            Ok(false) => self.run_loop(),
            Err(e) => Err(e),
        };

        self.vm.restore(regs);
        self.vm.stack.truncate(stack_len);
        if self.vm.frames.len() > frames_len {
            self.vm.frames.truncate(frames_len);
        }
        match result {
            Ok(v) => Ok(v),
            Err(e) => {
                self.set_error(e.clone());
                Err(e)
            }
        }
    }

    fn run_loop(&mut self) -> Result<Value, ErrorInfo> {
        loop {
            // Safepoint between instructions.
            if self.heap.should_collect() {
                self.collect_garbage();
            }
            let op_sym = self.fetch_opcode()?;
            let Some(op) = self.ops.decode(op_sym) else {
                return Err(Self::bad_bytecode(format!(
                    "unknown opcode {}",
                    self.symbols.name(op_sym)
                )));
            };
            match op {
                Op::Halt => return Ok(self.vm.a),
                Op::Const => self.vm.a = self.fetch()?,
                Op::Lref => {
                    let i = self.fetch_index()?;
                    self.vm.a = self.local(i)?;
                }
                Op::Fref => {
                    let i = self.fetch_index()?;
                    self.vm.a = self.free_var(i)?;
                }
                Op::Gref => {
                    let s = self.fetch_symbol()?;
                    match self.globals.get(&s) {
                        Some(&v) => self.vm.a = v,
                        None => return Err(self.unbound(s)),
                    }
                }
                Op::Lset => {
                    let i = self.fetch_index()?;
                    let slot = self.local(i)?;
                    let a = self.vm.a;
                    self.set_box_value(slot, a)?;
                }
                Op::Fset => {
                    let i = self.fetch_index()?;
                    let slot = self.free_var(i)?;
                    let a = self.vm.a;
                    self.set_box_value(slot, a)?;
                }
                Op::Gset => {
                    let s = self.fetch_symbol()?;
                    let a = self.vm.a;
                    if !self.globals.contains_key(&s) {
                        return Err(self.unbound(s));
                    }
                    self.globals.insert(s, a);
                }
                Op::Def => {
                    let s = self.fetch_symbol()?;
                    let a = self.vm.a;
                    self.globals.insert(s, a);
                }
                Op::MacroBind => {
                    let s = self.fetch_symbol()?;
                    let data = match self.obj_kind(self.vm.a) {
                        Some(ObjKind::Closure(d)) => d.clone(),
                        _ => return Err(Self::bad_bytecode("macro body is not a closure")),
                    };
                    let mac = self.alloc(ObjKind::Macro(data));
                    self.globals.insert(s, mac);
                    self.vm.a = Value::Symbol(s);
                }
                Op::Push => {
                    if self.vm.stack.len() >= STACK_LIMIT {
                        return Err(ErrorInfo::runtime(
                            RuntimeKind::StackOverflow,
                            "operand stack limit exceeded",
                        ));
                    }
                    self.vm.stack.push(self.vm.a);
                }
                Op::Test => {
                    let l = self.fetch_index()?;
                    if !self.vm.a.is_true() {
                        self.vm.pc = l;
                    }
                }
                Op::Jmp => {
                    let l = self.fetch_index()?;
                    self.vm.pc = l;
                }
                Op::BoxLocal => {
                    let i = self.fetch_index()?;
                    let current = self.local(i)?;
                    let boxed = self.make_box(current);
                    self.vm.stack[self.vm.fp + i] = boxed;
                }
                Op::Unbox => match self.obj_kind(self.vm.a) {
                    Some(ObjKind::Box(v)) => self.vm.a = *v,
                    _ => return Err(Self::bad_bytecode("unbox of a non-box")),
                },
                Op::Clos => {
                    let nfree = self.fetch_index()?;
                    let min = self.fetch_index()?;
                    let rest = self.fetch_index()? != 0;
                    let code = self.fetch()?;
                    if self.vm.stack.len() < nfree {
                        return Err(Self::bad_bytecode("closure capture underflow"));
                    }
                    let start = self.vm.stack.len() - nfree;
                    let free = self.vm.stack[start..].to_vec();
                    self.vm.stack.truncate(start);
                    self.vm.a = self.make_closure(code, free, min, rest);
                }
                Op::Frame => {
                    let l = self.fetch_index()?;
                    if self.vm.frames.len() >= FRAME_LIMIT {
                        return Err(ErrorInfo::runtime(
                            RuntimeKind::StackOverflow,
                            "frame stack limit exceeded",
                        ));
                    }
                    self.vm.frames.push(SavedFrame {
                        ret_pc: l,
                        code: self.vm.code,
                        clos: self.vm.clos,
                        fp: self.vm.fp,
                        argc: self.vm.argc,
                        sp: self.vm.stack.len(),
                    });
                }
                Op::Apply => {
                    let n = self.fetch_index()?;
                    if self.apply_value(n, false)? {
                        return Ok(self.vm.a);
                    }
                }
                Op::TailApply => {
                    let n = self.fetch_index()?;
                    if self.apply_value(n, true)? {
                        return Ok(self.vm.a);
                    }
                }
                Op::Ret => {
                    if self.do_return()? {
                        return Ok(self.vm.a);
                    }
                }
                Op::Conti => self.vm.a = self.capture_continuation(),
                Op::Nuate => {
                    let k = self.fetch()?;
                    let r = match k.to_obj() {
                        Some(r) if matches!(self.heap.kind(r), ObjKind::Continuation(_)) => r,
                        _ => return Err(Self::bad_bytecode("nuate operand is not a continuation")),
                    };
                    let a = self.vm.a;
                    if self.invoke_continuation(r, a)? {
                        return Ok(self.vm.a);
                    }
                }
            }
        }
    }

    /// Enter the callee in `A` with the top `n` operand-stack values as
    /// arguments. Returns true when control already returned through a
    /// sentinel frame (native call or continuation unwinding a `funcall`).
    fn apply_value(&mut self, n: usize, tail: bool) -> Result<bool, ErrorInfo> {
        let callee = self.vm.a;
        if self.vm.stack.len() < n || (tail && self.vm.fp > self.vm.stack.len() - n) {
            return Err(Self::bad_bytecode("argument block underflow"));
        }
        let resolved = match callee.to_obj().map(|r| (r, self.heap.kind(r))) {
            Some((_, ObjKind::Closure(d))) | Some((_, ObjKind::Macro(d))) => Callee::Closure {
                code: d.code,
                min: d.min_args,
                rest: d.has_rest,
            },
            Some((_, ObjKind::Native(nd))) => Callee::Native(*nd),
            Some((r, ObjKind::Continuation(_))) => Callee::Cont(r),
            _ => {
                return Err(ErrorInfo::with_value(
                    ErrorKind::Runtime(RuntimeKind::NonCallable),
                    format!("not callable: {}", writer::write_string(self, callee)),
                    callee,
                ));
            }
        };

        match resolved {
            Callee::Closure { code, min, rest } => {
                if (rest && n < min) || (!rest && n != min) {
                    return Err(Self::arity_error(min, rest, n));
                }
                self.enter_args(n, tail);
                if rest {
                    self.collect_rest(min);
                }
                self.vm.clos = callee;
                self.vm.code = code;
                self.vm.pc = 0;
                trace!(argc = self.vm.argc, tail, "enter closure");
                Ok(false)
            }
            Callee::Native(nd) => {
                if n < nd.min_args || nd.max_args.is_some_and(|m| n > m) {
                    return Err(Self::arity_error(nd.min_args, nd.max_args.is_none(), n));
                }
                self.enter_args(n, tail);
                let func = self.natives[nd.index as usize].func;
                let value = func(self)?;
                self.vm.a = value;
                self.do_return()
            }
            Callee::Cont(r) => {
                if n != 1 {
                    return Err(Self::arity_error(1, false, n));
                }
                let arg = self.vm.stack[self.vm.stack.len() - 1];
                self.invoke_continuation(r, arg)
            }
        }
    }

    /// Place the top `n` stack values as the current argument block. A tail
    /// call slides them down over the caller's arguments so the operand
    /// stack does not grow with recursion depth.
    fn enter_args(&mut self, n: usize, tail: bool) {
        if tail {
            let src = self.vm.stack.len() - n;
            for j in 0..n {
                self.vm.stack[self.vm.fp + j] = self.vm.stack[src + j];
            }
            self.vm.stack.truncate(self.vm.fp + n);
        } else {
            self.vm.fp = self.vm.stack.len() - n;
        }
        self.vm.argc = n;
    }

    /// Collect surplus arguments into a list in the rest slot.
    fn collect_rest(&mut self, min: usize) {
        let extra = self.vm.stack[self.vm.fp + min..self.vm.fp + self.vm.argc].to_vec();
        self.vm.stack.truncate(self.vm.fp + min);
        let list = self.list_from_slice(&extra, Value::Nil);
        self.vm.stack.push(list);
        self.vm.argc = min + 1;
    }

    /// Pop the top frame marker. Returns true on a sentinel frame.
    fn do_return(&mut self) -> Result<bool, ErrorInfo> {
        let Some(frame) = self.vm.frames.pop() else {
            return Err(Self::bad_bytecode("return with empty frame stack"));
        };
        // The marker's recorded depth, not the live FP: after a
        // continuation restore the two differ, and the snapshot's layout
        // is what the resumption site expects.
        self.vm.stack.truncate(frame.sp);
        if frame.ret_pc == HALT_FRAME {
            return Ok(true);
        }
        self.vm.pc = frame.ret_pc;
        self.vm.code = frame.code;
        self.vm.clos = frame.clos;
        self.vm.fp = frame.fp;
        self.vm.argc = frame.argc;
        Ok(false)
    }

    fn capture_continuation(&mut self) -> Value {
        let data = ContData {
            stack: self.vm.stack.clone().into_boxed_slice(),
            frames: self.vm.frames.clone().into_boxed_slice(),
            fp: self.vm.fp,
            argc: self.vm.argc,
        };
        self.alloc(ObjKind::Continuation(data))
    }

    /// Restore a continuation snapshot (by copy: the snapshot itself stays
    /// intact for further invocations) and return through its top frame
    /// with `arg` in `A`.
    fn invoke_continuation(&mut self, r: ObjRef, arg: Value) -> Result<bool, ErrorInfo> {
        let (stack, frames, fp, argc) = match self.heap.kind(r) {
            ObjKind::Continuation(c) => (c.stack.to_vec(), c.frames.to_vec(), c.fp, c.argc),
            other => return Err(Self::bad_bytecode(format!("nuate of a {}", other.name()))),
        };
        self.vm.stack = stack;
        self.vm.frames = frames;
        self.vm.fp = fp;
        self.vm.argc = argc;
        self.vm.a = arg;
        self.do_return()
    }

    // ---- operand fetch ----------------------------------------------------

    fn fetch(&mut self) -> Result<Value, ErrorInfo> {
        let val = match self.obj_kind(self.vm.code) {
            Some(ObjKind::Vector(v)) => v.get(self.vm.pc).copied(),
            _ => None,
        };
        match val {
            Some(v) => {
                self.vm.pc += 1;
                Ok(v)
            }
            None => Err(Self::bad_bytecode("instruction fetch out of range")),
        }
    }

    fn fetch_opcode(&mut self) -> Result<SymbolId, ErrorInfo> {
        match self.fetch()? {
            Value::Symbol(s) => Ok(s),
            other => Err(Self::bad_bytecode(format!("opcode is not a symbol: {:?}", other))),
        }
    }

    fn fetch_symbol(&mut self) -> Result<SymbolId, ErrorInfo> {
        match self.fetch()? {
            Value::Symbol(s) => Ok(s),
            _ => Err(Self::bad_bytecode("operand is not a symbol")),
        }
    }

    fn fetch_index(&mut self) -> Result<usize, ErrorInfo> {
        match self.fetch()? {
            Value::Fixnum(n) if n >= 0 => Ok(n as usize),
            _ => Err(Self::bad_bytecode("operand is not a non-negative fixnum")),
        }
    }

    fn local(&self, i: usize) -> Result<Value, ErrorInfo> {
        self.vm
            .stack
            .get(self.vm.fp + i)
            .copied()
            .ok_or_else(|| Self::bad_bytecode("local slot out of range"))
    }

    fn free_var(&self, i: usize) -> Result<Value, ErrorInfo> {
        match self.obj_kind(self.vm.clos) {
            Some(ObjKind::Closure(d)) | Some(ObjKind::Macro(d)) => d
                .free
                .get(i)
                .copied()
                .ok_or_else(|| Self::bad_bytecode("free slot out of range")),
            _ => Err(Self::bad_bytecode("free reference outside a closure")),
        }
    }

    fn set_box_value(&mut self, slot: Value, value: Value) -> Result<(), ErrorInfo> {
        match slot.to_obj() {
            Some(r) => match self.heap.kind_mut(r) {
                ObjKind::Box(inner) => {
                    *inner = value;
                    Ok(())
                }
                _ => Err(Self::bad_bytecode("assignment target is not boxed")),
            },
            None => Err(Self::bad_bytecode("assignment target is not boxed")),
        }
    }

    // ---- error constructors ------------------------------------------------

    fn unbound(&self, s: SymbolId) -> ErrorInfo {
        ErrorInfo::with_value(
            ErrorKind::Runtime(RuntimeKind::UnboundGlobal),
            format!("unbound global: {}", self.symbols.name(s)),
            Value::Symbol(s),
        )
    }

    fn arity_error(min: usize, variadic: bool, got: usize) -> ErrorInfo {
        ErrorInfo::runtime(
            RuntimeKind::ArityMismatch,
            format!(
                "expected {}{} argument(s), got {}",
                min,
                if variadic { "+" } else { "" },
                got
            ),
        )
    }

    fn bad_bytecode(msg: impl Into<String>) -> ErrorInfo {
        ErrorInfo::runtime(RuntimeKind::BadBytecode, msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `const COND; test 8; const 1; halt; const 2; halt`
    fn branch_code(interp: &mut Interp, cond: Value) -> Value {
        let items = vec![
            Value::Symbol(interp.ops.const_),
            cond,
            Value::Symbol(interp.ops.test),
            Value::Fixnum(8),
            Value::Symbol(interp.ops.const_),
            Value::Fixnum(1),
            Value::Symbol(interp.ops.halt),
            Value::Nil, // unused slot so both arms start on an even target
            Value::Symbol(interp.ops.const_),
            Value::Fixnum(2),
            Value::Symbol(interp.ops.halt),
        ];
        interp.vector(items)
    }

    #[test]
    fn test_const_halt() {
        let mut interp = Interp::new();
        let items = vec![
            Value::Symbol(interp.ops.const_),
            Value::Fixnum(42),
            Value::Symbol(interp.ops.halt),
        ];
        let code = interp.vector(items);
        assert_eq!(interp.run_bytecode(code).unwrap(), Value::Fixnum(42));
    }

    #[test]
    fn test_test_branches_on_false_and_nil() {
        let mut interp = Interp::new();
        let taken = branch_code(&mut interp, Value::True);
        assert_eq!(interp.run_bytecode(taken).unwrap(), Value::Fixnum(1));
        let not_taken = branch_code(&mut interp, Value::False);
        assert_eq!(interp.run_bytecode(not_taken).unwrap(), Value::Fixnum(2));
        let nil_branch = branch_code(&mut interp, Value::Nil);
        assert_eq!(interp.run_bytecode(nil_branch).unwrap(), Value::Fixnum(2));
    }

    #[test]
    fn test_unknown_opcode_is_bad_bytecode() {
        let mut interp = Interp::new();
        let bogus = interp.intern("frobnicate");
        let code = interp.vector(vec![bogus]);
        let err = interp.run_bytecode(code).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime(RuntimeKind::BadBytecode));
        assert!(interp.last_error().is_some());
    }

    #[test]
    fn test_gref_unbound_sets_error() {
        let mut interp = Interp::new();
        let missing = interp.intern_id("definitely-not-bound");
        let items = vec![
            Value::Symbol(interp.ops.gref),
            Value::Symbol(missing),
            Value::Symbol(interp.ops.halt),
        ];
        let code = interp.vector(items);
        let err = interp.run_bytecode(code).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime(RuntimeKind::UnboundGlobal));
        assert_eq!(err.value, Some(Value::Symbol(missing)));
    }
}
