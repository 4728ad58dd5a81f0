//! Source-to-bytecode compiler.
//!
//! Compilation is two passes over the value tree. The first pass expands
//! macros to fixed point (calling macro closures through the re-entrant
//! `funcall` path), lowers quasiquotation into `cons`/`list`/`append`
//! calls, and normalizes `define` sugar. The second pass does lexical
//! analysis and emits a flat code vector: opcode symbols with inline
//! operands, fixnum branch targets, nested vectors for lambda bodies.
//!
//! Scope handling: every binding form is a lambda by the time it reaches
//! the second pass (`let` and friends are prelude macros), so a variable
//! is either a slot in the current frame (`lref`), a captured free
//! variable of the current closure (`fref`), or a global (`gref`).
//! Variables assigned anywhere, including from nested lambdas, are boxed
//! at frame entry and accessed through the box.

use crate::interp::Interp;
use lyre_core::{ErrorInfo, ObjKind, SymbolId, Value};

pub(crate) fn compile(interp: &mut Interp, expr: Value) -> Result<Value, ErrorInfo> {
    let base = interp.temp_roots.len();
    let result = Compiler { interp: &mut *interp }.compile_top(expr);
    interp.temp_roots.truncate(base);
    result
}

/// Code vector under construction.
struct Emit {
    code: Vec<Value>,
}

impl Emit {
    fn new() -> Emit {
        Emit { code: Vec::new() }
    }

    fn op(&mut self, sym: SymbolId) {
        self.code.push(Value::Symbol(sym));
    }

    fn fix(&mut self, n: usize) {
        self.code.push(Value::Fixnum(n as i64));
    }

    fn val(&mut self, v: Value) {
        self.code.push(v);
    }

    /// Reserve a branch-target slot for later patching.
    fn placeholder(&mut self) -> usize {
        self.code.push(Value::Fixnum(0));
        self.code.len() - 1
    }

    /// Point the reserved slot at the current position.
    fn patch_here(&mut self, at: usize) {
        self.code[at] = Value::Fixnum(self.code.len() as i64);
    }
}

/// One lambda's compile-time scope.
#[derive(Default)]
struct Scope {
    params: Vec<SymbolId>,
    boxed: Vec<bool>,
    free: Vec<FreeVar>,
}

#[derive(Clone, Copy)]
struct FreeVar {
    sym: SymbolId,
    boxed: bool,
}

impl Scope {
    fn param_slot(&self, s: SymbolId) -> Option<usize> {
        self.params.iter().position(|&p| p == s)
    }

    fn free_slot(&self, s: SymbolId) -> Option<usize> {
        self.free.iter().position(|f| f.sym == s)
    }

    fn binds(&self, s: SymbolId) -> bool {
        self.param_slot(s).is_some() || self.free_slot(s).is_some()
    }
}

struct Compiler<'i> {
    interp: &'i mut Interp,
}

impl Compiler<'_> {
    /// Pin a freshly built value until the end of this compilation.
    fn root(&mut self, v: Value) -> Value {
        self.interp.temp_roots.push(v);
        v
    }

    fn compile_top(&mut self, expr: Value) -> Result<Value, ErrorInfo> {
        self.root(expr);
        let expanded = self.expand(expr, &mut Vec::new())?;
        self.root(expanded);
        let mut emit = Emit::new();
        let scope = Scope::default();
        self.compile_expr(expanded, &scope, false, &mut emit)?;
        emit.op(self.interp.ops.halt);
        Ok(self.interp.vector(emit.code))
    }

    // ---- helpers over the value tree ---------------------------------------

    fn cell_parts(&self, v: Value) -> Option<(Value, Value)> {
        match self.interp.obj_kind(v) {
            Some(ObjKind::Cell { car, cdr }) => Some((*car, *cdr)),
            _ => None,
        }
    }

    fn malformed(&self, what: &str, form: Value) -> ErrorInfo {
        ErrorInfo::compile(format!("malformed {}: {}", what, self.interp.write_string(form)))
    }

    /// Proper-list elements, or a compile error naming the form.
    fn proper_list(&self, what: &str, form: Value, list: Value) -> Result<Vec<Value>, ErrorInfo> {
        let (items, tail) = self.interp.list_elements(list);
        if tail.is_nil() {
            Ok(items)
        } else {
            Err(self.malformed(what, form))
        }
    }

    fn build_list(&mut self, items: &[Value]) -> Value {
        let v = self.interp.list_from_slice(items, Value::Nil);
        self.root(v)
    }

    // ---- pass 1: macro expansion and quasiquote lowering -------------------

    fn expand(&mut self, expr: Value, bound: &mut Vec<SymbolId>) -> Result<Value, ErrorInfo> {
        if self.cell_parts(expr).is_none() {
            return Ok(expr);
        }

        // Expand a macro head to fixed point.
        let mut expr = expr;
        loop {
            let Some((head, _)) = self.cell_parts(expr) else {
                return Ok(expr);
            };
            let Some(h) = head.to_symbol() else { break };
            if bound.contains(&h) {
                break;
            }
            let Some(mac) = self.macro_binding(h) else { break };
            expr = self.expand_macro_call(mac, expr)?;
            self.root(expr);
        }

        let Some((head, rest)) = self.cell_parts(expr) else {
            return Ok(expr);
        };
        let ops = &self.interp.ops;
        let (quote, quasiquote, unquote, unquote_splicing, lambda, set_bang, define, define_macro) = (
            ops.quote,
            ops.quasiquote,
            ops.unquote,
            ops.unquote_splicing,
            ops.lambda,
            ops.set_bang,
            ops.define,
            ops.define_macro,
        );

        match head.to_symbol() {
            Some(h) if h == quote && !bound.contains(&h) => Ok(expr),
            Some(h) if h == quasiquote && !bound.contains(&h) => {
                let items = self.proper_list("quasiquote", expr, rest)?;
                let [template] = items.as_slice() else {
                    return Err(self.malformed("quasiquote", expr));
                };
                let lowered = self.lower_quasiquote(*template, 1)?;
                self.root(lowered);
                self.expand(lowered, bound)
            }
            Some(h) if (h == unquote || h == unquote_splicing) && !bound.contains(&h) => {
                Err(self.malformed("unquote outside quasiquote", expr))
            }
            Some(h) if h == lambda && !bound.contains(&h) => {
                let Some((params, body)) = self.cell_parts(rest) else {
                    return Err(self.malformed("lambda", expr));
                };
                let (req, rest_param) = self.parse_params(expr, params)?;
                let depth = bound.len();
                bound.extend_from_slice(&req);
                bound.extend(rest_param);
                let body = self.expand_list(body, bound, "lambda", expr);
                bound.truncate(depth);
                let body = body?;
                let mut items = vec![Value::Symbol(lambda), params];
                items.extend(body);
                Ok(self.build_list(&items))
            }
            Some(h) if (h == define || h == define_macro) && !bound.contains(&h) => {
                self.expand_define(h, expr, rest, bound)
            }
            Some(h) if h == set_bang && !bound.contains(&h) => {
                let items = self.proper_list("set!", expr, rest)?;
                let [target, value] = items.as_slice() else {
                    return Err(self.malformed("set!", expr));
                };
                let value = self.expand(*value, bound)?;
                self.root(value);
                let items = [Value::Symbol(set_bang), *target, value];
                Ok(self.build_list(&items))
            }
            // Everything else (if, begin, call/cc, ordinary calls) expands
            // element-wise.
            _ => {
                let head = self.expand(head, bound)?;
                self.root(head);
                let (items, tail) = self.interp.list_elements(rest);
                if !tail.is_nil() {
                    return Err(self.malformed("expression", expr));
                }
                let mut out = vec![head];
                for item in items {
                    let e = self.expand(item, bound)?;
                    self.root(e);
                    out.push(e);
                }
                Ok(self.build_list(&out))
            }
        }
    }

    fn expand_list(
        &mut self,
        list: Value,
        bound: &mut Vec<SymbolId>,
        what: &str,
        form: Value,
    ) -> Result<Vec<Value>, ErrorInfo> {
        let items = self.proper_list(what, form, list)?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let e = self.expand(item, bound)?;
            self.root(e);
            out.push(e);
        }
        Ok(out)
    }

    /// Normalize `(define (f . args) body...)` into `(define f (lambda ...))`
    /// (same for `define-macro`) and expand the value expression.
    fn expand_define(
        &mut self,
        which: SymbolId,
        form: Value,
        rest: Value,
        bound: &mut Vec<SymbolId>,
    ) -> Result<Value, ErrorInfo> {
        let lambda = self.interp.ops.lambda;
        let Some((target, value_forms)) = self.cell_parts(rest) else {
            return Err(self.malformed("define", form));
        };
        let (name, value_expr) = if let Some((name, params)) = self.cell_parts(target) {
            // (define (f . params) body...)
            let body = self.proper_list("define", form, value_forms)?;
            let mut items = vec![Value::Symbol(lambda), params];
            items.extend(body);
            let lambda_expr = self.build_list(&items);
            (name, Some(lambda_expr))
        } else {
            let values = self.proper_list("define", form, value_forms)?;
            match values.as_slice() {
                [] => (target, None),
                [v] => (target, Some(*v)),
                _ => return Err(self.malformed("define", form)),
            }
        };
        if name.to_symbol().is_none() {
            return Err(self.malformed("define", form));
        }
        match value_expr {
            Some(v) => {
                let v = self.expand(v, bound)?;
                self.root(v);
                let items = [Value::Symbol(which), name, v];
                Ok(self.build_list(&items))
            }
            None => {
                let items = [Value::Symbol(which), name];
                Ok(self.build_list(&items))
            }
        }
    }

    fn macro_binding(&self, s: SymbolId) -> Option<Value> {
        let v = self.interp.refer_global(s)?;
        match self.interp.obj_kind(v) {
            Some(ObjKind::Macro(_)) => Some(v),
            _ => None,
        }
    }

    fn expand_macro_call(&mut self, mac: Value, form: Value) -> Result<Value, ErrorInfo> {
        let (_, args_list) = self.cell_parts(form).unwrap_or((Value::Nil, Value::Nil));
        let args = self.proper_list("macro call", form, args_list)?;
        self.interp.funcall(mac, &args).map_err(|e| {
            ErrorInfo::compile(format!(
                "macro expansion of {} failed: {}",
                self.interp.write_string(form),
                e
            ))
        })
    }

    /// Rewrite a quasiquote template into constructor calls. `depth` is the
    /// quasiquote nesting level; an unquote at depth one splices the
    /// expression in directly.
    fn lower_quasiquote(&mut self, template: Value, depth: usize) -> Result<Value, ErrorInfo> {
        let ops = &self.interp.ops;
        let (quote, quasiquote, unquote, unquote_splicing, sym_cons, sym_list, sym_append) = (
            ops.quote,
            ops.quasiquote,
            ops.unquote,
            ops.unquote_splicing,
            ops.sym_cons,
            ops.sym_list,
            ops.sym_append,
        );

        let Some((head, rest)) = self.cell_parts(template) else {
            // Atoms are constants.
            let items = [Value::Symbol(quote), template];
            return Ok(self.build_list(&items));
        };

        // (unquote x) and nested (quasiquote x) as whole templates.
        if let Some(h) = head.to_symbol() {
            if h == unquote {
                let items = self.proper_list("unquote", template, rest)?;
                let [inner] = items.as_slice() else {
                    return Err(self.malformed("unquote", template));
                };
                if depth == 1 {
                    return Ok(*inner);
                }
                let lowered = self.lower_quasiquote(*inner, depth - 1)?;
                let quoted_sym = self.quote_value(Value::Symbol(unquote));
                let items = [Value::Symbol(sym_list), quoted_sym, lowered];
                return Ok(self.build_list(&items));
            }
            if h == quasiquote {
                let items = self.proper_list("quasiquote", template, rest)?;
                let [inner] = items.as_slice() else {
                    return Err(self.malformed("quasiquote", template));
                };
                let lowered = self.lower_quasiquote(*inner, depth + 1)?;
                let quoted_sym = self.quote_value(Value::Symbol(quasiquote));
                let items = [Value::Symbol(sym_list), quoted_sym, lowered];
                return Ok(self.build_list(&items));
            }
            if h == unquote_splicing {
                // Valid only in element position of a deeper list walk; as
                // a whole template it either rebuilds as data (depth > 1)
                // or is malformed.
                let items = self.proper_list("unquote-splicing", template, rest)?;
                let [inner] = items.as_slice() else {
                    return Err(self.malformed("unquote-splicing", template));
                };
                if depth == 1 {
                    return Err(self.malformed("unquote-splicing outside a list", template));
                }
                let lowered = self.lower_quasiquote(*inner, depth - 1)?;
                let quoted_sym = self.quote_value(Value::Symbol(unquote_splicing));
                let items = [Value::Symbol(sym_list), quoted_sym, lowered];
                return Ok(self.build_list(&items));
            }
        }

        // A list template: walk one cell at a time so a splicing unquote
        // in element position turns into an append.
        if let Some((sh, srest)) = self.cell_parts(head) {
            if sh.to_symbol() == Some(unquote_splicing) && depth == 1 {
                let items = self.proper_list("unquote-splicing", head, srest)?;
                let [inner] = items.as_slice() else {
                    return Err(self.malformed("unquote-splicing", head));
                };
                let tail = self.lower_quasiquote(rest, depth)?;
                let items = [Value::Symbol(sym_append), *inner, tail];
                return Ok(self.build_list(&items));
            }
        }
        let car = self.lower_quasiquote(head, depth)?;
        self.root(car);
        let cdr = self.lower_quasiquote(rest, depth)?;
        self.root(cdr);
        let items = [Value::Symbol(sym_cons), car, cdr];
        Ok(self.build_list(&items))
    }

    fn quote_value(&mut self, v: Value) -> Value {
        let quote = self.interp.ops.quote;
        let items = [Value::Symbol(quote), v];
        self.build_list(&items)
    }

    // ---- pass 2: lexical analysis and emission -----------------------------

    fn compile_expr(
        &mut self,
        expr: Value,
        scope: &Scope,
        tail: bool,
        emit: &mut Emit,
    ) -> Result<(), ErrorInfo> {
        match expr {
            Value::Symbol(s) => {
                self.compile_ref(s, scope, emit);
                self.finish_leaf(tail, emit);
                Ok(())
            }
            Value::Obj(_) if self.cell_parts(expr).is_some() => {
                self.compile_form(expr, scope, tail, emit)
            }
            _ => {
                emit.op(self.interp.ops.const_);
                emit.val(expr);
                self.finish_leaf(tail, emit);
                Ok(())
            }
        }
    }

    fn finish_leaf(&mut self, tail: bool, emit: &mut Emit) {
        if tail {
            emit.op(self.interp.ops.ret);
        }
    }

    fn compile_ref(&mut self, s: SymbolId, scope: &Scope, emit: &mut Emit) {
        if let Some(i) = scope.param_slot(s) {
            emit.op(self.interp.ops.lref);
            emit.fix(i);
            if scope.boxed[i] {
                emit.op(self.interp.ops.unbox);
            }
        } else if let Some(j) = scope.free_slot(s) {
            emit.op(self.interp.ops.fref);
            emit.fix(j);
            if scope.free[j].boxed {
                emit.op(self.interp.ops.unbox);
            }
        } else {
            emit.op(self.interp.ops.gref);
            emit.val(Value::Symbol(s));
        }
    }

    fn compile_form(
        &mut self,
        expr: Value,
        scope: &Scope,
        tail: bool,
        emit: &mut Emit,
    ) -> Result<(), ErrorInfo> {
        let (head, rest) = self.cell_parts(expr).unwrap_or((Value::Nil, Value::Nil));
        if let Some(h) = head.to_symbol() {
            if !scope.binds(h) {
                let ops = &self.interp.ops;
                let (quote, if_, lambda, set_bang, define, begin, define_macro, call_cc, call_cc2) = (
                    ops.quote,
                    ops.if_,
                    ops.lambda,
                    ops.set_bang,
                    ops.define,
                    ops.begin,
                    ops.define_macro,
                    ops.call_cc,
                    ops.call_with_cc,
                );
                if h == quote {
                    return self.compile_quote(expr, rest, tail, emit);
                }
                if h == if_ {
                    return self.compile_if(expr, rest, scope, tail, emit);
                }
                if h == lambda {
                    self.compile_lambda(expr, rest, scope, emit)?;
                    self.finish_leaf(tail, emit);
                    return Ok(());
                }
                if h == set_bang {
                    return self.compile_set(expr, rest, scope, tail, emit);
                }
                if h == define {
                    return self.compile_define(expr, rest, scope, tail, emit);
                }
                if h == begin {
                    let body = self.proper_list("begin", expr, rest)?;
                    return self.compile_seq(&body, scope, tail, emit);
                }
                if h == define_macro {
                    return self.compile_define_macro(expr, rest, scope, tail, emit);
                }
                if h == call_cc || h == call_cc2 {
                    return self.compile_call_cc(expr, rest, scope, tail, emit);
                }
            }
        }
        self.compile_call(head, expr, rest, scope, tail, emit)
    }

    fn compile_quote(
        &mut self,
        expr: Value,
        rest: Value,
        tail: bool,
        emit: &mut Emit,
    ) -> Result<(), ErrorInfo> {
        let items = self.proper_list("quote", expr, rest)?;
        let [datum] = items.as_slice() else {
            return Err(self.malformed("quote", expr));
        };
        emit.op(self.interp.ops.const_);
        emit.val(*datum);
        self.finish_leaf(tail, emit);
        Ok(())
    }

    fn compile_if(
        &mut self,
        expr: Value,
        rest: Value,
        scope: &Scope,
        tail: bool,
        emit: &mut Emit,
    ) -> Result<(), ErrorInfo> {
        let items = self.proper_list("if", expr, rest)?;
        let (cond, then, alt) = match items.as_slice() {
            [c, t] => (*c, *t, None),
            [c, t, e] => (*c, *t, Some(*e)),
            _ => return Err(self.malformed("if", expr)),
        };
        self.compile_expr(cond, scope, false, emit)?;
        emit.op(self.interp.ops.test);
        let to_else = emit.placeholder();
        self.compile_expr(then, scope, tail, emit)?;
        if tail {
            emit.patch_here(to_else);
            match alt {
                Some(e) => self.compile_expr(e, scope, true, emit)?,
                None => {
                    emit.op(self.interp.ops.const_);
                    emit.val(Value::Nil);
                    emit.op(self.interp.ops.ret);
                }
            }
        } else {
            emit.op(self.interp.ops.jmp);
            let to_end = emit.placeholder();
            emit.patch_here(to_else);
            match alt {
                Some(e) => self.compile_expr(e, scope, false, emit)?,
                None => {
                    emit.op(self.interp.ops.const_);
                    emit.val(Value::Nil);
                }
            }
            emit.patch_here(to_end);
        }
        Ok(())
    }

    fn compile_set(
        &mut self,
        expr: Value,
        rest: Value,
        scope: &Scope,
        tail: bool,
        emit: &mut Emit,
    ) -> Result<(), ErrorInfo> {
        let items = self.proper_list("set!", expr, rest)?;
        let [target, value] = items.as_slice() else {
            return Err(self.malformed("set!", expr));
        };
        let Some(s) = target.to_symbol() else {
            return Err(self.malformed("set!", expr));
        };
        self.compile_expr(*value, scope, false, emit)?;
        if let Some(i) = scope.param_slot(s) {
            emit.op(self.interp.ops.lset);
            emit.fix(i);
        } else if let Some(j) = scope.free_slot(s) {
            emit.op(self.interp.ops.fset);
            emit.fix(j);
        } else {
            emit.op(self.interp.ops.gset);
            emit.val(Value::Symbol(s));
        }
        self.finish_leaf(tail, emit);
        Ok(())
    }

    fn compile_define(
        &mut self,
        expr: Value,
        rest: Value,
        scope: &Scope,
        tail: bool,
        emit: &mut Emit,
    ) -> Result<(), ErrorInfo> {
        let items = self.proper_list("define", expr, rest)?;
        let (name, value) = match items.as_slice() {
            [n] => (*n, None),
            [n, v] => (*n, Some(*v)),
            _ => return Err(self.malformed("define", expr)),
        };
        let Some(s) = name.to_symbol() else {
            return Err(self.malformed("define", expr));
        };
        match value {
            Some(v) => self.compile_expr(v, scope, false, emit)?,
            None => {
                emit.op(self.interp.ops.const_);
                emit.val(Value::Nil);
            }
        }
        emit.op(self.interp.ops.def);
        emit.val(Value::Symbol(s));
        self.finish_leaf(tail, emit);
        Ok(())
    }

    fn compile_define_macro(
        &mut self,
        expr: Value,
        rest: Value,
        scope: &Scope,
        tail: bool,
        emit: &mut Emit,
    ) -> Result<(), ErrorInfo> {
        let items = self.proper_list("define-macro", expr, rest)?;
        let [name, body] = items.as_slice() else {
            return Err(self.malformed("define-macro", expr));
        };
        let Some(s) = name.to_symbol() else {
            return Err(self.malformed("define-macro", expr));
        };
        // The body is a lambda expression (normalized in pass 1); binding
        // happens when the compiled form runs, so a macro defined by one
        // top-level form is available to the next.
        let is_lambda = self
            .cell_parts(*body)
            .and_then(|(h, _)| h.to_symbol())
            .is_some_and(|h| h == self.interp.ops.lambda);
        if !is_lambda {
            return Err(self.malformed("define-macro", expr));
        }
        self.compile_expr(*body, scope, false, emit)?;
        emit.op(self.interp.ops.macro_);
        emit.val(Value::Symbol(s));
        self.finish_leaf(tail, emit);
        Ok(())
    }

    fn compile_call_cc(
        &mut self,
        expr: Value,
        rest: Value,
        scope: &Scope,
        tail: bool,
        emit: &mut Emit,
    ) -> Result<(), ErrorInfo> {
        let items = self.proper_list("call/cc", expr, rest)?;
        let [receiver] = items.as_slice() else {
            return Err(self.malformed("call/cc", expr));
        };
        let frame_to = if !tail {
            emit.op(self.interp.ops.frame);
            Some(emit.placeholder())
        } else {
            None
        };
        emit.op(self.interp.ops.conti);
        emit.op(self.interp.ops.push);
        self.compile_expr(*receiver, scope, false, emit)?;
        if tail {
            emit.op(self.interp.ops.tapply);
        } else {
            emit.op(self.interp.ops.apply);
        }
        emit.fix(1);
        if let Some(at) = frame_to {
            emit.patch_here(at);
        }
        Ok(())
    }

    fn compile_call(
        &mut self,
        callee: Value,
        expr: Value,
        rest: Value,
        scope: &Scope,
        tail: bool,
        emit: &mut Emit,
    ) -> Result<(), ErrorInfo> {
        let args = self.proper_list("call", expr, rest)?;
        let frame_to = if !tail {
            emit.op(self.interp.ops.frame);
            Some(emit.placeholder())
        } else {
            None
        };
        for &arg in &args {
            self.compile_expr(arg, scope, false, emit)?;
            emit.op(self.interp.ops.push);
        }
        self.compile_expr(callee, scope, false, emit)?;
        if tail {
            emit.op(self.interp.ops.tapply);
        } else {
            emit.op(self.interp.ops.apply);
        }
        emit.fix(args.len());
        if let Some(at) = frame_to {
            emit.patch_here(at);
        }
        Ok(())
    }

    fn compile_seq(
        &mut self,
        body: &[Value],
        scope: &Scope,
        tail: bool,
        emit: &mut Emit,
    ) -> Result<(), ErrorInfo> {
        match body {
            [] => {
                emit.op(self.interp.ops.const_);
                emit.val(Value::Nil);
                self.finish_leaf(tail, emit);
                Ok(())
            }
            [init @ .., last] => {
                for &e in init {
                    self.compile_expr(e, scope, false, emit)?;
                }
                self.compile_expr(*last, scope, tail, emit)
            }
        }
    }

    fn compile_lambda(
        &mut self,
        expr: Value,
        rest: Value,
        scope: &Scope,
        emit: &mut Emit,
    ) -> Result<(), ErrorInfo> {
        let Some((params, body_list)) = self.cell_parts(rest) else {
            return Err(self.malformed("lambda", expr));
        };
        let (req, rest_param) = self.parse_params(expr, params)?;
        let body = self.proper_list("lambda", expr, body_list)?;

        let mut all_params = req.clone();
        all_params.extend(rest_param);

        // A parameter assigned anywhere in the body (nested lambdas
        // included) lives in a box.
        let mut assigned = Vec::new();
        let mut shadow = Vec::new();
        for &form in &body {
            self.collect_assigned(form, &mut shadow, &mut assigned);
        }
        let boxed: Vec<bool> = all_params.iter().map(|p| assigned.contains(p)).collect();

        // Free variables that resolve in the enclosing scope become
        // captures; anything else is a global reference.
        let mut refs = Vec::new();
        let mut bound = all_params.clone();
        for &form in &body {
            self.collect_free(form, &mut bound, &mut refs);
        }
        let mut free = Vec::new();
        for s in refs {
            if let Some(i) = scope.param_slot(s) {
                free.push(FreeVar { sym: s, boxed: scope.boxed[i] });
            } else if let Some(j) = scope.free_slot(s) {
                free.push(FreeVar { sym: s, boxed: scope.free[j].boxed });
            }
        }

        let child = Scope { params: all_params, boxed: boxed.clone(), free: free.clone() };

        let mut body_emit = Emit::new();
        for (i, is_boxed) in boxed.iter().enumerate() {
            if *is_boxed {
                body_emit.op(self.interp.ops.box_);
                body_emit.fix(i);
            }
        }
        self.compile_seq(&body, &child, true, &mut body_emit)?;
        let code = self.interp.vector(body_emit.code);
        self.root(code);

        // Push captures in free-slot order, then build the closure.
        for fv in &free {
            if let Some(i) = scope.param_slot(fv.sym) {
                emit.op(self.interp.ops.lref);
                emit.fix(i);
            } else if let Some(j) = scope.free_slot(fv.sym) {
                emit.op(self.interp.ops.fref);
                emit.fix(j);
            }
            emit.op(self.interp.ops.push);
        }
        emit.op(self.interp.ops.clos);
        emit.fix(free.len());
        emit.fix(req.len());
        emit.fix(if rest_param.is_some() { 1 } else { 0 });
        emit.val(code);
        Ok(())
    }

    /// Parse a parameter spec: `(a b)`, `(a b . r)`, or a bare rest symbol.
    fn parse_params(
        &self,
        form: Value,
        spec: Value,
    ) -> Result<(Vec<SymbolId>, Option<SymbolId>), ErrorInfo> {
        match spec {
            Value::Nil => Ok((Vec::new(), None)),
            Value::Symbol(s) => Ok((Vec::new(), Some(s))),
            _ => {
                let (items, tail) = self.interp.list_elements(spec);
                let mut req = Vec::with_capacity(items.len());
                for item in items {
                    match item.to_symbol() {
                        Some(s) => req.push(s),
                        None => return Err(self.malformed("parameter list", form)),
                    }
                }
                let rest = match tail {
                    Value::Nil => None,
                    Value::Symbol(s) => Some(s),
                    _ => return Err(self.malformed("parameter list", form)),
                };
                Ok((req, rest))
            }
        }
    }

    // ---- analysis ----------------------------------------------------------

    fn is_analysis_special(&self, h: SymbolId) -> bool {
        let ops = &self.interp.ops;
        h == ops.quote
            || h == ops.if_
            || h == ops.begin
            || h == ops.lambda
            || h == ops.set_bang
            || h == ops.define
            || h == ops.define_macro
            || h == ops.call_cc
            || h == ops.call_with_cc
    }

    /// Record every symbol that is the target of a `set!` and not shadowed
    /// by an inner lambda.
    fn collect_assigned(&self, expr: Value, shadow: &mut Vec<SymbolId>, acc: &mut Vec<SymbolId>) {
        let Some((head, rest)) = self.cell_parts(expr) else { return };
        let ops = &self.interp.ops;
        if let Some(h) = head.to_symbol() {
            if h == ops.quote {
                return;
            }
            if h == ops.lambda {
                if let Some((params, body)) = self.cell_parts(rest) {
                    let depth = shadow.len();
                    if let Ok((req, rest_param)) = self.parse_params(expr, params) {
                        shadow.extend(req);
                        shadow.extend(rest_param);
                    }
                    let (items, _) = self.interp.list_elements(body);
                    for item in items {
                        self.collect_assigned(item, shadow, acc);
                    }
                    shadow.truncate(depth);
                }
                return;
            }
            if h == ops.set_bang {
                let (items, _) = self.interp.list_elements(rest);
                if let [target, value] = items.as_slice() {
                    if let Some(s) = target.to_symbol() {
                        if !shadow.contains(&s) && !acc.contains(&s) {
                            acc.push(s);
                        }
                    }
                    self.collect_assigned(*value, shadow, acc);
                }
                return;
            }
        }
        let (items, tail) = self.interp.list_elements(expr);
        for item in items {
            self.collect_assigned(item, shadow, acc);
        }
        self.collect_assigned(tail, shadow, acc);
    }

    /// Record every referenced symbol not bound inside the walked tree, in
    /// first-reference order.
    fn collect_free(&self, expr: Value, bound: &mut Vec<SymbolId>, acc: &mut Vec<SymbolId>) {
        match expr {
            Value::Symbol(s) => {
                if !bound.contains(&s) && !acc.contains(&s) {
                    acc.push(s);
                }
            }
            Value::Obj(_) => {
                let Some((head, rest)) = self.cell_parts(expr) else { return };
                let ops = &self.interp.ops;
                if let Some(h) = head.to_symbol() {
                    if h == ops.quote {
                        return;
                    }
                    if h == ops.lambda {
                        if let Some((params, body)) = self.cell_parts(rest) {
                            let depth = bound.len();
                            if let Ok((req, rest_param)) = self.parse_params(expr, params) {
                                bound.extend(req);
                                bound.extend(rest_param);
                            }
                            let (items, _) = self.interp.list_elements(body);
                            for item in items {
                                self.collect_free(item, bound, acc);
                            }
                            bound.truncate(depth);
                        }
                        return;
                    }
                    if h == ops.set_bang {
                        let (items, _) = self.interp.list_elements(rest);
                        if let [target, value] = items.as_slice() {
                            // Assigning an outer variable is also a
                            // capturing reference.
                            if let Some(s) = target.to_symbol() {
                                if !bound.contains(&s) && !acc.contains(&s) {
                                    acc.push(s);
                                }
                            }
                            self.collect_free(*value, bound, acc);
                        }
                        return;
                    }
                    if h == ops.define || h == ops.define_macro {
                        // The target names a global; only the value refers.
                        let (items, _) = self.interp.list_elements(rest);
                        if let [_, value] = items.as_slice() {
                            self.collect_free(*value, bound, acc);
                        }
                        return;
                    }
                    if self.is_analysis_special(h) {
                        // if / begin / call/cc: walk operands, skip the head.
                        let (items, _) = self.interp.list_elements(rest);
                        for item in items {
                            self.collect_free(item, bound, acc);
                        }
                        return;
                    }
                }
                let (items, tail) = self.interp.list_elements(expr);
                for item in items {
                    self.collect_free(item, bound, acc);
                }
                self.collect_free(tail, bound, acc);
            }
            _ => {}
        }
    }
}
