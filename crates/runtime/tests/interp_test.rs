//! End-to-end interpreter scenarios: evaluation, closures, tail calls,
//! continuations, macros, host embedding and the boot image path.

use lyre_runtime::{ErrorKind, Interp, RuntimeKind, Value};

#[test]
fn test_arithmetic_evaluates() {
    let mut it = Interp::new();
    assert_eq!(it.run_source(b"(+ 1 2 3)").unwrap(), Value::Fixnum(6));
}

#[test]
fn test_funcall_from_host() {
    let mut it = Interp::new();
    let plus_sym = it.intern_id("+");
    let plus = it.refer_global(plus_sym).expect("+ is bound");
    let args = [Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3)];
    assert_eq!(it.funcall(plus, &args).unwrap(), Value::Fixnum(6));
}

#[test]
fn test_host_callback_square() {
    let mut it = Interp::new();
    it.define_native(
        "square",
        |it| {
            let x = match it.get_arg(0) {
                Value::Fixnum(n) => n,
                v => return Err(it.type_error("fixnum", v)),
            };
            Ok(Value::Fixnum(x * x))
        },
        1,
        Some(1),
    );
    assert_eq!(it.run_source(b"(square 1111)").unwrap(), Value::Fixnum(1234321));
}

#[test]
fn test_closure_captures_are_independent() {
    let mut it = Interp::new();
    it.run_source(
        b"(define (make-counter)
            (let ((n 0))
              (lambda () (set! n (+ n 1)) n)))
          (define a (make-counter))
          (define b (make-counter))",
    )
    .unwrap();
    assert_eq!(it.run_source(b"(a)").unwrap(), Value::Fixnum(1));
    assert_eq!(it.run_source(b"(a)").unwrap(), Value::Fixnum(2));
    // b has its own box.
    assert_eq!(it.run_source(b"(b)").unwrap(), Value::Fixnum(1));
    assert_eq!(it.run_source(b"(a)").unwrap(), Value::Fixnum(3));
}

#[test]
fn test_rest_arguments_collect_into_list() {
    let mut it = Interp::new();
    let v = it
        .run_source(b"((lambda (a . rest) (cons a rest)) 1 2 3 4)")
        .unwrap();
    assert_eq!(it.write_string(v), "(1 2 3 4)");
    let v = it.run_source(b"((lambda args args) 1 2)").unwrap();
    assert_eq!(it.write_string(v), "(1 2)");
    let v = it.run_source(b"((lambda (a . rest) rest) 1)").unwrap();
    assert_eq!(v, Value::Nil);
}

#[test]
fn test_arity_mismatch() {
    let mut it = Interp::new();
    let err = it.run_source(b"((lambda (a b) a) 1)").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime(RuntimeKind::ArityMismatch));
    it.reset_error();
    let err = it.run_source(b"(1 2)").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime(RuntimeKind::NonCallable));
}

#[test]
fn test_tail_loop_runs_in_constant_stack() {
    let mut it = Interp::new();
    it.run_source(b"(define (loop n) (if (= n 0) 0 (loop (- n 1))))")
        .unwrap();
    // A million iterations: only proper tail calls survive this.
    assert_eq!(it.run_source(b"(loop 1000000)").unwrap(), Value::Fixnum(0));
}

#[test]
fn test_mutual_tail_recursion() {
    let mut it = Interp::new();
    it.run_source(
        b"(define (even? n) (if (= n 0) #t (odd? (- n 1))))
          (define (odd? n) (if (= n 0) #f (even? (- n 1))))",
    )
    .unwrap();
    assert_eq!(it.run_source(b"(even? 100001)").unwrap(), Value::False);
}

#[test]
fn test_deep_non_tail_recursion_overflows_cleanly() {
    let mut it = Interp::new();
    it.run_source(b"(define (sum n) (if (= n 0) 0 (+ n (sum (- n 1)))))")
        .unwrap();
    let err = it.run_source(b"(sum 1000000)").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime(RuntimeKind::StackOverflow));
    it.reset_error();
    // Shallow depth still works after the failure.
    assert_eq!(it.run_source(b"(sum 100)").unwrap(), Value::Fixnum(5050));
}

#[test]
fn test_call_cc_early_exit() {
    let mut it = Interp::new();
    let v = it
        .run_source(b"(+ 1 (call/cc (lambda (k) (k 10))))")
        .unwrap();
    assert_eq!(v, Value::Fixnum(11));
    // Not invoking the continuation returns the receiver's value.
    let v = it
        .run_source(b"(+ 1 (call/cc (lambda (k) 5)))")
        .unwrap();
    assert_eq!(v, Value::Fixnum(6));
    // The long name is an alias.
    let v = it
        .run_source(b"(+ 1 (call-with-current-continuation (lambda (k) (k 41))))")
        .unwrap();
    assert_eq!(v, Value::Fixnum(42));
}

#[test]
fn test_call_cc_escapes_nested_context() {
    let mut it = Interp::new();
    let v = it
        .run_source(b"(call/cc (lambda (k) (+ 1 (* 10 (k 7)) 100)))")
        .unwrap();
    assert_eq!(v, Value::Fixnum(7));
}

#[test]
fn test_continuation_is_multi_shot() {
    let mut it = Interp::new();
    it.run_source(b"(define k #f)").unwrap();
    let first = it
        .run_source(b"(+ 1 (call/cc (lambda (c) (set! k c) 1)))")
        .unwrap();
    assert_eq!(first, Value::Fixnum(2));
    // Each invocation re-enters the saved control state with its own
    // accumulator value.
    assert_eq!(it.run_source(b"(k 10)").unwrap(), Value::Fixnum(11));
    assert_eq!(it.run_source(b"(k 100)").unwrap(), Value::Fixnum(101));
    assert_eq!(it.run_source(b"(k 10)").unwrap(), Value::Fixnum(11));
}

#[test]
fn test_define_macro_when() {
    let mut it = Interp::new();
    it.run_source(
        b"(define-macro (my-when c . body)
            (list 'if c (cons 'begin body) nil))",
    )
    .unwrap();
    assert_eq!(it.run_source(b"(my-when #t 42)").unwrap(), Value::Fixnum(42));
    assert_eq!(it.run_source(b"(my-when #f 42)").unwrap(), Value::Nil);
    // The macro body runs at compile time on unevaluated forms; side
    // effects of the guarded body must not leak.
    it.run_source(b"(define hits 0)").unwrap();
    it.run_source(b"(my-when #f (set! hits (+ hits 1)))").unwrap();
    let hits_sym = it.intern_id("hits");
    assert_eq!(it.refer_global(hits_sym), Some(Value::Fixnum(0)));
}

#[test]
fn test_macro_shadowed_by_lexical_binding() {
    let mut it = Interp::new();
    it.run_source(b"(define-macro (m . body) ''macro)").unwrap();
    // As a lexical variable, m is called as a function, not expanded.
    let v = it.run_source(b"((lambda (m) (m 5)) (lambda (x) (* x 2)))").unwrap();
    assert_eq!(v, Value::Fixnum(10));
}

#[test]
fn test_bytecode_text_round_trip() {
    let mut it = Interp::new();
    let expr = lyre_runtime::read_str(&mut it, "(+ 1 (* 2 3))").unwrap();
    it.push_root(expr);
    let code = it.compile(expr).unwrap();
    it.push_root(code);
    let text = it.write_shared_string(code);
    // The serialized form is readable text: reload it as a boot image.
    let v = it.load_boot_image(text.as_bytes()).unwrap();
    assert_eq!(v, Value::Fixnum(7));
}

#[test]
fn test_boot_image_defines_survive() {
    let mut it = Interp::new();
    let mut image = String::new();
    for form in ["(define base 30)", "(define (plus-base n) (+ n base))"] {
        let expr = lyre_runtime::read_str(&mut it, form).unwrap();
        it.push_root(expr);
        let code = it.compile(expr).unwrap();
        it.push_root(code);
        image.push_str(&it.write_shared_string(code));
        image.push('\n');
        it.pop_root();
        it.pop_root();
    }

    // A fresh instance boots from the serialized image alone.
    let mut fresh = Interp::new();
    fresh.load_boot_image(image.as_bytes()).unwrap();
    assert_eq!(fresh.run_source(b"(plus-base 12)").unwrap(), Value::Fixnum(42));
}

#[test]
fn test_main_global_convention() {
    let mut it = Interp::new();
    let main_sym = it.intern_id("main");
    assert_eq!(it.refer_global(main_sym), None);
    it.run_source(b"(define (main) 99)").unwrap();
    let main = it.refer_global(main_sym).expect("main is bound");
    assert_eq!(it.funcall(main, &[]).unwrap(), Value::Fixnum(99));
}

#[test]
fn test_gc_pressure_during_evaluation() {
    let mut it = Interp::new();
    // Build and discard plenty of garbage while keeping one structure
    // live through many collection cycles.
    let v = it
        .run_source(
            b"(define (build n acc)
                (if (= n 0) acc (build (- n 1) (cons n acc))))
              (define keep (build 50 nil))
              (define (churn n)
                (if (= n 0) 'done (begin (build 100 nil) (churn (- n 1)))))
              (churn 500)
              keep",
        )
        .unwrap();
    assert_eq!(it.list_length(v), 50);
    assert_eq!(it.car(v).unwrap(), Value::Fixnum(1));
    let stats = it.gc_stats();
    assert!(stats.collections > 0, "churn must have triggered the collector");
}

#[test]
fn test_reverse_invariants() {
    let mut it = Interp::new();
    let v = it
        .run_source(b"(define l '(1 2 3 4 5)) (equal? (reverse (reverse l)) l)")
        .unwrap();
    assert_eq!(v, Value::True);
    let v = it
        .run_source(b"(= (length (reverse (reverse l))) (length l))")
        .unwrap();
    assert_eq!(v, Value::True);
}

#[test]
fn test_run_file_and_missing_file() {
    use std::io::Write;
    let mut it = Interp::new();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "(define from-file 7) (* from-file 6)").unwrap();
    let v = it.run_file(file.path()).unwrap();
    assert_eq!(v, Value::Fixnum(42));

    let err = it.run_file(std::path::Path::new("/no/such/lyre/file.lyre")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::FileNotFound);
}

#[test]
fn test_native_reenters_through_funcall() {
    let mut it = Interp::new();
    // A native that calls back into script code.
    it.define_native(
        "call-twice",
        |it| {
            let f = it.get_arg(0);
            let once = it.funcall(f, &[Value::Fixnum(1)])?;
            it.funcall(f, &[once])
        },
        1,
        Some(1),
    );
    let v = it.run_source(b"(call-twice (lambda (x) (* x 10)))").unwrap();
    assert_eq!(v, Value::Fixnum(100));
}

#[test]
fn test_error_recovery_keeps_instance_usable() {
    let mut it = Interp::new();
    for (source, kind) in [
        (&b"(undefined-xyz)"[..], ErrorKind::Runtime(RuntimeKind::UnboundGlobal)),
        (b"(car 1)", ErrorKind::Runtime(RuntimeKind::TypeMismatch)),
        (b"(/ 1 0)", ErrorKind::Runtime(RuntimeKind::DivideByZero)),
        (b"(1)", ErrorKind::Runtime(RuntimeKind::NonCallable)),
    ] {
        let err = it.run_source(source).unwrap_err();
        assert_eq!(err.kind, kind);
        assert!(it.last_error().is_some());
        it.reset_error();
        assert!(it.last_error().is_none());
    }
    assert_eq!(it.run_source(b"(+ 2 2)").unwrap(), Value::Fixnum(4));
}
