//! System-level builtins: `gensym`, `compile`, `apply`.

use crate::interp::Interp;
use lyre_core::{ErrorInfo, Value};

fn native_gensym(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    Ok(interp.gensym())
}

/// `(compile expr)` yields the bytecode vector, or `#f` with the error
/// slot holding the diagnostic.
fn native_compile(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let expr = interp.get_arg(0);
    match interp.compile(expr) {
        Ok(code) => Ok(code),
        Err(_) => Ok(Value::False),
    }
}

/// `(apply f args)` calls through the re-entrant funcall path.
fn native_apply(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let f = interp.get_arg(0);
    let list = interp.get_arg(1);
    let (args, tail) = interp.list_elements(list);
    if !tail.is_nil() {
        return Err(interp.type_error("proper argument list", list));
    }
    interp.funcall(f, &args)
}

pub(crate) fn install(interp: &mut Interp) {
    interp.define_native("gensym", native_gensym, 0, Some(0));
    interp.define_native("compile", native_compile, 1, Some(1));
    interp.define_native("apply", native_apply, 2, Some(2));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gensym_distinct() {
        let mut it = Interp::new();
        let v = it.run_source(b"(eq? (gensym) (gensym))").unwrap();
        assert_eq!(v, Value::False);
    }

    #[test]
    fn test_compile_returns_bytecode_or_false() {
        let mut it = Interp::new();
        let code = it.run_source(b"(compile '(+ 1 2))").unwrap();
        // The compiled form runs to the expected value.
        assert_eq!(it.run_bytecode(code).unwrap(), Value::Fixnum(3));

        let v = it.run_source(b"(compile '(if))").unwrap();
        assert_eq!(v, Value::False);
        assert!(it.last_error().is_some());
    }

    #[test]
    fn test_apply() {
        let mut it = Interp::new();
        assert_eq!(it.run_source(b"(apply + '(1 2 3))").unwrap(), Value::Fixnum(6));
        assert_eq!(
            it.run_source(b"(apply (lambda (a b) (- a b)) '(10 4))").unwrap(),
            Value::Fixnum(6)
        );
    }
}
