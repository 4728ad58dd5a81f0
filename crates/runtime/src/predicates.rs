//! Type predicates and equality builtins.

use crate::interp::Interp;
use lyre_core::{ErrorInfo, ObjKind, Value};

fn native_pair_p(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let v = interp.get_arg(0);
    Ok(Value::from(matches!(interp.obj_kind(v), Some(ObjKind::Cell { .. }))))
}

fn native_null_p(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    Ok(Value::from(interp.get_arg(0).is_nil()))
}

fn native_symbol_p(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    Ok(Value::from(matches!(interp.get_arg(0), Value::Symbol(_))))
}

fn native_number_p(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let v = interp.get_arg(0);
    let is_num =
        matches!(v, Value::Fixnum(_)) || matches!(interp.obj_kind(v), Some(ObjKind::Flonum(_)));
    Ok(Value::from(is_num))
}

fn native_string_p(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let v = interp.get_arg(0);
    Ok(Value::from(matches!(interp.obj_kind(v), Some(ObjKind::Str(_)))))
}

fn native_vector_p(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let v = interp.get_arg(0);
    Ok(Value::from(matches!(interp.obj_kind(v), Some(ObjKind::Vector(_)))))
}

fn native_procedure_p(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let v = interp.get_arg(0);
    let callable = matches!(
        interp.obj_kind(v),
        Some(ObjKind::Closure(_)) | Some(ObjKind::Native(_)) | Some(ObjKind::Continuation(_))
    );
    Ok(Value::from(callable))
}

fn native_boolean_p(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    Ok(Value::from(matches!(interp.get_arg(0), Value::True | Value::False)))
}

fn native_eof_p(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    Ok(Value::from(interp.get_arg(0) == Value::Eof))
}

fn native_eq_p(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    Ok(Value::from(interp.get_arg(0) == interp.get_arg(1)))
}

fn native_equal_p(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    Ok(Value::from(interp.equal(interp.get_arg(0), interp.get_arg(1))))
}

fn native_not(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    Ok(Value::from(!interp.get_arg(0).is_true()))
}

pub(crate) fn install(interp: &mut Interp) {
    interp.define_native("pair?", native_pair_p, 1, Some(1));
    interp.define_native("null?", native_null_p, 1, Some(1));
    interp.define_native("symbol?", native_symbol_p, 1, Some(1));
    interp.define_native("number?", native_number_p, 1, Some(1));
    interp.define_native("string?", native_string_p, 1, Some(1));
    interp.define_native("vector?", native_vector_p, 1, Some(1));
    interp.define_native("procedure?", native_procedure_p, 1, Some(1));
    interp.define_native("boolean?", native_boolean_p, 1, Some(1));
    interp.define_native("eof-object?", native_eof_p, 1, Some(1));
    interp.define_native("eq?", native_eq_p, 2, Some(2));
    interp.define_native("equal?", native_equal_p, 2, Some(2));
    interp.define_native("not", native_not, 1, Some(1));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_predicates() {
        let mut it = Interp::new();
        assert_eq!(it.run_source(b"(pair? '(1))").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(pair? nil)").unwrap(), Value::False);
        assert_eq!(it.run_source(b"(null? nil)").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(symbol? 'a)").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(number? 1.5)").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(string? \"s\")").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(vector? #(1))").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(procedure? car)").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(procedure? (lambda (x) x))").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(boolean? #f)").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(boolean? nil)").unwrap(), Value::False);
    }

    #[test]
    fn test_eq_vs_equal() {
        let mut it = Interp::new();
        assert_eq!(it.run_source(b"(eq? 'a 'a)").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(eq? '(1) '(1))").unwrap(), Value::False);
        assert_eq!(it.run_source(b"(equal? '(1 (2)) '(1 (2)))").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(equal? \"ab\" \"ab\")").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(equal? '(1) '(2))").unwrap(), Value::False);
    }

    #[test]
    fn test_not() {
        let mut it = Interp::new();
        assert_eq!(it.run_source(b"(not #f)").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(not nil)").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(not 0)").unwrap(), Value::False);
    }
}
