//! Pair and list builtins.

use crate::interp::Interp;
use lyre_core::{ErrorInfo, ObjKind, Value};

fn native_cons(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let (car, cdr) = (interp.get_arg(0), interp.get_arg(1));
    Ok(interp.cons(car, cdr))
}

fn native_car(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    interp.car(interp.get_arg(0))
}

fn native_cdr(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    interp.cdr(interp.get_arg(0))
}

fn set_part(interp: &mut Interp, set_car: bool) -> Result<Value, ErrorInfo> {
    let target = interp.get_arg(0);
    let value = interp.get_arg(1);
    match target.to_obj() {
        Some(r) if matches!(interp.heap.kind(r), ObjKind::Cell { .. }) => {
            if let ObjKind::Cell { car, cdr } = interp.heap.kind_mut(r) {
                if set_car {
                    *car = value;
                } else {
                    *cdr = value;
                }
            }
            Ok(target)
        }
        _ => Err(interp.type_error("pair", target)),
    }
}

fn native_set_car(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    set_part(interp, true)
}

fn native_set_cdr(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    set_part(interp, false)
}

fn native_list(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let items: Vec<Value> = (0..interp.arg_count()).map(|i| interp.get_arg(i)).collect();
    Ok(interp.list_from_slice(&items, Value::Nil))
}

fn native_length(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    Ok(Value::Fixnum(interp.list_length(interp.get_arg(0)) as i64))
}

fn native_reverse(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let (mut items, _) = interp.list_elements(interp.get_arg(0));
    items.reverse();
    Ok(interp.list_from_slice(&items, Value::Nil))
}

fn native_append(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let argc = interp.arg_count();
    if argc == 0 {
        return Ok(Value::Nil);
    }
    // The last argument becomes the shared tail; earlier ones are copied
    // and must be proper lists.
    let mut result = interp.get_arg(argc - 1);
    for i in (0..argc - 1).rev() {
        let arg = interp.get_arg(i);
        let (items, tail) = interp.list_elements(arg);
        if !tail.is_nil() {
            return Err(interp.type_error("proper list", arg));
        }
        result = interp.list_from_slice(&items, result);
    }
    Ok(result)
}

pub(crate) fn install(interp: &mut Interp) {
    interp.define_native("cons", native_cons, 2, Some(2));
    interp.define_native("car", native_car, 1, Some(1));
    interp.define_native("cdr", native_cdr, 1, Some(1));
    interp.define_native("set-car!", native_set_car, 2, Some(2));
    interp.define_native("set-cdr!", native_set_cdr, 2, Some(2));
    interp.define_native("list", native_list, 0, None);
    interp.define_native("length", native_length, 1, Some(1));
    interp.define_native("reverse", native_reverse, 1, Some(1));
    interp.define_native("append", native_append, 0, None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyre_core::{ErrorKind, RuntimeKind};

    #[test]
    fn test_cons_car_cdr() {
        let mut it = Interp::new();
        let v = it.run_source(b"(cons 1 2)").unwrap();
        assert_eq!(it.write_string(v), "(1 . 2)");
        assert_eq!(it.run_source(b"(car '(1 2))").unwrap(), Value::Fixnum(1));
        let v = it.run_source(b"(cdr '(1 2))").unwrap();
        assert_eq!(it.write_string(v), "(2)");
        let err = it.run_source(b"(car 5)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime(RuntimeKind::TypeMismatch));
    }

    #[test]
    fn test_mutators() {
        let mut it = Interp::new();
        let v = it
            .run_source(b"(define p (cons 1 2)) (set-car! p 10) (set-cdr! p 20) p")
            .unwrap();
        assert_eq!(it.write_string(v), "(10 . 20)");
    }

    #[test]
    fn test_length_and_reverse() {
        let mut it = Interp::new();
        assert_eq!(it.run_source(b"(length nil)").unwrap(), Value::Fixnum(0));
        assert_eq!(it.run_source(b"(length '(1 2 3))").unwrap(), Value::Fixnum(3));
        // Dotted: only spine cells count, as in the original.
        assert_eq!(it.run_source(b"(length (cons 1 2))").unwrap(), Value::Fixnum(1));

        let v = it.run_source(b"(reverse '(1 2 3))").unwrap();
        assert_eq!(it.write_string(v), "(3 2 1)");
        // Double reverse restores the list.
        let v = it.run_source(b"(reverse (reverse '(1 2 3 4)))").unwrap();
        assert_eq!(it.write_string(v), "(1 2 3 4)");
    }

    #[test]
    fn test_append() {
        let mut it = Interp::new();
        let v = it.run_source(b"(append '(1 2) '(3) '(4 5))").unwrap();
        assert_eq!(it.write_string(v), "(1 2 3 4 5)");
        assert_eq!(it.run_source(b"(append)").unwrap(), Value::Nil);
        // The last argument is shared, not copied.
        let shared = it
            .run_source(b"(define t '(9)) (eq? (cdr (append '(1) t)) t)")
            .unwrap();
        assert_eq!(shared, Value::True);
        let err = it.run_source(b"(append (cons 1 2) '(3))").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime(RuntimeKind::TypeMismatch));
    }
}
