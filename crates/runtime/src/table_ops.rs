//! Hash table builtins.
//!
//! `(make-hash-table)` defaults to identity keys; pass `'equal` or
//! `'string` for structural or string-content hashing.

use crate::interp::Interp;
use lyre_core::{ErrorInfo, HashPolicy, Value};

fn native_make_hash_table(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let policy = if interp.arg_count() == 0 {
        HashPolicy::Eq
    } else {
        let v = interp.get_arg(0);
        let eq = interp.intern("eq");
        let equal = interp.intern("equal");
        let string = interp.intern("string");
        if v == eq {
            HashPolicy::Eq
        } else if v == equal {
            HashPolicy::Equal
        } else if v == string {
            HashPolicy::Str
        } else {
            return Err(interp.type_error("one of eq, equal, string", v));
        }
    };
    Ok(interp.make_table(policy))
}

fn native_table_put(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let t = interp.expect_table(interp.get_arg(0))?;
    let (key, value) = (interp.get_arg(1), interp.get_arg(2));
    interp.heap.table_put(t, key, value);
    Ok(value)
}

fn native_table_get(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let t = interp.expect_table(interp.get_arg(0))?;
    let key = interp.get_arg(1);
    match interp.heap.table_get(t, key) {
        Some(v) => Ok(v),
        None if interp.arg_count() > 2 => Ok(interp.get_arg(2)),
        None => Ok(Value::Nil),
    }
}

fn native_table_exists(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let t = interp.expect_table(interp.get_arg(0))?;
    let key = interp.get_arg(1);
    Ok(Value::from(interp.heap.table_get(t, key).is_some()))
}

fn native_table_delete(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let t = interp.expect_table(interp.get_arg(0))?;
    let key = interp.get_arg(1);
    Ok(Value::from(interp.heap.table_remove(t, key)))
}

fn native_table_size(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let t = interp.expect_table(interp.get_arg(0))?;
    match interp.heap.kind(t) {
        lyre_core::ObjKind::Table(data) => Ok(Value::Fixnum(data.len() as i64)),
        _ => unreachable!("checked by expect_table"),
    }
}

pub(crate) fn install(interp: &mut Interp) {
    interp.define_native("make-hash-table", native_make_hash_table, 0, Some(1));
    interp.define_native("hash-table-put!", native_table_put, 3, Some(3));
    interp.define_native("hash-table-get", native_table_get, 2, Some(3));
    interp.define_native("hash-table-exists?", native_table_exists, 2, Some(2));
    interp.define_native("hash-table-delete!", native_table_delete, 2, Some(2));
    interp.define_native("hash-table-size", native_table_size, 1, Some(1));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let mut it = Interp::new();
        it.run_source(b"(define h (make-hash-table))").unwrap();
        assert_eq!(it.run_source(b"(hash-table-get h 'k)").unwrap(), Value::Nil);
        assert_eq!(it.run_source(b"(hash-table-get h 'k 0)").unwrap(), Value::Fixnum(0));
        it.run_source(b"(hash-table-put! h 'k 42)").unwrap();
        assert_eq!(it.run_source(b"(hash-table-get h 'k)").unwrap(), Value::Fixnum(42));
        assert_eq!(it.run_source(b"(hash-table-exists? h 'k)").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(hash-table-size h)").unwrap(), Value::Fixnum(1));
        assert_eq!(it.run_source(b"(hash-table-delete! h 'k)").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(hash-table-delete! h 'k)").unwrap(), Value::False);
        assert_eq!(it.run_source(b"(hash-table-exists? h 'k)").unwrap(), Value::False);
    }

    #[test]
    fn test_string_policy() {
        let mut it = Interp::new();
        it.run_source(b"(define h (make-hash-table 'string))").unwrap();
        it.run_source(b"(hash-table-put! h \"foo\" 1)").unwrap();
        // A different string object with the same content hits.
        assert_eq!(
            it.run_source(b"(hash-table-get h (string-append \"f\" \"oo\"))").unwrap(),
            Value::Fixnum(1)
        );
    }

    #[test]
    fn test_equal_policy_with_list_keys() {
        let mut it = Interp::new();
        it.run_source(b"(define h (make-hash-table 'equal))").unwrap();
        it.run_source(b"(hash-table-put! h '(1 2) 'hit)").unwrap();
        assert_eq!(
            it.run_source(b"(hash-table-get h (list 1 2))").unwrap(),
            it.intern("hit")
        );
    }
}
