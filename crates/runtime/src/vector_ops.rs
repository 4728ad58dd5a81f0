//! Vector builtins.

use crate::interp::Interp;
use lyre_core::{ErrorInfo, ObjKind, ObjRef, Value};

fn expect_vector(interp: &Interp, v: Value) -> Result<ObjRef, ErrorInfo> {
    match v.to_obj() {
        Some(r) if matches!(interp.heap.kind(r), ObjKind::Vector(_)) => Ok(r),
        _ => Err(interp.type_error("vector", v)),
    }
}

fn index_arg(interp: &Interp, i: usize, len: usize, v: Value) -> Result<usize, ErrorInfo> {
    match interp.get_arg(i) {
        Value::Fixnum(n) if n >= 0 && (n as usize) < len => Ok(n as usize),
        _ => Err(interp.type_error(&format!("index below {}", len), v)),
    }
}

fn native_make_vector(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let n = match interp.get_arg(0) {
        Value::Fixnum(n) if n >= 0 => n as usize,
        v => return Err(interp.type_error("non-negative fixnum", v)),
    };
    let fill = if interp.arg_count() > 1 { interp.get_arg(1) } else { Value::Nil };
    Ok(interp.vector(vec![fill; n]))
}

fn native_vector(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let items: Vec<Value> = (0..interp.arg_count()).map(|i| interp.get_arg(i)).collect();
    Ok(interp.vector(items))
}

fn native_vector_length(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let r = expect_vector(interp, interp.get_arg(0))?;
    match interp.heap.kind(r) {
        ObjKind::Vector(slots) => Ok(Value::Fixnum(slots.len() as i64)),
        _ => unreachable!("checked by expect_vector"),
    }
}

fn native_vector_ref(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let vec = interp.get_arg(0);
    let r = expect_vector(interp, vec)?;
    let len = match interp.heap.kind(r) {
        ObjKind::Vector(slots) => slots.len(),
        _ => 0,
    };
    let idx = index_arg(interp, 1, len, interp.get_arg(1))?;
    match interp.heap.kind(r) {
        ObjKind::Vector(slots) => Ok(slots[idx]),
        _ => unreachable!("checked by expect_vector"),
    }
}

fn native_vector_set(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let vec = interp.get_arg(0);
    let r = expect_vector(interp, vec)?;
    let len = match interp.heap.kind(r) {
        ObjKind::Vector(slots) => slots.len(),
        _ => 0,
    };
    let idx = index_arg(interp, 1, len, interp.get_arg(1))?;
    let value = interp.get_arg(2);
    if let ObjKind::Vector(slots) = interp.heap.kind_mut(r) {
        slots[idx] = value;
    }
    Ok(vec)
}

pub(crate) fn install(interp: &mut Interp) {
    interp.define_native("make-vector", native_make_vector, 1, Some(2));
    interp.define_native("vector", native_vector, 0, None);
    interp.define_native("vector-length", native_vector_length, 1, Some(1));
    interp.define_native("vector-ref", native_vector_ref, 2, Some(2));
    interp.define_native("vector-set!", native_vector_set, 3, Some(3));
}
