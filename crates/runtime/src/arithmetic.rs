//! Numeric builtins.
//!
//! Fixnum arithmetic wraps on overflow; any flonum operand promotes the
//! whole operation to flonum. Division and modulo by a zero fixnum raise
//! `DivideByZero`.

use crate::interp::Interp;
use lyre_core::{ErrorInfo, ObjKind, RuntimeKind, Value};

#[derive(Clone, Copy)]
enum Num {
    Fix(i64),
    Flo(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Fix(n) => n as f64,
            Num::Flo(f) => f,
        }
    }
}

fn num_arg(interp: &Interp, i: usize) -> Result<Num, ErrorInfo> {
    let v = interp.get_arg(i);
    match v {
        Value::Fixnum(n) => Ok(Num::Fix(n)),
        _ => match interp.obj_kind(v) {
            Some(ObjKind::Flonum(f)) => Ok(Num::Flo(*f)),
            _ => Err(interp.type_error("number", v)),
        },
    }
}

fn num_value(interp: &mut Interp, n: Num) -> Value {
    match n {
        Num::Fix(n) => Value::Fixnum(n),
        Num::Flo(f) => interp.flonum(f),
    }
}

fn native_add(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let mut acc = Num::Fix(0);
    for i in 0..interp.arg_count() {
        acc = match (acc, num_arg(interp, i)?) {
            (Num::Fix(a), Num::Fix(b)) => Num::Fix(a.wrapping_add(b)),
            (a, b) => Num::Flo(a.as_f64() + b.as_f64()),
        };
    }
    Ok(num_value(interp, acc))
}

fn native_sub(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let first = num_arg(interp, 0)?;
    if interp.arg_count() == 1 {
        let negated = match first {
            Num::Fix(n) => Num::Fix(n.wrapping_neg()),
            Num::Flo(f) => Num::Flo(-f),
        };
        return Ok(num_value(interp, negated));
    }
    let mut acc = first;
    for i in 1..interp.arg_count() {
        acc = match (acc, num_arg(interp, i)?) {
            (Num::Fix(a), Num::Fix(b)) => Num::Fix(a.wrapping_sub(b)),
            (a, b) => Num::Flo(a.as_f64() - b.as_f64()),
        };
    }
    Ok(num_value(interp, acc))
}

fn native_mul(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let mut acc = Num::Fix(1);
    for i in 0..interp.arg_count() {
        acc = match (acc, num_arg(interp, i)?) {
            (Num::Fix(a), Num::Fix(b)) => Num::Fix(a.wrapping_mul(b)),
            (a, b) => Num::Flo(a.as_f64() * b.as_f64()),
        };
    }
    Ok(num_value(interp, acc))
}

fn div_step(acc: Num, b: Num) -> Result<Num, ErrorInfo> {
    match (acc, b) {
        (Num::Fix(a), Num::Fix(b)) => {
            if b == 0 {
                Err(ErrorInfo::runtime(RuntimeKind::DivideByZero, "fixnum division by zero"))
            } else {
                Ok(Num::Fix(a.wrapping_div(b)))
            }
        }
        (a, b) => Ok(Num::Flo(a.as_f64() / b.as_f64())),
    }
}

fn native_div(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let first = num_arg(interp, 0)?;
    if interp.arg_count() == 1 {
        let inverted = div_step(Num::Fix(1), first)?;
        return Ok(num_value(interp, inverted));
    }
    let mut acc = first;
    for i in 1..interp.arg_count() {
        acc = div_step(acc, num_arg(interp, i)?)?;
    }
    Ok(num_value(interp, acc))
}

fn native_mod(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    match (num_arg(interp, 0)?, num_arg(interp, 1)?) {
        (Num::Fix(a), Num::Fix(b)) => {
            if b == 0 {
                Err(ErrorInfo::runtime(RuntimeKind::DivideByZero, "mod by zero"))
            } else {
                Ok(Value::Fixnum(a.wrapping_rem(b)))
            }
        }
        (a, b) => {
            let r = a.as_f64() % b.as_f64();
            Ok(num_value(interp, Num::Flo(r)))
        }
    }
}

fn compare_chain(
    interp: &mut Interp,
    pred: fn(f64, f64) -> bool,
    int_pred: fn(i64, i64) -> bool,
) -> Result<Value, ErrorInfo> {
    for i in 1..interp.arg_count() {
        let a = num_arg(interp, i - 1)?;
        let b = num_arg(interp, i)?;
        let holds = match (a, b) {
            (Num::Fix(x), Num::Fix(y)) => int_pred(x, y),
            (x, y) => pred(x.as_f64(), y.as_f64()),
        };
        if !holds {
            return Ok(Value::False);
        }
    }
    Ok(Value::True)
}

fn native_num_eq(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    compare_chain(interp, |a, b| a == b, |a, b| a == b)
}

fn native_lt(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    compare_chain(interp, |a, b| a < b, |a, b| a < b)
}

fn native_gt(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    compare_chain(interp, |a, b| a > b, |a, b| a > b)
}

fn native_le(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    compare_chain(interp, |a, b| a <= b, |a, b| a <= b)
}

fn native_ge(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    compare_chain(interp, |a, b| a >= b, |a, b| a >= b)
}

pub(crate) fn install(interp: &mut Interp) {
    interp.define_native("+", native_add, 0, None);
    interp.define_native("-", native_sub, 1, None);
    interp.define_native("*", native_mul, 0, None);
    interp.define_native("/", native_div, 1, None);
    interp.define_native("mod", native_mod, 2, Some(2));
    interp.define_native("=", native_num_eq, 2, None);
    interp.define_native("<", native_lt, 2, None);
    interp.define_native(">", native_gt, 2, None);
    interp.define_native("<=", native_le, 2, None);
    interp.define_native(">=", native_ge, 2, None);
}
