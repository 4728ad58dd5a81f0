//! Printing builtins.
//!
//! All output goes to stdout; the interpreter core itself never prints.

use crate::interp::Interp;
use lyre_core::{ErrorInfo, Value};
use std::io::Write;

fn put(text: &str) {
    let mut out = std::io::stdout();
    let _ = out.write_all(text.as_bytes());
    let _ = out.flush();
}

/// `display` + newline, the quick debugging printer.
fn native_print(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let v = interp.get_arg(0);
    put(&format!("{}\n", interp.display_string(v)));
    Ok(v)
}

fn native_display(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let v = interp.get_arg(0);
    put(&interp.display_string(v));
    Ok(v)
}

fn native_write(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let v = interp.get_arg(0);
    put(&interp.write_string(v));
    Ok(v)
}

fn native_write_ss(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let v = interp.get_arg(0);
    put(&interp.write_shared_string(v));
    Ok(v)
}

fn native_newline(_interp: &mut Interp) -> Result<Value, ErrorInfo> {
    put("\n");
    Ok(Value::Nil)
}

pub(crate) fn install(interp: &mut Interp) {
    interp.define_native("print", native_print, 1, Some(1));
    interp.define_native("display", native_display, 1, Some(1));
    interp.define_native("write", native_write, 1, Some(1));
    interp.define_native("write/ss", native_write_ss, 1, Some(1));
    interp.define_native("newline", native_newline, 0, Some(0));
}
