//! String builtins.
//!
//! Strings are immutable byte buffers; lengths and indices are in bytes.

use crate::interp::Interp;
use crate::reader;
use lyre_core::{ErrorInfo, ObjKind, ReadError, Value};

fn str_bytes(interp: &Interp, v: Value) -> Result<Vec<u8>, ErrorInfo> {
    match interp.obj_kind(v) {
        Some(ObjKind::Str(bytes)) => Ok(bytes.to_vec()),
        _ => Err(interp.type_error("string", v)),
    }
}

fn native_string_length(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let bytes = str_bytes(interp, interp.get_arg(0))?;
    Ok(Value::Fixnum(bytes.len() as i64))
}

fn native_string_append(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let mut out = Vec::new();
    for i in 0..interp.arg_count() {
        out.extend(str_bytes(interp, interp.get_arg(i))?);
    }
    Ok(interp.string_from_bytes(out))
}

fn native_string_to_symbol(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let v = interp.get_arg(0);
    let bytes = str_bytes(interp, v)?;
    match String::from_utf8(bytes) {
        Ok(name) => Ok(interp.intern(&name)),
        Err(_) => Err(interp.type_error("utf-8 string", v)),
    }
}

fn native_symbol_to_string(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let v = interp.get_arg(0);
    match v {
        Value::Symbol(s) => {
            let name = interp.symbol_name(s).to_string();
            Ok(interp.string(&name))
        }
        _ => Err(interp.type_error("symbol", v)),
    }
}

fn native_number_to_string(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let v = interp.get_arg(0);
    let is_num =
        matches!(v, Value::Fixnum(_)) || matches!(interp.obj_kind(v), Some(ObjKind::Flonum(_)));
    if !is_num {
        return Err(interp.type_error("number", v));
    }
    let text = interp.write_string(v);
    Ok(interp.string(&text))
}

fn native_string_to_number(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let v = interp.get_arg(0);
    let bytes = str_bytes(interp, v)?;
    let Ok(text) = std::str::from_utf8(&bytes) else {
        return Ok(Value::Nil);
    };
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Value::Fixnum(n));
    }
    match text.parse::<f64>() {
        Ok(f) => Ok(interp.flonum(f)),
        Err(_) => Ok(Value::Nil),
    }
}

/// Read the first value from a string; end of input yields the eof object.
fn native_read_from_string(interp: &mut Interp) -> Result<Value, ErrorInfo> {
    let v = interp.get_arg(0);
    let bytes = str_bytes(interp, v)?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    match reader::read_str(interp, &text) {
        Ok(v) => Ok(v),
        Err(ReadError::EndOfFile) => Ok(Value::Eof),
        Err(e) => Err(ErrorInfo::read(e)),
    }
}

pub(crate) fn install(interp: &mut Interp) {
    interp.define_native("string-length", native_string_length, 1, Some(1));
    interp.define_native("string-append", native_string_append, 0, None);
    interp.define_native("string->symbol", native_string_to_symbol, 1, Some(1));
    interp.define_native("symbol->string", native_symbol_to_string, 1, Some(1));
    interp.define_native("number->string", native_number_to_string, 1, Some(1));
    interp.define_native("string->number", native_string_to_number, 1, Some(1));
    interp.define_native("read-from-string", native_read_from_string, 1, Some(1));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_length_is_bytes() {
        let mut it = Interp::new();
        assert_eq!(it.run_source(b"(string-length \"hello\")").unwrap(), Value::Fixnum(5));
        // U+3042 is three bytes of UTF-8.
        assert_eq!(
            it.run_source("(string-length \"\u{3042}\")".as_bytes()).unwrap(),
            Value::Fixnum(3)
        );
    }

    #[test]
    fn test_string_append() {
        let mut it = Interp::new();
        let v = it.run_source(b"(string-append \"foo\" \"-\" \"bar\")").unwrap();
        assert_eq!(it.display_string(v), "foo-bar");
        let v = it.run_source(b"(string-append)").unwrap();
        assert_eq!(it.display_string(v), "");
    }

    #[test]
    fn test_symbol_conversions() {
        let mut it = Interp::new();
        assert_eq!(it.run_source(b"(string->symbol \"abc\")").unwrap(), it.intern("abc"));
        let v = it.run_source(b"(symbol->string 'abc)").unwrap();
        assert_eq!(it.display_string(v), "abc");
    }

    #[test]
    fn test_number_conversions() {
        let mut it = Interp::new();
        let v = it.run_source(b"(number->string 42)").unwrap();
        assert_eq!(it.display_string(v), "42");
        assert_eq!(it.run_source(b"(string->number \"42\")").unwrap(), Value::Fixnum(42));
        let v = it.run_source(b"(string->number \"1.5\")").unwrap();
        assert_eq!(it.write_string(v), "1.5");
        assert_eq!(it.run_source(b"(string->number \"nope\")").unwrap(), Value::Nil);
    }

    #[test]
    fn test_read_from_string() {
        let mut it = Interp::new();
        let v = it.run_source(b"(read-from-string \"(1 2 3)\")").unwrap();
        assert_eq!(it.write_string(v), "(1 2 3)");
        assert_eq!(it.run_source(b"(read-from-string \"\")").unwrap(), Value::Eof);
        assert_eq!(it.run_source(b"(eof-object? (read-from-string \"\"))").unwrap(), Value::True);
    }
}
