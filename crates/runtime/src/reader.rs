//! S-expression reader.
//!
//! Input is a byte-at-a-time [`Source`]; one call to [`Reader::read`]
//! produces exactly one value or a [`ReadError`] code. Values under
//! construction are parked on the interpreter's temp-root stack so a
//! collection triggered mid-read cannot reclaim them.
//!
//! `#n=`/`#n#` labels are scoped to a single top-level read. A label is
//! bound to a placeholder cell before its body is read and the placeholder
//! is patched afterward, which is what makes cyclic references like
//! `#0=(a . #0#)` come out right.

use crate::interp::Interp;
use lyre_core::{ObjKind, ReadError, SymbolId, Value, utf8_decode};
use std::collections::HashMap;
use std::io::Read;

/// Byte stream with one-byte lookahead.
pub trait Source {
    fn peek(&mut self) -> Option<u8>;
    fn bump(&mut self);
}

pub struct SliceSource<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(bytes: &'a [u8]) -> SliceSource<'a> {
        SliceSource { bytes, pos: 0 }
    }
}

impl Source for SliceSource<'_> {
    fn peek(&mut self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
    }
}

/// Adapter over any `io::Read`; used by the launcher to read stdin a byte
/// at a time so the REPL never consumes past the current form. Read errors
/// surface as end of input.
pub struct ReadSource<R: Read> {
    inner: R,
    look: Option<u8>,
    eof: bool,
}

impl<R: Read> ReadSource<R> {
    pub fn new(inner: R) -> ReadSource<R> {
        ReadSource { inner, look: None, eof: false }
    }
}

impl<R: Read> Source for ReadSource<R> {
    fn peek(&mut self) -> Option<u8> {
        if self.look.is_none() && !self.eof {
            let mut buf = [0u8; 1];
            match self.inner.read(&mut buf) {
                Ok(1) => self.look = Some(buf[0]),
                _ => self.eof = true,
            }
        }
        self.look
    }

    fn bump(&mut self) {
        if self.look.is_none() {
            let _ = self.peek();
        }
        self.look = None;
    }
}

/// Outcome of reading one syntactic item inside a list context.
enum Item {
    Value(Value),
    Close,
    Dot,
}

pub struct Reader<S: Source> {
    src: S,
    labels: HashMap<i64, Value>,
}

impl<S: Source> Reader<S> {
    pub fn new(src: S) -> Reader<S> {
        Reader { src, labels: HashMap::new() }
    }

    /// Read one top-level value.
    pub fn read(&mut self, interp: &mut Interp) -> Result<Value, ReadError> {
        let base = interp.temp_roots.len();
        self.labels.clear();
        let result = match self.read_item(interp) {
            Ok(Item::Value(v)) => Ok(v),
            Ok(Item::Close) => Err(ReadError::ExtraCloseParen),
            Ok(Item::Dot) => Err(ReadError::DotAtBase),
            Err(e) => Err(e),
        };
        interp.temp_roots.truncate(base);
        result
    }

    /// Read an item, rejecting `)` and `.` (valid only inside a list).
    fn read_value(&mut self, interp: &mut Interp) -> Result<Value, ReadError> {
        match self.read_item(interp)? {
            Item::Value(v) => Ok(v),
            Item::Close => Err(ReadError::ExtraCloseParen),
            Item::Dot => Err(ReadError::DotAtBase),
        }
    }

    fn read_item(&mut self, interp: &mut Interp) -> Result<Item, ReadError> {
        self.skip_whitespace();
        let Some(c) = self.src.peek() else {
            return Err(ReadError::EndOfFile);
        };
        match c {
            b')' => {
                self.src.bump();
                Ok(Item::Close)
            }
            b'(' => {
                self.src.bump();
                self.read_list(interp).map(Item::Value)
            }
            b'"' => {
                self.src.bump();
                self.read_string(interp).map(Item::Value)
            }
            b'\'' => {
                self.src.bump();
                let sym = interp.ops.quote;
                self.read_quoted(interp, sym).map(Item::Value)
            }
            b'`' => {
                self.src.bump();
                let sym = interp.ops.quasiquote;
                self.read_quoted(interp, sym).map(Item::Value)
            }
            b',' => {
                self.src.bump();
                let sym = if self.src.peek() == Some(b'@') {
                    self.src.bump();
                    interp.ops.unquote_splicing
                } else {
                    interp.ops.unquote
                };
                self.read_quoted(interp, sym).map(Item::Value)
            }
            b'#' => {
                self.src.bump();
                self.read_hash(interp).map(Item::Value)
            }
            _ => self.read_token(interp),
        }
    }

    fn read_quoted(&mut self, interp: &mut Interp, sym: SymbolId) -> Result<Value, ReadError> {
        let inner = self.read_value(interp)?;
        interp.temp_roots.push(inner);
        let tail = interp.cons(inner, Value::Nil);
        interp.temp_roots.pop();
        Ok(interp.cons(Value::Symbol(sym), tail))
    }

    fn read_list(&mut self, interp: &mut Interp) -> Result<Value, ReadError> {
        let mark = interp.temp_roots.len();
        let mut first = true;
        loop {
            match self.read_item(interp) {
                Err(ReadError::EndOfFile) => return Err(ReadError::NoCloseParen),
                Err(e) => return Err(e),
                Ok(Item::Close) => {
                    let items = interp.temp_roots[mark..].to_vec();
                    let list = interp.list_from_slice(&items, Value::Nil);
                    interp.temp_roots.truncate(mark);
                    return Ok(list);
                }
                Ok(Item::Dot) => {
                    if first {
                        // "(. x)" has no car for the dot to follow.
                        return Err(ReadError::IllegalChar);
                    }
                    let tail = match self.read_item(interp) {
                        Ok(Item::Value(v)) => v,
                        Ok(_) | Err(ReadError::EndOfFile) => return Err(ReadError::NoCloseParen),
                        Err(e) => return Err(e),
                    };
                    interp.temp_roots.push(tail);
                    match self.read_item(interp) {
                        Ok(Item::Close) => {}
                        Ok(_) | Err(ReadError::EndOfFile) => return Err(ReadError::NoCloseParen),
                        Err(e) => return Err(e),
                    }
                    let items = interp.temp_roots[mark..interp.temp_roots.len() - 1].to_vec();
                    let list = interp.list_from_slice(&items, tail);
                    interp.temp_roots.truncate(mark);
                    return Ok(list);
                }
                Ok(Item::Value(v)) => {
                    interp.temp_roots.push(v);
                    first = false;
                }
            }
        }
    }

    fn read_string(&mut self, interp: &mut Interp) -> Result<Value, ReadError> {
        let mut bytes = Vec::new();
        loop {
            let Some(c) = self.src.peek() else {
                return Err(ReadError::NoCloseString);
            };
            self.src.bump();
            match c {
                b'"' => return Ok(interp.string_from_bytes(bytes)),
                b'\\' => {
                    let Some(e) = self.src.peek() else {
                        return Err(ReadError::NoCloseString);
                    };
                    self.src.bump();
                    bytes.push(match e {
                        b'n' => b'\n',
                        b't' => b'\t',
                        b'r' => b'\r',
                        b'0' => 0,
                        other => other,
                    });
                }
                other => bytes.push(other),
            }
        }
    }

    /// Everything after a `#`: characters, booleans, vectors, labels.
    fn read_hash(&mut self, interp: &mut Interp) -> Result<Value, ReadError> {
        match self.src.peek() {
            Some(b'\\') => {
                self.src.bump();
                self.read_char()
            }
            Some(b'(') => {
                self.src.bump();
                self.read_vector(interp)
            }
            Some(b't') => {
                self.src.bump();
                self.check_delimited(Value::True)
            }
            Some(b'f') => {
                self.src.bump();
                self.check_delimited(Value::False)
            }
            Some(c) if c.is_ascii_digit() => self.read_label(interp),
            _ => Err(ReadError::IllegalChar),
        }
    }

    fn check_delimited(&mut self, v: Value) -> Result<Value, ReadError> {
        match self.src.peek() {
            Some(c) if is_symbol_byte(c) => Err(ReadError::IllegalChar),
            _ => Ok(v),
        }
    }

    /// `#\X`: a single character (any UTF-8 code point) or a named one.
    fn read_char(&mut self) -> Result<Value, ReadError> {
        let Some(first) = self.src.peek() else {
            return Err(ReadError::IllegalChar);
        };
        self.src.bump();

        // Multi-byte sequences decode to their code point.
        if first >= 0x80 {
            let len = match first {
                0xc0..=0xdf => 2,
                0xe0..=0xef => 3,
                0xf0..=0xf7 => 4,
                _ => return Err(ReadError::IllegalChar),
            };
            let mut buf = vec![first];
            for _ in 1..len {
                let Some(b) = self.src.peek() else {
                    return Err(ReadError::IllegalChar);
                };
                self.src.bump();
                buf.push(b);
            }
            return match utf8_decode(&buf) {
                Some((cp, _)) => Ok(Value::Fixnum(cp as i64)),
                None => Err(ReadError::IllegalChar),
            };
        }

        // A letter followed by more letters is a character name.
        if first.is_ascii_alphabetic()
            && self.src.peek().is_some_and(|c| c.is_ascii_alphanumeric())
        {
            let mut name = vec![first];
            while let Some(c) = self.src.peek() {
                if !c.is_ascii_alphanumeric() {
                    break;
                }
                name.push(c);
                self.src.bump();
            }
            return match name.as_slice() {
                b"space" => Ok(Value::Fixnum(' ' as i64)),
                b"tab" => Ok(Value::Fixnum('\t' as i64)),
                b"nl" | b"newline" => Ok(Value::Fixnum('\n' as i64)),
                b"return" => Ok(Value::Fixnum('\r' as i64)),
                _ => Err(ReadError::IllegalChar),
            };
        }

        Ok(Value::Fixnum(first as i64))
    }

    fn read_vector(&mut self, interp: &mut Interp) -> Result<Value, ReadError> {
        let mark = interp.temp_roots.len();
        loop {
            match self.read_item(interp) {
                Err(ReadError::EndOfFile) => return Err(ReadError::NoCloseParen),
                Err(e) => return Err(e),
                Ok(Item::Dot) => return Err(ReadError::IllegalChar),
                Ok(Item::Close) => {
                    let items = interp.temp_roots[mark..].to_vec();
                    let vec = interp.vector(items);
                    interp.temp_roots.truncate(mark);
                    return Ok(vec);
                }
                Ok(Item::Value(v)) => interp.temp_roots.push(v),
            }
        }
    }

    /// `#n=EXPR` and `#n#`.
    fn read_label(&mut self, interp: &mut Interp) -> Result<Value, ReadError> {
        let mut n: i64 = 0;
        while let Some(c) = self.src.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            n = n * 10 + (c - b'0') as i64;
            self.src.bump();
        }
        match self.src.peek() {
            Some(b'=') => {
                self.src.bump();
                // Bind to a placeholder first so the body may refer back to
                // the label it is defining. The pin is popped before
                // returning: every caller roots the returned value itself,
                // which keeps the temp-root stack strictly nested.
                let placeholder = interp.cons(Value::Nil, Value::Nil);
                interp.temp_roots.push(placeholder);
                self.labels.insert(n, placeholder);
                let body = match self.read_value(interp) {
                    Ok(v) => v,
                    Err(e) => {
                        interp.temp_roots.pop();
                        return Err(e);
                    }
                };
                let result = match body.to_obj() {
                    Some(r) if matches!(interp.heap.kind(r), ObjKind::Cell { .. }) => {
                        let (car, cdr) = match interp.heap.kind(r) {
                            ObjKind::Cell { car, cdr } => (*car, *cdr),
                            _ => (Value::Nil, Value::Nil),
                        };
                        if let Some(p) = placeholder.to_obj() {
                            if let ObjKind::Cell { car: pc, cdr: pd } = interp.heap.kind_mut(p) {
                                *pc = car;
                                *pd = cdr;
                            }
                        }
                        placeholder
                    }
                    _ => {
                        // Atoms and vectors cannot be forward-referenced;
                        // rebind the label to the real value.
                        self.labels.insert(n, body);
                        body
                    }
                };
                interp.temp_roots.pop();
                Ok(result)
            }
            Some(b'#') => {
                self.src.bump();
                self.labels.get(&n).copied().ok_or(ReadError::IllegalChar)
            }
            _ => Err(ReadError::IllegalChar),
        }
    }

    fn read_token(&mut self, interp: &mut Interp) -> Result<Item, ReadError> {
        let mut token = Vec::new();
        while let Some(c) = self.src.peek() {
            if is_delimiter(c) {
                break;
            }
            token.push(c);
            self.src.bump();
        }
        if token == b"." {
            return Ok(Item::Dot);
        }
        classify_token(interp, &token).map(Item::Value)
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.src.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') => self.src.bump(),
                Some(b';') => {
                    while let Some(c) = self.src.peek() {
                        self.src.bump();
                        if c == b'\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }
}

fn is_delimiter(c: u8) -> bool {
    matches!(
        c,
        b' ' | b'\t' | b'\n' | b'\r' | b'(' | b')' | b';' | b'"' | b'\'' | b'`' | b','
    )
}

fn is_symbol_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric()
        || c >= 0x80
        || matches!(
            c,
            b'+' | b'-'
                | b'*'
                | b'/'
                | b'!'
                | b'?'
                | b'='
                | b'<'
                | b'>'
                | b':'
                | b'&'
                | b'$'
                | b'%'
                | b'_'
                | b'.'
        )
}

fn is_integer_token(token: &[u8]) -> bool {
    let digits = token.strip_prefix(b"-").unwrap_or(token);
    !digits.is_empty() && digits.iter().all(u8::is_ascii_digit)
}

/// Flonum grammar: sign, digits, then a fraction with digits on both sides
/// of the point, an exponent, or both. `1.` and `.5` are not flonums.
fn is_flonum_token(token: &[u8]) -> bool {
    let mut rest = token.strip_prefix(b"-").unwrap_or(token);
    let int_len = rest.iter().take_while(|c| c.is_ascii_digit()).count();
    if int_len == 0 {
        return false;
    }
    rest = &rest[int_len..];
    let mut saw_marker = false;
    if let Some(frac) = rest.strip_prefix(b".") {
        let frac_len = frac.iter().take_while(|c| c.is_ascii_digit()).count();
        if frac_len == 0 {
            return false;
        }
        rest = &frac[frac_len..];
        saw_marker = true;
    }
    if rest.first().is_some_and(|&c| c == b'e' || c == b'E') {
        let mut exp = &rest[1..];
        if exp.first().is_some_and(|&c| c == b'+' || c == b'-') {
            exp = &exp[1..];
        }
        if exp.is_empty() || !exp.iter().all(u8::is_ascii_digit) {
            return false;
        }
        rest = b"";
        saw_marker = true;
    }
    saw_marker && rest.is_empty()
}

fn classify_token(interp: &mut Interp, token: &[u8]) -> Result<Value, ReadError> {
    if token.is_empty() {
        return Err(ReadError::IllegalChar);
    }
    if is_integer_token(token) {
        let text = std::str::from_utf8(token).map_err(|_| ReadError::IllegalChar)?;
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::Fixnum(n));
        }
        // Out-of-range digit runs fall through to the symbol rules below
        // and are rejected there only if they contain illegal bytes.
    }
    if is_flonum_token(token) {
        let text = std::str::from_utf8(token).map_err(|_| ReadError::IllegalChar)?;
        if let Ok(f) = text.parse::<f64>() {
            return Ok(interp.flonum(f));
        }
    }
    if !token.iter().all(|&c| is_symbol_byte(c)) {
        return Err(ReadError::IllegalChar);
    }
    let text = std::str::from_utf8(token).map_err(|_| ReadError::IllegalChar)?;
    Ok(interp.intern(text))
}

/// Read the first value from an in-memory string.
pub fn read_str(interp: &mut Interp, s: &str) -> Result<Value, ReadError> {
    Reader::new(SliceSource::new(s.as_bytes())).read(interp)
}
