//! Value printing.
//!
//! Three renderings: `display` (strings raw), `write` (strings quoted and
//! escaped, output re-readable for tree-shaped data), and `write/ss`
//! (additionally labels shared and cyclic cells/vectors with `#n=`/`#n#`,
//! so reading the output back reproduces the structure up to re-labeling).
//! The plain forms do not detect cycles; use `write/ss` for arbitrary data.

use crate::interp::Interp;
use lyre_core::{ObjKind, ObjRef, Value};
use std::collections::HashMap;

pub fn display_string(interp: &Interp, v: Value) -> String {
    Printer { interp, escape: false, shared: None, out: String::new() }.print(v)
}

pub fn write_string(interp: &Interp, v: Value) -> String {
    Printer { interp, escape: true, shared: None, out: String::new() }.print(v)
}

pub fn write_shared_string(interp: &Interp, v: Value) -> String {
    let mut counts = HashMap::new();
    count_shared(interp, v, &mut counts);
    let shared = SharedState { counts, labels: HashMap::new(), next: 0 };
    Printer { interp, escape: true, shared: Some(shared), out: String::new() }.print(v)
}

struct SharedState {
    /// Reference counts of every cell and vector in the tree; a count
    /// above one means the object gets a label.
    counts: HashMap<ObjRef, usize>,
    labels: HashMap<ObjRef, usize>,
    next: usize,
}

fn count_shared(interp: &Interp, v: Value, counts: &mut HashMap<ObjRef, usize>) {
    let Some(r) = v.to_obj() else { return };
    match interp.heap.kind(r) {
        ObjKind::Cell { car, cdr } => {
            let n = counts.entry(r).or_insert(0);
            *n += 1;
            if *n == 1 {
                let (car, cdr) = (*car, *cdr);
                count_shared(interp, car, counts);
                count_shared(interp, cdr, counts);
            }
        }
        ObjKind::Vector(slots) => {
            let n = counts.entry(r).or_insert(0);
            *n += 1;
            if *n == 1 {
                for &slot in slots.clone().iter() {
                    count_shared(interp, slot, counts);
                }
            }
        }
        _ => {}
    }
}

struct Printer<'i> {
    interp: &'i Interp,
    escape: bool,
    shared: Option<SharedState>,
    out: String,
}

impl<'i> Printer<'i> {
    fn print(mut self, v: Value) -> String {
        self.emit(v);
        self.out
    }

    fn emit(&mut self, v: Value) {
        match v {
            Value::Fixnum(n) => self.out.push_str(&n.to_string()),
            Value::Symbol(s) => self.out.push_str(self.interp.symbols.name(s)),
            Value::Nil => self.out.push_str("nil"),
            Value::True => self.out.push_str("#t"),
            Value::False => self.out.push_str("#f"),
            Value::Unbound => self.out.push_str("#<unbound>"),
            Value::Eof => self.out.push_str("#<eof>"),
            Value::Obj(r) => {
                if self.is_shared(r) {
                    if let Some(st) = &mut self.shared {
                        if let Some(&label) = st.labels.get(&r) {
                            self.out.push_str(&format!("#{}#", label));
                            return;
                        }
                        let label = st.next;
                        st.next += 1;
                        st.labels.insert(r, label);
                        self.out.push_str(&format!("#{}=", label));
                    }
                }
                self.emit_obj(r);
            }
        }
    }

    fn is_shared(&self, r: ObjRef) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|st| st.counts.get(&r).copied().unwrap_or(0) > 1)
    }

    fn emit_obj(&mut self, r: ObjRef) {
        let kind = self.interp.heap.kind(r);
        match kind {
            ObjKind::Cell { .. } => self.emit_pair(r),
            ObjKind::Str(bytes) => {
                let text = String::from_utf8_lossy(bytes).into_owned();
                if self.escape {
                    self.out.push('"');
                    for c in text.chars() {
                        match c {
                            '"' => self.out.push_str("\\\""),
                            '\\' => self.out.push_str("\\\\"),
                            '\n' => self.out.push_str("\\n"),
                            '\t' => self.out.push_str("\\t"),
                            '\r' => self.out.push_str("\\r"),
                            '\0' => self.out.push_str("\\0"),
                            c => self.out.push(c),
                        }
                    }
                    self.out.push('"');
                } else {
                    self.out.push_str(&text);
                }
            }
            ObjKind::Flonum(f) => self.out.push_str(&format!("{:?}", f)),
            ObjKind::Vector(slots) => {
                let slots = slots.clone();
                self.out.push_str("#(");
                for (i, &slot) in slots.iter().enumerate() {
                    if i > 0 {
                        self.out.push(' ');
                    }
                    self.emit(slot);
                }
                self.out.push(')');
            }
            ObjKind::Table(data) => {
                self.out.push_str(&format!("#<hash-table:{}>", data.len()));
            }
            ObjKind::Closure(_) => self.out.push_str("#<closure>"),
            ObjKind::Macro(_) => self.out.push_str("#<macro>"),
            ObjKind::Native(nd) => {
                let name = &self.interp.natives[nd.index as usize].name;
                self.out.push_str(&format!("#<native:{}>", name));
            }
            ObjKind::Continuation(_) => self.out.push_str("#<continuation>"),
            ObjKind::Box(v) => {
                let v = *v;
                self.out.push_str("#&");
                self.emit(v);
            }
        }
    }

    fn emit_pair(&mut self, r: ObjRef) {
        let (car, cdr) = self.cell_parts(r);
        self.out.push('(');
        self.emit(car);
        let mut tail = cdr;
        loop {
            match tail {
                Value::Nil => break,
                Value::Obj(t)
                    if matches!(self.interp.heap.kind(t), ObjKind::Cell { .. }) =>
                {
                    if self.is_shared(t) {
                        // A shared cdr cannot ride in list notation; it
                        // needs its own label site.
                        self.out.push_str(" . ");
                        self.emit(tail);
                        break;
                    }
                    let (car, cdr) = self.cell_parts(t);
                    self.out.push(' ');
                    self.emit(car);
                    tail = cdr;
                }
                other => {
                    self.out.push_str(" . ");
                    self.emit(other);
                    break;
                }
            }
        }
        self.out.push(')');
    }

    fn cell_parts(&self, r: ObjRef) -> (Value, Value) {
        match self.interp.heap.kind(r) {
            ObjKind::Cell { car, cdr } => (*car, *cdr),
            _ => (Value::Nil, Value::Nil),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_str;

    #[test]
    fn test_write_atoms() {
        let mut it = Interp::new();
        assert_eq!(it.write_string(Value::Fixnum(-42)), "-42");
        assert_eq!(it.write_string(Value::Nil), "nil");
        assert_eq!(it.write_string(Value::True), "#t");
        assert_eq!(it.write_string(Value::False), "#f");
        let f = it.flonum(1.25);
        assert_eq!(it.write_string(f), "1.25");
        let s = it.intern("foo");
        assert_eq!(it.write_string(s), "foo");
    }

    #[test]
    fn test_write_lists() {
        let mut it = Interp::new();
        let v = read_str(&mut it, "(1 (2) 3)").unwrap();
        assert_eq!(it.write_string(v), "(1 (2) 3)");
        let v = read_str(&mut it, "(1 2 . 3)").unwrap();
        assert_eq!(it.write_string(v), "(1 2 . 3)");
        let v = read_str(&mut it, "#(1 a \"x\")").unwrap();
        assert_eq!(it.write_string(v), "#(1 a \"x\")");
    }

    #[test]
    fn test_display_vs_write_strings() {
        let mut it = Interp::new();
        let v = it.string("a\tb\"c");
        assert_eq!(it.display_string(v), "a\tb\"c");
        assert_eq!(it.write_string(v), "\"a\\tb\\\"c\"");
    }

    #[test]
    fn test_write_round_trip() {
        let mut it = Interp::new();
        for text in ["(1 (2 (3)) . 4)", "(a \"s\" 1.5 #(1 2))", "(quote x)"] {
            let v = read_str(&mut it, text).unwrap();
            it.push_root(v);
            let written = it.write_string(v);
            let reparsed = read_str(&mut it, &written).unwrap();
            assert!(it.equal(v, reparsed), "round trip failed for {}", text);
            it.pop_root();
        }
    }

    #[test]
    fn test_shared_labels() {
        let mut it = Interp::new();
        let v = read_str(&mut it, "(#0=(a) #0#)").unwrap();
        assert_eq!(it.write_shared_string(v), "(#0=(a) #0#)");
    }

    #[test]
    fn test_cyclic_labels() {
        let mut it = Interp::new();
        let v = read_str(&mut it, "#0=(a . #0#)").unwrap();
        assert_eq!(it.write_shared_string(v), "#0=(a . #0#)");
    }

    #[test]
    fn test_shared_round_trip_re_labels() {
        let mut it = Interp::new();
        let v = read_str(&mut it, "(#7=(x y) #7# (z . #7#))").unwrap();
        it.push_root(v);
        let written = it.write_shared_string(v);
        let reparsed = read_str(&mut it, &written).unwrap();
        // Same sharing shape after re-reading: first and second elements eq.
        let a = it.car(reparsed).unwrap();
        let b = it.car(it.cdr(reparsed).unwrap()).unwrap();
        assert_eq!(a, b);
        assert!(it.equal(v, reparsed));
        it.pop_root();
    }
}
