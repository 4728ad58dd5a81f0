//! Embedded prelude.
//!
//! The prelude is written in the language itself and compiled at instance
//! construction: binding macros (`let`, `cond`, `and`, ...) and list
//! utilities. Modules load in order; `core` must come first because the
//! later files use its macros.

use crate::interp::Interp;
use std::sync::LazyLock;

static PRELUDE: LazyLock<Vec<(&'static str, &'static str)>> = LazyLock::new(|| {
    vec![
        ("core", include_str!("../prelude/core.lyre")),
        ("list", include_str!("../prelude/list.lyre")),
    ]
});

/// Names of the embedded prelude modules, in load order.
pub fn modules() -> Vec<&'static str> {
    PRELUDE.iter().map(|(name, _)| *name).collect()
}

pub(crate) fn install(interp: &mut Interp) {
    for (name, source) in PRELUDE.iter() {
        if let Err(e) = interp.run_source(source.as_bytes()) {
            // A prelude that does not load is a build defect, not a
            // recoverable runtime condition.
            panic!("prelude module '{}' failed to load: {}", name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyre_core::Value;

    #[test]
    fn test_modules_in_order() {
        assert_eq!(modules(), vec!["core", "list"]);
    }

    #[test]
    fn test_let_and_let_star() {
        let mut it = Interp::new();
        assert_eq!(it.run_source(b"(let ((a 1) (b 2)) (+ a b))").unwrap(), Value::Fixnum(3));
        assert_eq!(
            it.run_source(b"(let* ((a 1) (b (+ a 1))) (* a b))").unwrap(),
            Value::Fixnum(2)
        );
    }

    #[test]
    fn test_cond() {
        let mut it = Interp::new();
        let v = it
            .run_source(b"(define (sign n) (cond ((< n 0) 'neg) ((> n 0) 'pos) (else 'zero)))
                          (list (sign -5) (sign 5) (sign 0))")
            .unwrap();
        assert_eq!(it.write_string(v), "(neg pos zero)");
    }

    #[test]
    fn test_and_or() {
        let mut it = Interp::new();
        assert_eq!(it.run_source(b"(and 1 2 3)").unwrap(), Value::Fixnum(3));
        assert_eq!(it.run_source(b"(and 1 #f 3)").unwrap(), Value::False);
        assert_eq!(it.run_source(b"(and)").unwrap(), Value::True);
        assert_eq!(it.run_source(b"(or #f nil 7)").unwrap(), Value::Fixnum(7));
        assert_eq!(it.run_source(b"(or)").unwrap(), Value::False);
        // Short-circuit: the later form must not run.
        assert_eq!(it.run_source(b"(or 1 (undefined-fn))").unwrap(), Value::Fixnum(1));
    }

    #[test]
    fn test_when_unless() {
        let mut it = Interp::new();
        assert_eq!(it.run_source(b"(when #t 41 42)").unwrap(), Value::Fixnum(42));
        assert_eq!(it.run_source(b"(when #f 42)").unwrap(), Value::Nil);
        assert_eq!(it.run_source(b"(unless #f 42)").unwrap(), Value::Fixnum(42));
    }

    #[test]
    fn test_list_utilities() {
        let mut it = Interp::new();
        let v = it.run_source(b"(map (lambda (x) (* x x)) '(1 2 3))").unwrap();
        assert_eq!(it.write_string(v), "(1 4 9)");
        let v = it.run_source(b"(filter (lambda (x) (> x 1)) '(0 1 2 3))").unwrap();
        assert_eq!(it.write_string(v), "(2 3)");
        assert_eq!(
            it.run_source(b"(fold + 0 '(1 2 3 4))").unwrap(),
            Value::Fixnum(10)
        );
        let v = it.run_source(b"(assoc 'b '((a 1) (b 2)))").unwrap();
        assert_eq!(it.write_string(v), "(b 2)");
        let v = it.run_source(b"(member 2 '(1 2 3))").unwrap();
        assert_eq!(it.write_string(v), "(2 3)");
        assert_eq!(it.run_source(b"(list-ref '(a b c) 2)").unwrap(), it.intern("c"));
    }
}
