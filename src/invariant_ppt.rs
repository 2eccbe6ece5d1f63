//! Runtime invariants with contract-test support.
//!
//! Production code states its invariants with [`assert_invariant!`]. Every
//! evaluation is counted per thread, so a test can first drive the code and
//! then call [`contract_test`] to prove that the invariants it cares about
//! were actually evaluated, not just declared.
//!
//! ```rust,ignore
//! use focusrig::invariant_ppt::contract_test;
//!
//! let _ = focusrig::segment::find_1d_grid(&profile, 7);
//! contract_test("grid segments", &["grid segment shorter than minimum length"]);
//! ```

use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    static CHECKED: RefCell<HashMap<&'static str, u64>> = RefCell::new(HashMap::new());
}

/// Check an invariant and record that it was evaluated.
///
/// Panics with the message (and optional context) when the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariant_ppt::__check($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariant_ppt::__check($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __check(condition: bool, message: &'static str, context: Option<&str>) {
    CHECKED.with(|checked| {
        *checked.borrow_mut().entry(message).or_insert(0) += 1;
    });
    if !condition {
        panic!(
            "invariant violated [{}]: {}",
            context.unwrap_or("focusrig"),
            message
        );
    }
}

/// How often the invariant with this message was evaluated on this thread.
pub fn checked_count(message: &str) -> u64 {
    CHECKED.with(|checked| checked.borrow().get(message).copied().unwrap_or(0))
}

/// Panic unless every listed invariant was evaluated at least once on this thread.
pub fn contract_test(name: &str, required: &[&str]) {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|message| checked_count(message) == 0)
        .collect();
    if !missing.is_empty() {
        panic!(
            "contract {name} not exercised, unchecked invariants:\n  - {}",
            missing.join("\n  - ")
        );
    }
}

/// Forget all recorded evaluations on this thread.
pub fn reset() {
    CHECKED.with(|checked| checked.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_evaluations() {
        reset();
        assert_invariant!(true, "always holds");
        assert_invariant!(1 + 1 == 2, "always holds", "arith");
        assert_eq!(checked_count("always holds"), 2);
        contract_test("self", &["always holds"]);
    }

    #[test]
    #[should_panic(expected = "invariant violated [unit]: never holds")]
    fn test_violation_panics() {
        assert_invariant!(false, "never holds", "unit");
    }

    #[test]
    #[should_panic(expected = "not exercised")]
    fn test_contract_reports_missing() {
        reset();
        contract_test("missing", &["was never checked"]);
    }
}
