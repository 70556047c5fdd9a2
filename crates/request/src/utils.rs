//! Utility macros shared by the engine modules.

/// Returns early with an error if a condition is not met.
///
/// Works like `assert!` but yields `Err($error)` instead of panicking, which is how
/// lifecycle preconditions are rejected before any flag is touched.
///
/// ```ignore
/// ensure!(!flags.contains(Flag::EndTask), RequestError::EndAlreadyPending);
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
