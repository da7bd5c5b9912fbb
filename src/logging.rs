//! Helper macros enforcing consistent greenlight log fields.
//!
//! These macros keep `unit` (and optionally `stack`) fields present on every log
//! emitted from orchestration layers so downstream parsing can rely on them.

/// Log an event for a unit/stack pair plus any extra fields.
#[macro_export]
macro_rules! stack_event {
    ($level:ident, $target:expr, $event:expr, unit = $unit:expr, stack = $stack:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target = $target,
            event = $event,
            unit = $unit,
            stack = $stack,
            $($field = %$value,)*
        )
    };
    ($level:ident, $target:expr, $event:expr, unit = $unit:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target = $target,
            event = $event,
            unit = $unit,
            $($field = %$value,)*
        )
    };
}
