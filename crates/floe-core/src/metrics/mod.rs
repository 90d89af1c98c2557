//! Metrics emission.
//!
//! Events are plain structs implementing [`events::InternalEvent`]; the
//! `emit!` macro records them through the `metrics` facade. No exporter is
//! installed here, the embedding process decides where metrics go.

pub mod events;

/// Macro for emitting metric events (Vector-style pattern).
///
/// ```ignore
/// use floe_core::emit;
/// use floe_core::metrics::events::RecordsEncoded;
///
/// emit!(RecordsEncoded { count: 100, target: "p.d.t".to_string() });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
