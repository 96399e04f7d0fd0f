//! Execution events.
//!
//! Plan instantiation and both enumerables report what they ran here.
//! Without the `tracing` feature every call compiles away.

#[cfg(feature = "tracing")]
pub fn emit_span(event: &str, key_values: &[(&str, String)]) {
    let fields = key_values
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ");
    tracing::trace_span!("qshape_exec", event).in_scope(|| {
        tracing::trace!(target: "qshape::exec", %event, %fields, "command");
    });
}

#[cfg(not(feature = "tracing"))]
pub fn emit_span(_event: &str, _key_values: &[(&str, String)]) {}
