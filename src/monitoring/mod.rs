/*!
 * Monitoring
 * Structured tracing setup and timed operation spans
 */

mod tracer;

pub use tracer::{init_test_tracing, init_tracing, span_operation, OperationSpan};
