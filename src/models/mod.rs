pub mod query;
pub mod span;

pub use query::{Operation, OperationQuery, TraceQueryParameters};
pub use span::{
    KeyValue, Log, ParseIdError, Process, RefType, Span, SpanId, SpanRef, TagValue, Trace, TraceId,
    SPAN_KIND_TAG,
};
