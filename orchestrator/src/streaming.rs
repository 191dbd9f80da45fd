use std::sync::Arc;

use async_stream::try_stream;
use futures::StreamExt;

use common::backend::EventStream;
use common::hooks::{dispatch, PipelineHooks};

/// Wraps a backend stream so deltas pass straight through while the full
/// answer accumulates; `on_generation_end` fires once the producer is
/// drained. Errors are reported through `on_error` and forwarded to the
/// consumer. Dropping the returned stream drops the inner one, cancelling
/// the backend's connection.
pub fn monitor_stream(inner: EventStream, hooks: Arc<dyn PipelineHooks>) -> EventStream {
    Box::pin(try_stream! {
        let mut inner = inner;
        let mut full_answer = String::new();
        while let Some(event) = inner.next().await {
            match event {
                Ok(event) => {
                    full_answer.push_str(&event.delta);
                    yield event;
                }
                Err(err) => {
                    dispatch(|| hooks.on_error(&err));
                    Err(err)?;
                }
            }
        }
        dispatch(|| hooks.on_generation_end(&full_answer));
    })
}
