//! Request handlers.

use std::sync::Arc;

use crate::connection::Task;

/// Terminal request processing step.
///
/// Any `Fn(Arc<Task>) + Send + Sync` closure is a handler; implement the
/// trait directly when the handler carries state or configuration.
pub trait Handler: Send + Sync {
    fn service(&self, task: Arc<Task>);
}

impl<F> Handler for F
where
    F: Fn(Arc<Task>) + Send + Sync,
{
    fn service(&self, task: Arc<Task>) {
        self(task)
    }
}

/// Fallback used when routing fails or the matched layer has no handler.
/// Writes a JSON body describing the miss and drops keep-alive so the
/// connection does not linger.
pub(crate) struct NotFoundHandler;

impl Handler for NotFoundHandler {
    fn service(&self, task: Arc<Task>) {
        task.set_status(http::StatusCode::NOT_FOUND);
        task.set_header(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        task.set_body(
            serde_json::json!({
                "message": "Service is not available currently",
                "code": 404,
            })
            .to_string()
            .into_bytes(),
        );
        task.set_keep_alive(false);
    }
}
