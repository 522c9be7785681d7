//! Handler traits.
//!
//! Two layers, same as the typed task API:
//! - **Surface (typed)**: `TypedJob` + `Handler<T>`. The argument list is decoded
//!   into `T` by serde before the handler sees it.
//! - **Internal (dyn)**: `JobHandler`, object-safe, stored in the registry as
//!   `Arc<dyn JobHandler>`.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::Signature;

/// Failure reported by a handler. Always retryable from the engine's view.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn from_error(err: impl std::error::Error) -> Self {
        Self::new(err.to_string())
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Object-safe handler invoked by the executor.
///
/// Takes the arguments by value so each attempt can run in its own task.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, arguments: Vec<Value>) -> Result<(), HandlerError>;
}

/// A job type with a fixed target name and argument signature.
///
/// ```ignore
/// #[derive(Deserialize)]
/// struct GenerateReport { name: String, pages: u32 }
///
/// impl TypedJob for GenerateReport {
///     const TARGET: &'static str = "report";
///     fn signature() -> Signature {
///         Signature::new().param("name", ArgKind::String).param("pages", ArgKind::Integer)
///     }
/// }
/// ```
///
/// Positional arguments decode into `Self` as a JSON array, so a struct's
/// fields are filled in declaration order.
pub trait TypedJob: DeserializeOwned + Send + 'static {
    const TARGET: &'static str;

    fn signature() -> Signature;
}

#[async_trait]
pub trait Handler<T: TypedJob>: Send + Sync {
    async fn handle(&self, job: T) -> Result<(), HandlerError>;
}

/// Type erasure: `Handler<T>` -> `JobHandler`.
pub struct TypedHandler<T, H> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TypedJob, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TypedJob, H: Handler<T>> JobHandler for TypedHandler<T, H> {
    async fn run(&self, arguments: Vec<Value>) -> Result<(), HandlerError> {
        let job: T = serde_json::from_value(Value::Array(arguments))
            .map_err(|e| HandlerError::new(format!("argument decode: {e}")))?;
        self.handler.handle(job).await
    }
}

/// Closure-backed handler, see [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn run(&self, arguments: Vec<Value>) -> Result<(), HandlerError> {
        (self.f)(arguments).await
    }
}

/// Wrap an async closure as a registry handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ArgKind;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Deserialize)]
    struct Report {
        name: String,
        pages: u32,
    }

    impl TypedJob for Report {
        const TARGET: &'static str = "report";

        fn signature() -> Signature {
            Signature::new()
                .param("name", ArgKind::String)
                .param("pages", ArgKind::Integer)
        }
    }

    struct ReportHandler {
        pages_seen: AtomicU32,
    }

    #[async_trait]
    impl Handler<Report> for ReportHandler {
        async fn handle(&self, job: Report) -> Result<(), HandlerError> {
            if job.name.is_empty() {
                return Err("empty report name".into());
            }
            self.pages_seen.fetch_add(job.pages, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn typed_handler_decodes_positional_arguments() {
        let handler = TypedHandler::<Report, _>::new(ReportHandler {
            pages_seen: AtomicU32::new(0),
        });
        handler.run(vec![json!("weekly"), json!(4)]).await.unwrap();
        assert_eq!(handler.handler.pages_seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn typed_handler_reports_decode_failures() {
        let handler = TypedHandler::<Report, _>::new(ReportHandler {
            pages_seen: AtomicU32::new(0),
        });
        let err = handler.run(vec![json!(4), json!("weekly")]).await.unwrap_err();
        assert!(err.message().starts_with("argument decode"));
    }

    #[tokio::test]
    async fn handler_errors_pass_through() {
        let handler = TypedHandler::<Report, _>::new(ReportHandler {
            pages_seen: AtomicU32::new(0),
        });
        let err = handler.run(vec![json!(""), json!(1)]).await.unwrap_err();
        assert_eq!(err.to_string(), "empty report name");
    }

    #[tokio::test]
    async fn closure_handlers_see_their_arguments() {
        let handler = handler_fn(|args: Vec<Value>| async move {
            if args.len() == 2 {
                Ok(())
            } else {
                Err(HandlerError::new(format!("got {} args", args.len())))
            }
        });
        handler.run(vec![json!(1), json!(2)]).await.unwrap();
        let err = handler.run(vec![]).await.unwrap_err();
        assert_eq!(err.message(), "got 0 args");
    }
}
