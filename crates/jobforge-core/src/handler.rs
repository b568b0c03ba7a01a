//! Handler abstraction and registry
//!
//! Handlers turn a deserialized payload into an [`ExecutionResult`]. The
//! registry maps job type strings to handlers; typed registrations carry
//! their own deserializer so the processor never needs to know concrete
//! payload types.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

/// Outcome of a single handler invocation
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Whether the invocation succeeded
    pub succeeded: bool,

    /// Opaque serialized result on success
    pub result: Option<String>,

    /// Failure reason
    pub error_message: Option<String>,

    /// Whether a failure should be retried
    pub should_retry: bool,

    /// Delay before the retry; the processor default applies when unset
    pub retry_delay: Option<Duration>,
}

impl ExecutionResult {
    /// Successful invocation without a result value
    pub fn success() -> Self {
        Self {
            succeeded: true,
            result: None,
            error_message: None,
            should_retry: false,
            retry_delay: None,
        }
    }

    /// Successful invocation with a serialized result
    pub fn success_with(result: impl Into<String>) -> Self {
        Self {
            result: Some(result.into()),
            ..Self::success()
        }
    }

    /// Retryable failure
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            result: None,
            error_message: Some(message.into()),
            should_retry: true,
            retry_delay: None,
        }
    }

    /// Failure that must not be retried
    pub fn failure_no_retry(message: impl Into<String>) -> Self {
        Self {
            should_retry: false,
            ..Self::failure(message)
        }
    }

    /// Failure carrying a stringified panic payload; retryable like any
    /// other thrown failure
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "handler panicked".to_string()
        };
        Self::failure(format!("handler panicked: {}", message))
    }

    /// Set an explicit retry delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }
}

/// A callable that processes payloads of one job type
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler serves
    fn job_type(&self) -> &str;

    /// Execute one job
    ///
    /// `arguments` is the raw payload string as persisted; `token` fires when
    /// the processor is shutting down and handlers are expected to observe it
    /// and return promptly.
    async fn handle(&self, arguments: Option<&str>, token: CancellationToken) -> ExecutionResult;
}

type BoxedHandlerFuture = Pin<Box<dyn Future<Output = ExecutionResult> + Send>>;
type BoxedHandlerFn =
    Box<dyn Fn(Option<String>, CancellationToken) -> BoxedHandlerFuture + Send + Sync>;

/// Adapter that pairs a typed async function with its deserializer
struct FnHandler {
    job_type: String,
    run: BoxedHandlerFn,
}

#[async_trait]
impl JobHandler for FnHandler {
    fn job_type(&self) -> &str {
        &self.job_type
    }

    async fn handle(&self, arguments: Option<&str>, token: CancellationToken) -> ExecutionResult {
        (self.run)(arguments.map(str::to_string), token).await
    }
}

/// Registry mapping job type strings to handlers
///
/// Built before the processor starts and read-only afterwards; the processor
/// holds it behind an `Arc` and consults it once per job execution.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a typed async function for a job type
    ///
    /// The adapter deserializes the stored payload into `T` before calling
    /// `handler`. A payload that does not match `T` (or a missing payload)
    /// produces a non-retryable failure, so malformed jobs are abandoned on
    /// first dispatch instead of looping through the retry budget.
    pub fn register<T, F, Fut>(&mut self, job_type: impl Into<String>, handler: F)
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, CancellationToken) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ExecutionResult> + Send + 'static,
    {
        let job_type = job_type.into();
        let type_for_errors = job_type.clone();

        let run: BoxedHandlerFn = Box::new(move |arguments, token| {
            let handler = handler.clone();
            let job_type = type_for_errors.clone();
            Box::pin(async move {
                let raw = match arguments {
                    Some(raw) => raw,
                    None => {
                        return ExecutionResult::failure_no_retry(format!(
                            "job type '{}' requires arguments but none were stored",
                            job_type
                        ))
                    }
                };
                match serde_json::from_str::<T>(&raw) {
                    Ok(payload) => handler(payload, token).await,
                    Err(e) => ExecutionResult::failure_no_retry(format!(
                        "failed to deserialize arguments for '{}': {}",
                        job_type, e
                    )),
                }
            })
        });

        self.handlers.insert(
            job_type.clone(),
            Arc::new(FnHandler { job_type, run }),
        );
    }

    /// Register a hand-written handler under its declared job type
    pub fn register_handler(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type().to_string(), handler);
    }

    /// Look up the handler for a job type
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Check if a job type is registered
    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// All registered job types
    pub fn registered_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct EchoArgs {
        message: String,
    }

    #[test]
    fn test_result_constructors() {
        let ok = ExecutionResult::success_with("\"done\"");
        assert!(ok.succeeded);
        assert_eq!(ok.result.as_deref(), Some("\"done\""));

        let failure = ExecutionResult::failure("boom");
        assert!(!failure.succeeded);
        assert!(failure.should_retry);
        assert_eq!(failure.error_message.as_deref(), Some("boom"));

        let fatal = ExecutionResult::failure_no_retry("bad payload");
        assert!(!fatal.should_retry);

        let delayed = ExecutionResult::failure("boom").with_retry_delay(Duration::from_millis(10));
        assert_eq!(delayed.retry_delay, Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_from_panic_stringifies_payload() {
        let result = ExecutionResult::from_panic(Box::new("worker blew up"));
        assert!(!result.succeeded);
        assert!(result
            .error_message
            .as_deref()
            .unwrap()
            .contains("worker blew up"));
    }

    #[tokio::test]
    async fn test_typed_registration_dispatches() {
        let mut registry = HandlerRegistry::new();
        registry.register::<EchoArgs, _, _>("echo", |args, _token| async move {
            ExecutionResult::success_with(args.message)
        });

        assert!(registry.is_registered("echo"));
        assert!(!registry.is_registered("unknown"));

        let handler = registry.get("echo").unwrap();
        let result = handler
            .handle(Some(r#"{"message":"hi"}"#), CancellationToken::new())
            .await;
        assert!(result.succeeded);
        assert_eq!(result.result.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_bad_payload_is_not_retryable() {
        let mut registry = HandlerRegistry::new();
        registry.register::<EchoArgs, _, _>("echo", |_args, _token| async move {
            ExecutionResult::success()
        });

        let handler = registry.get("echo").unwrap();
        let result = handler
            .handle(Some(r#"{"unexpected":1}"#), CancellationToken::new())
            .await;
        assert!(!result.succeeded);
        assert!(!result.should_retry);

        let result = handler.handle(None, CancellationToken::new()).await;
        assert!(!result.succeeded);
        assert!(!result.should_retry);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let mut registry = HandlerRegistry::new();
        registry.register::<serde_json::Value, _, _>("job", |_, _| async move {
            ExecutionResult::success_with("\"first\"")
        });
        registry.register::<serde_json::Value, _, _>("job", |_, _| async move {
            ExecutionResult::success_with("\"second\"")
        });

        assert_eq!(registry.len(), 1);
        let handler = registry.get("job").unwrap();
        let result = handler.handle(Some("null"), CancellationToken::new()).await;
        assert_eq!(result.result.as_deref(), Some("\"second\""));
    }
}
