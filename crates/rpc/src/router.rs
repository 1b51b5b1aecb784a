//! A handler assembled from named async functions.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::future::Future;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::handler::{CallContext, HandlerError, RpcHandler};

type MethodFn =
    Box<dyn Fn(Vec<Value>, CallContext) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync>;

struct Method {
    func: MethodFn,
    cancellable: bool,
}

/// Routes calls to per-method async functions.
///
/// ```no_run
/// use exthost_rpc::{MethodRouter, handler};
///
/// let router = MethodRouter::new()
///     .method("echo", |args, _cx| async move { Ok(args.into_iter().next().unwrap_or_default()) })
///     .cancellable_method("slow", |_args, cx| async move {
///         cx.cancelled().await;
///         handler::respond("never reached")
///     });
/// ```
#[derive(Default)]
pub struct MethodRouter {
    methods: HashMap<String, Method>,
}

impl MethodRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method that runs to completion even if the caller cancels.
    #[must_use]
    pub fn method<F, Fut>(self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Vec<Value>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.insert(name.into(), func, false)
    }

    /// Add a method that is aborted when the caller cancels.
    #[must_use]
    pub fn cancellable_method<F, Fut>(self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Vec<Value>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.insert(name.into(), func, true)
    }

    fn insert<F, Fut>(mut self, name: String, func: F, cancellable: bool) -> Self
    where
        F: Fn(Vec<Value>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let func: MethodFn = Box::new(move |args, cx| func(args, cx).boxed());
        self.methods.insert(name, Method { func, cancellable });
        self
    }

    /// Names of all routed methods.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

impl Debug for MethodRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.methods().collect();
        names.sort_unstable();
        f.debug_struct("MethodRouter")
            .field("methods", &names)
            .finish()
    }
}

#[async_trait]
impl RpcHandler for MethodRouter {
    async fn handle(
        &self,
        method: &str,
        args: Vec<Value>,
        cx: CallContext,
    ) -> Result<Value, HandlerError> {
        let Some(entry) = self.methods.get(method) else {
            return Err(HandlerError::NoSuchMethod(method.to_string()));
        };
        (entry.func)(args, cx).await
    }

    fn is_cancellable(&self, method: &str) -> bool {
        self.methods.get(method).is_some_and(|m| m.cancellable)
    }
}
