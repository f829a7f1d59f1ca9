//! Handler registration and lookup.
//!
//! The worker builds its registry once, before announcing readiness, and
//! never changes it afterwards. Handlers run only on the worker thread, so
//! neither they nor their futures need to be `Send`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use shmcall_codec::{RESERVED_KIND_PREFIX, Value};

use crate::error::{BoxError, RegistryError};

/// Future returned by a [`Handler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, BoxError>>>>;

/// An asynchronous function invoked for one request kind.
pub trait Handler {
    fn call(&self, args: Vec<Value>) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Vec<Value>) -> Fut,
    Fut: Future<Output = Result<Value, BoxError>> + 'static,
{
    fn call(&self, args: Vec<Value>) -> HandlerFuture {
        Box::pin(self(args))
    }
}

/// Collects handlers during worker initialization.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Rc<dyn Handler>>,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async closure under `kind`.
    ///
    /// Returns an error if:
    /// - `kind` is empty
    /// - `kind` starts with the reserved `$` prefix
    /// - a handler is already registered for `kind`
    pub fn register<F, Fut>(
        &mut self,
        kind: impl Into<String>,
        handler: F,
    ) -> Result<&mut Self, RegistryError>
    where
        F: Fn(Vec<Value>) -> Fut + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + 'static,
    {
        self.register_rc(kind, Rc::new(handler))
    }

    /// Register a handler that is already shared, e.g. one instance serving
    /// several kinds.
    pub fn register_rc(
        &mut self,
        kind: impl Into<String>,
        handler: Rc<dyn Handler>,
    ) -> Result<&mut Self, RegistryError> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(RegistryError::EmptyKind);
        }
        if kind.starts_with(RESERVED_KIND_PREFIX) {
            return Err(RegistryError::ReservedKind(kind));
        }
        if self.handlers.contains_key(&kind) {
            return Err(RegistryError::DuplicateKind(kind));
        }
        tracing::debug!(%kind, "handler registered");
        self.handlers.insert(kind, handler);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}

/// Immutable map from request kind to handler.
pub struct HandlerRegistry {
    handlers: HashMap<String, Rc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Look up the handler for `kind`.
    ///
    /// The handler is returned by `Rc` so the caller can hold it across the
    /// handler's await points without borrowing the registry.
    pub fn lookup(&self, kind: &str) -> Option<Rc<dyn Handler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct Counter {
        calls: Cell<u32>,
    }

    impl Handler for Counter {
        fn call(&self, _args: Vec<Value>) -> HandlerFuture {
            self.calls.set(self.calls.get() + 1);
            let n = self.calls.get();
            Box::pin(async move { Ok(Value::from(n)) })
        }
    }

    #[test]
    fn register_rejects_bad_kinds() {
        let mut builder = HandlerRegistryBuilder::new();
        builder
            .register("resolve", |_args: Vec<Value>| async { Ok(Value::Null) })
            .unwrap();

        assert_eq!(
            builder
                .register("", |_args: Vec<Value>| async { Ok(Value::Null) })
                .err(),
            Some(RegistryError::EmptyKind)
        );
        assert_eq!(
            builder
                .register("$shutdown", |_args: Vec<Value>| async { Ok(Value::Null) })
                .err(),
            Some(RegistryError::ReservedKind("$shutdown".into()))
        );
        assert_eq!(
            builder
                .register("resolve", |_args: Vec<Value>| async { Ok(Value::Null) })
                .err(),
            Some(RegistryError::DuplicateKind("resolve".into()))
        );
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn built_registry_lists_kinds() {
        let mut builder = HandlerRegistryBuilder::new();
        builder
            .register("resolve", |_args: Vec<Value>| async { Ok(Value::Null) })
            .unwrap()
            .register("load", |_args: Vec<Value>| async { Ok(Value::Null) })
            .unwrap();
        let registry = builder.build();

        assert_eq!(registry.kinds(), vec!["load", "resolve"]);
        assert!(registry.contains("load"));
        assert!(registry.lookup("missing").is_none());
        assert!(format!("{registry:?}").contains("resolve"));
    }

    #[tokio_test_lite::test]
    async fn lookup_invokes_closure_handler() {
        let mut builder = HandlerRegistryBuilder::new();
        builder
            .register("sum", |args: Vec<Value>| async move {
                Ok(Value::from(args.iter().filter_map(Value::as_i64).sum::<i64>()))
            })
            .unwrap();
        let registry = builder.build();

        let handler = registry.lookup("sum").unwrap();
        let result = handler.call(vec![1.into(), 2.into(), 39.into()]).await.unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[tokio_test_lite::test]
    async fn shared_handler_serves_several_kinds() {
        let counter: Rc<dyn Handler> = Rc::new(Counter { calls: Cell::new(0) });
        let mut builder = HandlerRegistryBuilder::new();
        builder.register_rc("a", counter.clone()).unwrap();
        builder.register_rc("b", counter).unwrap();
        let registry = builder.build();

        registry.lookup("a").unwrap().call(vec![]).await.unwrap();
        let second = registry.lookup("b").unwrap().call(vec![]).await.unwrap();
        assert_eq!(second, Value::Int(2));
    }

    #[tokio_test_lite::test]
    async fn handler_errors_pass_through() {
        let mut builder = HandlerRegistryBuilder::new();
        builder
            .register("fail", |_args: Vec<Value>| async { Err("ENOENT".into()) })
            .unwrap();
        let err = builder.build().lookup("fail").unwrap().call(vec![]).await.unwrap_err();
        assert_eq!(err.to_string(), "ENOENT");
    }
}
