//! Name-based routing of intents to reactors.
//!
//! A [`Router`] owns a [`Registry`] of [`DispatchTarget`]s plus a binding
//! table from intent names to target names.  An intent whose name has no
//! binding, or whose bound target is not registered, is refused with
//! [`GateError::UnknownIntent`] before any capability check runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capgate_kernel::{Context, Registry};
use capgate_types::GateError;
use tracing::{debug, warn};

use crate::effect::Effect;
use crate::intent::Intent;

type Cap<I> = <I as Intent>::Capability;

/// Anything that can accept an intent and report the effects it emitted.
///
/// Implemented by [`ReactorHandle`][crate::reactor::ReactorHandle] and by
/// [`Router`] itself, so routers nest.
#[async_trait]
pub trait DispatchTarget<I: Intent>: Send + Sync {
    fn name(&self) -> &str;

    async fn dispatch_effects(
        &self,
        intent: I,
        context: Context<Cap<I>>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Effect<Cap<I>>>, GateError<Cap<I>>>;
}

/// Routes intents by name to registered targets.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use capgate_kernel::{CapabilityGate, Context, file_algebra};
/// use capgate_runtime::files::{FileIntent, FileStore, FileStoreReactor};
/// use capgate_runtime::{ReactorHandle, Router};
/// use capgate_types::{FileCap, GateError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let files = ReactorHandle::builder(FileStoreReactor, FileStore::default(), CapabilityGate::new(file_algebra()))
///     .name("files")
///     .spawn();
///
/// let mut router = Router::new("root");
/// router.register(Arc::new(files));
/// router.bind("WriteFile", "files");
///
/// let ctx = Context::builder("alice").grant(FileCap::admin("/a")).build();
/// let effects = router.dispatch(FileIntent::write("/a", "1"), ctx.clone()).await.unwrap();
/// assert_eq!(effects[0].kind, "file.written");
///
/// let err = router.dispatch(FileIntent::read("/a"), ctx).await.unwrap_err();
/// assert_eq!(err, GateError::UnknownIntent("ReadFile".into()));
/// # }
/// ```
pub struct Router<I: Intent> {
    name: String,
    targets: Registry<dyn DispatchTarget<I>>,
    bindings: HashMap<String, String>,
    default_timeout: Option<Duration>,
}

impl<I: Intent> Router<I> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            targets: Registry::new(),
            bindings: HashMap::new(),
            default_timeout: None,
        }
    }

    /// Timeout passed to targets when the caller supplies none.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Register `target` under its own name, replacing any previous target
    /// of that name.
    pub fn register(&mut self, target: Arc<dyn DispatchTarget<I>>) -> Option<Arc<dyn DispatchTarget<I>>> {
        let name = target.name().to_string();
        self.targets.register(name, target)
    }

    /// Route intents named `intent_name` to the target named `target_name`.
    pub fn bind(&mut self, intent_name: impl Into<String>, target_name: impl Into<String>) -> &mut Self {
        self.bindings.insert(intent_name.into(), target_name.into());
        self
    }

    pub fn lookup(&self, target_name: &str) -> Option<Arc<dyn DispatchTarget<I>>> {
        self.targets.lookup(target_name)
    }

    /// Names of all registered targets, sorted.
    pub fn targets(&self) -> Vec<String> {
        self.targets.list()
    }

    /// The target an intent name resolves to, if any.
    pub fn resolve(&self, intent_name: &str) -> Option<Arc<dyn DispatchTarget<I>>> {
        self.bindings
            .get(intent_name)
            .and_then(|target| self.targets.lookup(target))
    }

    pub async fn dispatch(
        &self,
        intent: I,
        context: Context<Cap<I>>,
    ) -> Result<Vec<Effect<Cap<I>>>, GateError<Cap<I>>> {
        self.route(intent, context, self.default_timeout).await
    }

    pub async fn dispatch_with_timeout(
        &self,
        intent: I,
        context: Context<Cap<I>>,
        timeout: Duration,
    ) -> Result<Vec<Effect<Cap<I>>>, GateError<Cap<I>>> {
        self.route(intent, context, Some(timeout)).await
    }

    async fn route(
        &self,
        intent: I,
        context: Context<Cap<I>>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Effect<Cap<I>>>, GateError<Cap<I>>> {
        let intent_name = intent.name();
        let Some(target) = self.resolve(intent_name) else {
            warn!(router = %self.name, intent = intent_name, "no target bound for intent");
            return Err(GateError::UnknownIntent(intent_name.to_string()));
        };
        debug!(router = %self.name, intent = intent_name, target = %target.name(), "routing intent");
        target.dispatch_effects(intent, context, timeout).await
    }
}

#[async_trait]
impl<I: Intent> DispatchTarget<I> for Router<I> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn dispatch_effects(
        &self,
        intent: I,
        context: Context<Cap<I>>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Effect<Cap<I>>>, GateError<Cap<I>>> {
        self.route(intent, context, timeout.or(self.default_timeout)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::{FileIntent, FileStore, FileStoreReactor};
    use crate::reactor::ReactorHandle;
    use capgate_kernel::{CapabilityGate, file_algebra};
    use capgate_types::FileCap;

    fn files(name: &str) -> Arc<ReactorHandle<FileStoreReactor>> {
        Arc::new(
            ReactorHandle::builder(
                FileStoreReactor,
                FileStore::default().with_file("/x", "seed"),
                CapabilityGate::new(file_algebra()),
            )
            .name(name)
            .spawn(),
        )
    }

    fn admin() -> Context<FileCap> {
        Context::builder("root").grant(FileCap::admin("/x")).build()
    }

    fn router() -> Router<FileIntent> {
        let mut router = Router::new("root");
        router.register(files("files"));
        router
            .bind("ReadFile", "files")
            .bind("WriteFile", "files")
            .bind("DeleteFile", "files");
        router
    }

    #[tokio::test]
    async fn routes_bound_intents() {
        let effects = router().dispatch(FileIntent::read("/x"), admin()).await.unwrap();
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].kind, "file.read");
    }

    #[tokio::test]
    async fn unbound_intent_is_unknown() {
        let mut router = Router::new("root");
        router.register(files("files"));
        let err = router.dispatch(FileIntent::read("/x"), admin()).await.unwrap_err();
        assert_eq!(err, GateError::UnknownIntent("ReadFile".into()));
    }

    #[tokio::test]
    async fn binding_to_missing_target_is_unknown() {
        let mut router: Router<FileIntent> = Router::new("root");
        router.bind("ReadFile", "ghost");
        assert!(router.resolve("ReadFile").is_none());
        let err = router.dispatch(FileIntent::read("/x"), admin()).await.unwrap_err();
        assert!(matches!(err, GateError::UnknownIntent(_)));
    }

    #[tokio::test]
    async fn capability_errors_pass_through() {
        let ctx = Context::builder("guest").grant(FileCap::read("/x")).build();
        let err = router().dispatch(FileIntent::delete("/x"), ctx).await.unwrap_err();
        assert_eq!(
            err,
            GateError::InsufficientCapabilities {
                missing: vec![FileCap::delete("/x")]
            }
        );
    }

    #[tokio::test]
    async fn routers_nest() {
        let mut outer: Router<FileIntent> = Router::new("outer");
        outer.register(Arc::new(router()));
        outer.bind("ReadFile", "root");
        let effects = outer.dispatch(FileIntent::read("/x"), admin()).await.unwrap();
        assert_eq!(effects[0].kind, "file.read");
        assert_eq!(outer.targets(), vec!["root".to_string()]);
    }
}
