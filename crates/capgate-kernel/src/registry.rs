//! [`Registry`] – name → component lookup.
//!
//! Built at startup (`register` takes `&mut self`), then shared read-only
//! behind an `Arc` by whichever component routes by name.  A missing name is
//! an ordinary `None`, never an error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

/// Named components, e.g. reactors or capability algebras.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use capgate_kernel::Registry;
///
/// let mut registry: Registry<str> = Registry::new();
/// registry.register("greeting", Arc::from("hello"));
///
/// assert_eq!(registry.lookup("greeting").as_deref(), Some("hello"));
/// assert!(registry.lookup("missing").is_none());
/// assert_eq!(registry.list(), vec!["greeting".to_string()]);
/// ```
pub struct Registry<T: ?Sized> {
    components: HashMap<String, Arc<T>>,
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self {
            components: HashMap::new(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.list())
            .finish()
    }
}

impl<T: ?Sized> Registry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `component` under `name`.  Any component previously
    /// registered under the same name is replaced and returned.
    pub fn register(&mut self, name: impl Into<String>, component: Arc<T>) -> Option<Arc<T>> {
        let name = name.into();
        debug!(%name, "registering component");
        self.components.insert(name, component)
    }

    /// Remove and return the component registered under `name`.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<T>> {
        self.components.remove(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<T>> {
        self.components.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.components.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
