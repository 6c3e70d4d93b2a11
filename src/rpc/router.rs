//! Method tables and endpoints.
//!
//! An endpoint is a named mount point (`/{name}/v1.0`) with its own method
//! table. Tables are built once and never change afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{Erased, ErasedHandler, Handler};
use super::protocol::RESERVED_PREFIX;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("method name must not be empty")]
    EmptyMethod,
    #[error("method name {0:?} is reserved")]
    ReservedMethod(String),
    #[error("method {0:?} is already registered")]
    DuplicateMethod(String),
    #[error("endpoint name {0:?} must be a single non-empty path segment")]
    InvalidEndpointName(String),
    #[error("endpoint {0:?} is already mounted")]
    DuplicateEndpoint(String),
}

/// Method name to handler, for one endpoint.
#[derive(Default)]
pub struct MethodTable {
    methods: HashMap<String, Arc<dyn ErasedHandler>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`.
    pub fn add<H, Args>(&mut self, name: impl Into<String>, handler: H) -> Result<(), RouterError>
    where
        H: Handler<Args>,
        Args: 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(RouterError::EmptyMethod);
        }
        if name.starts_with(RESERVED_PREFIX) {
            return Err(RouterError::ReservedMethod(name));
        }
        if self.methods.contains_key(&name) {
            return Err(RouterError::DuplicateMethod(name));
        }

        self.methods.insert(name, Arc::new(Erased::new(handler)));
        Ok(())
    }

    /// Builder-style [`MethodTable::add`].
    pub fn with<H, Args>(mut self, name: impl Into<String>, handler: H) -> Result<Self, RouterError>
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.add(name, handler)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// A named method table exposed over its own upgrade path.
pub struct Endpoint {
    name: String,
    methods: MethodTable,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, methods: MethodTable) -> Result<Self, RouterError> {
        let name = name.into();
        if name.is_empty() || name.contains('/') {
            return Err(RouterError::InvalidEndpointName(name));
        }
        Ok(Self { name, methods })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The route this endpoint is served on.
    pub fn path(&self) -> String {
        format!("/{}/v1.0", self.name)
    }

    pub(crate) fn handler(&self, method: &str) -> Option<Arc<dyn ErasedHandler>> {
        self.methods.methods.get(method).cloned()
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
