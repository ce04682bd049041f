//! Metamodel registry.
//!
//! Maps metamodel names to the live instances installed in one host
//! session. The registry holds no statistical state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::error::{Error, Result};
use crate::host::Host;
use crate::metamodel::Metamodel;

/// Name → metamodel bindings for a host session.
#[derive(Default)]
pub struct Registry {
    metamodels: BTreeMap<String, Arc<dyn Metamodel>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `metamodel` in `host` and bind it under its name.
    ///
    /// Fails with [`Error::AlreadyRegistered`] if the name is taken; the
    /// existing binding is left untouched. Installation runs inside a host
    /// savepoint, and the binding is published only if it succeeds.
    pub fn register(&mut self, host: &Host, metamodel: Arc<dyn Metamodel>) -> Result<()> {
        let name = metamodel.name().to_string();
        if self.metamodels.contains_key(&name) {
            return Err(Error::AlreadyRegistered(name));
        }

        host.savepoint(|host| metamodel.register(host))?;

        info!(metamodel = %name, "registered metamodel");
        self.metamodels.insert(name, metamodel);
        Ok(())
    }

    /// Remove the binding for exactly this instance.
    ///
    /// Fails with [`Error::NotRegistered`] if its name is unbound and with
    /// [`Error::InstanceMismatch`] if the name is bound to another instance.
    /// Returns the registry's handle to the instance.
    pub fn deregister(&mut self, metamodel: &Arc<dyn Metamodel>) -> Result<Arc<dyn Metamodel>> {
        let name = metamodel.name();
        let registered = self
            .metamodels
            .get(name)
            .ok_or_else(|| Error::NotRegistered(name.to_string()))?;

        if !Arc::ptr_eq(registered, metamodel) {
            return Err(Error::InstanceMismatch(name.to_string()));
        }

        info!(metamodel = %name, "deregistered metamodel");
        self.metamodels
            .remove(name)
            .ok_or_else(|| Error::NotRegistered(name.to_string()))
    }

    /// Look up a metamodel by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Metamodel>> {
        self.metamodels
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotRegistered(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metamodels.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.metamodels.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.metamodels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metamodels.is_empty()
    }

    /// Drop every binding.
    pub fn clear(&mut self) {
        self.metamodels.clear();
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("metamodels", &self.names())
            .finish()
    }
}
