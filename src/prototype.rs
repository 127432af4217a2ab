//! Extensible base objects shared by every exchange.
//!
//! An [`Application`](crate::Application) owns three prototypes: one for the
//! context, one for the request view, one for the response view. Anything
//! inserted into a prototype is visible on every exchange's matching view
//! through lookup delegation: the view first checks its own properties, then
//! falls back to the prototype. Nothing is copied per request.
//!
//! ```rust
//! use strata::Application;
//!
//! #[derive(Clone)]
//! struct SiteName(&'static str);
//!
//! let app = Application::new();
//! app.context().insert(SiteName("example"));
//! // every Context created from now on answers `ctx.property::<SiteName>()`
//! ```
//!
//! Properties are keyed by type, so a prototype can hold plain values as well
//! as strategy objects (`Arc<dyn Fn(..)>`) that middleware look up and call.

use std::sync::Arc;

use http::Extensions;
use parking_lot::RwLock;

/// A shared, typed property map.
///
/// Cloning a `Prototype` yields another handle to the same map.
#[derive(Clone, Default)]
pub struct Prototype(Arc<RwLock<Extensions>>);

impl Prototype {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a property, returning the one it replaced.
    pub fn insert<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.0.write().insert(value)
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.0.read().get::<T>().cloned()
    }

    pub fn remove<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.0.write().remove::<T>()
    }

    pub fn contains<T: Clone + Send + Sync + 'static>(&self) -> bool {
        self.0.read().get::<T>().is_some()
    }
}

/// Per-exchange properties layered over a [`Prototype`].
pub(crate) struct Delegate {
    base: Prototype,
    own: Extensions,
}

impl Delegate {
    pub(crate) fn new(base: Prototype) -> Self {
        Self { base, own: Extensions::new() }
    }

    pub(crate) fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.own.get::<T>().cloned().or_else(|| self.base.get::<T>())
    }

    /// Shadows the prototype's value for this exchange only.
    pub(crate) fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.own.insert(value)
    }

    /// Drops the shadow, making the prototype's value visible again.
    pub(crate) fn remove<T: Clone + Send + Sync + 'static>(&mut self) -> Option<T> {
        self.own.remove::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Greeting(&'static str);

    #[test]
    fn delegate_reads_through_to_the_prototype() {
        let proto = Prototype::new();
        let delegate = Delegate::new(proto.clone());
        assert_eq!(delegate.get::<Greeting>(), None);

        // assigned after the delegate exists, still visible
        proto.insert(Greeting("hello"));
        assert_eq!(delegate.get::<Greeting>(), Some(Greeting("hello")));
    }

    #[test]
    fn own_value_shadows_the_prototype() {
        let proto = Prototype::new();
        proto.insert(Greeting("hello"));

        let mut first = Delegate::new(proto.clone());
        let second = Delegate::new(proto.clone());
        first.insert(Greeting("bonjour"));

        assert_eq!(first.get::<Greeting>(), Some(Greeting("bonjour")));
        assert_eq!(second.get::<Greeting>(), Some(Greeting("hello")));
        assert_eq!(proto.get::<Greeting>(), Some(Greeting("hello")));

        first.remove::<Greeting>();
        assert_eq!(first.get::<Greeting>(), Some(Greeting("hello")));
    }
}
