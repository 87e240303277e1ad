//! Shared attribute storage.
//!
//! A [`Context`] is a thread-safe map from string keys to opaque
//! [`Attribute`] values. One context exists per server, one per session,
//! and handlers are free to create their own. Attributes are shared by
//! reference and replaced rather than mutated.

use std::any::{Any, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

/// An opaque polymorphic value stored in a [`Context`].
///
/// The capability set is deliberately small: deep clone, type identity,
/// equality, hashing, and a display form. Concrete attribute kinds are
/// defined by the embedding application; [`AttrValue`] covers the common
/// case of wrapping an ordinary Rust value.
pub trait Attribute: Send + Sync {
    /// Deep copy of the value.
    fn clone_boxed(&self) -> Box<dyn Attribute>;

    /// Identity of the underlying concrete type.
    fn type_of(&self) -> TypeId;

    /// Equality against another attribute. Values of different concrete
    /// types are never equal.
    fn equals(&self, other: &dyn Attribute) -> bool;

    /// Stable hash of the value.
    fn hash_value(&self) -> u64;

    /// Human-readable form.
    fn display(&self) -> String;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

/// Wrapper turning any clonable, hashable, displayable value into an
/// [`Attribute`].
#[derive(Debug, Clone)]
pub struct AttrValue<T>(pub T);

impl<T> Attribute for AttrValue<T>
where
    T: Clone + PartialEq + Hash + Display + Send + Sync + 'static,
{
    fn clone_boxed(&self) -> Box<dyn Attribute> {
        Box::new(AttrValue(self.0.clone()))
    }

    fn type_of(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn equals(&self, other: &dyn Attribute) -> bool {
        other
            .as_any()
            .downcast_ref::<AttrValue<T>>()
            .is_some_and(|o| o.0 == self.0)
    }

    fn hash_value(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.0.hash(&mut hasher);
        hasher.finish()
    }

    fn display(&self) -> String {
        self.0.to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Thread-safe key → attribute mapping.
///
/// Readers proceed in parallel; writers exclude everyone. The context is
/// owned by its creator and dies with it.
#[derive(Default)]
pub struct Context {
    map: RwLock<HashMap<String, Arc<dyn Attribute>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an attribute. Absent keys yield `None`.
    pub fn get(&self, key: &str) -> Option<Arc<dyn Attribute>> {
        self.map.read().unwrap().get(key).cloned()
    }

    /// Install or replace an attribute.
    pub fn set(&self, key: impl Into<String>, value: Arc<dyn Attribute>) {
        self.map.write().unwrap().insert(key.into(), value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.map.read().unwrap().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_has_roundtrip() {
        let ctx = Context::new();
        assert!(ctx.get("missing").is_none());
        assert!(!ctx.has("missing"));

        ctx.set("name", Arc::new(AttrValue("ada".to_string())));
        assert!(ctx.has("name"));
        let got = ctx.get("name").unwrap();
        assert_eq!(got.display(), "ada");
    }

    #[test]
    fn set_replaces_existing_value() {
        let ctx = Context::new();
        ctx.set("n", Arc::new(AttrValue(1u64)));
        ctx.set("n", Arc::new(AttrValue(2u64)));
        assert_eq!(ctx.get("n").unwrap().display(), "2");
    }

    #[test]
    fn equality_respects_type_identity() {
        let a = AttrValue(42u64);
        let b = AttrValue(42u64);
        let c = AttrValue(42i64);
        assert!(a.equals(&b));
        assert!(!a.equals(&c));
        assert_ne!(a.type_of(), c.type_of());
    }

    #[test]
    fn clone_is_deep_and_equal() {
        let a = AttrValue("x".to_string());
        let b = a.clone_boxed();
        assert!(b.equals(&a));
        assert_eq!(a.hash_value(), b.hash_value());
    }

    #[test]
    fn downcast_through_as_any() {
        let ctx = Context::new();
        ctx.set("count", Arc::new(AttrValue(7u32)));
        let attr = ctx.get("count").unwrap();
        let value = attr
            .as_any()
            .downcast_ref::<AttrValue<u32>>()
            .map(|v| v.0)
            .unwrap();
        assert_eq!(value, 7);
    }
}
