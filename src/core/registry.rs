//! String-keyed factory registry for pluggable strategies.
//!
//! Strategies selected by name at runtime (expression evaluators today) go
//! through an explicit registry populated at process start instead of any
//! open-ended runtime type lookup.
use std::collections::HashMap;

use crate::error::{Error, Result};

type Factory<T> = Box<dyn Fn() -> Box<T> + Send + Sync>;

pub struct Registry<T: ?Sized> {
    factories: HashMap<&'static str, Factory<T>>,
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &'static str, factory: F)
    where
        F: Fn() -> Box<T> + Send + Sync + 'static,
    {
        self.factories.insert(name, Box::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Box<T>> {
        self.factories
            .get(name)
            .map(|f| f())
            .ok_or(Error::Configuration {
                param: "name",
                value: format!("no factory registered for '{name}'"),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send {
        fn greet(&self) -> &'static str;
    }

    struct Hello;
    impl Greeter for Hello {
        fn greet(&self) -> &'static str {
            "hello"
        }
    }

    #[test]
    fn register_and_create() {
        let mut registry: Registry<dyn Greeter> = Registry::new();
        registry.register("hello", || Box::new(Hello));
        assert!(registry.contains("hello"));
        assert_eq!(registry.create("hello").unwrap().greet(), "hello");
        assert!(registry.create("missing").is_err());
        assert_eq!(registry.names(), vec!["hello"]);
    }
}
