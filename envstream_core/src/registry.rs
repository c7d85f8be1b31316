//! Environment registry - the read-only table of environment specs.
//!
//! Built once at startup, then shared by reference (`Arc<EnvRegistry>`)
//! with every connection. Nothing mutates it afterwards, so lookups need
//! no synchronization.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::control::KeyWhitelist;
use crate::environment::{Environment, EnvironmentFault};

/// Builds a fresh environment instance for one session.
pub type EnvFactory =
    Arc<dyn Fn(&EnvSpec) -> Result<Box<dyn Environment>, EnvironmentFault> + Send + Sync>;

/// Registry construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("duplicate environment name: {0}")]
    Duplicate(String),

    #[error("invalid environment name: {0:?}")]
    InvalidName(String),
}

/// Static description of one environment.
#[derive(Clone)]
pub struct EnvSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub key_whitelist: Arc<KeyWhitelist>,
    factory: EnvFactory,
}

impl EnvSpec {
    pub fn new<F>(
        name: impl Into<String>,
        width: u32,
        height: u32,
        keys: KeyWhitelist,
        factory: F,
    ) -> Self
    where
        F: Fn(&EnvSpec) -> Result<Box<dyn Environment>, EnvironmentFault> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            width,
            height,
            key_whitelist: Arc::new(keys),
            factory: Arc::new(factory),
        }
    }

    /// Instantiates the environment.
    pub fn create(&self) -> Result<Box<dyn Environment>, EnvironmentFault> {
        (self.factory)(self)
    }

    /// Public description, without the factory.
    pub fn info(&self) -> EnvInfo {
        EnvInfo {
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            keys: self.key_whitelist.keys().to_vec(),
        }
    }
}

impl fmt::Debug for EnvSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvSpec")
            .field("name", &self.name)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("keys", &self.key_whitelist.keys())
            .finish()
    }
}

/// Serializable view of an [`EnvSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvInfo {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub keys: Vec<String>,
}

/// Immutable name → spec table.
#[derive(Debug, Default)]
pub struct EnvRegistry {
    specs: Vec<EnvSpec>,
    by_name: HashMap<String, usize>,
}

impl EnvRegistry {
    pub fn builder() -> EnvRegistryBuilder {
        EnvRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&EnvSpec> {
        self.by_name.get(name).map(|&i| &self.specs[i])
    }

    /// Specs in registration order.
    pub fn specs(&self) -> &[EnvSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Resolves a request path like `/env/Paddle-v0` to a spec.
    pub fn resolve_path(&self, path: &str) -> Option<&EnvSpec> {
        env_name_from_path(path).and_then(|name| self.get(name))
    }
}

/// Collects specs, then freezes them into an [`EnvRegistry`].
#[derive(Debug, Default)]
pub struct EnvRegistryBuilder {
    specs: Vec<EnvSpec>,
}

impl EnvRegistryBuilder {
    pub fn register(mut self, spec: EnvSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn build(self) -> Result<EnvRegistry, RegistryError> {
        let mut by_name = HashMap::new();
        for (i, spec) in self.specs.iter().enumerate() {
            if spec.name.is_empty() || !spec.name.chars().all(is_name_char) {
                return Err(RegistryError::InvalidName(spec.name.clone()));
            }
            if by_name.insert(spec.name.clone(), i).is_some() {
                return Err(RegistryError::Duplicate(spec.name.clone()));
            }
        }
        Ok(EnvRegistry {
            specs: self.specs,
            by_name,
        })
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

/// Extracts the name from `/<route>/<name>` or `/<route>/<name>/`.
///
/// The route segment is lowercase ASCII letters (possibly empty); the name
/// is `[A-Za-z0-9-]*`. Returns `None` for any other shape.
pub fn env_name_from_path(path: &str) -> Option<&str> {
    let rest = path.strip_prefix('/')?;
    let (route, tail) = rest.split_once('/')?;
    if !route.chars().all(|c| c.is_ascii_lowercase()) {
        return None;
    }
    let name = tail.strip_suffix('/').unwrap_or(tail);
    if !name.chars().all(is_name_char) {
        return None;
    }
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> EnvSpec {
        EnvSpec::new(name, 8, 8, KeyWhitelist::new(["left"]), |spec: &EnvSpec| {
            Err(EnvironmentFault::Create(format!("{} is a stub", spec.name)))
        })
    }

    #[test]
    fn test_path_grammar() {
        assert_eq!(env_name_from_path("/env/Paddle-v0"), Some("Paddle-v0"));
        assert_eq!(env_name_from_path("/play/Paddle-v0/"), Some("Paddle-v0"));
        assert_eq!(env_name_from_path("//x"), Some("x"));
        assert_eq!(env_name_from_path("/env/"), Some(""));

        assert_eq!(env_name_from_path("/env"), None);
        assert_eq!(env_name_from_path("env/x"), None);
        assert_eq!(env_name_from_path("/Env/x"), None);
        assert_eq!(env_name_from_path("/env/a/b"), None);
        assert_eq!(env_name_from_path("/env/a_b"), None);
        assert_eq!(env_name_from_path("/env/x//"), None);
    }

    #[test]
    fn test_registry_lookup_and_order() {
        let registry = EnvRegistry::builder()
            .register(spec("B-v0"))
            .register(spec("A-v0"))
            .build()
            .unwrap();

        let names: Vec<_> = registry.specs().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["B-v0", "A-v0"]);
        assert!(registry.get("A-v0").is_some());
        assert!(registry.get("C-v0").is_none());
        assert_eq!(registry.resolve_path("/env/B-v0").map(|s| s.width), Some(8));
        assert!(registry.resolve_path("/env/B_v0").is_none());
    }

    #[test]
    fn test_registry_rejects_duplicates_and_bad_names() {
        let err = EnvRegistry::builder()
            .register(spec("A-v0"))
            .register(spec("A-v0"))
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("A-v0".into()));

        let err = EnvRegistry::builder().register(spec("a b")).build().unwrap_err();
        assert_eq!(err, RegistryError::InvalidName("a b".into()));
    }

    #[test]
    fn test_factory_errors_surface() {
        let s = spec("A-v0");
        assert!(matches!(s.create(), Err(EnvironmentFault::Create(_))));
        assert_eq!(s.info().keys, vec!["left".to_string()]);
    }
}
