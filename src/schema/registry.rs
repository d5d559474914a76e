//! Model registry with explicit parent chaining.
//!
//! Lookups check the registry's own models first, then each parent in list
//! order. Registries are passed by reference; there is no global instance.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use super::model::Model;
use crate::error::{DataError, DataResult};

/// Slug -> model registry
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: RwLock<IndexMap<String, Arc<Model>>>,
    parents: Vec<Arc<ModelRegistry>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain a parent consulted after this registry and earlier parents
    pub fn with_parent(mut self, parent: Arc<ModelRegistry>) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn parents(&self) -> &[Arc<ModelRegistry>] {
        &self.parents
    }

    /// Register a model, replacing any local model with the same slug
    pub fn define(&self, model: Model) -> DataResult<Arc<Model>> {
        let model = Arc::new(model);
        let mut models = self
            .models
            .write()
            .map_err(|_| DataError::internal("Lock poisoned"))?;
        models.insert(model.slug().to_string(), Arc::clone(&model));
        Ok(model)
    }

    /// Remove a local model
    pub fn remove(&self, slug: &str) -> DataResult<Option<Arc<Model>>> {
        let mut models = self
            .models
            .write()
            .map_err(|_| DataError::internal("Lock poisoned"))?;
        Ok(models.shift_remove(slug))
    }

    /// Resolve a slug through the chain
    pub fn find(&self, slug: &str) -> DataResult<Option<Arc<Model>>> {
        {
            let models = self
                .models
                .read()
                .map_err(|_| DataError::internal("Lock poisoned"))?;
            if let Some(model) = models.get(slug) {
                return Ok(Some(Arc::clone(model)));
            }
        }
        for parent in &self.parents {
            if let Some(model) = parent.find(slug)? {
                return Ok(Some(model));
            }
        }
        Ok(None)
    }

    /// Resolve a slug, failing when no registry in the chain knows it
    pub fn get(&self, slug: &str) -> DataResult<Arc<Model>> {
        self.find(slug)?
            .ok_or_else(|| DataError::ModelNotFound(slug.to_string()))
    }

    pub fn contains(&self, slug: &str) -> bool {
        matches!(self.find(slug), Ok(Some(_)))
    }

    /// Every resolvable slug; local models shadow parents
    pub fn slugs(&self) -> DataResult<Vec<String>> {
        let mut slugs: Vec<String> = self
            .models
            .read()
            .map_err(|_| DataError::internal("Lock poisoned"))?
            .keys()
            .cloned()
            .collect();
        for parent in &self.parents {
            for slug in parent.slugs()? {
                if !slugs.contains(&slug) {
                    slugs.push(slug);
                }
            }
        }
        Ok(slugs)
    }

    /// Models resolvable through the chain, local first
    pub fn models(&self) -> DataResult<Vec<Arc<Model>>> {
        self.slugs()?.iter().map(|slug| self.get(slug)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyKinds;
    use crate::schema::ModelConfig;

    fn model(slug: &str) -> Model {
        Model::bind(ModelConfig::new(slug), &PropertyKinds::builtin()).unwrap()
    }

    #[test]
    fn test_lookup_falls_back_to_parents_in_order() {
        let base = Arc::new(ModelRegistry::new());
        base.define(model("accounts")).unwrap();
        let shared = Arc::new(ModelRegistry::new());
        shared.define(model("accounts")).unwrap();
        shared.define(model("roles")).unwrap();

        let registry = ModelRegistry::new()
            .with_parent(Arc::clone(&base))
            .with_parent(Arc::clone(&shared));
        registry.define(model("posts")).unwrap();

        assert!(Arc::ptr_eq(&registry.get("accounts").unwrap(), &base.get("accounts").unwrap()));
        assert_eq!(registry.get("roles").unwrap().slug(), "roles");
        assert_eq!(registry.slugs().unwrap(), vec!["posts", "accounts", "roles"]);
    }

    #[test]
    fn test_missing_model() {
        let registry = ModelRegistry::new();
        assert!(matches!(registry.get("ghost"), Err(DataError::ModelNotFound(_))));
        assert!(!registry.contains("ghost"));
    }

    #[test]
    fn test_local_definition_shadows_parent() {
        let parent = Arc::new(ModelRegistry::new());
        parent.define(model("accounts")).unwrap();
        let registry = ModelRegistry::new().with_parent(Arc::clone(&parent));
        let local = registry.define(model("accounts")).unwrap();

        assert!(Arc::ptr_eq(&registry.get("accounts").unwrap(), &local));
        let removed = registry.remove("accounts").unwrap();
        assert_eq!(removed.map(|m| m.slug().to_string()), Some("accounts".into()));
        assert!(!Arc::ptr_eq(&registry.get("accounts").unwrap(), &local));
    }
}
