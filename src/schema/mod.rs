//! # Schema
//!
//! Model configurations, bound models, the model registry and the on-disk
//! loader. Model configurations are produced by an outer schema service;
//! this module only binds and resolves them.

mod loader;
mod model;
mod registry;

pub use loader::SchemaLoader;
pub use model::{
    Model, ModelConfig, SINGLETON_COLLECTION, SINGLETON_FIELD, SYSTEM_PROPERTIES,
};
pub use registry::ModelRegistry;
