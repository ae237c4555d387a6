//! # tracked-orm-binding
//!
//! Exposes tracked entities to generic binding consumers: an entity wrapper
//! presenting declared and dynamic fields as one property surface, property
//! descriptors with read, write and reset, capability probes for wrapped
//! objects, and validation errors backed by the metadata registries.

pub mod descriptor;
pub mod object;
pub mod validation;
pub mod wrapper;

pub use descriptor::{PropertyDescriptor, PropertySource};
pub use object::{Capabilities, DataErrorInfo, EntityObject};
pub use validation::RegistryValidator;
pub use wrapper::{EntityWrapper, WrapperBuilder};
