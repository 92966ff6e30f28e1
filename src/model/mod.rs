//! Core domain model: identities, resources, references, constructs

mod construct;
mod resource;
mod urn;

pub use construct::{Binding, Construct, ConstructRegistry, ScopeData};
pub use resource::{
    Edge, OutputDeclaration, PropertyRef, RefKind, Resource, ResourceId, ResourceRef,
};
pub use urn::{ConstructType, Urn};
