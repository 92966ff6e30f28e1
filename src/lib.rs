//! Construct evaluation and property resolution for infrastructure
//! templates.
//!
//! A construct template declares typed inputs, resources, edges, outputs,
//! and expansion rules in YAML. The [`evaluator::Evaluator`] resolves a
//! request against a template: inputs are parsed and validated, `${...}`
//! interpolation expressions are resolved, bindings between constructs are
//! merged, and the result is marshalled into a [`constraints::SolveRequest`]
//! for an external solver.

pub mod constraints;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod import;
pub mod interp;
pub mod model;
pub mod path;
pub mod property;
pub mod template;
pub mod value;

pub use constraints::{Constraint, Operator, SolveRequest};
pub use error::{MasonryError, SanitizeError};
pub use evaluator::{ConstructRequest, Evaluator};
pub use graph::{GraphEdge, ResourceGraph};
pub use import::{PropertyInfo, RawState, ResourceInfo, Solution, StateConverter};
pub use model::{
    Binding, Construct, ConstructRegistry, ConstructType, Edge, OutputDeclaration, PropertyRef,
    RefKind, Resource, ResourceId, ResourceRef, ScopeData, Urn,
};
pub use property::{Property, PropertyMap, PropertySchema, PropertyType};
pub use template::{BindingTemplate, ConstructTemplate, TemplateStore};
pub use value::Value;
