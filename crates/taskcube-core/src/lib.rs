//! Core building blocks for TaskCube.
//!
//! This crate defines:
//! - The record types (`Script`, `TaskTemplate`, `Task`) and their lifecycles
//! - Reference expressions (`{{dotted.path}}`) evaluated against a task document
//! - The persistence seam (`Record` / `RecordStore`) consumed by the services
//!   and the controller
//!
//! Note: store implementations live in the taskcube-stores crate.

pub mod reference;
pub mod store;
pub mod types;

pub use store::{Page, Record, RecordFilter, RecordQuery, RecordStore, StoreError};
pub use types::{
    Kind, Metadata, Script, ScriptMetadata, ScriptType, StepState, Task, TaskSpec, TaskSpecStep,
    TaskState, TaskStatus, TaskStatusStep, TaskTemplate, TaskTemplateSpec,
};
