//! Render and apply batches of Kubernetes manifests under a shared owner.
//!
//! A [`Builder`] collects manifests keyed by the file they came from, renders
//! the templated ones and applies the whole batch through an [`Applier`],
//! attaching the same owner reference to every object so they are garbage
//! collected together.

pub mod applier;
pub mod builder;
pub mod document;
pub mod k8s;
pub mod owner;
pub mod template;
#[cfg(test)]
pub mod test_utils;

pub use applier::Applier;
pub use builder::{BuildError, Builder, TemplateEntry};
pub use document::YamlDocument;
pub use owner::{OwnerError, OwningResource};
pub use template::{render_template, RenderError, TemplateData};
