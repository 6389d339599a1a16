//! Collects manifests from many source files and applies them as one batch.
//!
//! Documents are registered under a source key (usually the file path they
//! were read from), either verbatim or as a template plus the data to render
//! it with. [`Builder::apply_all`] renders every template first, then hands
//! each resulting document to an [`Applier`] together with the target
//! namespace and the shared owner.

use std::{collections::BTreeMap, error::Error as StdError};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::{
	applier::Applier,
	document::YamlDocument,
	owner::OwningResource,
	template::{render_template, RenderError, TemplateData},
};

/// Errors that abort a build pass.
#[derive(Debug, Error)]
pub enum BuildError {
	#[error(transparent)]
	Render(#[from] RenderError),

	#[error("failed to apply resources from file {key}")]
	Apply {
		key: String,
		#[source]
		source: Box<dyn StdError + Send + Sync>,
	},
}

impl BuildError {
	/// Source key of the document that caused the failure.
	pub fn key(&self) -> &str {
		match self {
			Self::Render(err) => err.key(),
			Self::Apply { key, .. } => key,
		}
	}
}

/// A template body together with the data used to render it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateEntry {
	pub body: YamlDocument,
	pub data: TemplateData,
}

/// Accumulates raw and templated manifests and the owner they are applied under.
///
/// Keys are iterated in lexicographic order, both when rendering and when
/// dispatching, so a batch always applies in the same order. A key present in
/// both the raw and the template mapping is applied once, using the rendered
/// template.
#[derive(Debug, Clone, Default)]
pub struct Builder {
	resources: BTreeMap<String, YamlDocument>,
	templates: BTreeMap<String, TemplateEntry>,
	owner: Option<OwningResource>,
}

impl Builder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a manifest to be applied as-is.
	pub fn add_yaml_resource(
		&mut self,
		key: impl Into<String>,
		doc: impl Into<YamlDocument>,
	) -> &mut Self {
		self.resources.insert(key.into(), doc.into());
		self
	}

	/// Builder-style method to register a manifest to be applied as-is.
	pub fn with_yaml_resource(mut self, key: impl Into<String>, doc: impl Into<YamlDocument>) -> Self {
		self.add_yaml_resource(key, doc);
		self
	}

	/// Register a template, rendered with `data` before it is applied.
	pub fn add_template(
		&mut self,
		key: impl Into<String>,
		body: impl Into<YamlDocument>,
		data: impl Into<TemplateData>,
	) -> &mut Self {
		self.templates.insert(
			key.into(),
			TemplateEntry {
				body: body.into(),
				data: data.into(),
			},
		);
		self
	}

	/// Builder-style method to register a template.
	pub fn with_template(
		mut self,
		key: impl Into<String>,
		body: impl Into<YamlDocument>,
		data: impl Into<TemplateData>,
	) -> Self {
		self.add_template(key, body, data);
		self
	}

	/// Set the owner attached to every applied object, replacing any previous one.
	pub fn set_owner(&mut self, owner: OwningResource) -> &mut Self {
		self.owner = Some(owner);
		self
	}

	/// Builder-style method to set the owner.
	pub fn with_owner(mut self, owner: OwningResource) -> Self {
		self.set_owner(owner);
		self
	}

	/// Keys of the merged batch, in dispatch order.
	pub fn keys(&self) -> impl Iterator<Item = &str> {
		let mut keys: Vec<&str> = self
			.resources
			.keys()
			.chain(self.templates.keys())
			.map(String::as_str)
			.collect();
		keys.sort_unstable();
		keys.dedup();
		keys.into_iter()
	}

	/// Number of documents a build pass would apply.
	pub fn len(&self) -> usize {
		self.resources.len()
			+ self
				.templates
				.keys()
				.filter(|key| !self.resources.contains_key(*key))
				.count()
	}

	pub fn is_empty(&self) -> bool {
		self.resources.is_empty() && self.templates.is_empty()
	}

	/// Render all templates and merge them with the raw manifests.
	///
	/// Stops at the first template (in key order) that fails to render.
	#[instrument(skip_all, fields(templates = self.templates.len()))]
	pub fn render_all(&self) -> Result<BTreeMap<String, YamlDocument>, RenderError> {
		let mut documents = self.resources.clone();
		for (key, entry) in &self.templates {
			debug!(key = %key, "rendering template");
			let rendered = render_template(key, entry.body.as_bytes(), &entry.data)?;
			documents.insert(key.clone(), rendered);
		}
		Ok(documents)
	}

	/// Render every template, then apply the whole batch into `namespace`.
	///
	/// Nothing is applied if any template fails to render. Dispatch is
	/// sequential and stops at the first apply error; documents applied before
	/// the failure stay applied.
	#[instrument(skip_all, fields(namespace = %namespace, documents = self.len()))]
	pub async fn apply_all<A: Applier>(
		&self,
		applier: &A,
		namespace: &str,
	) -> Result<(), BuildError> {
		let documents = self.render_all()?;

		debug!(
			owner = ?self.owner.as_ref().map(|o| format!("{}/{}", o.kind, o.name)),
			"dispatching documents"
		);
		for (key, doc) in &documents {
			debug!(key = %key, "applying document");
			applier
				.apply(doc, namespace, self.owner.as_ref())
				.await
				.map_err(|e| BuildError::Apply {
					key: key.clone(),
					source: Box::new(e),
				})?;
		}

		debug!(applied = documents.len(), "all documents applied");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use indoc::indoc;

	use super::*;
	use crate::test_utils::RecordingApplier;

	const TEST_FILE_1: &str = "/dir/file1.yaml";
	const TEST_FILE_2: &str = "/dir/file2.yaml";
	const TEST_FILE_3: &str = "/dir/file3.yaml";
	const TEST_NAMESPACE: &str = "le-namespace";

	const MULTI_DOC_YAML: &str = indoc! {"
		apiVersion: v1
		kind: ServiceAccount
		metadata:
		  name: le-service-account
		---
		apiVersion: v1
		kind: ConfigMap
		metadata:
		  name: le-config
		data:
		  key: value
	"};

	const MULTI_DOC_YAML_TEMPLATE: &str = indoc! {"
		apiVersion: v1
		kind: ServiceAccount
		metadata:
		  name: le-service-account
		  namespace: {{ .Namespace }}
		---
		apiVersion: v1
		kind: ConfigMap
		metadata:
		  name: le-config
		  namespace: {{ .Namespace }}
	"};

	fn namespace_data(namespace: &str) -> TemplateData {
		TemplateData::from([("Namespace", namespace)])
	}

	fn owner() -> OwningResource {
		OwningResource::new("v1", "ServiceAccount", "le-service-account")
			.with_namespace(TEST_NAMESPACE)
	}

	#[test]
	fn test_with_yaml_resource_single() {
		let sut = Builder::new().with_yaml_resource(TEST_FILE_1, MULTI_DOC_YAML);

		assert_eq!(
			sut.resources.get(TEST_FILE_1),
			Some(&YamlDocument::from(MULTI_DOC_YAML))
		);
		assert!(sut.templates.is_empty());
	}

	#[test]
	fn test_with_yaml_resource_distinguishes_files() {
		let sut = Builder::new()
			.with_yaml_resource(TEST_FILE_1, MULTI_DOC_YAML)
			.with_yaml_resource(TEST_FILE_2, MULTI_DOC_YAML_TEMPLATE);

		assert_eq!(sut.resources.len(), 2);
		assert_eq!(
			sut.resources.get(TEST_FILE_1),
			Some(&YamlDocument::from(MULTI_DOC_YAML))
		);
		assert_eq!(
			sut.resources.get(TEST_FILE_2),
			Some(&YamlDocument::from(MULTI_DOC_YAML_TEMPLATE))
		);
	}

	#[test]
	fn test_with_yaml_resource_overwrites_same_key() {
		let mut sut = Builder::new();
		sut.add_yaml_resource(TEST_FILE_1, "first")
			.add_yaml_resource(TEST_FILE_1, "second");

		assert_eq!(sut.resources.len(), 1);
		assert_eq!(
			sut.resources.get(TEST_FILE_1),
			Some(&YamlDocument::from("second"))
		);
	}

	#[test]
	fn test_with_template_single() {
		let sut = Builder::new().with_template(
			TEST_FILE_2,
			MULTI_DOC_YAML_TEMPLATE,
			namespace_data(TEST_NAMESPACE),
		);

		let entry = sut.templates.get(TEST_FILE_2).unwrap();
		assert_eq!(entry.body, YamlDocument::from(MULTI_DOC_YAML_TEMPLATE));
		assert_eq!(entry.data, namespace_data(TEST_NAMESPACE));
		assert!(sut.resources.is_empty());
	}

	#[test]
	fn test_with_template_maintains_two_entries() {
		let sut = Builder::new()
			.with_template(TEST_FILE_1, MULTI_DOC_YAML_TEMPLATE, namespace_data(TEST_NAMESPACE))
			.with_template(TEST_FILE_2, MULTI_DOC_YAML_TEMPLATE, namespace_data("hello-world"));

		assert_eq!(sut.templates.len(), 2);
		assert_eq!(
			sut.templates.get(TEST_FILE_1).unwrap().data,
			namespace_data(TEST_NAMESPACE)
		);
		assert_eq!(
			sut.templates.get(TEST_FILE_2).unwrap().data,
			namespace_data("hello-world")
		);
	}

	#[test]
	fn test_with_template_overwrites_same_key() {
		let sut = Builder::new()
			.with_template(TEST_FILE_1, "a: {{ .Namespace }}", namespace_data("first"))
			.with_template(TEST_FILE_1, "b: {{ .Namespace }}", namespace_data("second"));

		assert_eq!(sut.templates.len(), 1);
		let entry = sut.templates.get(TEST_FILE_1).unwrap();
		assert_eq!(entry.body, YamlDocument::from("b: {{ .Namespace }}"));
		assert_eq!(entry.data, namespace_data("second"));
	}

	#[test]
	fn test_with_owner() {
		let sut = Builder::new().with_owner(owner());
		assert_eq!(sut.owner, Some(owner()));
	}

	#[test]
	fn test_with_owner_last_wins() {
		let other = OwningResource::new("apps/v1", "Deployment", "le-deployment");
		let sut = Builder::new().with_owner(owner()).with_owner(other.clone());
		assert_eq!(sut.owner, Some(other));
	}

	#[test]
	fn test_keys_and_len_merge_duplicates() {
		let sut = Builder::new()
			.with_yaml_resource(TEST_FILE_2, MULTI_DOC_YAML)
			.with_yaml_resource(TEST_FILE_1, MULTI_DOC_YAML)
			.with_template(TEST_FILE_1, MULTI_DOC_YAML_TEMPLATE, namespace_data(TEST_NAMESPACE))
			.with_template(TEST_FILE_3, MULTI_DOC_YAML_TEMPLATE, namespace_data(TEST_NAMESPACE));

		assert_eq!(
			sut.keys().collect::<Vec<_>>(),
			vec![TEST_FILE_1, TEST_FILE_2, TEST_FILE_3]
		);
		assert_eq!(sut.len(), 3);
		assert!(!sut.is_empty());
		assert!(Builder::new().is_empty());
	}

	#[test]
	fn test_render_all_template_wins_over_raw() {
		let sut = Builder::new()
			.with_yaml_resource(TEST_FILE_1, "raw")
			.with_template(TEST_FILE_1, "ns: {{ .Namespace }}", namespace_data(TEST_NAMESPACE));

		let documents = sut.render_all().unwrap();

		assert_eq!(documents.len(), 1);
		assert_eq!(
			documents.get(TEST_FILE_1),
			Some(&YamlDocument::from("ns: le-namespace"))
		);
	}

	#[tokio::test]
	async fn test_apply_all_dispatches_raw_and_rendered() {
		let applier = RecordingApplier::new();
		let sut = Builder::new()
			.with_yaml_resource(TEST_FILE_1, MULTI_DOC_YAML)
			.with_template(TEST_FILE_2, MULTI_DOC_YAML_TEMPLATE, namespace_data(TEST_NAMESPACE))
			.with_owner(owner());

		sut.apply_all(&applier, TEST_NAMESPACE).await.unwrap();

		let calls = applier.calls();
		assert_eq!(calls.len(), 2);
		for call in &calls {
			assert_eq!(call.namespace, TEST_NAMESPACE);
			assert_eq!(call.owner, Some(owner()));
		}
		assert_eq!(calls[0].doc, YamlDocument::from(MULTI_DOC_YAML));
		assert_eq!(
			calls[1].doc,
			YamlDocument::from(MULTI_DOC_YAML_TEMPLATE.replace("{{ .Namespace }}", TEST_NAMESPACE))
		);
	}

	#[tokio::test]
	async fn test_apply_all_without_owner() {
		let applier = RecordingApplier::new();
		let sut = Builder::new()
			.with_yaml_resource(TEST_FILE_1, MULTI_DOC_YAML)
			.with_yaml_resource(TEST_FILE_2, MULTI_DOC_YAML);

		sut.apply_all(&applier, TEST_NAMESPACE).await.unwrap();

		let calls = applier.calls();
		assert_eq!(calls.len(), 2);
		assert!(calls.iter().all(|call| call.owner.is_none()));
	}

	#[tokio::test]
	async fn test_apply_all_render_error_applies_nothing() {
		let applier = RecordingApplier::new();
		let sut = Builder::new()
			.with_yaml_resource(TEST_FILE_1, MULTI_DOC_YAML)
			.with_template(TEST_FILE_2, "hello {{ .Namespace ", namespace_data(TEST_NAMESPACE))
			.with_template(TEST_FILE_3, MULTI_DOC_YAML_TEMPLATE, namespace_data(TEST_NAMESPACE));

		let err = sut.apply_all(&applier, TEST_NAMESPACE).await.unwrap_err();

		assert_matches!(err, BuildError::Render(RenderError::Parse { .. }));
		assert_eq!(err.key(), TEST_FILE_2);
		assert_eq!(
			err.to_string(),
			"failed to parse template for file /dir/file2.yaml: template: t:1: unclosed action"
		);
		assert!(applier.calls().is_empty());
	}

	#[tokio::test]
	async fn test_apply_all_stops_at_first_apply_error() {
		let applier = RecordingApplier::failing_on(0, "connection refused");
		let sut = Builder::new()
			.with_yaml_resource(TEST_FILE_1, MULTI_DOC_YAML)
			.with_yaml_resource(TEST_FILE_2, MULTI_DOC_YAML)
			.with_yaml_resource(TEST_FILE_3, MULTI_DOC_YAML);

		let err = sut.apply_all(&applier, TEST_NAMESPACE).await.unwrap_err();

		assert_eq!(applier.calls().len(), 1);
		assert_matches!(err, BuildError::Apply { ref key, .. } if key == TEST_FILE_1);
		assert_eq!(
			err.to_string(),
			"failed to apply resources from file /dir/file1.yaml"
		);
		assert_eq!(
			StdError::source(&err).map(ToString::to_string).as_deref(),
			Some("connection refused")
		);
	}

	#[tokio::test]
	async fn test_apply_all_keeps_prefix_applied() {
		let applier = RecordingApplier::failing_on(1, "forbidden");
		let sut = Builder::new()
			.with_yaml_resource(TEST_FILE_1, "one")
			.with_yaml_resource(TEST_FILE_2, "two")
			.with_yaml_resource(TEST_FILE_3, "three");

		let err = sut.apply_all(&applier, TEST_NAMESPACE).await.unwrap_err();

		assert_eq!(err.key(), TEST_FILE_2);
		let applied: Vec<_> = applier.calls().into_iter().map(|c| c.doc).collect();
		assert_eq!(applied, vec![YamlDocument::from("one"), YamlDocument::from("two")]);
	}

	#[tokio::test]
	async fn test_apply_all_is_repeatable() {
		let applier = RecordingApplier::new();
		let sut = Builder::new()
			.with_template(TEST_FILE_1, "ns: {{ .Namespace }}", namespace_data(TEST_NAMESPACE));

		sut.apply_all(&applier, TEST_NAMESPACE).await.unwrap();
		sut.apply_all(&applier, TEST_NAMESPACE).await.unwrap();

		let calls = applier.calls();
		assert_eq!(calls.len(), 2);
		assert_eq!(calls[0], calls[1]);
	}
}
