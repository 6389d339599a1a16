//! Manifest sources shared by `apply` and `render`.
//!
//! Raw files and templates are registered under the path they were given as,
//! and every template is rendered with the same data: config file `values`,
//! then the `--values` file, then `--set` pairs, later ones overriding
//! earlier ones.

use std::{collections::BTreeMap, fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use manifest_batch::{Builder, TemplateData};

/// Field set to the target namespace unless provided explicitly.
pub const NAMESPACE_FIELD: &str = "Namespace";

#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
	/// Manifest file applied as-is (repeatable)
	#[arg(short = 'f', long = "file")]
	pub files: Vec<PathBuf>,

	/// Go template rendered before applying (repeatable)
	#[arg(short = 't', long = "template")]
	pub templates: Vec<PathBuf>,

	/// YAML file with a flat map of template values
	#[arg(long)]
	pub values: Option<PathBuf>,

	/// Set a template value (Format: key=value)
	#[arg(long = "set", value_parser = parse_key_val)]
	pub set: Vec<(String, String)>,
}

impl SourceArgs {
	/// Read every source file into a builder.
	pub fn load(
		&self,
		config_values: &BTreeMap<String, serde_yaml::Value>,
		namespace: Option<&str>,
	) -> Result<Builder> {
		if self.files.is_empty() && self.templates.is_empty() {
			bail!("no manifests given, pass at least one --file or --template");
		}

		let data = self.template_data(config_values, namespace)?;
		let mut builder = Builder::new();

		for path in &self.files {
			let bytes =
				fs::read(path).with_context(|| format!("reading manifest {}", path.display()))?;
			builder.add_yaml_resource(path.display().to_string(), bytes);
		}

		for path in &self.templates {
			let bytes =
				fs::read(path).with_context(|| format!("reading template {}", path.display()))?;
			builder.add_template(path.display().to_string(), bytes, data.clone());
		}

		tracing::debug!(documents = builder.len(), "loaded manifest sources");
		Ok(builder)
	}

	fn template_data(
		&self,
		config_values: &BTreeMap<String, serde_yaml::Value>,
		namespace: Option<&str>,
	) -> Result<TemplateData> {
		let mut data = values_to_data(config_values).context("reading values from config file")?;

		if let Some(path) = &self.values {
			let content = fs::read_to_string(path)
				.with_context(|| format!("reading values file {}", path.display()))?;
			let values: BTreeMap<String, serde_yaml::Value> = if content.trim().is_empty() {
				BTreeMap::new()
			} else {
				serde_yaml::from_str(&content)
					.with_context(|| format!("parsing values file {}", path.display()))?
			};
			data.extend(
				values_to_data(&values)
					.with_context(|| format!("reading values file {}", path.display()))?,
			);
		}

		data.extend(self.set.iter().cloned().collect());

		if let Some(namespace) = namespace {
			if data.get(NAMESPACE_FIELD).is_none() {
				data.insert(NAMESPACE_FIELD, namespace);
			}
		}
		Ok(data)
	}
}

/// Parse a `key=value` pair.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
	match s.split_once('=') {
		Some((key, _)) if key.is_empty() => Err(format!("empty key in `{s}`")),
		Some((key, value)) => Ok((key.to_string(), value.to_string())),
		None => Err(format!("expected key=value, got `{s}`")),
	}
}

/// Convert a flat YAML map into template data.
///
/// Scalars are rendered the way they would be written in YAML; `null` becomes
/// an empty string. Nested values are rejected.
fn values_to_data(values: &BTreeMap<String, serde_yaml::Value>) -> Result<TemplateData> {
	values
		.iter()
		.map(|(key, value)| {
			let value = match value {
				serde_yaml::Value::Null => String::new(),
				serde_yaml::Value::Bool(b) => b.to_string(),
				serde_yaml::Value::Number(n) => n.to_string(),
				serde_yaml::Value::String(s) => s.clone(),
				serde_yaml::Value::Sequence(_)
				| serde_yaml::Value::Mapping(_)
				| serde_yaml::Value::Tagged(_) => {
					bail!("value for `{key}` must be a scalar")
				}
			};
			Ok((key.clone(), value))
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use indoc::indoc;
	use rstest::rstest;
	use tempfile::TempDir;

	use super::*;

	#[rstest]
	#[case("name=le-app", "name", "le-app")]
	#[case("url=http://x?a=b", "url", "http://x?a=b")]
	#[case("empty=", "empty", "")]
	fn test_parse_key_val(#[case] input: &str, #[case] key: &str, #[case] value: &str) {
		assert_eq!(
			parse_key_val(input),
			Ok((key.to_string(), value.to_string()))
		);
	}

	#[rstest]
	#[case("novalue")]
	#[case("=value")]
	fn test_parse_key_val_invalid(#[case] input: &str) {
		assert!(parse_key_val(input).is_err());
	}

	#[test]
	fn test_values_to_data_scalars() {
		let values: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(indoc! {"
			image: nginx:1.27
			replicas: 3
			enabled: true
			note: ~
		"})
		.unwrap();

		let data = values_to_data(&values).unwrap();
		assert_eq!(data.get("image"), Some("nginx:1.27"));
		assert_eq!(data.get("replicas"), Some("3"));
		assert_eq!(data.get("enabled"), Some("true"));
		assert_eq!(data.get("note"), Some(""));
	}

	#[test]
	fn test_values_to_data_rejects_nested() {
		let values: BTreeMap<String, serde_yaml::Value> =
			serde_yaml::from_str("labels:\n  app: x\n").unwrap();

		let err = values_to_data(&values).unwrap_err();
		assert_eq!(err.to_string(), "value for `labels` must be a scalar");
	}

	#[test]
	fn test_value_precedence() {
		let temp = TempDir::new().unwrap();
		let values_path = temp.path().join("values.yaml");
		fs::write(&values_path, "image: from-file\nreplicas: 2\n").unwrap();

		let args = SourceArgs {
			values: Some(values_path),
			set: vec![("replicas".to_string(), "5".to_string())],
			..SourceArgs::default()
		};
		let config_values = BTreeMap::from([
			("image".to_string(), serde_yaml::Value::from("from-config")),
			("tier".to_string(), serde_yaml::Value::from("web")),
		]);

		let data = args
			.template_data(&config_values, Some("le-namespace"))
			.unwrap();
		assert_eq!(data.get("image"), Some("from-file"));
		assert_eq!(data.get("replicas"), Some("5"));
		assert_eq!(data.get("tier"), Some("web"));
		assert_eq!(data.get(NAMESPACE_FIELD), Some("le-namespace"));
	}

	#[test]
	fn test_explicit_namespace_value_is_kept() {
		let args = SourceArgs {
			set: vec![(NAMESPACE_FIELD.to_string(), "pinned".to_string())],
			..SourceArgs::default()
		};

		let data = args
			.template_data(&BTreeMap::new(), Some("le-namespace"))
			.unwrap();
		assert_eq!(data.get(NAMESPACE_FIELD), Some("pinned"));
	}

	#[test]
	fn test_load_registers_files_and_templates() {
		let temp = TempDir::new().unwrap();
		let raw = temp.path().join("config.yaml");
		let template = temp.path().join("sa.yaml.tmpl");
		fs::write(&raw, "kind: ConfigMap\n").unwrap();
		fs::write(&template, "namespace: {{ .Namespace }}\n").unwrap();

		let args = SourceArgs {
			files: vec![raw.clone()],
			templates: vec![template.clone()],
			..SourceArgs::default()
		};
		let builder = args.load(&BTreeMap::new(), Some("le-namespace")).unwrap();

		let rendered = builder.render_all().unwrap();
		assert_eq!(
			rendered[&template.display().to_string()].as_bytes(),
			b"namespace: le-namespace\n"
		);
		assert_eq!(
			rendered[&raw.display().to_string()].as_bytes(),
			b"kind: ConfigMap\n"
		);
	}

	#[test]
	fn test_load_requires_sources() {
		let err = SourceArgs::default()
			.load(&BTreeMap::new(), None)
			.unwrap_err();
		assert!(err.to_string().starts_with("no manifests given"));
	}

	#[test]
	fn test_load_missing_file() {
		let args = SourceArgs {
			files: vec![PathBuf::from("/nonexistent/manifest.yaml")],
			..SourceArgs::default()
		};

		let err = args.load(&BTreeMap::new(), None).unwrap_err();
		assert_eq!(err.to_string(), "reading manifest /nonexistent/manifest.yaml");
	}
}
