//! Render command handler.
//!
//! Prints the merged, rendered batch as one YAML stream without touching a
//! cluster.

use std::{collections::BTreeMap, io::Write};

use anyhow::{Context, Result};
use clap::Args;
use manifest_batch::YamlDocument;

use super::sources::SourceArgs;
use crate::config::MbatchConfig;

#[derive(Args, Debug, Clone, Default)]
pub struct RenderArgs {
	#[command(flatten)]
	pub sources: SourceArgs,

	/// Namespace exposed to templates as `.Namespace`. Defaults to the config file
	#[arg(short = 'n', long)]
	pub namespace: Option<String>,
}

/// Run the render command.
pub fn run<W: Write>(args: RenderArgs, config: MbatchConfig, mut writer: W) -> Result<()> {
	let namespace = args.namespace.as_deref().or(config.namespace.as_deref());
	let builder = args.sources.load(&config.values, namespace)?;

	let documents = builder.render_all()?;
	write_stream(&documents, &mut writer).context("writing rendered manifests")?;
	writer.flush().context("flushing output")?;
	Ok(())
}

/// Write documents as a YAML stream, each preceded by its source key.
fn write_stream<W: Write>(
	documents: &BTreeMap<String, YamlDocument>,
	writer: &mut W,
) -> std::io::Result<()> {
	for (i, (key, doc)) in documents.iter().enumerate() {
		if i > 0 {
			writer.write_all(b"---\n")?;
		}
		writeln!(writer, "# Source: {key}")?;
		writer.write_all(doc.as_bytes())?;
		if !doc.as_bytes().ends_with(b"\n") {
			writer.write_all(b"\n")?;
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use std::fs;

	use indoc::indoc;
	use tempfile::TempDir;

	use super::*;

	#[test]
	fn test_write_stream() {
		let documents = BTreeMap::from([
			("b.yaml".to_string(), YamlDocument::from("kind: Secret")),
			("a.yaml".to_string(), YamlDocument::from("kind: ConfigMap\n")),
		]);

		let mut out = Vec::new();
		write_stream(&documents, &mut out).unwrap();

		assert_eq!(
			String::from_utf8(out).unwrap(),
			indoc! {"
				# Source: a.yaml
				kind: ConfigMap
				---
				# Source: b.yaml
				kind: Secret
			"}
		);
	}

	#[test]
	fn test_render_uses_config_values_and_namespace() {
		let temp = TempDir::new().unwrap();
		let template = temp.path().join("deploy.yaml.tmpl");
		fs::write(
			&template,
			"metadata:\n  name: {{ .name }}\n  namespace: {{ .Namespace }}\n",
		)
		.unwrap();

		let args = RenderArgs {
			sources: SourceArgs {
				templates: vec![template.clone()],
				..SourceArgs::default()
			},
			namespace: None,
		};
		let config = MbatchConfig {
			namespace: Some("from-config".to_string()),
			values: BTreeMap::from([("name".to_string(), serde_yaml::Value::from("le-app"))]),
			..MbatchConfig::default()
		};

		let mut out = Vec::new();
		run(args, config, &mut out).unwrap();

		assert_eq!(
			String::from_utf8(out).unwrap(),
			format!(
				"# Source: {}\nmetadata:\n  name: le-app\n  namespace: from-config\n",
				template.display()
			)
		);
	}

	#[test]
	fn test_render_error_names_file() {
		let temp = TempDir::new().unwrap();
		let template = temp.path().join("broken.yaml.tmpl");
		fs::write(&template, "name: {{ .missing }}\n").unwrap();

		let args = RenderArgs {
			sources: SourceArgs {
				templates: vec![template.clone()],
				..SourceArgs::default()
			},
			namespace: None,
		};

		let err = run(args, MbatchConfig::default(), Vec::new()).unwrap_err();
		assert!(err
			.to_string()
			.starts_with(&format!("failed to render template for file {}", template.display())));
	}
}
