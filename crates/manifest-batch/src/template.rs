//! Go text/template rendering for templated manifests.
//!
//! Templates use the `{{ .Field }}` syntax. Fields are looked up in a
//! [`TemplateData`], which is handed to the template engine as a struct-like
//! object: referencing a field that was never set is an error rather than a
//! silent `<no value>`.

use std::collections::{BTreeMap, HashMap};

use gtmpl::{Context, Template, Value};
use thiserror::Error;

use crate::document::YamlDocument;

/// Name templates are parsed under; it shows up in parse diagnostics.
const TEMPLATE_NAME: &str = "t";

/// Errors produced while rendering a templated manifest.
///
/// Every variant carries the source key of the offending template.
#[derive(Debug, Error)]
pub enum RenderError {
	#[error("failed to parse template for file {key}: {message}")]
	Parse { key: String, message: String },

	#[error("failed to render template for file {key}: {message}")]
	Execute { key: String, message: String },

	#[error("template for file {key} is not valid UTF-8")]
	InvalidUtf8 {
		key: String,
		#[source]
		source: std::str::Utf8Error,
	},
}

impl RenderError {
	/// Source key of the template that failed.
	pub fn key(&self) -> &str {
		match self {
			Self::Parse { key, .. } | Self::Execute { key, .. } | Self::InvalidUtf8 { key, .. } => {
				key
			}
		}
	}
}

/// Named string values addressable from a template as `{{ .Name }}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateData {
	fields: BTreeMap<String, String>,
}

impl TemplateData {
	pub fn new() -> Self {
		Self::default()
	}

	/// Set a field, replacing any previous value.
	pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.fields.insert(name.into(), value.into());
	}

	/// Builder-style method to set a field.
	pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.insert(name, value);
		self
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		self.fields.get(name).map(String::as_str)
	}

	/// Merge `other` into this data, `other` winning on conflicts.
	pub fn extend(&mut self, other: Self) {
		self.fields.extend(other.fields);
	}

	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	fn to_gtmpl(&self) -> Value {
		let object: HashMap<String, Value> = self
			.fields
			.iter()
			.map(|(k, v)| (k.clone(), Value::String(v.clone())))
			.collect();
		Value::Object(object)
	}
}

impl From<BTreeMap<String, String>> for TemplateData {
	fn from(fields: BTreeMap<String, String>) -> Self {
		Self { fields }
	}
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TemplateData {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self {
			fields: iter
				.into_iter()
				.map(|(k, v)| (k.into(), v.into()))
				.collect(),
		}
	}
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for TemplateData {
	fn from(pairs: [(K, V); N]) -> Self {
		pairs.into_iter().collect()
	}
}

/// Render `template` with `data`.
///
/// `key` only serves error attribution.
pub fn render_template(
	key: &str,
	template: &[u8],
	data: &TemplateData,
) -> Result<YamlDocument, RenderError> {
	let text = std::str::from_utf8(template).map_err(|source| RenderError::InvalidUtf8 {
		key: key.to_string(),
		source,
	})?;

	if let Some(line) = unclosed_action_line(text) {
		return Err(RenderError::Parse {
			key: key.to_string(),
			message: format!("template: {TEMPLATE_NAME}:{line}: unclosed action"),
		});
	}

	let mut tmpl = Template::default();
	tmpl.parse(text).map_err(|e| RenderError::Parse {
		key: key.to_string(),
		message: e.to_string(),
	})?;

	let context = Context::from(data.to_gtmpl());
	let rendered = tmpl.render(&context).map_err(|e| RenderError::Execute {
		key: key.to_string(),
		message: trim_exec_message(e.to_string()),
	})?;

	Ok(YamlDocument::from(rendered))
}

/// 1-based line of the first `{{` that is never followed by `}}`.
///
/// gtmpl does not terminate on such input, so it is rejected up front.
fn unclosed_action_line(text: &str) -> Option<usize> {
	let mut offset = 0;
	while let Some(open) = text[offset..].find("{{") {
		let start = offset + open;
		match text[start + 2..].find("}}") {
			Some(close) => offset = start + 2 + close + 2,
			None => return Some(text[..start].matches('\n').count() + 1),
		}
	}
	None
}

/// Drop the dump of the template data gtmpl appends to a missing field error.
fn trim_exec_message(message: String) -> String {
	let Some(start) = message.find("no field ") else {
		return message;
	};
	match message[start..].find(" for ") {
		Some(end) => message[..start + end].to_string(),
		None => message,
	}
}
