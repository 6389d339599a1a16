//! Opaque manifest payloads.

use std::fmt;

/// A manifest blob as read from its source file.
///
/// The contents are never inspected by the builder; a single blob may hold
/// several `---`-separated YAML documents, and splitting them is left to the
/// [`Applier`](crate::Applier).
#[derive(Clone, PartialEq, Eq, Default)]
pub struct YamlDocument(Vec<u8>);

impl YamlDocument {
	pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
		Self(bytes.into())
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	pub fn into_bytes(self) -> Vec<u8> {
		self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Debug for YamlDocument {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match std::str::from_utf8(&self.0) {
			Ok(text) => f.debug_tuple("YamlDocument").field(&text).finish(),
			Err(_) => f
				.debug_tuple("YamlDocument")
				.field(&format_args!("<{} bytes>", self.0.len()))
				.finish(),
		}
	}
}

impl From<Vec<u8>> for YamlDocument {
	fn from(value: Vec<u8>) -> Self {
		Self(value)
	}
}

impl From<&[u8]> for YamlDocument {
	fn from(value: &[u8]) -> Self {
		Self(value.to_vec())
	}
}

impl<const N: usize> From<&[u8; N]> for YamlDocument {
	fn from(value: &[u8; N]) -> Self {
		Self(value.to_vec())
	}
}

impl From<String> for YamlDocument {
	fn from(value: String) -> Self {
		Self(value.into_bytes())
	}
}

impl From<&str> for YamlDocument {
	fn from(value: &str) -> Self {
		Self(value.as_bytes().to_vec())
	}
}

impl AsRef<[u8]> for YamlDocument {
	fn as_ref(&self) -> &[u8] {
		&self.0
	}
}
