//! Common test utilities.

use std::sync::Mutex;

use thiserror::Error;

use crate::{Applier, OwningResource, YamlDocument};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct MockApplyError(pub String);

/// One observed `apply` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyCall {
	pub doc: YamlDocument,
	pub namespace: String,
	pub owner: Option<OwningResource>,
}

/// An applier that records every call and optionally fails on the n-th one.
#[derive(Default)]
pub struct RecordingApplier {
	calls: Mutex<Vec<ApplyCall>>,
	fail_on_call: Option<(usize, String)>,
}

impl RecordingApplier {
	pub fn new() -> Self {
		Self::default()
	}

	/// Fail the call with the given zero-based index.
	pub fn failing_on(index: usize, message: impl Into<String>) -> Self {
		Self {
			calls: Mutex::default(),
			fail_on_call: Some((index, message.into())),
		}
	}

	pub fn calls(&self) -> Vec<ApplyCall> {
		self.calls.lock().unwrap().clone()
	}
}

impl Applier for RecordingApplier {
	type Error = MockApplyError;

	async fn apply(
		&self,
		doc: &YamlDocument,
		namespace: &str,
		owner: Option<&OwningResource>,
	) -> Result<(), Self::Error> {
		let index = {
			let mut calls = self.calls.lock().unwrap();
			calls.push(ApplyCall {
				doc: doc.clone(),
				namespace: namespace.to_string(),
				owner: owner.cloned(),
			});
			calls.len() - 1
		};

		match &self.fail_on_call {
			Some((fail_index, message)) if *fail_index == index => {
				Err(MockApplyError(message.clone()))
			}
			_ => Ok(()),
		}
	}
}
