use std::future::Future;

use crate::{document::YamlDocument, owner::OwningResource};

/// Applies a single manifest blob to a cluster.
///
/// Implementations own everything about the transport: decoding, retries,
/// server-side vs. client-side apply, cancellation.
pub trait Applier {
	type Error: std::error::Error + Send + Sync + 'static;

	/// Apply `doc` into `namespace`, attaching `owner` to every object it holds.
	fn apply(
		&self,
		doc: &YamlDocument,
		namespace: &str,
		owner: Option<&OwningResource>,
	) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

