//! Apply command handler.
//!
//! Renders the given manifests and applies them into one namespace, stamping
//! every object with the owner given on the command line.

use std::fmt;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use manifest_batch::k8s::{
	apply::{self, KubeApplier, DEFAULT_FIELD_MANAGER},
	client::ClusterConnection,
	discovery::ApiResourceCache,
	owner::fetch_owner,
};
use serde::Deserialize;
use tracing::instrument;

use super::sources::SourceArgs;
use crate::config::MbatchConfig;

/// Apply strategy for resource updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyStrategy {
	/// Server-side apply using PATCH with Apply.
	#[default]
	Server,

	/// Client-side apply using PATCH with strategic merge.
	Client,
}

impl fmt::Display for ApplyStrategy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ApplyStrategy::Server => write!(f, "server"),
			ApplyStrategy::Client => write!(f, "client"),
		}
	}
}

impl From<ApplyStrategy> for apply::ApplyStrategy {
	fn from(strategy: ApplyStrategy) -> Self {
		match strategy {
			ApplyStrategy::Server => apply::ApplyStrategy::Server,
			ApplyStrategy::Client => apply::ApplyStrategy::Client,
		}
	}
}

#[derive(Args, Debug, Clone, Default)]
pub struct ApplyArgs {
	#[command(flatten)]
	pub sources: SourceArgs,

	/// Namespace to apply into. Defaults to the config file, then the kubeconfig context
	#[arg(short = 'n', long)]
	pub namespace: Option<String>,

	#[command(flatten)]
	pub owner: OwnerArgs,

	/// Kubeconfig context to use
	#[arg(long)]
	pub context: Option<String>,

	/// Apply strategy to use
	#[arg(long, value_enum)]
	pub apply_strategy: Option<ApplyStrategy>,

	/// Take ownership of conflicting fields (server-side apply only)
	#[arg(long)]
	pub force: bool,

	/// Field manager recorded on applied objects
	#[arg(long)]
	pub field_manager: Option<String>,
}

/// The object every applied resource is owned by.
#[derive(Args, Debug, Clone, Default)]
pub struct OwnerArgs {
	/// apiVersion of the owner object
	#[arg(long, requires_all = ["owner_kind", "owner_name"])]
	pub owner_api_version: Option<String>,

	/// Kind of the owner object
	#[arg(long, requires_all = ["owner_api_version", "owner_name"])]
	pub owner_kind: Option<String>,

	/// Name of the owner object
	#[arg(long, requires_all = ["owner_api_version", "owner_kind"])]
	pub owner_name: Option<String>,

	/// Namespace of the owner object. Defaults to the target namespace
	#[arg(long, requires = "owner_name")]
	pub owner_namespace: Option<String>,
}

/// Settings resolved from flags and the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplySettings {
	pub namespace: Option<String>,
	pub context: Option<String>,
	pub strategy: ApplyStrategy,
	pub force: bool,
	pub field_manager: String,
}

impl ApplySettings {
	/// Flags override config file values.
	pub fn resolve(args: &ApplyArgs, config: &MbatchConfig) -> Self {
		Self {
			namespace: args.namespace.clone().or_else(|| config.namespace.clone()),
			context: args.context.clone().or_else(|| config.context.clone()),
			strategy: args
				.apply_strategy
				.or(config.apply_strategy)
				.unwrap_or_default(),
			force: args.force || config.force.unwrap_or(false),
			field_manager: args
				.field_manager
				.clone()
				.or_else(|| config.field_manager.clone())
				.unwrap_or_else(|| DEFAULT_FIELD_MANAGER.to_string()),
		}
	}
}

/// Run the apply command.
pub fn run(args: ApplyArgs, config: MbatchConfig) -> Result<()> {
	// Create a tokio runtime for async operations
	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("creating tokio runtime")?;

	runtime.block_on(run_async(args, config))
}

#[instrument(skip_all)]
async fn run_async(args: ApplyArgs, config: MbatchConfig) -> Result<()> {
	let settings = ApplySettings::resolve(&args, &config);

	let connection = ClusterConnection::connect(settings.context.as_deref())
		.await
		.context("connecting to cluster")?;
	let namespace = settings
		.namespace
		.clone()
		.unwrap_or_else(|| connection.default_namespace().to_string());

	tracing::info!(
		context = %connection.context(),
		namespace = %namespace,
		strategy = %settings.strategy,
		"applying manifests"
	);

	let mut builder = args.sources.load(&config.values, Some(&namespace))?;

	let api_cache = ApiResourceCache::new();
	if let OwnerArgs {
		owner_api_version: Some(api_version),
		owner_kind: Some(kind),
		owner_name: Some(name),
		owner_namespace,
	} = &args.owner
	{
		let owner_namespace = owner_namespace.as_deref().unwrap_or(&namespace);
		let owner = fetch_owner(
			connection.client(),
			&api_cache,
			api_version,
			kind,
			name,
			Some(owner_namespace),
		)
		.await
		.with_context(|| format!("resolving owner {kind}/{name}"))?;
		builder.set_owner(owner);
	}

	let applier = KubeApplier::new(connection.client().clone())
		.with_api_cache(api_cache)
		.with_strategy(settings.strategy.into())
		.with_force(settings.force)
		.with_field_manager(settings.field_manager);

	builder.apply_all(&applier, &namespace).await?;

	tracing::info!(documents = builder.len(), "apply finished");
	Ok(())
}
