//! `modelver version` subcommands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use modelver_core::model::{
    DeploymentConfig, EngineConfig, ModelTemplateVersion, Resource, ScalingConfig,
    VERSION_ASSIGNED,
};
use modelver_core::store::{LabelSelector, Store};
use serde::Deserialize;

use super::{format_age, or_dash, print_json};

/// Version command group.
#[derive(Debug, Args)]
pub struct VersionCommand {
    #[command(subcommand)]
    pub subcommand: VersionSubcommand,
}

/// Version subcommands.
#[derive(Debug, Subcommand)]
pub enum VersionSubcommand {
    /// Create a version of a template; the daemon assigns its number
    Create(CreateArgs),

    /// Show one version
    Get {
        /// Version name
        name: String,
    },

    /// List versions
    #[command(alias = "ls")]
    List {
        /// Only versions of this template
        #[arg(short, long)]
        template: Option<String>,

        /// List versions in every namespace
        #[arg(short = 'A', long)]
        all_namespaces: bool,
    },

    /// Delete a version
    #[command(alias = "rm")]
    Delete {
        /// Version name
        name: String,
    },
}

/// Arguments for `modelver version create`.
#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Version name
    pub name: String,

    /// Owning template (same namespace)
    #[arg(short, long)]
    pub template: String,

    /// Free-form description
    #[arg(long, default_value = "")]
    pub description: String,

    /// JSON file with `deploymentConfig`, `engineConfig` and `scalingConfig`
    #[arg(long)]
    pub serving_config: Option<PathBuf>,
}

/// Serving configuration blocks accepted by `--serving-config`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ServingConfig {
    #[serde(default)]
    deployment_config: DeploymentConfig,
    #[serde(default)]
    engine_config: EngineConfig,
    #[serde(default)]
    scaling_config: ScalingConfig,
}

fn load_serving_config(path: &Path) -> Result<ServingConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse serving config {}", path.display()))
}

/// Runs a version subcommand against `store`.
pub fn run<S: Store>(cmd: &VersionCommand, store: &S, namespace: &str, json: bool) -> Result<()> {
    match &cmd.subcommand {
        VersionSubcommand::Create(args) => {
            let created = create(store, namespace, args)?;
            if json {
                print_json(&created)
            } else {
                println!(
                    "version {} of template {} created",
                    created.object_ref(),
                    created.spec.template_name
                );
                Ok(())
            }
        },
        VersionSubcommand::Get { name } => {
            let version: ModelTemplateVersion = store
                .get(namespace, name)
                .with_context(|| format!("failed to get version {namespace}/{name}"))?;
            if json {
                print_json(&version)
            } else {
                print_table(std::slice::from_ref(&version));
                Ok(())
            }
        },
        VersionSubcommand::List {
            template,
            all_namespaces,
        } => {
            let scope = (!all_namespaces).then_some(namespace);
            let versions = list(store, scope, template.as_deref())?;
            if json {
                print_json(&versions)
            } else {
                print_table(&versions);
                Ok(())
            }
        },
        VersionSubcommand::Delete { name } => {
            store
                .delete::<ModelTemplateVersion>(namespace, name)
                .with_context(|| format!("failed to delete version {namespace}/{name}"))?;
            if !json {
                println!("version {namespace}/{name} deleted");
            }
            Ok(())
        },
    }
}

/// Creates an unnumbered version from `args`.
pub fn create<S: Store>(
    store: &S,
    namespace: &str,
    args: &CreateArgs,
) -> Result<ModelTemplateVersion> {
    let serving = match &args.serving_config {
        Some(path) => load_serving_config(path)?,
        None => ServingConfig::default(),
    };
    let mut version =
        ModelTemplateVersion::new(namespace, args.name.as_str(), args.template.as_str());
    version.spec.description.clone_from(&args.description);
    version.spec.deployment_config = serving.deployment_config;
    version.spec.engine_config = serving.engine_config;
    version.spec.scaling_config = serving.scaling_config;

    store
        .create(&version)
        .with_context(|| format!("failed to create version {namespace}/{}", args.name))
}

/// Lists versions, optionally only those of `template`.
///
/// Filters on `spec.templateName` rather than the template label, so
/// versions the daemon has not processed yet are included.
pub fn list<S: Store>(
    store: &S,
    namespace: Option<&str>,
    template: Option<&str>,
) -> Result<Vec<ModelTemplateVersion>> {
    let versions: Vec<ModelTemplateVersion> = store
        .list(namespace, &LabelSelector::everything())
        .context("failed to list versions")?;
    Ok(versions
        .into_iter()
        .filter(|v| template.is_none_or(|t| v.spec.template_name == t))
        .collect())
}

fn print_table(versions: &[ModelTemplateVersion]) {
    if versions.is_empty() {
        println!("No versions found");
        return;
    }
    let now = Utc::now();
    println!(
        "{:<16} {:<24} {:<24} {:>8} {:<18} {:>6}",
        "NAMESPACE", "NAME", "TEMPLATE", "VERSION", "ASSIGNED", "AGE"
    );
    println!("{}", "-".repeat(101));
    for v in versions {
        let conditions = &v.status.conditions;
        let assigned = if VERSION_ASSIGNED.is_true(conditions) {
            "True".to_string()
        } else if VERSION_ASSIGNED.is_false(conditions) {
            format!("False ({})", or_dash(VERSION_ASSIGNED.reason(conditions)))
        } else {
            "Unknown".to_string()
        };
        let number = if v.status.version == 0 {
            "-".to_string()
        } else {
            v.status.version.to_string()
        };
        println!(
            "{:<16} {:<24} {:<24} {:>8} {:<18} {:>6}",
            v.metadata.namespace,
            v.metadata.name,
            v.spec.template_name,
            number,
            assigned,
            format_age(&v.metadata, now),
        );
    }
}
