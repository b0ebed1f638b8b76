//! `modelver template` subcommands.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Subcommand};
use modelver_core::model::{ModelTemplate, ObjectRef, Resource};
use modelver_core::store::{LabelSelector, Store};

use super::{format_age, or_dash, print_json};

/// Template command group.
#[derive(Debug, Args)]
pub struct TemplateCommand {
    #[command(subcommand)]
    pub subcommand: TemplateSubcommand,
}

/// Template subcommands.
#[derive(Debug, Subcommand)]
pub enum TemplateSubcommand {
    /// Create a template
    Create(CreateArgs),

    /// Show one template
    Get {
        /// Template name
        name: String,
    },

    /// List templates
    #[command(alias = "ls")]
    List {
        /// List templates in every namespace
        #[arg(short = 'A', long)]
        all_namespaces: bool,
    },

    /// Delete a template and, through owner references, its versions
    #[command(alias = "rm")]
    Delete {
        /// Template name
        name: String,
    },
}

/// Arguments for `modelver template create`.
#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Template name
    pub name: String,

    /// Free-form description
    #[arg(long, default_value = "")]
    pub description: String,

    /// Pin the default version (`namespace/name` or a bare version name)
    #[arg(long)]
    pub default_version: Option<String>,
}

/// Runs a template subcommand against `store`.
pub fn run<S: Store>(cmd: &TemplateCommand, store: &S, namespace: &str, json: bool) -> Result<()> {
    match &cmd.subcommand {
        TemplateSubcommand::Create(args) => {
            let created = create(store, namespace, args)?;
            if json {
                print_json(&created)
            } else {
                println!("template {} created", created.object_ref());
                Ok(())
            }
        },
        TemplateSubcommand::Get { name } => {
            let template: ModelTemplate = store
                .get(namespace, name)
                .with_context(|| format!("failed to get template {namespace}/{name}"))?;
            if json {
                print_json(&template)
            } else {
                print_table(std::slice::from_ref(&template));
                Ok(())
            }
        },
        TemplateSubcommand::List { all_namespaces } => {
            let scope = (!all_namespaces).then_some(namespace);
            let templates: Vec<ModelTemplate> = store
                .list(scope, &LabelSelector::everything())
                .context("failed to list templates")?;
            if json {
                print_json(&templates)
            } else {
                print_table(&templates);
                Ok(())
            }
        },
        TemplateSubcommand::Delete { name } => {
            store
                .delete::<ModelTemplate>(namespace, name)
                .with_context(|| format!("failed to delete template {namespace}/{name}"))?;
            if !json {
                println!("template {namespace}/{name} deleted");
            }
            Ok(())
        },
    }
}

/// Creates a template from `args`.
pub fn create<S: Store>(store: &S, namespace: &str, args: &CreateArgs) -> Result<ModelTemplate> {
    let mut template = ModelTemplate::new(namespace, args.name.as_str())
        .with_description(args.description.as_str());
    if let Some(reference) = &args.default_version {
        let mut version = ObjectRef::parse(reference)
            .with_context(|| format!("invalid default version reference {reference:?}"))?;
        if version.namespace.is_empty() {
            version.namespace = namespace.to_string();
        }
        if version.namespace != namespace {
            bail!("default version {version} is outside namespace {namespace}");
        }
        template = template.with_default_version(&version);
    }
    store
        .create(&template)
        .with_context(|| format!("failed to create template {namespace}/{}", args.name))
}

fn print_table(templates: &[ModelTemplate]) {
    if templates.is_empty() {
        println!("No templates found");
        return;
    }
    let now = Utc::now();
    println!(
        "{:<16} {:<24} {:<32} {:>8} {:>8} {:>6}",
        "NAMESPACE", "NAME", "DEFAULT", "DEFAULT#", "LATEST", "AGE"
    );
    println!("{}", "-".repeat(99));
    for t in templates {
        println!(
            "{:<16} {:<24} {:<32} {:>8} {:>8} {:>6}",
            t.metadata.namespace,
            t.metadata.name,
            or_dash(&t.spec.default_version_id),
            t.status.default_version,
            t.status.latest_version,
            format_age(&t.metadata, now),
        );
    }
}

#[cfg(test)]
mod tests {
    use modelver_core::store::SqliteStore;

    use super::*;

    fn args(name: &str, default_version: Option<&str>) -> CreateArgs {
        CreateArgs {
            name: name.to_string(),
            description: "chat model".to_string(),
            default_version: default_version.map(str::to_string),
        }
    }

    #[test]
    fn test_create_resolves_bare_default_version() {
        let store = SqliteStore::in_memory().unwrap();
        let t = create(&store, "ml", &args("llama", Some("llama-v1"))).unwrap();
        assert_eq!(t.spec.default_version_id, "ml/llama-v1");
        assert_eq!(t.spec.description, "chat model");
        assert!(!t.metadata.uid.is_empty());
    }

    #[test]
    fn test_create_rejects_foreign_namespace_default() {
        let store = SqliteStore::in_memory().unwrap();
        let err = create(&store, "ml", &args("llama", Some("other/v1"))).unwrap_err();
        assert!(err.to_string().contains("outside namespace"));
    }

    #[test]
    fn test_create_duplicate_fails_with_context() {
        let store = SqliteStore::in_memory().unwrap();
        create(&store, "ml", &args("llama", None)).unwrap();
        let err = create(&store, "ml", &args("llama", None)).unwrap_err();
        assert!(err.to_string().contains("failed to create template ml/llama"));
    }
}
