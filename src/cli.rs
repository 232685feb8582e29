//! Command-line front end: one CRUD command against the configured server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use crate::app::{build_store, AppContext};
use crate::config::{Config, ConfigStore};
use crate::record::Record;
use crate::schema::ModelType;
use crate::state::{StateManager, StateNode, StateTree, ViewDescriptor};
use crate::store::Store;
use crate::view::CollectionView;

#[derive(Parser, Debug)]
#[command(name = "modelsync", version, about = "Sync records with a REST resource server")]
pub struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the server base URL from the config
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// List every record of a model
    List { model: String },

    /// Show one record
    Show {
        model: String,
        id: String,
        /// Relationships to resolve and print alongside the record
        #[arg(long = "include", value_name = "RELATIONSHIP")]
        include: Vec<String>,
    },

    /// Create a record from key=value fields
    Create {
        model: String,
        #[arg(value_name = "FIELD=VALUE", value_parser = parse_field)]
        fields: Vec<(String, Value)>,
    },

    /// Update fields of an existing record
    Update {
        model: String,
        id: String,
        #[arg(value_name = "FIELD=VALUE", value_parser = parse_field)]
        fields: Vec<(String, Value)>,
    },

    /// Delete a record
    Delete { model: String, id: String },
}

/// `views=3` is a number, `title=hello` a string. Anything that parses as
/// JSON is taken as JSON.
pub fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got '{}'", raw))?;
    if name.is_empty() {
        return Err(format!("missing field name in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

/// One leaf state per declared model, named after its resource path and
/// showing every record of that model.
pub fn model_states(config: &Config, store: &Store) -> StateNode {
    let mapping = store.adapter().mapping();
    let mut root = StateNode::new("root");
    for (i, model) in config.models.iter().enumerate() {
        let model = ModelType::new(&model.name);
        let plural = mapping.plural(&model);
        if i == 0 {
            root = root.initial(plural.clone());
        }
        root = root.child(StateNode::new(plural.clone()).view(ViewDescriptor::new(plural).showing(model)));
    }
    root
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    let path = args.config.clone().unwrap_or_else(Config::config_path);
    let config_store = ConfigStore::open(path)?;
    let mut config = config_store.get();
    if let Some(base_url) = args.base_url {
        config.adapter.base_url = base_url;
    }
    crate::init_tracing(&config.logging.filter);
    tracing::debug!(config = %config_store.path().display(), "Configuration loaded");

    let store = build_store(&config)?;
    let tree = StateTree::build(model_states(&config, &store))?;
    let ctx = AppContext::new(store, StateManager::new(tree));

    execute(&ctx, args.command).await
}

pub async fn execute(ctx: &AppContext, command: Command) -> anyhow::Result<()> {
    let store = ctx.store();
    match command {
        Command::List { model } => {
            let model = ModelType::new(model);
            store.all(model.clone())?;
            let path = store.adapter().mapping().plural(&model);
            ctx.load_for_state(&path).await?;

            let printer = store.clone();
            let view = CollectionView::new(&ctx.array_controller(&path), move |record| {
                record_json(&printer, record).to_string()
            });
            ctx.outlet().connect(path, Arc::new(view));
            for line in ctx.outlet().render(ctx.states())? {
                println!("{}", line);
            }
        }
        Command::Show { model, id, include } => {
            let record = store.find_loaded(model, id).await?;
            let mut out = record_json(store, &record);
            for name in include {
                let rel = record
                    .schema()
                    .relationship_named(&name)
                    .ok_or_else(|| anyhow!("'{}' has no relationship '{}'", record.model(), name))?
                    .clone();
                let related = if rel.is_belongs_to() {
                    match store.resolve_belongs_to(&record, &name).await? {
                        Some(owner) => record_json(store, &owner),
                        None => Value::Null,
                    }
                } else {
                    // Children only show up once they are in the store.
                    store.find_all_loaded(rel.target.clone()).await?;
                    let children = store.resolve_has_many(&record, &name)?;
                    Value::Array(children.records().iter().map(|r| record_json(store, r)).collect())
                };
                if let Value::Object(map) = &mut out {
                    map.insert(name, related);
                }
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Create { model, fields } => {
            let attributes: Map<String, Value> = fields.into_iter().collect();
            let record = store.create_record(model, Value::Object(attributes))?;
            store.commit(&record).await.context("create failed")?;
            println!("{}", serde_json::to_string_pretty(&record_json(store, &record))?);
        }
        Command::Update { model, id, fields } => {
            let record = store.find_loaded(model, id).await?;
            for (name, value) in fields {
                apply_field(store, &record, &name, value).await?;
            }
            if let Err(err) = store.commit(&record).await {
                report_rejection(&err);
                bail!("update failed: {}", err);
            }
            println!("{}", serde_json::to_string_pretty(&record_json(store, &record))?);
        }
        Command::Delete { model, id } => {
            let record = store.find_loaded(model, id).await?;
            store.destroy_record(&record).await.context("delete failed")?;
            println!("deleted {}", record.key());
        }
    }
    Ok(())
}

async fn apply_field(store: &Store, record: &Record, name: &str, value: Value) -> anyhow::Result<()> {
    let Some(rel) = record.schema().belongs_to_by_key(name).cloned() else {
        store.set_attribute(record, name, value)?;
        return Ok(());
    };
    let owner = match crate::serializer::value_to_id(&value) {
        Some(id) => Some(store.find_loaded(rel.target.clone(), id).await?),
        None => None,
    };
    store.set_belongs_to(record, &rel.name, owner.as_ref())?;
    Ok(())
}

fn report_rejection(err: &crate::store::StoreError) {
    let Some(errors) = err.adapter_error().and_then(|e| e.field_errors()) else {
        return;
    };
    for (field, messages) in errors {
        for message in messages {
            eprintln!("{}: {}", field, message);
        }
    }
}

/// Wire representation plus the id.
pub fn record_json(store: &Store, record: &Record) -> Value {
    let mut body = store.serializer().serialize(record);
    if let Value::Object(map) = &mut body {
        let id = match record.server_id() {
            Some(id) => crate::serializer::id_value(&id),
            None => Value::Null,
        };
        map.insert("id".to_string(), id);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_field_values() {
        assert_eq!(parse_field("title=hello").unwrap(), ("title".to_string(), json!("hello")));
        assert_eq!(parse_field("views=3").unwrap(), ("views".to_string(), json!(3)));
        assert_eq!(parse_field("flag=true").unwrap(), ("flag".to_string(), json!(true)));
        assert_eq!(parse_field("note=a=b").unwrap(), ("note".to_string(), json!("a=b")));
        assert!(parse_field("title").is_err());
        assert!(parse_field("=x").is_err());
    }

    #[test]
    fn test_parse_subcommands() {
        let args = Args::try_parse_from([
            "modelsync",
            "--base-url",
            "http://localhost:9000",
            "create",
            "photo",
            "title=A",
            "url=http://x",
        ])
        .unwrap();
        assert_eq!(args.base_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(
            args.command,
            Command::Create {
                model: "photo".to_string(),
                fields: vec![
                    ("title".to_string(), json!("A")),
                    ("url".to_string(), json!("http://x")),
                ],
            }
        );

        let args = Args::try_parse_from([
            "modelsync", "show", "photo", "1", "--include", "comments",
        ])
        .unwrap();
        match args.command {
            Command::Show { include, .. } => assert_eq!(include, vec!["comments".to_string()]),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_bad_field_is_rejected() {
        assert!(Args::try_parse_from(["modelsync", "create", "photo", "oops"]).is_err());
    }
}
