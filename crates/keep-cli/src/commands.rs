use anyhow::{bail, Context};
use colored::Colorize;
use keep_schema::{CatalogConfig, SchemaCatalog, SchemaModel, StoreLocation};
use keep_store::{Entity, OpenOutcome, Store};
use keep_types::EntityId;
use tracing::{debug, info};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let catalog = SchemaCatalog::with_config(CatalogConfig {
        bundle_dir: cli.schemas.clone(),
        data_dir: cli.data_dir.clone(),
        ..Default::default()
    });
    match &cli.command {
        Command::Schemas => cmd_schemas(&cli, &catalog),
        Command::Open(args) => cmd_open(&cli, &catalog, args),
        Command::Fingerprint(args) => cmd_fingerprint(&cli, &catalog, args),
        Command::Create(args) => cmd_create(&cli, &catalog, args),
        Command::List(args) => cmd_list(&cli, &catalog, args),
        Command::Show(args) => cmd_show(&cli, &catalog, args),
        Command::Delete(args) => cmd_delete(&cli, &catalog, args),
    }
}

fn open_store(cli: &Cli, catalog: &SchemaCatalog, schema: &str) -> anyhow::Result<Store> {
    let descriptor = catalog.load(schema)?;
    let location = match &cli.store {
        Some(path) => StoreLocation::new(path),
        None => catalog.resolve_store_location(schema)?,
    };
    debug!(schema, path = %location.path().display(), "opening store");
    let store = Store::open(&descriptor, &location)
        .with_context(|| format!("cannot open store {}", location.path().display()))?;
    debug!(outcome = ?store.outcome(), fingerprint = %store.fingerprint().short_hex(), "store ready");
    Ok(store)
}

fn cmd_schemas(cli: &Cli, catalog: &SchemaCatalog) -> anyhow::Result<()> {
    let names = catalog.available()?;
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&names)?),
        OutputFormat::Text if names.is_empty() => {
            println!("No schemas in {}", catalog.config().bundle_dir.display())
        }
        OutputFormat::Text => {
            for name in names {
                println!("{name}");
            }
        }
    }
    Ok(())
}

fn cmd_open(cli: &Cli, catalog: &SchemaCatalog, args: &SchemaArgs) -> anyhow::Result<()> {
    let store = open_store(cli, catalog, &args.schema)?;
    match cli.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "path": store.path(),
                "fingerprint": store.fingerprint(),
                "result": store.outcome(),
            }))?
        ),
        OutputFormat::Text => {
            let what = match store.outcome() {
                OpenOutcome::Created => "Created".green().bold(),
                OpenOutcome::Opened => "Opened".green(),
                OpenOutcome::Migrated { .. } => "Migrated".yellow().bold(),
            };
            println!("{} {}", what, store.path().display().to_string().bold());
            if let OpenOutcome::Migrated { from } = store.outcome() {
                println!("  From: {}", from.short_hex().dimmed());
            }
            println!("  Schema: {}", store.fingerprint().short_hex().cyan());
            for (name, kind) in &store.model().kinds {
                println!("  {}: {}", name.bold(), store.entity_ids(&kind.name)?.len());
            }
        }
    }
    Ok(())
}

fn cmd_fingerprint(cli: &Cli, catalog: &SchemaCatalog, args: &SchemaArgs) -> anyhow::Result<()> {
    let model = SchemaModel::load(&catalog.load(&args.schema)?)?;
    let fingerprint = model.fingerprint();
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&fingerprint)?),
        OutputFormat::Text => println!("{}", fingerprint.to_hex()),
    }
    Ok(())
}

fn cmd_create(cli: &Cli, catalog: &SchemaCatalog, args: &CreateArgs) -> anyhow::Result<()> {
    let mut store = open_store(cli, catalog, &args.schema)?;
    let Some(kind) = store.model().kind(&args.kind).cloned() else {
        bail!("schema {} has no entity kind {}", args.schema, args.kind);
    };

    let id = store.create_entity(&kind.name);
    for pair in &args.values {
        let (name, text) = split_pair(pair)?;
        let Some(attr) = kind.attribute(name) else {
            bail!("{} has no attribute {name}", kind.name);
        };
        let value = attr
            .ty
            .parse_literal(text)
            .with_context(|| format!("bad value for {}.{name}", kind.name))?;
        store.set_attribute(id, name, value)?;
    }
    for pair in &args.links {
        let (name, target) = split_pair(pair)?;
        let target: EntityId = target.parse()?;
        store.link(id, name, target)?;
    }

    let summary = store.save()?;
    info!(kind = %kind.name, %id, "entity created");
    match cli.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "id": id, "saved": summary }))?
        ),
        OutputFormat::Text => println!(
            "{} Created {} {}",
            "✓".green().bold(),
            kind.name,
            id.to_string().yellow()
        ),
    }
    Ok(())
}

fn cmd_list(cli: &Cli, catalog: &SchemaCatalog, args: &ListArgs) -> anyhow::Result<()> {
    let mut store = open_store(cli, catalog, &args.schema)?;
    if store.model().kind(&args.kind).is_none() {
        bail!("schema {} has no entity kind {}", args.schema, args.kind);
    }
    let mut entities = Vec::new();
    for id in store.entity_ids(&args.kind)? {
        if let Some(entity) = store.entity(id)? {
            entities.push(entity.clone());
        }
    }
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entities)?),
        OutputFormat::Text if entities.is_empty() => println!("No {} entities.", args.kind),
        OutputFormat::Text => {
            for entity in &entities {
                println!("{}", summary_line(entity));
            }
        }
    }
    Ok(())
}

fn cmd_show(cli: &Cli, catalog: &SchemaCatalog, args: &ShowArgs) -> anyhow::Result<()> {
    let mut store = open_store(cli, catalog, &args.schema)?;
    let Some(entity) = store.entity(args.id)? else {
        bail!("no entity {}", args.id);
    };
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(entity)?),
        OutputFormat::Text => {
            println!("{} {}", entity.kind().bold(), entity.id().to_string().yellow());
            for (name, value) in entity.attributes() {
                println!("  {name} = {value}");
            }
            for (name, targets) in entity.relationships() {
                let targets: Vec<String> = targets.iter().map(ToString::to_string).collect();
                println!("  {name} -> {}", targets.join(", ").cyan());
            }
        }
    }
    Ok(())
}

fn cmd_delete(cli: &Cli, catalog: &SchemaCatalog, args: &ShowArgs) -> anyhow::Result<()> {
    let mut store = open_store(cli, catalog, &args.schema)?;
    store.delete_entity(args.id)?;
    let summary = store.save()?;
    info!(id = %args.id, updated = summary.updated, "entity deleted");
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => println!(
            "{} Deleted {} ({} updated)",
            "✓".green().bold(),
            args.id.to_string().yellow(),
            summary.updated
        ),
    }
    Ok(())
}

fn split_pair(pair: &str) -> anyhow::Result<(&str, &str)> {
    pair.split_once('=')
        .with_context(|| format!("expected name=value, got {pair:?}"))
}

fn summary_line(entity: &Entity) -> String {
    let attributes: Vec<String> = entity
        .attributes()
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    format!(
        "{} {}",
        entity.id().to_string().yellow(),
        attributes.join(" ")
    )
}
