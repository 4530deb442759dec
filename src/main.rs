//! datahub CLI: metadata aggregation hub.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use datahub::config::HubConfig;
use datahub::error::ResolveError;
use datahub::paths::HubPaths;
use datahub::resolver::PutOutcome;
use datahub::store::DocumentStore;
use datahub::store::mem::MemStore;
use datahub::xml::decode::{decode, decode_str};

#[derive(Parser)]
#[command(name = "datahub", version, about = "Metadata aggregation hub")]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/datahub/datahub.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for the redb store.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the REST API.
    #[cfg(feature = "server")]
    Serve,

    /// Classify a record without storing anything.
    Classify {
        /// XML record file.
        #[arg(long)]
        file: PathBuf,
    },

    /// Show the query a rule pattern compiles to.
    Compile {
        /// Rule pattern, e.g. "objectWorkType/term".
        #[arg(long)]
        pattern: String,
    },

    /// Create records from XML files.
    Ingest {
        /// XML record files.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Replace records that already exist instead of skipping them.
        #[arg(long)]
        replace: bool,
    },

    /// List stored sets.
    Sets,

    /// Show the rule table as compiled.
    Rules,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Missing XDG paths only matter when neither flag covers them.
    let paths = HubPaths::resolve().ok();
    let mut config = HubConfig::resolve(cli.config.as_deref(), paths.as_ref())?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = Some(dir);
    }

    match cli.command {
        #[cfg(feature = "server")]
        Commands::Serve => {
            config.apply_env()?;
            let resolver = config.resolver(paths.as_ref())?;
            let state = std::sync::Arc::new(datahub::server::AppState::new(resolver, config));
            let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
            runtime.block_on(datahub::server::serve(state)).into_diagnostic()?;
        }

        Commands::Classify { file } => {
            let raw = std::fs::read_to_string(&file).into_diagnostic()?;
            let classifier = config.classifier()?;
            let extractor = config.extractor()?;
            let scratch = MemStore::new();

            let decoded = decode_str(&raw).map_err(ResolveError::from)?;
            let record_ids = extractor.record_ids(&decoded.json)?;
            let object_ids = extractor.object_ids(&decoded.json)?;
            let sets = classifier.classify_document(&decoded.document, &scratch)?;

            println!("{}", file.display());
            println!("  record ids: {}", record_ids.join(", "));
            if !object_ids.is_empty() {
                println!("  object ids: {}", object_ids.join(", "));
            }
            if sets.is_empty() {
                println!("  no sets");
            }
            for spec in &sets {
                match scratch.find_set(spec)? {
                    Some(set) => println!("  {spec}  ({})", set.name),
                    None => println!("  {spec}"),
                }
            }
        }

        Commands::Compile { pattern } => {
            let compiled = datahub::classify::compile(
                &pattern,
                &config.classification.namespace,
                config.language(),
            );
            datahub::xml::query::Query::parse(&compiled)?;
            println!("{compiled}");
        }

        Commands::Ingest { files, replace } => {
            let resolver = config.resolver(paths.as_ref())?;
            let extractor = config.extractor()?;
            let (mut created, mut replaced, mut skipped) = (0usize, 0usize, 0usize);
            for file in &files {
                let body = std::fs::read(file).into_diagnostic()?;
                let outcome = if replace {
                    // Address the record by the identifier its body carries.
                    decode(&body)
                        .map_err(ResolveError::from)
                        .and_then(|d| Ok(extractor.record_ids(&d.json)?))
                        .and_then(|ids| {
                            let target = ids.first().cloned().unwrap_or_default();
                            resolver.put(&target, &body)
                        })
                        .map(|o| matches!(o, PutOutcome::Replaced(_)))
                } else {
                    resolver.create(&body).map(|_| false)
                };
                match outcome {
                    Ok(true) => replaced += 1,
                    Ok(false) => created += 1,
                    Err(ResolveError::IdentifierConflict { record_id }) => {
                        tracing::warn!(file = %file.display(), %record_id, "record exists, skipped");
                        skipped += 1;
                    }
                    Err(e) => {
                        return Err(miette::Report::new(e)
                            .wrap_err(format!("failed to ingest {}", file.display())));
                    }
                }
            }
            println!(
                "Ingested {} files: {created} created, {replaced} replaced, {skipped} skipped",
                files.len()
            );
        }

        Commands::Sets => {
            let resolver = config.resolver(paths.as_ref())?;
            let store = resolver.store();
            let total = store.count_sets()?;
            if total == 0 {
                println!("No sets.");
            } else {
                println!("Sets ({total}):");
                for set in store.find_sets(0, total)? {
                    println!("  {}  ({})", set.spec, set.name);
                }
            }
        }

        Commands::Rules => {
            let classifier = config.classifier()?;
            println!("Rules ({}):", classifier.len());
            for (key, queries) in classifier.rules() {
                println!("  {key}");
                for query in queries {
                    println!("    {query}");
                }
            }
        }
    }

    Ok(())
}
