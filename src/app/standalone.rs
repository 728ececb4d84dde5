use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::*;
use clap::Parser;
use mrlite::cmd::standalone::{Args, Commands};
use mrlite::sink::LineSink;
use mrlite::source::{FileSource, RecordSource, TagSource};
use mrlite::standalone::job::{EngineConfig, JobConfig};
use mrlite::standalone::{Engine, JobSpec};
use mrlite::storage::{self, DirStore, TagStore};
use mrlite::workload;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mrlite=info,mrl_standalone=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let store = DirStore::open(&args.store)?;

    match args.command {
        Commands::Run {
            input,
            tag,
            workload,
            output,
            partitions,
            concurrency,
            max_retries,
            timeout,
            stats,
        } => {
            let app = workload::named(&workload)?;
            let source: Arc<dyn RecordSource> = match input {
                Some(pattern) => Arc::new(FileSource::new(&pattern)?),
                None => Arc::new(TagSource::new(Arc::new(store), tag.as_slice())?),
            };

            let mut engine_config = EngineConfig::default();
            if let Some(concurrency) = concurrency {
                engine_config.concurrency = concurrency;
            }
            let engine = Engine::new(engine_config)?;
            let spec = JobSpec::new(&workload, source, app).config(JobConfig {
                num_partitions: partitions,
                max_retries,
                timeout: timeout.map(Duration::from_secs),
                ..Default::default()
            });

            let result = engine.run(spec).await?;

            let writer: Box<dyn Write> = match &output {
                Some(path) => Box::new(BufWriter::new(File::create(path).with_context(|| {
                    format!("failed to create {}", path.display())
                })?)),
                None => Box::new(BufWriter::new(io::stdout().lock())),
            };
            let mut sink = LineSink::new(writer);
            result.emit_to(&mut sink)?;
            sink.into_inner()?;

            if stats {
                eprintln!("{}", serde_json::to_string_pretty(&result.stats)?);
            }
        }
        Commands::Load { tag, path, chunk } => {
            let blobs = storage::load(&store, &tag, &path, chunk)?;
            info!(%tag, blobs, "loaded {}", path.display());
        }
        Commands::Delete { tag } => {
            store.delete(&tag)?;
            info!(%tag, "deleted");
        }
    }
    Ok(())
}
