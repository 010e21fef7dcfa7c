use anyhow::Context;
use bytes::Bytes;
use clap::Args;
use colored::Colorize;
use spotlight_envelope::process_envelope;
use spotlight_store::{ContextLinesConfig, Store, StoreConfig};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::render::render_trace;

#[derive(Args)]
pub struct ReplayCommand {
    /// Envelope files to ingest, in order
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Print traces as JSON instead of span trees
    #[arg(long)]
    pub json: bool,

    /// Endpoint that fills in source context for error stack frames
    #[arg(long, env = "SPOTLIGHT_CONTEXT_LINES_URL")]
    pub context_lines_url: Option<String>,

    /// Timeout for context line requests, in milliseconds
    #[arg(long, default_value_t = 2000, env = "SPOTLIGHT_CONTEXT_LINES_TIMEOUT_MS")]
    pub context_lines_timeout_ms: u64,
}

impl ReplayCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        // Context line enrichment runs on the ambient runtime
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        let store = Store::new(self.store_config()).context("Failed to create store")?;

        let mut ingested = 0;
        for path in &self.files {
            match ingest_file(&store, path) {
                Ok(envelopes) => {
                    ingested += 1;
                    debug!("Ingested {} ({} envelopes so far)", path.display(), envelopes);
                }
                Err(e) => warn!("Skipping {}: {:#}", path.display(), e),
            }
        }
        info!("Replayed {} of {} envelope files", ingested, self.files.len());

        let traces = store.get_traces();
        if self.json {
            println!("{}", serde_json::to_string_pretty(&traces)?);
            return Ok(());
        }

        for trace in &traces {
            let mut lines = render_trace(trace).into_iter();
            if let Some(header) = lines.next() {
                println!("{}", header.bold());
            }
            for line in lines {
                println!("{}", line);
            }
            println!();
        }
        println!(
            "{} {} events, {} traces, {} SDKs",
            "Summary:".bright_white().bold(),
            store.get_events().len().to_string().bright_cyan(),
            traces.len().to_string().bright_cyan(),
            store.get_sdks().len().to_string().bright_cyan(),
        );
        Ok(())
    }

    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            context_lines: self.context_lines_url.as_ref().map(|url| ContextLinesConfig {
                url: url.clone(),
                timeout_ms: self.context_lines_timeout_ms,
            }),
            ..Default::default()
        }
    }
}

/// Parse one envelope file and push it. Returns the store's envelope count.
fn ingest_file(store: &Store, path: &Path) -> anyhow::Result<usize> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let processed = process_envelope(None, Bytes::from(data))
        .with_context(|| format!("Malformed envelope in {}", path.display()))?;
    Ok(store.push_envelope(processed))
}
