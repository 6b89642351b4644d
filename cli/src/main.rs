mod cli;
mod observer;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use bytesize::ByteSize;
use chunkup_core::{ChunkPlan, ChunkSource, ChunkUploader, HttpTransport, LocalFile};
use clap::Parser;
use cli_table::{
    format::{Border, Justify, Separator},
    Cell, Table,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use crate::{
    cli::{Args, Command},
    observer::TerminalObserver,
};

async fn upload(server: &Url, file: Option<&Path>) -> Result<()> {
    let source = match file {
        Some(path) => Some(
            LocalFile::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => None,
    };

    let http_client = reqwest::Client::builder()
        .user_agent(format!(
            "{}/{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ))
        .build()
        .context("failed to build HTTP client")?;
    let transport = HttpTransport::new(http_client, server)?;

    let uploader =
        ChunkUploader::new(transport).with_observer(Arc::new(TerminalObserver::new()));
    let cancel = uploader.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let summary = uploader
        .upload(source.as_ref().map(|s| s as &dyn ChunkSource))
        .await?;
    tracing::info!(
        filename = %summary.filename,
        size = %ByteSize(summary.size),
        total_chunks = summary.total_chunks,
        "uploaded"
    );
    Ok(())
}

async fn plan(file: &Path) -> Result<()> {
    let source = LocalFile::open(file)
        .await
        .with_context(|| format!("failed to open {}", file.display()))?;
    let plan = ChunkPlan::new(source.size());

    let table = plan
        .chunks()
        .map(|chunk| {
            vec![
                chunk.index.cell().justify(Justify::Right),
                chunk.start.cell().justify(Justify::Right),
                chunk.end.cell().justify(Justify::Right),
                ByteSize(chunk.len())
                    .to_string()
                    .cell()
                    .justify(Justify::Right),
            ]
        })
        .collect::<Vec<_>>()
        .table()
        .title(vec![
            "INDEX".cell(),
            "START".cell(),
            "END".cell(),
            "SIZE".cell(),
        ])
        .separator(
            Separator::builder()
                .column(None)
                .row(None)
                .title(None)
                .build(),
        )
        .border(Border::builder().build());

    println!(
        "{}: {} in {} chunk(s)",
        source.name(),
        ByteSize(plan.size()),
        plan.total_chunks()
    );
    cli_table::print_stdout(table)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Upload { file } => upload(&args.server, file.as_deref()).await?,
        Command::Plan { file } => plan(&file).await?,
    }

    Ok(())
}
