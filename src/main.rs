use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use kagami::cache::{CacheStore, FileStore, MemoryStore};
use kagami::config::LoaderConfig;
use kagami::error::LoaderError;
use kagami::fetch::{FetchedBytes, SourceFetcher, SourceKind, ThumbnailGenerator};
use kagami::raw::{RawDecodeResponse, RawDecoder};
use kagami::request::LoadImageRequest;
use kagami::service::ImageLoaderService;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Kagami image loader - byte-budgeted image loading service
#[derive(Parser, Debug)]
#[command(name = "kagami")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

/// Reads source bytes from the local filesystem, with the MIME type guessed
/// from the file extension
struct FileFetcher;

#[async_trait]
impl SourceFetcher for FileFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedBytes, LoaderError> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| LoaderError::fetch_failed(format!("{}: {}", path, e)))?;

        let mime_type = match path.rsplit('.').next().map(str::to_ascii_lowercase) {
            Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
            Some(ext) if ext == "png" => "image/png",
            Some(ext) if ext == "webp" => "image/webp",
            Some(ext) if ext == "gif" => "image/gif",
            Some(ext) if ext == "bmp" => "image/bmp",
            _ => "application/octet-stream",
        };

        Ok(FetchedBytes {
            mime_type: mime_type.to_string(),
            data: Bytes::from(data),
        })
    }
}

/// Platform thumbnailers are host-provided; the standalone binary has none
struct UnavailableThumbnailer;

#[async_trait]
impl ThumbnailGenerator for UnavailableThumbnailer {
    async fn generate(&self, _url: &str, kind: SourceKind) -> Result<FetchedBytes, LoaderError> {
        Err(LoaderError::fetch_failed(format!(
            "no thumbnailer configured for {:?} sources",
            kind
        )))
    }
}

/// The RAW decoder is an external subsystem; the standalone binary reports
/// every RAW file as undecodable rather than pretending
struct UnavailableRawDecoder;

#[async_trait]
impl RawDecoder for UnavailableRawDecoder {
    async fn decode(&self, _source: &[u8]) -> Result<RawDecodeResponse, LoaderError> {
        Err(LoaderError::RawDecodeFailed {
            message: "no RAW decoder configured".to_string(),
        })
    }

    fn is_failed(&self) -> bool {
        false
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    kagami::logging::init_subscriber(args.json_logs)
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("failed to initialize logging subsystem")?;

    let config = if args.config.exists() {
        LoaderConfig::from_file(&args.config)
            .with_context(|| format!("failed to load {}", args.config.display()))?
    } else {
        tracing::info!(
            config_file = %args.config.display(),
            "config file not found, using defaults"
        );
        LoaderConfig::default()
    };

    tracing::info!(
        cache_budget = config.cache.budget_bytes,
        cache_directory = config.cache.directory.as_deref().unwrap_or("<memory>"),
        "Configuration loaded"
    );

    match config.cache.directory.clone() {
        Some(directory) => {
            run_loop(build_service(config, Arc::new(FileStore::new(directory)))).await
        }
        None => run_loop(build_service(config, Arc::new(MemoryStore::new()))).await,
    }

    Ok(())
}

fn build_service<S: CacheStore + 'static>(
    config: LoaderConfig,
    store: Arc<S>,
) -> ImageLoaderService<S> {
    ImageLoaderService::new(
        config,
        store,
        Arc::new(FileFetcher),
        Arc::new(UnavailableThumbnailer),
        Arc::new(UnavailableRawDecoder),
    )
}

/// JSON-lines request/response loop over stdin/stdout, standing in for the
/// host message transport
async fn run_loop<S: CacheStore + 'static>(service: ImageLoaderService<S>) {
    service.initialize().await;

    let mut restart = service.decoder_restart_signal();
    tokio::spawn(async move {
        while restart.changed().await.is_ok() {
            tracing::error!("RAW decoder subsystem requires restart");
        }
    });

    // Responses from concurrent tasks are serialized through one channel so
    // output lines never interleave.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            let _ = stdout.write_all(line.as_bytes()).await;
            let _ = stdout.write_all(b"\n").await;
            let _ = stdout.flush().await;
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let request: LoadImageRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed request line");
                continue;
            }
        };

        let out = tx.clone();
        service.submit(
            request,
            Box::new(move |response| {
                if let Ok(json) = serde_json::to_string(&response) {
                    let _ = out.send(json);
                }
            }),
        );
    }

    tracing::info!("input closed, shutting down");
    service.shutdown();
    drop(tx);
    let _ = writer.await;
}
