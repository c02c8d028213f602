use std::{sync::Arc, time::Duration};

use anyhow::bail;
use clap::Parser;
use dvr::{CaptureConfig, HttpPlaylistResolver, HttpSegmentFileStore, PlaylistCapture};
use tracing_subscriber::EnvFilter;
use url::Url;

mod options;
mod writer;

use options::{CaptureOptions, HttpOptions, OutputOptions};
use writer::PlaylistWriter;

#[derive(Parser, Clone, Debug)]
#[clap(name = "dvr-bridge", version, about)]
struct DvrBridgeArgs {
    #[clap(flatten)]
    http: HttpOptions,

    #[clap(flatten)]
    capture: CaptureOptions,

    #[clap(flatten)]
    output: OutputOptions,

    /// Debug output
    #[clap(long, alias = "debug")]
    verbose: bool,

    /// Live playlist to record
    url: Url,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = DvrBridgeArgs::parse();

    let default_filter = if args.verbose {
        "dvr=debug,dvr_bridge=debug"
    } else {
        "dvr=info,dvr_bridge=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    record(args).await
}

async fn record(args: DvrBridgeArgs) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&args.output.output_dir).await?;

    let client = args.http.into_client(&args.url)?;
    let store = Arc::new(
        HttpSegmentFileStore::new(
            client.clone(),
            &args.output.output_dir,
            args.output.public_url.clone(),
        )
        .with_concurrency(args.capture.concurrency),
    );
    let config =
        CaptureConfig::default().with_update_interval(Duration::from_millis(args.capture.interval));
    let capture = PlaylistCapture::new(
        args.url.clone(),
        HttpPlaylistResolver::new(client),
        store,
        config,
    );

    let writer = PlaylistWriter::spawn(capture.updates(), args.output.playlist_path());

    if !capture.start().await? {
        bail!("Unable to start the capture of {}", args.url);
    }
    tracing::info!(
        "Recording {} into {}. Press Ctrl-C to stop.",
        args.url,
        args.output.playlist_path().display()
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Ctrl-C received, stopping capture.");
            capture.stop()?;
        }
        _ = capture.wait_stopped() => {
            tracing::warn!("Capture stopped: {:?}", capture.stop_reason());
        }
    }

    // the tail may still be downloading, give it a chance to land
    if let Ok(content) = capture.current_content() {
        if !content.ends_with("#EXT-X-ENDLIST\n") {
            let mut updates = capture.updates();
            _ = tokio::time::timeout(
                Duration::from_secs(30),
                updates.wait_for(|c| c.as_deref().is_some_and(|c| c.ends_with("#EXT-X-ENDLIST\n"))),
            )
            .await;
        }
    }

    let summary = capture.summary()?;
    drop(capture);
    let written = writer.finish().await;

    tokio::fs::write(
        args.output.summary_path(),
        serde_json::to_vec_pretty(&summary)?,
    )
    .await?;
    tracing::info!(
        "Captured {} segments ({} downloaded) over {:.1}s.",
        summary.segments,
        summary.downloaded_segments,
        summary.duration_secs
    );

    written
}
