//! Loopback live stream demo
//!
//! A host and a viewer share one in-memory document store and negotiate over
//! loopback peer connections. Run with `RUST_LOG=debug` to see every signal
//! write.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use streamrtc::{
    DebugLogger, Event, Identity, LoopbackFactory, MemoryStore, MockCapture, SignalTrace,
    StaticAuthenticator, StreamConfig, StreamController,
};

fn controller(store: &MemoryStore, who: Identity, trace: Arc<SignalTrace>) -> Result<StreamController> {
    StreamController::builder()
        .config(StreamConfig::fast_polling())
        .store(Arc::new(store.clone()))
        .transport(Arc::new(LoopbackFactory::new()))
        .capture(Arc::new(MockCapture::new()))
        .authenticator(Arc::new(StaticAuthenticator::signed_in(who)))
        .observer(trace)
        .build()
        .context("building controller")
}

#[tokio::main]
async fn main() -> Result<()> {
    DebugLogger::init_logging()?;

    let store = MemoryStore::new();
    let trace = Arc::new(SignalTrace::new(128));

    let host = controller(
        &store,
        Identity::new("host-1").with_display_name("Ada"),
        trace.clone(),
    )?;
    let viewer = controller(&store, Identity::new("viewer-1"), trace.clone())?;
    let mut viewer_events = viewer.events().context("viewer events already taken")?;

    println!("🎥 Starting stream...");
    let started = host.start_stream(None).await?;
    let stream_id = started
        .stream_id()
        .context("another start was already running")?
        .clone();
    println!("✅ Live as {}", stream_id);

    println!("👀 Joining as viewer...");
    viewer.join_stream(stream_id.as_str()).await?;

    tokio::time::sleep(Duration::from_millis(200)).await;
    for event in viewer_events.drain() {
        match event {
            Event::ConnectionStateChanged { state } => println!("🔗 Viewer connection: {}", state),
            Event::RemoteTrack { stream_id, tracks } => {
                println!("📺 Remote stream {} with {} tracks", stream_id, tracks)
            }
            Event::StatusChanged { status } => println!("ℹ️  Viewer status: {}", status),
            _ => {}
        }
    }

    let info = viewer.connection_info();
    println!(
        "📊 Viewer state {} after {} transitions, connected in {:?}",
        info.state, info.transitions, info.time_to_connect
    );

    viewer.leave_stream().await?;
    host.stop_stream().await;
    println!("🛑 Stream stopped");

    let summary = trace.summary();
    println!(
        "🧾 {} signal writes, {} failed",
        summary.recorded, summary.failed
    );
    println!("{}", trace.to_json()?);
    Ok(())
}
