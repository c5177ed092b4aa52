use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context};
use carlog_car::{ByteSource, CarReader};
use carlog_store::{AdmissionLimiter, SegmentedStore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// How an archive is driven into the store.
#[derive(Clone, Debug)]
pub struct IngestOptions {
    pub max_in_flight: usize,
    pub report_interval: Duration,
    pub verify: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_in_flight: carlog_store::limiter::DEFAULT_MAX_IN_FLIGHT,
            report_interval: Duration::from_secs(60),
            verify: false,
        }
    }
}

/// Totals for one ingest run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Entries decoded from the archive.
    pub entries: u64,
    /// Blocks newly written.
    pub stored: u64,
    /// Blocks already present in the store.
    pub duplicates: u64,
    /// Payload bytes decoded.
    pub bytes: u64,
    /// Framing reads repeated by the decoder.
    pub rereads: u64,
}

/// Decode every entry of `reader` and put it into `store`, with at most
/// `max_in_flight` puts running at once. The store and the reader are left
/// open.
pub async fn ingest<S: ByteSource>(
    reader: &mut CarReader<S>,
    store: Arc<SegmentedStore>,
    options: &IngestOptions,
) -> anyhow::Result<IngestReport> {
    let puts = Arc::new(AtomicU64::new(0));
    let reporter = spawn_reporter(Arc::clone(&puts), options.report_interval);

    let result = drive(reader, store, options, puts).await;
    reporter.abort();

    let mut report = result?;
    report.rereads = reader.rereads();
    info!(
        entries = report.entries,
        stored = report.stored,
        duplicates = report.duplicates,
        rereads = report.rereads,
        "ingest complete"
    );
    Ok(report)
}

type PutLimiter = AdmissionLimiter<anyhow::Result<bool>>;

/// Feed the archive through the limiter, then wait for every admitted put.
/// Admitted puts are waited for even when feeding stops early, so no write
/// is still running once this returns.
async fn drive<S: ByteSource>(
    reader: &mut CarReader<S>,
    store: Arc<SegmentedStore>,
    options: &IngestOptions,
    puts: Arc<AtomicU64>,
) -> anyhow::Result<IngestReport> {
    let mut limiter: PutLimiter = AdmissionLimiter::new(options.max_in_flight);
    let mut report = IngestReport::default();

    let fed = feed(reader, &store, options, &puts, &mut limiter, &mut report).await;
    let drained = limiter.drain().await;
    fed?;

    for done in drained? {
        tally(&mut report, done?);
    }
    debug!(entries = report.entries, "archive exhausted");
    Ok(report)
}

async fn feed<S: ByteSource>(
    reader: &mut CarReader<S>,
    store: &Arc<SegmentedStore>,
    options: &IngestOptions,
    puts: &Arc<AtomicU64>,
    limiter: &mut PutLimiter,
    report: &mut IngestReport,
) -> anyhow::Result<()> {
    while let Some(entry) = reader
        .next_entry()
        .await
        .with_context(|| format!("failed to decode entry {}", report.entries))?
    {
        report.entries += 1;
        report.bytes += entry.bytes.len() as u64;

        let store = Arc::clone(store);
        let puts = Arc::clone(puts);
        let verify = options.verify;
        let block = entry.into_block();
        let op = async move {
            let stored = store
                .put(&block.cid, block.bytes.clone())
                .await
                .with_context(|| format!("failed to store {}", block.cid))?;
            puts.fetch_add(1, Ordering::Relaxed);
            if verify {
                let read = store
                    .get(&block.cid)
                    .await
                    .with_context(|| format!("failed to read back {}", block.cid))?;
                ensure!(read == block.bytes, "stored bytes differ for {}", block.cid);
            }
            Ok::<bool, anyhow::Error>(stored)
        };

        if let Some(done) = limiter.admit(op).await? {
            tally(report, done?);
        }
    }
    Ok(())
}

fn tally(report: &mut IngestReport, stored: bool) {
    if stored {
        report.stored += 1;
    } else {
        report.duplicates += 1;
    }
}

/// Log the number of puts completed since the previous tick.
fn spawn_reporter(puts: Arc<AtomicU64>, period: Duration) -> JoinHandle<()> {
    let period = period.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let writes = puts.swap(0, Ordering::Relaxed);
            info!(writes, interval_secs = period.as_secs_f64(), "ingest progress");
        }
    })
}
