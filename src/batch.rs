use tokio::time;
use tracing::{info, warn};

use crate::config::ScanConfig;
use crate::scanner::{self, ScanContext};
use crate::types::{ports_per_second, Port, ProgressEvent, ScanResult};

/// Scan `ports`, splitting large requests into sequential chunks.
///
/// Requests up to `config.batch_size` ports go straight to the engine. Larger ones
/// are cut into consecutive chunks of `batch_size` that run one after another with
/// `config.batch_pause` in between. A labelled progress event ("batch i/N") is offered
/// before and after each chunk, on top of the engine's own events. Results are
/// concatenated in chunk order.
pub async fn scan_in_batches(
    ctx: &ScanContext,
    ports: &[Port],
    config: &ScanConfig,
) -> Vec<ScanResult> {
    let total = ports.len();
    let batch_size = config.batch_size.max(1);
    if total <= batch_size {
        return scanner::scan_ports(ctx, ports, config).await;
    }

    let chunks: Vec<&[Port]> = ports.chunks(batch_size).collect();
    let batches = chunks.len();
    info!(host = %ctx.host, total, batch_size, batches, "starting batched scan");

    let mut all: Vec<ScanResult> = Vec::with_capacity(total);
    let mut open = 0usize;

    for (idx, chunk) in chunks.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            warn!(host = %ctx.host, done = all.len(), total, "batched scan cancelled");
            break;
        }

        let label = format!("batch {}/{}", idx + 1, batches);
        let start = idx * batch_size;
        info!(
            host = %ctx.host,
            batch = %label,
            first = chunk[0],
            last = chunk[chunk.len() - 1],
            size = chunk.len(),
            "scanning batch"
        );
        let speed = ports_per_second(start, ctx.started.elapsed());
        let before = ProgressEvent::progress(start, total, open, speed);
        ctx.offer(before.with_batch_label(label.clone()));

        let results = scanner::scan_ports(ctx, chunk, config).await;
        open += results.iter().filter(|r| r.open).count();
        all.extend(results);

        let done = start + chunk.len();
        let speed = ports_per_second(done, ctx.started.elapsed());
        ctx.offer(ProgressEvent::progress(done, total, open, speed).with_batch_label(label));

        if idx + 1 < batches {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {}
                _ = time::sleep(config.batch_pause) => {}
            }
        }
    }

    info!(host = %ctx.host, results = all.len(), open, "batched scan finished");
    all
}
