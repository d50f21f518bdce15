use crate::{Observable, ShutdownSignal};
use std::sync::Arc;
use std::time::Duration;

/// `"STAT: ctp=1 rc=0 ..."`, or `None` when nothing is queued or in use.
pub fn format_statistics(targets: &[Arc<dyn Observable>]) -> Option<String> {
    let total: usize = targets.iter().map(|target| target.size()).sum();
    if total == 0 {
        return None;
    }
    let fields: Vec<String> = targets
        .iter()
        .map(|target| format!("{}={}", target.nickname(), target.size()))
        .collect();
    Some(format!("STAT: {}", fields.join(" ")))
}

/// Periodically logs pool and pipeline sizes until shutdown.
pub async fn run_statistics_logger(
    targets: Vec<Arc<dyn Observable>>,
    period: Duration,
    mut shutdown: ShutdownSignal,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            _ = interval.tick() => {
                if let Some(line) = format_statistics(&targets) {
                    tracing::info!("{}", line);
                }
            }
        }
    }
}
