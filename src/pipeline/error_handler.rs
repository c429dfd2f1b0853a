use anyhow::Result;

use super::workers::RoundStats;
use crate::error::SetupError;

/// Check a finished round: records that no worker picked up make the run fail (the checkpoint
/// log stays for the next run). A connection error that other workers covered is only a warning.
pub fn check_round_completion(stats: &RoundStats) -> Result<()> {
    let unattempted = stats.unattempted();
    if unattempted > 0 {
        return Err(SetupError::WorkersUnavailable {
            unattempted,
            total: stats.total,
            reason: stats
                .connection_error
                .clone()
                .unwrap_or_else(|| "unknown".into()),
        }
        .into());
    }
    if let Some(msg) = &stats.connection_error {
        log::warn!("Some workers could not connect; remaining workers finished the round: {msg}");
    }
    Ok(())
}
