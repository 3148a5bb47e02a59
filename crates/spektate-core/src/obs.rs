//! Structured observability hooks for reconciliation.
//!
//! Every advisory failure that the reconciler or the author pass swallows is
//! emitted here first, so nothing is dropped silently.
//!
//! Events are emitted at `info!`/`warn!` level (filter with `RUST_LOG`).
//! For JSON output, pass `--json-logs` to the CLI.

use tracing::{info, warn};

use crate::pipeline::Stage;

/// Emit event: a reconciliation batch started.
pub fn emit_reconcile_started(records: usize) {
    info!(event = "reconcile.started", records = records);
}

/// Emit event: a reconciliation batch finished.
pub fn emit_reconcile_finished(deployments: usize, fetch_failures: usize, duration_ms: u64) {
    info!(
        event = "reconcile.finished",
        deployments = deployments,
        fetch_failures = fetch_failures,
        duration_ms = duration_ms,
    );
}

/// Emit event: one stage's run could not be fetched (warning level).
pub fn emit_stage_fetch_failed(
    deployment_id: &str,
    stage: Stage,
    run_id: &str,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "stage.fetch_failed",
        deployment_id = %deployment_id,
        stage = %stage,
        run_id = %run_id,
        error = %error,
    );
}

/// Emit event: a requested pull request could not be resolved (warning level).
pub fn emit_pull_request_lookup_failed(
    deployment_id: &str,
    pr_id: &str,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "pull_request.lookup_failed",
        deployment_id = %deployment_id,
        pr = %pr_id,
        error = %error,
    );
}

/// Emit event: one deployment's author could not be resolved (warning level).
pub fn emit_author_lookup_failed(deployment_id: &str, reason: &dyn std::fmt::Display) {
    warn!(
        event = "author.lookup_failed",
        deployment_id = %deployment_id,
        reason = %reason,
    );
}

/// Emit event: the author pass settled.
pub fn emit_authors_resolved(total: usize, resolved: usize) {
    info!(
        event = "authors.resolved",
        total = total,
        resolved = resolved,
        unresolved = total - resolved,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitters_do_not_panic_without_subscriber() {
        emit_reconcile_started(3);
        emit_reconcile_finished(3, 1, 20);
        emit_stage_fetch_failed("d1", Stage::Hld, "42", &"401");
        emit_pull_request_lookup_failed("d1", "7", &"not found");
        emit_author_lookup_failed("d1", &"timeout");
        emit_authors_resolved(5, 3);
    }
}
