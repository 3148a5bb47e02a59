//! Author fan-out pass.
//!
//! Resolves every deployment's author concurrently and waits for all of
//! them to settle. Each lookup runs in its own task, so a lookup that fails
//! (or panics) leaves only its own deployment without an author.

use std::sync::Arc;

use futures::future::join_all;
use tracing::instrument;

use crate::deployment::{Deployment, ResolvedDeployment};
use crate::obs;
use crate::repository::AuthorResolver;

/// Resolve authors for `deployments`, preserving order.
///
/// Never fails. The returned vector has one entry per input deployment.
#[instrument(skip_all, fields(deployments = deployments.len()))]
pub async fn resolve_authors(
    deployments: Vec<Deployment>,
    resolver: Arc<dyn AuthorResolver>,
) -> Vec<ResolvedDeployment> {
    let handles: Vec<_> = deployments
        .into_iter()
        .map(|deployment| {
            let fallback = deployment.clone();
            let resolver = Arc::clone(&resolver);
            let handle =
                tokio::spawn(async move { deployment.resolve_author(resolver.as_ref()).await });
            (fallback, handle)
        })
        .collect();

    let settled = join_all(handles.into_iter().map(|(fallback, handle)| async move {
        match handle.await {
            Ok(resolved) => {
                if resolved.author.is_none() && resolved.deployment.author_commit.is_some() {
                    obs::emit_author_lookup_failed(
                        resolved.deployment.deployment_id(),
                        &"no author returned",
                    );
                }
                resolved
            }
            Err(e) => {
                obs::emit_author_lookup_failed(fallback.deployment_id(), &e);
                fallback.without_author()
            }
        }
    }))
    .await;

    let resolved = settled.iter().filter(|d| d.author.is_some()).count();
    obs::emit_authors_resolved(settled.len(), resolved);
    settled
}
