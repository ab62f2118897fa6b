//! Container image pull/import with bounded retries.
//!
//! A missing image or archive will not appear by waiting, so `NotFound` ends
//! the retry loop at once; every other platform error is retried.

use std::path::Path;
use tracing::info;

use crate::config::RetrySettings;
use crate::core::TaskContext;
use crate::error::{TaskError, TaskResult};
use crate::platform::{Platform, PlatformError};

use super::retry::{expected, unexpected, RetryableError};

fn classify(error: PlatformError) -> RetryableError<PlatformError> {
    if error.is_not_found() {
        unexpected(error)
    } else {
        expected(error)
    }
}

/// Pull `reference` through the platform's image service.
pub async fn pull(
    platform: &dyn Platform,
    ctx: &TaskContext,
    reference: &str,
    settings: &RetrySettings,
) -> TaskResult {
    info!(image = reference, timeout = ?settings.timeout, "Pulling image");

    settings
        .policy()
        .retry(&ctx.cancel, move || async move {
            platform.pull_image(ctx, reference).await.map_err(classify)
        })
        .await
        .map_err(|e| TaskError::from_retry(format!("pull {reference}"), e))?;

    info!(image = reference, "Image pulled");
    Ok(())
}

/// Import an image archive from `path`.
pub async fn import(
    platform: &dyn Platform,
    ctx: &TaskContext,
    path: &Path,
    settings: &RetrySettings,
) -> TaskResult {
    info!(path = %path.display(), "Importing image archive");

    settings
        .policy()
        .retry(&ctx.cancel, move || async move {
            platform.import_image(ctx, path).await.map_err(classify)
        })
        .await
        .map_err(|e| TaskError::from_retry(format!("import {}", path.display()), e))?;

    info!(path = %path.display(), "Image archive imported");
    Ok(())
}
