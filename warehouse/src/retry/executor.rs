use std::future::Future;

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{ErrorKind, WarehouseError, WarehouseResult};
use crate::metrics::{
    CAUSE_LABEL, OPERATION_LABEL, OUTCOME_LABEL, WAREHOUSE_QUERY_ATTEMPTS_TOTAL,
    WAREHOUSE_QUERY_FAILURES_TOTAL, WAREHOUSE_QUERY_RETRIES_TOTAL, register_metrics,
};
use crate::retry::{ErrorClassifier, ExponentialBackoff, RetryPolicy};
use crate::warehouse_error;

/// Runs `future` until it completes or `cancel` fires, whichever happens first.
///
/// An already cancelled token wins over a ready future.
pub async fn with_cancellation<T, F>(cancel: &CancellationToken, future: F) -> WarehouseResult<T>
where
    F: Future<Output = WarehouseResult<T>>,
{
    tokio::select! {
        biased;

        _ = cancel.cancelled() => Err(warehouse_error!(
            ErrorKind::OperationCanceled,
            "Warehouse operation canceled"
        )),
        result = future => result,
    }
}

/// Runs `operation` and retries it on failures the classifier deems retryable.
///
/// Without a policy the operation runs exactly once and its result is returned as is. With a
/// policy, canceled and permanent failures are returned unchanged right away, while retryable
/// ones are retried until the retry count or the elapsed-time budget runs out, in which case the
/// last failure is returned unchanged. A cancellation while waiting between attempts ends the
/// loop immediately with an [`ErrorKind::OperationCanceled`] error.
pub async fn execute_with_retry<T, C, F, Fut>(
    policy: Option<&RetryPolicy>,
    classifier: &C,
    cancel: &CancellationToken,
    operation_name: &'static str,
    mut operation: F,
) -> WarehouseResult<T>
where
    C: ErrorClassifier + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = WarehouseResult<T>>,
{
    register_metrics();

    let Some(policy) = policy else {
        counter!(WAREHOUSE_QUERY_ATTEMPTS_TOTAL, OPERATION_LABEL => operation_name).increment(1);
        return operation().await;
    };

    let mut backoff = ExponentialBackoff::new(policy);
    let mut retries: u32 = 0;

    loop {
        counter!(WAREHOUSE_QUERY_ATTEMPTS_TOTAL, OPERATION_LABEL => operation_name).increment(1);

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if err.is_canceled() {
            record_failure(operation_name, "canceled");
            return Err(err);
        }

        let class = classifier.classify(&err);
        if !class.is_retryable() {
            debug!(
                operation = operation_name,
                attempts = retries + 1,
                error = %err,
                "warehouse operation failed with a permanent error"
            );
            record_failure(operation_name, "permanent");
            return Err(err);
        }

        if policy.max_retries > 0 && retries >= policy.max_retries {
            error!(
                operation = operation_name,
                attempts = retries + 1,
                max_retries = policy.max_retries,
                error = %err,
                "warehouse operation failed, max retries exceeded"
            );
            record_failure(operation_name, "exhausted");
            return Err(err);
        }

        let Some(delay) = backoff.next_delay() else {
            error!(
                operation = operation_name,
                attempts = retries + 1,
                elapsed_ms = backoff.elapsed().as_millis() as u64,
                error = %err,
                "warehouse operation failed, max elapsed time exceeded"
            );
            record_failure(operation_name, "exhausted");
            return Err(err);
        };

        retries += 1;
        counter!(
            WAREHOUSE_QUERY_RETRIES_TOTAL,
            OPERATION_LABEL => operation_name,
            CAUSE_LABEL => class.as_label()
        )
        .increment(1);

        warn!(
            operation = operation_name,
            attempt = retries,
            cause = class.as_label(),
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "warehouse operation failed, retrying after backoff"
        );

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(operation = operation_name, attempt = retries, "retry wait canceled");
                record_failure(operation_name, "canceled");

                return Err(canceled_during_backoff(operation_name, retries));
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn record_failure(operation_name: &'static str, outcome: &'static str) {
    counter!(
        WAREHOUSE_QUERY_FAILURES_TOTAL,
        OPERATION_LABEL => operation_name,
        OUTCOME_LABEL => outcome
    )
    .increment(1);
}

fn canceled_during_backoff(operation_name: &'static str, attempts: u32) -> WarehouseError {
    warehouse_error!(
        ErrorKind::OperationCanceled,
        "Warehouse operation canceled while waiting to retry",
        format!("`{operation_name}` was canceled after {attempts} failed attempt(s)")
    )
}
