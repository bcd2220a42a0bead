use std::sync::Once;

use metrics::{Unit, describe_counter};

static REGISTER: Once = Once::new();

/// Number of native calls issued by the retry engine, labeled by `operation`.
pub const WAREHOUSE_QUERY_ATTEMPTS_TOTAL: &str = "warehouse_query_attempts_total";

/// Number of retries scheduled, labeled by `operation` and `cause`.
pub const WAREHOUSE_QUERY_RETRIES_TOTAL: &str = "warehouse_query_retries_total";

/// Number of operations that gave up, labeled by `operation` and `outcome`.
pub const WAREHOUSE_QUERY_FAILURES_TOTAL: &str = "warehouse_query_failures_total";

/// Label key for the logical operation (`exec`, `query`, `ping`).
pub const OPERATION_LABEL: &str = "operation";

/// Label key for the retry cause (`rate_limit`, `transient`).
pub const CAUSE_LABEL: &str = "cause";

/// Label key for the failure outcome (`permanent`, `exhausted`, `canceled`).
pub const OUTCOME_LABEL: &str = "outcome";

/// Register warehouse metrics. Safe to call multiple times.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        describe_counter!(
            WAREHOUSE_QUERY_ATTEMPTS_TOTAL,
            Unit::Count,
            "Total number of native warehouse calls attempted, labeled by operation"
        );

        describe_counter!(
            WAREHOUSE_QUERY_RETRIES_TOTAL,
            Unit::Count,
            "Total number of retries scheduled after a transient failure, \
             labeled by operation and cause"
        );

        describe_counter!(
            WAREHOUSE_QUERY_FAILURES_TOTAL,
            Unit::Count,
            "Total number of operations that failed for good, labeled by operation and outcome"
        );
    });
}
