//! Shared helpers for the latticeflow integration and property tests.

pub mod builders;
pub mod fake_executor;
pub mod fixtures;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use latticeflow::logging::{LOG_ENV_VAR, env_filter};
use tracing_subscriber::fmt;

static INIT: Once = Once::new();

/// Upper bound for any single awaited step in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Install a test subscriber once per test binary.
///
/// Output goes through the test writer, so it only shows for failing tests
/// (or with `--nocapture`). The filter honours `LATTICEFLOW_LOG` like the
/// binary does, e.g. `LATTICEFLOW_LOG=latticeflow::engine=debug`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let env_value = std::env::var(LOG_ENV_VAR).ok();
        fmt()
            .with_env_filter(env_filter(None, env_value.as_deref()))
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, panicking after [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, f)
        .await
        .unwrap_or_else(|_| panic!("test step timed out after {TEST_TIMEOUT:?}"))
}
