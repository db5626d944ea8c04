//! Ordered setup/teardown step engine (C5, §4.1).
//!
//! Grounded on `original_source/cli/app/steps.go` (`steps.setup`/
//! `steps.teardown`): setup walks the list forward, checking cancellation
//! before each step and aborting on the first error; teardown always walks
//! the full list in reverse, collecting every teardown failure instead of
//! stopping at the first one. The staged-phase idiom (cancellation check
//! before each unit of work, teardown unconditional) also matches
//! `libs/modkit/src/runtime/host_runtime.rs`'s phase methods.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// A unit of the boot sequence.
///
/// If `setup` returns `Ok`, `teardown` is guaranteed to be called exactly
/// once later (possibly as a no-op). If `setup` fails or is skipped due to
/// cancellation, `teardown` is still called.
#[async_trait]
pub trait Step<A: Send + Sync>: Send + Sync {
    /// A human-readable name used in logs when a step fails.
    fn name(&self) -> &str;

    /// Runs this step's setup phase.
    ///
    /// # Errors
    ///
    /// Returns any failure that should abort the remaining setup steps.
    async fn setup(&self, app: &A) -> anyhow::Result<()>;

    /// Runs this step's teardown phase. Must be idempotent when `setup`
    /// never ran or never completed.
    ///
    /// # Errors
    ///
    /// Returns a failure to release this step's resources; does not stop
    /// subsequent steps from tearing down.
    async fn teardown(&self, app: &A) -> anyhow::Result<()>;
}

type SetupFn<A> =
    Box<dyn Fn(&A) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> + Send + Sync>;

/// Adapts a single async setup function into a [`Step`] whose teardown is a
/// no-op, for steps with nothing to release.
pub struct SetupOnly<A> {
    name: String,
    setup: SetupFn<A>,
}

impl<A> SetupOnly<A> {
    pub fn new<F, Fut>(name: impl Into<String>, setup: F) -> Self
    where
        F: Fn(&A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            setup: Box::new(move |app| Box::pin(setup(app))),
        }
    }
}

#[async_trait]
impl<A: Send + Sync> Step<A> for SetupOnly<A> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&self, app: &A) -> anyhow::Result<()> {
        (self.setup)(app).await
    }

    async fn teardown(&self, _app: &A) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Ordered sequence of [`Step`]s, run forward on setup and reverse on
/// teardown.
pub struct StepEngine<A: Send + Sync> {
    steps: Vec<Box<dyn Step<A>>>,
}

impl<A: Send + Sync> Default for StepEngine<A> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<A: Send + Sync> StepEngine<A> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn push(mut self, step: Box<dyn Step<A>>) -> Self {
        self.steps.push(step);
        self
    }

    /// Runs setup forward. Before each step, checks `cancel`; if triggered,
    /// returns immediately without running that step or any after it. A
    /// step's own failure also aborts immediately.
    ///
    /// Cancellation is reported via the returned `bool` (`true` means
    /// cancelled, not a real error — callers must not append this to their
    /// error set, per §4.2).
    ///
    /// # Errors
    ///
    /// Returns the first step failure encountered.
    pub async fn setup(&self, app: &A, cancel: &CancellationToken) -> anyhow::Result<bool> {
        for step in &self.steps {
            if cancel.is_cancelled() {
                tracing::warn!(step = step.name(), "setup cancelled before step ran");
                return Ok(true);
            }
            tracing::debug!(step = step.name(), "running setup");
            step.setup(app).await?;
        }
        Ok(false)
    }

    /// Runs teardown in reverse order over the full list, regardless of
    /// individual failures. Never consults `cancel` — teardown always runs
    /// to completion.
    pub async fn teardown(&self, app: &A) -> Vec<anyhow::Error> {
        let mut errors = Vec::new();
        for step in self.steps.iter().rev() {
            tracing::debug!(step = step.name(), "running teardown");
            if let Err(err) = step.teardown(app).await {
                tracing::warn!(step = step.name(), error = %err, "teardown failed");
                errors.push(err);
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct App {
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    struct RecordingStep {
        name: &'static str,
        setup_fails: bool,
        teardown_fails: bool,
        ran_setup: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Step<App> for RecordingStep {
        fn name(&self) -> &str {
            self.name
        }

        async fn setup(&self, app: &App) -> anyhow::Result<()> {
            self.ran_setup.fetch_add(1, Ordering::SeqCst);
            app.order.lock().await.push(self.name);
            if self.setup_fails {
                anyhow::bail!("setup error");
            }
            Ok(())
        }

        async fn teardown(&self, app: &App) -> anyhow::Result<()> {
            app.order.lock().await.push(self.name);
            if self.teardown_fails {
                anyhow::bail!("teardown error");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn scenario_s1_cancelled_setup_runs_teardown_for_all_steps() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let app = App { order: order.clone() };
        let cancel = CancellationToken::new();
        let cancel_for_a = cancel.clone();

        struct CancellingStep {
            cancel: CancellationToken,
        }
        #[async_trait]
        impl Step<App> for CancellingStep {
            fn name(&self) -> &str {
                "A"
            }
            async fn setup(&self, _app: &App) -> anyhow::Result<()> {
                self.cancel.cancel();
                Ok(())
            }
            async fn teardown(&self, app: &App) -> anyhow::Result<()> {
                app.order.lock().await.push("A");
                Ok(())
            }
        }

        let ran_b = Arc::new(AtomicUsize::new(0));
        let engine = StepEngine::new()
            .push(Box::new(CancellingStep { cancel: cancel_for_a }))
            .push(Box::new(RecordingStep {
                name: "B",
                setup_fails: false,
                teardown_fails: false,
                ran_setup: ran_b.clone(),
            }));

        let cancelled = engine.setup(&app, &cancel).await.unwrap();
        assert!(cancelled);
        assert_eq!(ran_b.load(Ordering::SeqCst), 0, "B must not run");

        let teardown_errors = engine.teardown(&app).await;
        assert!(teardown_errors.is_empty());
        assert_eq!(*order.lock().await, vec!["B", "A"]);
    }

    #[tokio::test]
    async fn scenario_s2_error_aggregation() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let app = App { order: order.clone() };
        let cancel = CancellationToken::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let engine = StepEngine::new().push(Box::new(RecordingStep {
            name: "A",
            setup_fails: true,
            teardown_fails: true,
            ran_setup: ran,
        }));

        let err = engine.setup(&app, &cancel).await.unwrap_err();
        assert_eq!(err.to_string(), "setup error");

        let teardown_errors = engine.teardown(&app).await;
        assert_eq!(teardown_errors.len(), 1);
        assert_eq!(teardown_errors[0].to_string(), "teardown error");
    }

    #[tokio::test]
    async fn teardown_runs_in_reverse_of_setup() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let app = App { order: order.clone() };
        let cancel = CancellationToken::new();

        let engine = StepEngine::new()
            .push(Box::new(RecordingStep {
                name: "A",
                setup_fails: false,
                teardown_fails: false,
                ran_setup: Arc::new(AtomicUsize::new(0)),
            }))
            .push(Box::new(RecordingStep {
                name: "B",
                setup_fails: false,
                teardown_fails: false,
                ran_setup: Arc::new(AtomicUsize::new(0)),
            }));

        engine.setup(&app, &cancel).await.unwrap();
        order.lock().await.clear();
        engine.teardown(&app).await;
        assert_eq!(*order.lock().await, vec!["B", "A"]);
    }
}
