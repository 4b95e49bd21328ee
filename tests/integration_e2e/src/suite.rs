use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info};

/// Lifecycle hooks a suite component can take part in. Every hook defaults
/// to doing nothing.
#[async_trait]
pub trait Extension: Send {
    fn name(&self) -> &str;

    async fn setup_suite(&mut self) -> Result<()> {
        Ok(())
    }

    async fn teardown_suite(&mut self) -> Result<()> {
        Ok(())
    }

    async fn before_test(&mut self, _test: &str) -> Result<()> {
        Ok(())
    }

    async fn after_test(&mut self, _test: &str) -> Result<()> {
        Ok(())
    }
}

/// Runs extension hooks around suite and test bodies.
///
/// Setup and before-test hooks run in registration order; after-test and
/// teardown hooks run in reverse so the last extension set up is the first
/// torn down.
pub struct Suite {
    name: String,
    extensions: Vec<Box<dyn Extension>>,
    ready: usize,
}

impl Suite {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            extensions: Vec::new(),
            ready: 0,
        }
    }

    pub fn with(mut self, extension: impl Extension + 'static) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set up every extension. On failure the ones already set up are torn
    /// down again before the error is returned.
    pub async fn setup(&mut self) -> Result<()> {
        info!(suite = %self.name, "setting up suite");
        while self.ready < self.extensions.len() {
            let ext = &mut self.extensions[self.ready];
            if let Err(e) = ext.setup_suite().await {
                error!(extension = ext.name(), error = %e, "suite setup failed");
                let _ = self.teardown().await;
                return Err(e);
            }
            self.ready += 1;
        }
        Ok(())
    }

    /// Tear down whatever was set up, in reverse. Every hook runs; the first
    /// error is returned.
    pub async fn teardown(&mut self) -> Result<()> {
        let mut first = None;
        while self.ready > 0 {
            self.ready -= 1;
            let ext = &mut self.extensions[self.ready];
            if let Err(e) = ext.teardown_suite().await {
                error!(extension = ext.name(), error = %e, "suite teardown failed");
                first.get_or_insert(e);
            }
        }
        info!(suite = %self.name, "suite torn down");
        first.map_or(Ok(()), Err)
    }

    /// Run one test body between the before/after hooks. After-test hooks
    /// run even when the body fails; the body's error wins over hook errors.
    pub async fn run_test<F, Fut, T>(&mut self, test: &str, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        info!(suite = %self.name, test, "starting test");
        let mut started = 0;
        let mut outcome = None;
        for ext in self.extensions.iter_mut() {
            if let Err(e) = ext.before_test(test).await {
                error!(extension = ext.name(), error = %e, "before test failed");
                outcome = Some(Err(e));
                break;
            }
            started += 1;
        }
        let mut result = match outcome {
            Some(err) => err,
            None => body().await,
        };
        if let Err(e) = &result {
            error!(test, error = %e, "test failed");
        }
        for ext in self.extensions[..started].iter_mut().rev() {
            if let Err(e) = ext.after_test(test).await {
                error!(extension = ext.name(), error = %e, "after test failed");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        journal: Journal,
        fail_setup: bool,
        fail_after: bool,
    }

    impl Recorder {
        fn new(name: &'static str, journal: &Journal) -> Self {
            Self {
                name,
                journal: journal.clone(),
                fail_setup: false,
                fail_after: false,
            }
        }

        fn log(&self, hook: &str) {
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}:{hook}", self.name));
        }
    }

    #[async_trait]
    impl Extension for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn setup_suite(&mut self) -> Result<()> {
            self.log("setup");
            if self.fail_setup {
                anyhow::bail!("{} cannot start", self.name);
            }
            Ok(())
        }

        async fn teardown_suite(&mut self) -> Result<()> {
            self.log("teardown");
            Ok(())
        }

        async fn before_test(&mut self, test: &str) -> Result<()> {
            self.log(&format!("before {test}"));
            Ok(())
        }

        async fn after_test(&mut self, test: &str) -> Result<()> {
            self.log(&format!("after {test}"));
            if self.fail_after {
                anyhow::bail!("{} after hook failed", self.name);
            }
            Ok(())
        }
    }

    /// Extension relying on the default no-op hooks.
    struct Quiet;

    impl Extension for Quiet {
        fn name(&self) -> &str {
            "quiet"
        }
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn hooks_run_in_order_and_reverse() {
        let journal = Journal::default();
        let mut suite = Suite::new("TestOrder")
            .with(Recorder::new("logs", &journal))
            .with(Quiet)
            .with(Recorder::new("nsm", &journal));
        suite.setup().await.unwrap();
        let value = suite
            .run_test("TestOne", || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        suite.teardown().await.unwrap();
        assert_eq!(
            entries(&journal),
            [
                "logs:setup",
                "nsm:setup",
                "logs:before TestOne",
                "nsm:before TestOne",
                "nsm:after TestOne",
                "logs:after TestOne",
                "nsm:teardown",
                "logs:teardown",
            ]
        );
    }

    #[tokio::test]
    async fn after_hooks_run_when_the_body_fails() {
        let journal = Journal::default();
        let mut recorder = Recorder::new("logs", &journal);
        recorder.fail_after = true;
        let mut suite = Suite::new("TestFail").with(recorder);
        suite.setup().await.unwrap();
        let err = suite
            .run_test("TestBroken", || async {
                Err::<(), _>(anyhow::anyhow!("prefixes differ"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "prefixes differ");
        assert!(entries(&journal).contains(&"logs:after TestBroken".to_string()));
    }

    #[tokio::test]
    async fn failing_after_hook_fails_a_passing_test() {
        let journal = Journal::default();
        let mut recorder = Recorder::new("logs", &journal);
        recorder.fail_after = true;
        let mut suite = Suite::new("TestAfter").with(recorder);
        let err = suite
            .run_test("TestOk", || async { Ok(()) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("after hook failed"));
    }

    #[tokio::test]
    async fn failed_setup_rolls_back() {
        let journal = Journal::default();
        let mut broken = Recorder::new("nsm", &journal);
        broken.fail_setup = true;
        let mut suite = Suite::new("TestRollback")
            .with(Recorder::new("logs", &journal))
            .with(broken)
            .with(Recorder::new("never", &journal));
        assert!(suite.setup().await.is_err());
        assert_eq!(
            entries(&journal),
            ["logs:setup", "nsm:setup", "logs:teardown"]
        );
        // Nothing left to tear down.
        suite.teardown().await.unwrap();
        assert_eq!(entries(&journal).len(), 3);
    }
}
