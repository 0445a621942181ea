//! Recording platform manager for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use gauntlet_common::errors::{HarnessError, Result};

use super::PlatformManager;

/// A [`PlatformManager`] that records setup/teardown calls into a shared
/// journal, for asserting lifecycle ordering and cleanup symmetry.
pub struct MockPlatform {
    name: String,
    configured: bool,
    fail_setup: AtomicBool,
    fail_teardown: AtomicBool,
    journal: Arc<Mutex<Vec<String>>>,
}

impl MockPlatform {
    pub fn new(name: &str, journal: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            configured: true,
            fail_setup: AtomicBool::new(false),
            fail_teardown: AtomicBool::new(false),
            journal,
        }
    }

    pub fn unconfigured(name: &str, journal: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            configured: false,
            ..Self::new(name, journal)
        }
    }

    pub fn fail_setup(&self) {
        self.fail_setup.store(true, Ordering::SeqCst);
    }

    pub fn fail_teardown(&self) {
        self.fail_teardown.store(true, Ordering::SeqCst);
    }

    fn record(&self, event: &str) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}:{event}", self.name));
    }
}

#[async_trait]
impl PlatformManager for MockPlatform {
    fn configured(&self) -> bool {
        self.configured
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&self) -> Result<()> {
        if self.fail_setup.load(Ordering::SeqCst) {
            self.record("setup-failed");
            return Err(HarnessError::execution(format!(
                "{} refused to set up",
                self.name
            )));
        }
        self.record("setup");
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        if self.fail_teardown.load(Ordering::SeqCst) {
            self.record("teardown-failed");
            return Err(HarnessError::execution(format!(
                "{} refused to tear down",
                self.name
            )));
        }
        self.record("teardown");
        Ok(())
    }
}
