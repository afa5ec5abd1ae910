//! User assertions over parsed output.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

type Check = Arc<dyn Fn(&Map<String, Value>) -> Result<(), String> + Send + Sync>;

/// A check run against validated output. A failure message is sent back to
/// the model as a correction.
#[derive(Clone)]
pub struct Assertion {
    name: Option<String>,
    check: Check,
}

impl Assertion {
    pub fn new(check: impl Fn(&Map<String, Value>) -> Result<(), String> + Send + Sync + 'static) -> Self {
        Self {
            name: None,
            check: Arc::new(check),
        }
    }

    /// Fails with `message` whenever `predicate` returns false.
    pub fn check(
        message: impl Into<String>,
        predicate: impl Fn(&Map<String, Value>) -> bool + Send + Sync + 'static,
    ) -> Self {
        let message = message.into();
        Self::new(move |output| {
            if predicate(output) {
                Ok(())
            } else {
                Err(message.clone())
            }
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn run(&self, output: &Map<String, Value>) -> Result<(), String> {
        (self.check)(output)
    }
}

impl fmt::Debug for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assertion").field("name", &self.name).finish()
    }
}

/// Run assertions in order and return the first failure message.
pub(crate) fn first_failure(assertions: &[Assertion], output: &Map<String, Value>) -> Option<String> {
    assertions.iter().find_map(|a| a.run(output).err())
}
