use crate::{MediaProber, ProbeError, RawProbe};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Serves canned probe results keyed by file name and counts invocations.
#[derive(Debug, Default)]
pub struct FixtureProber {
    results: Mutex<HashMap<String, Result<RawProbe, String>>>,
    calls: AtomicUsize,
}

impl FixtureProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, file_name: &str, raw: RawProbe) -> Self {
        self.set(file_name, Ok(raw));
        self
    }

    pub fn with_failure(self, file_name: &str, message: &str) -> Self {
        self.set(file_name, Err(message.to_string()));
        self
    }

    pub fn set(&self, file_name: &str, result: Result<RawProbe, String>) {
        if let Ok(mut map) = self.results.lock() {
            map.insert(file_name.to_string(), result);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MediaProber for FixtureProber {
    async fn probe(&self, path: &Path) -> Result<RawProbe, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let map = self
            .results
            .lock()
            .map_err(|_| ProbeError::Other("fixture lock poisoned".into()))?;
        match map.get(&name) {
            Some(Ok(raw)) => Ok(raw.clone()),
            Some(Err(msg)) => Err(ProbeError::Exit {
                code: Some(1),
                stderr: msg.clone(),
            }),
            None => Err(ProbeError::Other(format!("no fixture for {name}"))),
        }
    }
}
