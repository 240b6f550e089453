use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::backend::Detector;

/// Thread-safe registry of detector backends, keyed by name.
///
/// Backends are wrapped in `Mutex` because `Detector::detect` takes `&mut self`.
pub struct DetectorRegistry {
    backends: HashMap<String, Arc<Mutex<dyn Detector>>>,
    default_name: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Registers a backend. The first registered backend becomes the default.
    pub fn register<D: Detector + 'static>(&mut self, backend: D) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    pub fn default_backend(&self) -> Option<Arc<Mutex<dyn Detector>>> {
        self.default_name.as_ref().and_then(|n| self.backends.get(n).cloned())
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
