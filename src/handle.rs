//! Backend execution context shared by every layer in a run.

use crate::backend::{Backend, ReferenceBackend};

/// Owns the backend for one benchmark run.
///
/// Created once per run and passed by reference into layer setup and
/// forward calls; layers never store it.
pub struct Handle {
    backend: Box<dyn Backend>,
}

impl Handle {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Handle over the in-process CPU backend.
    pub fn reference() -> Self {
        Self::new(Box::new(ReferenceBackend::new()))
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::reference()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_handle_is_reference_backend() {
        let handle = Handle::default();
        assert_eq!(handle.backend().name(), "reference");
    }
}
