// Access gate for starting a sharing session
//
// Licensing and trial logic lives outside this crate. The controller only
// asks one question, once, at the top of every start: is sharing allowed
// right now?

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub trait AccessGate: Send + Sync {
    fn is_access_allowed(&self) -> bool;
}

/// Gate that never refuses
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAllowed;

impl AccessGate for AlwaysAllowed {
    fn is_access_allowed(&self) -> bool {
        true
    }
}

/// Gate backed by a flag another component flips (trial expiry, licence
/// activation)
#[derive(Debug, Clone)]
pub struct SwitchableGate {
    allowed: Arc<AtomicBool>,
}

impl SwitchableGate {
    pub fn new(allowed: bool) -> Self {
        Self {
            allowed: Arc::new(AtomicBool::new(allowed)),
        }
    }

    pub fn set_allowed(&self, allowed: bool) {
        self.allowed.store(allowed, Ordering::SeqCst);
    }
}

impl AccessGate for SwitchableGate {
    fn is_access_allowed(&self) -> bool {
        self.allowed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switchable_gate_shares_state_between_clones() {
        let gate = SwitchableGate::new(true);
        let observer = gate.clone();
        assert!(observer.is_access_allowed());

        gate.set_allowed(false);
        assert!(!observer.is_access_allowed());
        assert!(AlwaysAllowed.is_access_allowed());
    }
}
