use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A one-way flag: once killed, never alive again.
#[derive(Default, Debug, Clone)]
pub(crate) struct KillSwitch(Arc<AtomicBool>);

impl KillSwitch {
    /// Returns whether this call is the one that killed it.
    pub(crate) fn kill(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn alive(&self) -> bool {
        !self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_once() {
        let switch = KillSwitch::default();
        let other = switch.clone();
        assert!(switch.alive());
        assert!(other.kill());
        assert!(!switch.kill());
        assert!(!switch.alive());
    }
}
