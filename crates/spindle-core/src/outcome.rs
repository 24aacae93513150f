//! Detach result accumulation.
//!
//! Detach runs three independent removals and never stops early. Each one
//! fills its own slot; the verdict is a function of which slots succeeded.

use std::fmt;

/// Result of one detach step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step released its resource.
    Succeeded,
    /// The step failed; the message is kept for diagnostics.
    Failed(String),
}

impl StepOutcome {
    /// Whether the step succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl<E: fmt::Display> From<Result<(), E>> for StepOutcome {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::Succeeded,
            Err(e) => Self::Failed(e.to_string()),
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "ok"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Overall detach verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// All three steps succeeded.
    Deleted,
    /// One or two steps succeeded.
    PartiallyDeleted,
    /// No step succeeded.
    NotDeleted,
}

/// Map per-step success flags to a verdict.
pub fn aggregate(pci_device: bool, chardev: bool, storage: bool) -> Verdict {
    let succeeded = [pci_device, chardev, storage]
        .into_iter()
        .filter(|ok| *ok)
        .count();
    match succeeded {
        3 => Verdict::Deleted,
        0 => Verdict::NotDeleted,
        _ => Verdict::PartiallyDeleted,
    }
}

/// Three-slot accumulator filled in by detach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachOutcome {
    /// `device_del` acknowledged and `DEVICE_DELETED` observed.
    pub pci_device: StepOutcome,
    /// `chardev-remove` acknowledged.
    pub chardev: StepOutcome,
    /// Storage engine controller deleted.
    pub storage: StepOutcome,
}

impl DetachOutcome {
    /// Number of steps that succeeded.
    pub fn succeeded(&self) -> usize {
        [&self.pci_device, &self.chardev, &self.storage]
            .into_iter()
            .filter(|s| s.is_success())
            .count()
    }

    /// Overall verdict.
    pub fn verdict(&self) -> Verdict {
        aggregate(
            self.pci_device.is_success(),
            self.chardev.is_success(),
            self.storage.is_success(),
        )
    }
}

impl fmt::Display for DetachOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pci device: {}, chardev: {}, storage engine: {}",
            self.pci_device, self.chardev, self.storage
        )
    }
}
