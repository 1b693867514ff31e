use tokio::sync::mpsc;
use tracing::info;

use crate::download::DownloadEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolve,
    Fetch,
    Extract,
    Stop,
    Install,
    Seed,
    Start,
    Configure,
    Sync,
    Catchup,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Resolve => "Resolving release",
            Phase::Fetch => "Downloading release tarball",
            Phase::Extract => "Extracting",
            Phase::Stop => "Stopping node",
            Phase::Install => "Installing binaries",
            Phase::Seed => "Seeding data directory",
            Phase::Start => "Starting node",
            Phase::Configure => "Patching configuration",
            Phase::Sync => "Waiting for node to sync",
            Phase::Catchup => "Starting catchup",
        }
    }
}

/// Multi-step operations and the phases each runs, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
}

const CREATE_PHASES: [Phase; 10] = [
    Phase::Resolve,
    Phase::Fetch,
    Phase::Extract,
    Phase::Stop,
    Phase::Install,
    Phase::Seed,
    Phase::Start,
    Phase::Configure,
    Phase::Sync,
    Phase::Catchup,
];

const UPDATE_PHASES: [Phase; 7] = [
    Phase::Resolve,
    Phase::Fetch,
    Phase::Extract,
    Phase::Stop,
    Phase::Install,
    Phase::Seed,
    Phase::Start,
];

impl Operation {
    pub fn phases(&self) -> &'static [Phase] {
        match self {
            Operation::Create => &CREATE_PHASES,
            Operation::Update => &UPDATE_PHASES,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseEvent {
    pub phase: Phase,
    /// 1-based position within the operation.
    pub step: usize,
    pub total: usize,
}

/// Senders the orchestrator reports through. A dropped receiver just means
/// nobody is watching; sends never fail the operation.
#[derive(Debug, Clone)]
pub struct Reporter {
    pub phases: mpsc::UnboundedSender<PhaseEvent>,
    pub downloads: mpsc::UnboundedSender<DownloadEvent>,
    pub output: mpsc::UnboundedSender<String>,
}

pub struct ReportReceivers {
    pub phases: mpsc::UnboundedReceiver<PhaseEvent>,
    pub downloads: mpsc::UnboundedReceiver<DownloadEvent>,
    pub output: mpsc::UnboundedReceiver<String>,
}

impl Reporter {
    pub fn channel() -> (Reporter, ReportReceivers) {
        let (phases_tx, phases_rx) = mpsc::unbounded_channel();
        let (downloads_tx, downloads_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        (
            Reporter {
                phases: phases_tx,
                downloads: downloads_tx,
                output: output_tx,
            },
            ReportReceivers {
                phases: phases_rx,
                downloads: downloads_rx,
                output: output_rx,
            },
        )
    }
}

/// Tracks which phase of an operation is running.
pub struct Pipeline {
    pub operation: Operation,
    pub current: Option<Phase>,
    tx: mpsc::UnboundedSender<PhaseEvent>,
}

impl Pipeline {
    pub fn new(operation: Operation, tx: mpsc::UnboundedSender<PhaseEvent>) -> Self {
        Self {
            operation,
            current: None,
            tx,
        }
    }

    /// Mark `phase` as running. Phases may only move forward.
    pub fn enter(&mut self, phase: Phase) {
        let phases = self.operation.phases();
        let Some(index) = phases.iter().position(|p| *p == phase) else {
            debug_assert!(false, "{:?} is not part of {:?}", phase, self.operation);
            return;
        };
        if let Some(current) = self.current {
            let previous = phases.iter().position(|p| *p == current).unwrap_or(0);
            debug_assert!(index > previous, "phase {:?} after {:?}", phase, current);
        }

        self.current = Some(phase);
        let event = PhaseEvent {
            phase,
            step: index + 1,
            total: phases.len(),
        };
        info!(
            operation = self.operation.name(),
            step = event.step,
            total = event.total,
            "{}",
            phase.label()
        );
        self.tx.send(event).ok();
    }
}
