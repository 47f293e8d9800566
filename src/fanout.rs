//! Track fan-out controller
//!
//! Owns the current source track and the registry of sink adapters. Every
//! mutation flows through one command queue, so each sink observes a
//! monotonic sequence of active tracks: a `set_active` that lands while a
//! previous publish is still in flight for some sink supersedes it on that
//! sink's own event queue.

use crate::media::SourceTrack;
use crate::peer::AdapterHandle;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

enum Command {
    SetActive(Arc<SourceTrack>),
    ClearActive,
    Attach(Uuid, AdapterHandle),
    Detach(Uuid),
}

/// Cloneable handle to the fan-out actor
#[derive(Clone)]
pub struct FanOut {
    commands: mpsc::UnboundedSender<Command>,
}

impl FanOut {
    /// Start the fan-out actor
    pub fn spawn() -> Self {
        let (commands, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut active: Option<Arc<SourceTrack>> = None;
            let mut sinks: HashMap<Uuid, AdapterHandle> = HashMap::new();

            while let Some(command) = rx.recv().await {
                match command {
                    Command::SetActive(track) => {
                        if let Some(previous) = active.replace(Arc::clone(&track)) {
                            previous.retire();
                        }
                        info!(sinks = sinks.len(), "switching active source track");
                        for sink in sinks.values() {
                            sink.publish(Arc::clone(&track));
                        }
                    }
                    Command::ClearActive => {
                        if let Some(previous) = active.take() {
                            previous.retire();
                            info!(sinks = sinks.len(), "source track cleared");
                            for sink in sinks.values() {
                                sink.unpublish();
                            }
                        }
                    }
                    Command::Attach(id, sink) => {
                        debug!(sink = %id, "sink attached to fan-out");
                        if let Some(track) = &active {
                            sink.publish(Arc::clone(track));
                        }
                        sinks.insert(id, sink);
                    }
                    Command::Detach(id) => {
                        debug!(sink = %id, "sink detached from fan-out");
                        sinks.remove(&id);
                    }
                }
            }

            // Track references are released only after every handle is gone
            if let Some(previous) = active.take() {
                previous.retire();
            }
        });

        Self { commands }
    }

    /// Install a new active track and push it into every registered sink
    pub fn set_active(&self, track: Arc<SourceTrack>) {
        let _ = self.commands.send(Command::SetActive(track));
    }

    /// Drop the active track; sinks negotiate down to a stopped sender
    pub fn clear_active(&self) {
        let _ = self.commands.send(Command::ClearActive);
    }

    /// Register a sink adapter; the active track is published immediately
    pub fn attach(&self, id: Uuid, sink: AdapterHandle) {
        let _ = self.commands.send(Command::Attach(id, sink));
    }

    /// Remove a sink adapter from the registry
    pub fn detach(&self, id: Uuid) {
        let _ = self.commands.send(Command::Detach(id));
    }

    /// Retire the active track and let the actor wind down
    pub fn shutdown(self) {
        let _ = self.commands.send(Command::ClearActive);
    }
}
