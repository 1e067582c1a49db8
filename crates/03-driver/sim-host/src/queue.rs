use std::collections::VecDeque;

use sim_protocol::Command;

/// Commands received while the compute module is loading, in arrival order.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    commands: VecDeque<Command>,
}

impl PendingQueue {
    pub(crate) fn push(&mut self, command: Command) {
        self.commands.push_back(command);
    }

    pub(crate) fn pop_front(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether draining the queue would leave the host stepping.
    ///
    /// Deferral only happens during a load, which always starts from a fresh
    /// instance, so the fold starts from "not running".
    pub(crate) fn projects_running(&self) -> bool {
        self.commands.iter().fold(false, |running, command| match command {
            Command::Make { .. } | Command::Stop => false,
            Command::Start { .. } => true,
            Command::Update { .. } | Command::Get => running,
        })
    }

    /// Removes the start that would still be in effect after draining.
    pub(crate) fn cancel_start(&mut self) -> Option<f64> {
        if !self.projects_running() {
            return None;
        }
        let idx = self
            .commands
            .iter()
            .rposition(|command| matches!(command, Command::Start { .. }))?;
        match self.commands.remove(idx) {
            Some(Command::Start { dt }) => Some(dt),
            _ => None,
        }
    }
}
