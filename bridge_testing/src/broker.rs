//! A [`Broker`] that records commands and answers only when told to.

use std::collections::{HashMap, VecDeque};

use amqp_bridge::{
    broker::{Broker, BrokerCommand, Command, Destination},
    correlation::CommandId,
};

/// Recording broker.
///
/// Response-required commands stay unanswered until the test takes their
/// ids and feeds responses back to the converter.
#[derive(Debug, Default)]
pub struct RecordingBroker {
    commands: Vec<BrokerCommand>,
    unanswered: VecDeque<CommandId>,
    subscriptions: HashMap<(String, Option<String>), Destination>,
}

impl RecordingBroker {
    /// Create a broker with no recorded subscriptions.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Record a durable subscription for recovery lookups.
    #[must_use]
    pub fn with_subscription(
        mut self,
        name: &str,
        client_id: Option<&str>,
        destination: Destination,
    ) -> Self {
        self.subscriptions
            .insert((name.to_owned(), client_id.map(str::to_owned)), destination);
        self
    }

    /// Every command received, in order.
    #[must_use]
    pub fn commands(&self) -> &[BrokerCommand] { &self.commands }

    /// Bodies of every command received, in order.
    #[must_use]
    pub fn bodies(&self) -> Vec<&Command> { self.commands.iter().map(|c| &c.body).collect() }

    /// Bodies matching `predicate`.
    pub fn matching(&self, predicate: impl Fn(&Command) -> bool) -> Vec<&Command> {
        self.commands
            .iter()
            .map(|c| &c.body)
            .filter(|body| predicate(body))
            .collect()
    }

    /// Forget recorded commands; unanswered ids are kept.
    pub fn clear(&mut self) { self.commands.clear(); }

    /// Take the ids of every unanswered response-required command.
    pub fn take_unanswered(&mut self) -> Vec<CommandId> { self.unanswered.drain(..).collect() }

    /// Take the id of the oldest unanswered command matching `predicate`.
    pub fn take_unanswered_matching(
        &mut self,
        predicate: impl Fn(&Command) -> bool,
    ) -> Option<CommandId> {
        let position = self.unanswered.iter().position(|id| {
            self.commands
                .iter()
                .any(|c| c.command_id == *id && predicate(&c.body))
        })?;
        self.unanswered.remove(position)
    }
}

impl Broker for RecordingBroker {
    fn send(&mut self, command: BrokerCommand) {
        if command.response_required {
            self.unanswered.push_back(command.command_id);
        }
        self.commands.push(command);
    }

    fn lookup_subscription(&self, name: &str, client_id: Option<&str>) -> Option<Destination> {
        self.subscriptions
            .get(&(name.to_owned(), client_id.map(str::to_owned)))
            .cloned()
    }
}
