//! RDMA port state checks

use tracing::debug;

use super::{Evaluation, Evaluator, Section};
use crate::facts::{FactSnapshot, NetworkFacts};
use crate::report::{Issue, NetworkSection};

const PORT_ACTIVE: &str = "PORT_ACTIVE";
const PORT_DOWN: &str = "PORT_DOWN";

/// Checks high-speed network adapter ports
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkEvaluator;

impl NetworkEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, network: &NetworkFacts) -> Evaluation {
        if let Some(states) = &network.port_states {
            let active = states.iter().filter(|s| *s == PORT_ACTIVE).count();
            let down = states.iter().filter(|s| *s == PORT_DOWN).count();

            let mut evaluation = Evaluation::new(
                self.name(),
                Section::Network(NetworkSection {
                    active_ports: Some(active),
                    down_ports: Some(down),
                    adapter_count: None,
                }),
            );
            if down > 0 {
                evaluation.push(Issue::fail(format!("Found {} RDMA ports DOWN", down)));
            }
            return evaluation;
        }

        // Enumeration alone cannot tell a healthy port from a dead one
        if let Some(count) = network.adapter_count {
            debug!(adapters = count, "Port query unavailable, recording adapter count only");
            return Evaluation::new(
                self.name(),
                Section::Network(NetworkSection {
                    adapter_count: Some(count),
                    ..NetworkSection::default()
                }),
            );
        }

        Evaluation::empty(self.name())
    }
}

impl Evaluator for NetworkEvaluator {
    fn name(&self) -> &'static str {
        "network"
    }

    fn evaluate(&self, facts: &FactSnapshot) -> Evaluation {
        self.check(&facts.network)
    }
}
