//! Ground truth oracle for simulation.
//!
//! The Oracle plays the remote side of a run: a four-echelon supply chain
//! stepped one week at a time, producing exactly the frames a live endpoint
//! would stream. Every tick it emits is also kept, so scenarios can compare
//! the client's accumulated state against the truth.

use chainview_core::commands::AgentConfig;
use chainview_core::model::{
    AgentSnapshot, AgentState, BreakdownEntry, CostEntry, EventMessage, InventoryPoint, Role, Severity,
    SummaryMessage, TickMessage,
};
use chainview_core::Disruption;
use chainview_env::Frame;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;

const TARGET_INVENTORY: i64 = 100;
const HOLDING_COST: i64 = 1;
const STOCKOUT_COST: i64 = 5;
const BASE_DEMAND: i64 = 20;
const SHIFTED_DEMAND: i64 = 25;
const DEMAND_SHIFT_WEEK: i64 = 10;

/// Week reported for events raised outside the weekly loop.
pub const OFF_CYCLE_WEEK: i64 = -1;

/// One participant of the chain.
#[derive(Debug, Clone)]
struct Echelon {
    role: Role,
    inventory: i64,
    backlog: i64,
    incoming: i64,
    placed: i64,
    shipped: i64,
    cost: i64,
    inventory_history: Vec<i64>,
    cost_total: i64,
}

impl Echelon {
    fn new(role: Role) -> Self {
        Self {
            role,
            inventory: TARGET_INVENTORY,
            backlog: 0,
            incoming: 0,
            placed: 0,
            shipped: 0,
            cost: 0,
            inventory_history: vec![TARGET_INVENTORY],
            cost_total: 0,
        }
    }

    fn state(&self) -> AgentState {
        AgentState {
            inventory: self.inventory,
            placed_order_amount: self.placed,
            backlog: self.backlog,
            cost: self.cost as f64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveDisruption {
    value: i64,
    remaining: u32,
}

/// The Oracle - steps the chain and renders frames.
pub struct Oracle {
    rng: ChaCha8Rng,

    /// Upstream first: Factory, Distributor, Wholesaler, Retailer
    chain: [Echelon; 4],

    config: AgentConfig,
    session_id: String,
    week: i64,

    /// Amplitude of seeded demand noise (units)
    demand_noise: i64,

    disruption: Option<ActiveDisruption>,
    pending_events: Vec<EventMessage>,
    emitted: Vec<TickMessage>,
}

impl Oracle {
    /// Creates an oracle for one run.
    pub fn new(seed: u64, session_id: impl Into<String>, config: AgentConfig) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            chain: [
                Echelon::new(Role::Factory),
                Echelon::new(Role::Distributor),
                Echelon::new(Role::Wholesaler),
                Echelon::new(Role::Retailer),
            ],
            config,
            session_id: session_id.into(),
            week: 0,
            demand_noise: 2,
            disruption: None,
            pending_events: Vec::new(),
            emitted: Vec::new(),
        }
    }

    /// Disables demand noise.
    pub fn without_noise(mut self) -> Self {
        self.demand_noise = 0;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Ticks emitted so far, in order.
    pub fn emitted(&self) -> &[TickMessage] {
        &self.emitted
    }

    /// The acknowledgement frame for this run.
    pub fn session_frame(&self) -> Frame {
        json!({ "type": "simulation_id", "id": self.session_id }).to_string()
    }

    /// Applies a disruption from the next week on.
    pub fn inject(&mut self, disruption: Disruption) {
        let Disruption::DemandSpike { value, duration } = disruption;
        self.disruption = Some(ActiveDisruption {
            value: i64::from(value),
            remaining: duration,
        });
        self.pending_events.push(EventMessage {
            week: OFF_CYCLE_WEEK,
            severity: Severity::Critical,
            text: format!("Demand spiked to {value} units for {duration} weeks."),
        });
    }

    /// Advances one week and returns that week's tick.
    pub fn step(&mut self) -> TickMessage {
        self.week += 1;
        let week = self.week;
        let mut events = std::mem::take(&mut self.pending_events);

        let mut demand = if week >= DEMAND_SHIFT_WEEK { SHIFTED_DEMAND } else { BASE_DEMAND };
        let original_demand = demand;
        if week == DEMAND_SHIFT_WEEK {
            events.push(EventMessage {
                week,
                severity: Severity::Info,
                text: format!("Customer demand shifted to {SHIFTED_DEMAND} units."),
            });
        }
        if self.demand_noise > 0 {
            demand = (demand + self.rng.gen_range(-self.demand_noise..=self.demand_noise)).max(0);
        }

        if let Some(active) = self.disruption.as_mut() {
            if active.remaining > 0 {
                demand = active.value;
                active.remaining -= 1;
            } else {
                self.disruption = None;
            }
        }

        for echelon in self.chain.iter_mut().rev() {
            echelon.inventory += echelon.incoming;
            echelon.incoming = 0;
        }

        self.fulfill(3, demand);
        for index in 0..3 {
            self.fulfill(index, 0);
        }

        for index in 0..4 {
            self.place_order(index);
        }

        for echelon in self.chain.iter_mut() {
            echelon.cost = echelon.inventory * HOLDING_COST + echelon.backlog * STOCKOUT_COST;
            echelon.cost_total += echelon.cost;
            echelon.inventory_history.push(echelon.inventory);
        }

        let distributor_order = self.chain[1].placed;
        if week > 15 && distributor_order > original_demand * 3 && distributor_order > 50 {
            events.push(EventMessage {
                week,
                severity: Severity::Warning,
                text: format!(
                    "Bullwhip: retailer ordered {} while distributor ordered {distributor_order}.",
                    self.chain[3].placed
                ),
            });
        }

        let tick = TickMessage {
            week,
            agents: AgentSnapshot {
                retailer: self.chain[3].state(),
                wholesaler: self.chain[2].state(),
                distributor: self.chain[1].state(),
                factory: self.chain[0].state(),
            },
            analysis: None,
            events: if events.is_empty() { None } else { Some(events) },
        };
        self.emitted.push(tick.clone());
        tick
    }

    /// Advances one week and renders the tick as a frame.
    pub fn step_frame(&mut self) -> Result<Frame, serde_json::Error> {
        let tick = self.step();
        serde_json::to_string(&tick)
    }

    /// Renders the terminal summary for the weeks stepped so far.
    pub fn summary(&self) -> SummaryMessage {
        let retailer = &self.chain[3];
        let holding: i64 = retailer.inventory_history.iter().map(|inv| inv * HOLDING_COST).sum();
        let stockout = retailer.cost_total - holding;
        let ai_roles: Vec<&str> = self
            .config
            .iter()
            .filter(|(_, mode)| *mode == chainview_core::AgentMode::Ai)
            .map(|(role, _)| role.name())
            .collect();

        SummaryMessage {
            title: "Simulation Complete: Performance Dashboard".to_string(),
            summary_text: if ai_roles.is_empty() {
                format!("{} weeks simulated with rule-based agents.", self.week)
            } else {
                format!("{} weeks simulated; AI agents: {}.", self.week, ai_roles.join(", "))
            },
            total_cost_data: self
                .chain
                .iter()
                .map(|echelon| CostEntry {
                    name: echelon.role.name().to_string(),
                    cost: echelon.cost_total as f64,
                })
                .collect(),
            inventory_stability_data: retailer
                .inventory_history
                .iter()
                .enumerate()
                .map(|(week, inventory)| InventoryPoint {
                    week: week as i64,
                    inventory: *inventory,
                })
                .collect(),
            cost_breakdown_data: vec![
                BreakdownEntry {
                    name: "Holding Cost".to_string(),
                    value: holding as f64,
                },
                BreakdownEntry {
                    name: "Stockout Cost".to_string(),
                    value: stockout as f64,
                },
            ],
        }
    }

    /// Renders the terminal summary as a frame.
    pub fn summary_frame(&self) -> Result<Frame, serde_json::Error> {
        let mut value = serde_json::to_value(self.summary())?;
        if let Some(object) = value.as_object_mut() {
            object.insert("type".to_string(), json!("final_summary"));
        }
        Ok(value.to_string())
    }

    fn fulfill(&mut self, index: usize, customer_demand: i64) {
        let echelon = &mut self.chain[index];
        let total_demand = echelon.backlog + customer_demand;
        let shipped = echelon.inventory.min(total_demand).max(0);
        echelon.shipped = shipped;
        echelon.inventory -= shipped;
        echelon.backlog = total_demand - shipped;

        if index + 1 < self.chain.len() {
            self.chain[index + 1].incoming = shipped;
        }
    }

    fn place_order(&mut self, index: usize) {
        let echelon = &mut self.chain[index];
        let order = if echelon.role == Role::Factory {
            echelon.inventory += echelon.shipped;
            echelon.shipped
        } else {
            (echelon.shipped + TARGET_INVENTORY - echelon.inventory).max(0)
        };
        echelon.placed = order;
        echelon.shipped = 0;

        if index > 0 {
            self.chain[index - 1].backlog += order;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainview_core::classify;
    use chainview_core::Inbound;

    #[test]
    fn test_oracle_weeks_are_sequential() {
        let mut oracle = Oracle::new(42, "run", AgentConfig::default());
        let weeks: Vec<i64> = (0..5).map(|_| oracle.step().week).collect();
        assert_eq!(weeks, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_oracle_deterministic() {
        let mut a = Oracle::new(9, "run", AgentConfig::default());
        let mut b = Oracle::new(9, "run", AgentConfig::default());
        for _ in 0..20 {
            assert_eq!(a.step(), b.step());
        }
    }

    #[test]
    fn test_first_week_without_noise() {
        let mut oracle = Oracle::new(1, "run", AgentConfig::default()).without_noise();
        let first = oracle.step();
        // Ships 20 from 100, then orders the shipment plus the gap to target.
        assert_eq!(first.agents.retailer.inventory, 80);
        assert_eq!(first.agents.retailer.placed_order_amount, 40);
        assert_eq!(first.agents.retailer.backlog, 0);
    }

    #[test]
    fn test_frames_classify() {
        let mut oracle = Oracle::new(3, "abc", AgentConfig::default());
        assert_eq!(
            classify(&oracle.session_frame()).unwrap(),
            Inbound::SessionIdentifier(chainview_core::SessionId::new("abc"))
        );
        assert_eq!(classify(&oracle.step_frame().unwrap()).unwrap().kind(), "tick");
        assert_eq!(classify(&oracle.summary_frame().unwrap()).unwrap().kind(), "summary");
    }

    #[test]
    fn test_disruption_event_is_off_cycle() {
        let mut oracle = Oracle::new(3, "abc", AgentConfig::default());
        oracle.step();
        oracle.inject(Disruption::default_demand_spike());
        let tick = oracle.step();
        assert_eq!(tick.events()[0].week, OFF_CYCLE_WEEK);
        assert_eq!(tick.events()[0].severity, Severity::Critical);
    }
}
