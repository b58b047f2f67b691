use chrono::NaiveDateTime;

use crate::error::ConfigurationError;
use crate::sim::ledger::{FlowLedger, POWER_TOLERANCE_KW};
use crate::sim::session::SessionId;

use super::{AllocationPolicy, SessionDemand};

/// Round-robin over blocks of sessions the tree can serve in full.
///
/// A block is formed at the start of each turn: walking the connected
/// sessions from the one after the previous block's first member (wrapping
/// around), every session whose full desired power still fits joins. For
/// `turn_length` steps only block members charge; everyone else gets zero.
/// If no member of the block is still connected, a new block is formed
/// early.
#[derive(Debug, Clone)]
pub struct DiscriminationFree {
    turn_length: usize,
    steps_into_turn: usize,
    active: Vec<SessionId>,
    /// Service-order key of the current block's first member.
    block_head: Option<(NaiveDateTime, usize)>,
}

impl DiscriminationFree {
    /// # Errors
    ///
    /// Returns `ConfigurationError::ZeroTurnLength` if `turn_length` is 0.
    pub fn new(turn_length: usize) -> Result<Self, ConfigurationError> {
        if turn_length == 0 {
            return Err(ConfigurationError::ZeroTurnLength);
        }
        Ok(Self {
            turn_length,
            steps_into_turn: 0,
            active: Vec::new(),
            block_head: None,
        })
    }

    pub fn turn_length(&self) -> usize {
        self.turn_length
    }

    /// Members of the current block.
    pub fn active(&self) -> &[SessionId] {
        &self.active
    }

    fn is_active(&self, id: SessionId) -> bool {
        self.active.contains(&id)
    }

    fn form_block(&mut self, demands: &[SessionDemand], ledger: &FlowLedger<'_>) {
        if demands.is_empty() {
            self.active.clear();
            return;
        }

        let start = self
            .block_head
            .and_then(|head| demands.iter().position(|d| d.order_key() > head))
            .unwrap_or(0);
        let mut trial = ledger.clone();
        self.active.clear();
        for d in rotated(demands, start) {
            if !d.accepts(d.desired_kw) {
                continue;
            }
            if trial.headroom_kw(d.outlet) + POWER_TOLERANCE_KW >= d.desired_kw {
                trial.commit(d.outlet, d.desired_kw);
                self.active.push(d.session);
            }
        }

        // Nobody fits in full: let the first session that can charge at all
        // take what the tree allows, so the rotation keeps moving.
        if self.active.is_empty() {
            let partial = rotated(demands, start)
                .find(|d| d.accepts(d.desired_kw.min(trial.headroom_kw(d.outlet))));
            if let Some(d) = partial {
                self.active.push(d.session);
            }
        }

        if let Some(first) = self.active.first() {
            self.block_head = demands
                .iter()
                .find(|d| d.session == *first)
                .map(SessionDemand::order_key);
        }
    }
}

/// `demands` starting at index `start`, wrapping around once.
fn rotated(demands: &[SessionDemand], start: usize) -> impl Iterator<Item = &SessionDemand> {
    let n = demands.len();
    (0..n).map(move |k| &demands[(start + k) % n])
}

impl AllocationPolicy for DiscriminationFree {
    fn allocate(&mut self, demands: &[SessionDemand], ledger: &mut FlowLedger<'_>) -> Vec<f32> {
        let block_present = demands.iter().any(|d| self.is_active(d.session));
        if self.steps_into_turn == 0 || !block_present {
            self.form_block(demands, ledger);
            self.steps_into_turn = 0;
        }

        let mut eligible = vec![0.0; demands.len()];
        for (i, d) in demands.iter().enumerate() {
            if !self.is_active(d.session) {
                continue;
            }
            let kw = d.desired_kw.min(ledger.headroom_kw(d.outlet));
            if d.accepts(kw) {
                ledger.commit(d.outlet, kw);
                eligible[i] = d.desired_kw;
            }
        }

        self.steps_into_turn = (self.steps_into_turn + 1) % self.turn_length;
        eligible
    }

    fn name(&self) -> &'static str {
        "discrimination_free"
    }
}
