//! Side partition and role assignment
//!
//! The host writes one `RoleSeed`; every participant expands it into the same
//! `RoleTable`, so the assignment never has to be sent per participant.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::game::state::{ParticipantId, Role, Side};

/// Shared input of the deterministic assignment (`session/{id}/roles`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSeed {
    pub seed: u64,
    /// Participants taking part, in ascending order
    pub participants: Vec<ParticipantId>,
}

impl RoleSeed {
    pub fn generate(participants: &[ParticipantId]) -> Self {
        let mut participants = participants.to_vec();
        participants.sort();
        participants.dedup();
        Self {
            seed: rand::thread_rng().gen(),
            participants,
        }
    }
}

/// Expanded assignment: side per participant and the starting role of side A
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleTable {
    sides: BTreeMap<ParticipantId, Side>,
    side_a_first_role: Role,
}

impl RoleTable {
    pub fn from_seed(seed: &RoleSeed) -> Self {
        let mut rng = StdRng::seed_from_u64(seed.seed);

        let mut order = seed.participants.clone();
        order.sort();
        order.shuffle(&mut rng);

        // Side A gets the extra participant on odd counts
        let split = (order.len() + 1) / 2;
        let sides = order
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, if i < split { Side::A } else { Side::B }))
            .collect();

        let side_a_first_role = if rng.gen_bool(0.5) {
            Role::Pursuer
        } else {
            Role::Pursued
        };

        Self {
            sides,
            side_a_first_role,
        }
    }

    pub fn side_of(&self, participant: ParticipantId) -> Option<Side> {
        self.sides.get(&participant).copied()
    }

    /// Role of a side in a given round; roles swap every round
    pub fn role_for(&self, side: Side, round: u32) -> Role {
        let a_role = if round % 2 == 1 || round == 0 {
            self.side_a_first_role
        } else {
            self.side_a_first_role.swapped()
        };
        match side {
            Side::A => a_role,
            Side::B => a_role.swapped(),
        }
    }

    pub fn role_of(&self, participant: ParticipantId, round: u32) -> Option<Role> {
        self.side_of(participant).map(|side| self.role_for(side, round))
    }

    pub fn members(&self, side: Side) -> Vec<ParticipantId> {
        self.sides
            .iter()
            .filter(|(_, s)| **s == side)
            .map(|(id, _)| *id)
            .collect()
    }
}
