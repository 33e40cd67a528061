//! Seed-replicated pseudo-random derivation
//!
//! The authority draws a seed from its own entropy and broadcasts it. Every
//! peer replays the same draws against that seed, one target at a time in
//! registration order, and lands on identical platform rotations and piece
//! layouts. The replicated stream is a ChaCha8 instance created per
//! application so the local entropy stream is never advanced by it.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use shared::{EntityRef, Slot, PIECE_ANGLES};

const ROTATION_STEPS: u32 = 360;
const SAFE_PIECES: std::ops::Range<u32> = 3..5;
const UNSAFE_PIECES: std::ops::Range<u32> = 2..4;

/// Arrangement of the pieces on one platform.
///
/// `angles` is a shuffled copy of the eight piece angles. The first
/// `safe_pieces` are safe, the next `unsafe_pieces` are deadly, the rest are gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformLayout {
    pub angles: [u16; 8],
    pub safe_pieces: u8,
    pub unsafe_pieces: u8,
}

impl PlatformLayout {
    pub fn safe_angles(&self) -> &[u16] {
        &self.angles[..self.safe_pieces as usize]
    }

    pub fn unsafe_angles(&self) -> &[u16] {
        let start = self.safe_pieces as usize;
        &self.angles[start..start + self.unsafe_pieces as usize]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedPlatform {
    pub target: EntityRef,
    /// Whole degrees in [0, 360).
    pub rotation: u16,
    pub layout: PlatformLayout,
}

#[derive(Debug, Clone, Default)]
pub struct RandomReplicationState {
    pub seed: Option<i32>,
    pub targets: Vec<EntityRef>,
}

pub struct DeterministicRandomSync {
    towers: [RandomReplicationState; 2],
    entropy: StdRng,
}

impl DeterministicRandomSync {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Fixed local entropy, for reproducible authority seeds in tests and demos.
    pub fn with_entropy_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(entropy: StdRng) -> Self {
        Self {
            towers: Default::default(),
            entropy,
        }
    }

    /// Appends a sub-target to the slot's derivation order. Re-registering is a no-op.
    pub fn register(&mut self, target: EntityRef) {
        let targets = &mut self.towers[target.slot.index()].targets;
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    pub fn registered(&self, slot: Slot) -> &[EntityRef] {
        &self.towers[slot.index()].targets
    }

    /// Picks a fresh seed from local entropy. Only the authority calls this.
    pub fn draw_seed(&mut self) -> i32 {
        self.entropy.gen_range(0..i32::MAX)
    }

    /// Records `seed` for the slot and derives every registered target from it.
    pub fn apply(&mut self, slot: Slot, seed: i32) -> Vec<DerivedPlatform> {
        let state = &mut self.towers[slot.index()];
        state.seed = Some(seed);
        debug!(
            "Reseeding {} with {} over {} targets",
            slot,
            seed,
            state.targets.len()
        );
        derive(seed, &state.targets)
    }

    pub fn seed(&self, slot: Slot) -> Option<i32> {
        self.towers[slot.index()].seed
    }
}

impl Default for DeterministicRandomSync {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeterministicRandomSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeterministicRandomSync")
            .field("towers", &self.towers)
            .finish_non_exhaustive()
    }
}

/// Steps a generator seeded with `seed` once per target, in order.
///
/// Ranges are sampled as `u32` so the stream does not depend on the
/// platform's pointer width.
pub fn derive(seed: i32, targets: &[EntityRef]) -> Vec<DerivedPlatform> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed as u32 as u64);

    targets
        .iter()
        .map(|&target| {
            let rotation = rng.gen_range(0..ROTATION_STEPS) as u16;
            let layout = derive_layout(&mut rng);
            DerivedPlatform {
                target,
                rotation,
                layout,
            }
        })
        .collect()
}

// Fisher-Yates by hand: `SliceRandom::shuffle` samples usize indices.
fn derive_layout(rng: &mut ChaCha8Rng) -> PlatformLayout {
    let mut angles = PIECE_ANGLES;
    for i in (1..angles.len()).rev() {
        let j = rng.gen_range(0..=i as u32) as usize;
        angles.swap(i, j);
    }

    PlatformLayout {
        angles,
        safe_pieces: rng.gen_range(SAFE_PIECES) as u8,
        unsafe_pieces: rng.gen_range(UNSAFE_PIECES) as u8,
    }
}
