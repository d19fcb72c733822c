//! Replicated random generator.
//!
//! The generator lives inside the game state, so every peer that holds
//! the same state draws the same numbers. It is xoshiro256** seeded
//! through splitmix64. On the wire the 256-bit state is a hex string so
//! that no JSON consumer has to round it through a double.

use serde::{Deserialize, Serialize};

use crate::StateError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RngRepr", into = "RngRepr")]
pub struct GameRng {
    seed: u64,
    s: [u64; 4],
}

#[derive(Serialize, Deserialize)]
struct RngRepr {
    seed: String,
    state: String,
}

impl From<GameRng> for RngRepr {
    fn from(rng: GameRng) -> Self {
        Self {
            seed: format!("{:016x}", rng.seed),
            state: rng.s.iter().map(|w| format!("{w:016x}")).collect(),
        }
    }
}

impl TryFrom<RngRepr> for GameRng {
    type Error = StateError;

    fn try_from(repr: RngRepr) -> Result<Self, Self::Error> {
        let parse = |hex: &str| {
            u64::from_str_radix(hex, 16).map_err(|e| StateError::InvalidRng(format!("{hex:?}: {e}")))
        };
        if repr.state.len() != 64 || !repr.state.is_ascii() {
            return Err(StateError::InvalidRng("state must be 64 hex digits".into()));
        }
        let mut s = [0u64; 4];
        for (i, word) in s.iter_mut().enumerate() {
            *word = parse(&repr.state[i * 16..(i + 1) * 16])?;
        }
        if s == [0; 4] {
            return Err(StateError::InvalidRng("state is all zero".into()));
        }
        Ok(Self {
            seed: parse(&repr.seed)?,
            s,
        })
    }
}

fn splitmix64(x: &mut u64) -> u64 {
    *x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

impl GameRng {
    pub fn seed_from_u64(seed: u64) -> Self {
        let mut x = seed;
        let s = [
            splitmix64(&mut x),
            splitmix64(&mut x),
            splitmix64(&mut x),
            splitmix64(&mut x),
        ];
        Self { seed, s }
    }

    /// Seeds from the thread-local OS-backed generator.
    pub fn from_entropy() -> Self {
        Self::seed_from_u64(rand::random())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn next_u64(&mut self) -> u64 {
        let result = self.s[1].wrapping_mul(5).rotate_left(7).wrapping_mul(9);
        let t = self.s[1] << 17;
        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];
        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);
        result
    }

    /// Rolls a die with `sides` faces, returning `1..=sides`.
    pub fn roll_die(&mut self, sides: u32) -> u32 {
        let sides = u64::from(sides.max(1));
        // Reject the top sliver so every face is equally likely.
        let zone = u64::MAX - (u64::MAX % sides);
        loop {
            let x = self.next_u64();
            if x < zone {
                return (x % sides) as u32 + 1;
            }
        }
    }
}
