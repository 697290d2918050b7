//! Detection identifier generators.
//!
//! A generator lives for exactly one batch. Whatever the scheme, it never
//! hands out the same id twice.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::result::DetectionType;

pub trait IdGenerator: Send {
    fn next_id(&mut self, kind: DetectionType) -> String;
}

/// Zero-padded counter: `00000`, `00001`, ...
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: u64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&mut self, _kind: DetectionType) -> String {
        let id = format!("{:05}", self.next);
        self.next += 1;
        id
    }
}

/// Random 8-hex-digit ids. Collisions within the batch are redrawn.
pub struct RandomIds {
    rng: StdRng,
    issued: HashSet<String>,
}

impl RandomIds {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            issued: HashSet::new(),
        }
    }

    /// Deterministic sequence, for tests and reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            issued: HashSet::new(),
        }
    }
}

impl Default for RandomIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for RandomIds {
    fn next_id(&mut self, _kind: DetectionType) -> String {
        loop {
            let id = format!("{:08x}", self.rng.gen::<u32>());
            if self.issued.insert(id.clone()) {
                return id;
            }
        }
    }
}
