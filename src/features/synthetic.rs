//! Seeded synthetic categorical population
//!
//! The training data carries no merchant, device, geo or account columns, so
//! they are synthesized from fixed weighted distributions. Population tables
//! depend only on the seed; a row's draw depends only on the seed and the row
//! index, which lets apply mode regenerate the identifiers a fit-mode run
//! assigned to the same row.

use crate::types::transaction::splitmix64;
use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const DEFAULT_SEED: u64 = 42;
pub const MERCHANT_COUNT: usize = 1000;
pub const GEO_BUCKET_COUNT: usize = 50;
pub const ACCOUNT_COUNT: usize = 10_000;
pub const MAX_ACCOUNT_AGE_DAYS: u32 = 2000;

/// Device codes, in code order.
pub const DEVICE_TYPES: [&str; 4] = ["mobile", "desktop", "pos", "tablet"];
const DEVICE_PROBS: [f64; 4] = [0.60, 0.25, 0.10, 0.05];

/// Identifiers drawn for one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticIds {
    pub merchant_id: u32,
    pub device_type: u32,
    pub geo_bucket: u32,
    pub account_id: u32,
}

/// Weighted identifier distributions plus the per-account age table.
#[derive(Debug, Clone)]
pub struct SyntheticPopulation {
    seed: u64,
    merchants: WeightedIndex<f64>,
    devices: WeightedIndex<f64>,
    geos: WeightedIndex<f64>,
    accounts: WeightedIndex<f64>,
    account_ages: Vec<u32>,
}

impl SyntheticPopulation {
    pub fn new(seed: u64) -> Result<Self, WeightedError> {
        let mut rng = StdRng::seed_from_u64(seed);

        let merchants = WeightedIndex::new(exponential_weights(&mut rng, MERCHANT_COUNT))?;
        let geos = WeightedIndex::new(exponential_weights(&mut rng, GEO_BUCKET_COUNT))?;
        let accounts = WeightedIndex::new(exponential_weights(&mut rng, ACCOUNT_COUNT))?;
        let account_ages = (0..ACCOUNT_COUNT)
            .map(|_| rng.gen_range(0..MAX_ACCOUNT_AGE_DAYS))
            .collect();
        let devices = WeightedIndex::new(DEVICE_PROBS)?;

        Ok(Self {
            seed,
            merchants,
            devices,
            geos,
            accounts,
            account_ages,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Draw the identifiers for the row at `row_index`.
    pub fn draw(&self, row_index: u64) -> SyntheticIds {
        let mut rng = StdRng::seed_from_u64(splitmix64(self.seed ^ splitmix64(row_index)));
        SyntheticIds {
            merchant_id: self.merchants.sample(&mut rng) as u32,
            device_type: self.devices.sample(&mut rng) as u32,
            geo_bucket: self.geos.sample(&mut rng) as u32,
            account_id: self.accounts.sample(&mut rng) as u32,
        }
    }

    /// Age in days of a known account; `None` outside the population.
    pub fn account_age(&self, account_id: u32) -> Option<u32> {
        self.account_ages.get(account_id as usize).copied()
    }
}

/// Exponential(1) draws by inversion; `1 - u` keeps the log argument in (0, 1].
fn exponential_weights(rng: &mut StdRng, n: usize) -> Vec<f64> {
    (0..n)
        .map(|_| {
            let u: f64 = rng.gen();
            -(1.0 - u).ln()
        })
        .collect()
}
