#![allow(dead_code)]

use lsm_valuation_core::{PathEnsemble, PathMatrix};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::Normal;

/// Risk-neutral GBM on `steps` dates (row 0 = `s0`), antithetic pairs.
pub fn gbm(s0: f64, rate: f64, sigma: f64, dt: f64, steps: usize, paths: usize, seed: u64) -> PathMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let drift = (rate - 0.5 * sigma * sigma) * dt;
    let vol = sigma * dt.sqrt();
    let mut m = PathMatrix::zeros(steps, paths);
    let mut p = 0;
    while p < paths {
        let mut up = s0;
        let mut down = s0;
        m.set(0, p, s0);
        if p + 1 < paths {
            m.set(0, p + 1, s0);
        }
        for t in 1..steps {
            let z: f64 = rng.sample(normal);
            up *= (drift + vol * z).exp();
            down *= (drift - vol * z).exp();
            m.set(t, p, up);
            if p + 1 < paths {
                m.set(t, p + 1, down);
            }
        }
        p += 2;
    }
    m
}

pub fn ensemble(prices: &PathMatrix) -> PathEnsemble {
    PathEnsemble::from_factor_matrices(std::slice::from_ref(prices)).unwrap()
}

/// `(price * volume - fixed_cost) * dt` per (time, path).
pub fn project_cash_flows(prices: &PathMatrix, volume: f64, fixed_cost: f64, dt: f64) -> PathMatrix {
    PathMatrix::from_fn(prices.steps(), prices.paths(), |t, p| {
        (prices.get(t, p) * volume - fixed_cost) * dt
    })
}
