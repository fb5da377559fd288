// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Integer helpers for sample-rate conversion planning.

/// Greatest common divisor.
pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// An `up / down` approximation of a rate ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatioApprox {
    pub up: u32,
    pub down: u32,
    /// Relative error of `up / down` against the requested ratio.
    pub rel_error: f64,
}

impl RatioApprox {
    pub fn is_exact(&self) -> bool {
        self.rel_error == 0.0
    }
}

/// Best `up / down` approximation of `out_rate / in_rate` with `up <= max_up`.
///
/// Exact ratios are returned in lowest terms. Otherwise every numerator up to
/// `max_up` is tried and the smallest relative error wins (smaller `up` on
/// ties). Returns `None` for zero rates or `max_up == 0`.
pub fn approximate_ratio(out_rate: u64, in_rate: u64, max_up: u32) -> Option<RatioApprox> {
    if out_rate == 0 || in_rate == 0 || max_up == 0 {
        return None;
    }
    let g = gcd(out_rate, in_rate);
    let (up, down) = (out_rate / g, in_rate / g);
    if up <= max_up as u64 && down <= u32::MAX as u64 {
        return Some(RatioApprox {
            up: up as u32,
            down: down as u32,
            rel_error: 0.0,
        });
    }

    let target = out_rate as f64 / in_rate as f64;
    let mut best: Option<RatioApprox> = None;
    for up in 1..=max_up {
        let down = (up as f64 / target).round();
        if down < 1.0 || down > u32::MAX as f64 {
            continue;
        }
        let rel_error = ((up as f64 / down - target) / target).abs();
        if best.map_or(true, |b| rel_error < b.rel_error) {
            best = Some(RatioApprox {
                up,
                down: down as u32,
                rel_error,
            });
        }
    }
    best
}

fn prime_factors(mut n: u64) -> Vec<u64> {
    let mut factors = Vec::new();
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            factors.push(p);
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}

/// Split an integer decimation `factor` into stages of at most `max_stage`.
///
/// Prime factors are packed largest-first, so the result is ordered with the
/// biggest reduction applied first. Returns `None` when a prime factor
/// exceeds `max_stage`.
pub fn decimation_stages(factor: u64, max_stage: u64) -> Option<Vec<u32>> {
    if factor == 0 || max_stage < 2 {
        return None;
    }
    if factor == 1 {
        return Some(Vec::new());
    }
    let mut primes = prime_factors(factor);
    if primes.iter().any(|&p| p > max_stage) {
        return None;
    }
    primes.sort_unstable_by(|a, b| b.cmp(a));

    let mut stages: Vec<u64> = Vec::new();
    for p in primes {
        match stages.iter_mut().find(|s| **s * p <= max_stage) {
            Some(stage) => *stage *= p,
            None => stages.push(p),
        }
    }
    stages.sort_unstable_by(|a, b| b.cmp(a));
    Some(stages.into_iter().map(|s| s as u32).collect())
}
