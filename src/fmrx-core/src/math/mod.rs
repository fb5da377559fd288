// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod ratio;

pub use ratio::{approximate_ratio, decimation_stages, gcd, RatioApprox};
