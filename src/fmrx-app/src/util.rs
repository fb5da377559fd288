// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

/// Parse a human frequency such as `101.5M`, `101.5 MHz`, `98300k` or
/// `101500000` into Hz.
///
/// A bare number below 10 000 is read as MHz, anything larger as Hz.
pub fn parse_frequency(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    let lower = trimmed.to_ascii_lowercase();
    let lower = lower.strip_suffix("hz").unwrap_or(&lower).trim_end();

    let (number, scale) = match lower.chars().last() {
        Some('g') => (&lower[..lower.len() - 1], Some(1e9)),
        Some('m') => (&lower[..lower.len() - 1], Some(1e6)),
        Some('k') => (&lower[..lower.len() - 1], Some(1e3)),
        _ => (lower, None),
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid frequency '{}'", trimmed))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("frequency must be positive, got '{}'", trimmed));
    }
    let scale = scale.unwrap_or(if value < 10_000.0 { 1e6 } else { 1.0 });
    Ok((value * scale).round() as u64)
}
