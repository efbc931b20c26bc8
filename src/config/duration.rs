// src/config/duration.rs

use std::time::Duration;

/// Parse a human duration such as `"500ms"`, `"30s"`, `"6h"` or `"1h30m"`.
///
/// Supported units: `ms`, `s`, `m`, `h`. Several `<number><unit>` groups may be
/// concatenated; their values are summed.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;

    while !rest.is_empty() {
        // Find the boundary between digits and suffix.
        let idx = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .ok_or_else(|| format!("duration '{}' is missing a unit suffix", s))?;
        if idx == 0 {
            return Err(format!("invalid duration '{}': expected a number", s));
        }

        let (num_part, tail) = rest.split_at(idx);
        let value: u64 = num_part
            .parse()
            .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;

        let unit_len = tail
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);

        let secs_per_unit = match unit.trim().to_lowercase().as_str() {
            "ms" => None,
            "s" => Some(1u64),
            "m" => Some(60),
            "h" => Some(60 * 60),
            other => {
                return Err(format!(
                    "unsupported duration unit '{}'; expected ms, s, m, or h",
                    other
                ))
            }
        };
        let part = match secs_per_unit {
            None => Duration::from_millis(value),
            Some(mult) => value
                .checked_mul(mult)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration '{}' is too large", s))?,
        };

        total = total
            .checked_add(part)
            .ok_or_else(|| format!("duration '{}' is too large", s))?;
        rest = next;
    }

    Ok(total)
}
