// src/report/format.rs

/// Units after plain bytes, each 1000x (threshold) / 1024x (divisor) the
/// previous one.
const UNITS: [&str; 6] = ["KB", "MB", "GB", "TB", "PB", "EB"];

/// Largest precision we can scale by without overflowing `u128`.
const MAX_PRECISION: u32 = 18;

/// Format a byte count for humans.
///
/// The unit is the largest whose decimal threshold (1000, 1000², ...) `value`
/// reaches; the number shown is `value` divided by the matching power of 1024,
/// rounded *up* to `precision` decimal places. A precision of 0 is treated as
/// 1.
///
/// ```
/// use seedkeeper::report::format_bytes;
///
/// assert_eq!(format_bytes(999, 2), "999.00 bytes");
/// assert_eq!(format_bytes(1000, 2), "0.98 KB");
/// assert_eq!(format_bytes(1025, 2), "1.01 KB");
/// ```
pub fn format_bytes(value: u64, precision: u32) -> String {
    let precision = precision.clamp(1, MAX_PRECISION);

    let mut unit_index = None;
    let mut threshold: u128 = 1000;
    for i in 0..UNITS.len() {
        if u128::from(value) >= threshold {
            unit_index = Some(i);
        }
        threshold *= 1000;
    }

    match unit_index {
        None => format!("{} bytes", fixed(u128::from(value), 1, precision)),
        Some(i) => {
            let divisor = 1024u128.pow(i as u32 + 1);
            format!("{} {}", fixed(u128::from(value), divisor, precision), UNITS[i])
        }
    }
}

/// `numerator / divisor` rounded up to `precision` decimals, rendered with
/// exactly that many digits after the point.
fn fixed(numerator: u128, divisor: u128, precision: u32) -> String {
    let scale = 10u128.pow(precision);
    let scaled = (numerator * scale).div_ceil(divisor);
    let int_part = scaled / scale;
    let frac_part = scaled % scale;
    format!(
        "{}.{:0width$}",
        int_part,
        frac_part,
        width = precision as usize
    )
}
