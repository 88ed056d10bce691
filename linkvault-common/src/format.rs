//! Formatting utilities for displaying and parsing byte sizes

/// Format bytes as human-readable size using binary units (KiB, MiB, GiB)
///
/// # Examples
/// ```
/// use linkvault_common::format_bytes;
/// assert_eq!(format_bytes(1024), "1.00 KiB");
/// assert_eq!(format_bytes(1536), "1.50 KiB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Parse a human-readable size string (e.g. "500G", "1T", "64M", "4096")
/// into bytes. Unit suffixes are case-insensitive and use binary multiples.
pub fn parse_size(input: &str) -> Result<u64, String> {
    const SUFFIXES: &[(&str, u32)] = &[
        ("TIB", 4),
        ("TB", 4),
        ("T", 4),
        ("GIB", 3),
        ("GB", 3),
        ("G", 3),
        ("MIB", 2),
        ("MB", 2),
        ("M", 2),
        ("KIB", 1),
        ("KB", 1),
        ("K", 1),
    ];

    let upper = input.trim().to_uppercase();
    if upper.is_empty() {
        return Err("size must not be empty".to_string());
    }

    let (digits, exponent) = SUFFIXES
        .iter()
        .find_map(|(suffix, exp)| upper.strip_suffix(suffix).map(|rest| (rest, *exp)))
        .unwrap_or((upper.as_str(), 0));

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid size \"{input}\""))?;
    value
        .checked_mul(1024u64.pow(exponent))
        .ok_or_else(|| format!("size \"{input}\" overflows"))
}
