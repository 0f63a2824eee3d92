use crate::error::QvmError;

/// Parse a human-readable size string into bytes.
///
/// Accepts `"20G"`, `"512M"`, `"100K"`, `"2T"` or a plain byte count, with
/// binary units (1G = 1024³ bytes). A trailing `iB`/`B` is tolerated.
pub fn parse_size(s: &str) -> Result<u64, QvmError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(QvmError::validation("size cannot be empty"));
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(i) => (&s[..i], s[i..].to_ascii_uppercase()),
        None => (s, String::new()),
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| QvmError::validation(format!("invalid size number: '{num_str}'")))?;

    let multiplier: u64 = match suffix.trim_end_matches("IB").trim_end_matches('B') {
        "" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        _ => {
            return Err(QvmError::validation(format!(
                "unknown size suffix: '{suffix}' (use K, M, G or T)"
            )));
        }
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| QvmError::validation(format!("size overflows: '{s}'")))
}

/// Render a byte count with the largest binary unit that divides evenly.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [(u64, &str); 4] = [(1 << 40, "TiB"), (1 << 30, "GiB"), (1 << 20, "MiB"), (1 << 10, "KiB")];
    for (unit, name) in UNITS {
        if bytes >= unit && bytes % unit == 0 {
            return format!("{} {name}", bytes / unit);
        }
    }
    format!("{bytes} B")
}
