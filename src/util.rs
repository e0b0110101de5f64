use crate::devices::DeviceRow;
use crate::error::RudderError;

/// Parse a disk size string into bytes.
///
/// Accepts `"20G"`, `"512M"`, `"1T"` and friends. A bare number is taken
/// as gibibytes, matching how the remote API reports disk sizes. Binary
/// units throughout (1G = 1024³ bytes).
pub fn parse_disk_size(s: &str) -> Result<u64, RudderError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(RudderError::Validation {
            message: "disk size cannot be empty".into(),
        });
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(i) => (&s[..i], s[i..].to_ascii_uppercase()),
        None => (s, String::new()),
    };

    let num: u64 = num_str.parse().map_err(|_| RudderError::Validation {
        message: format!("invalid disk size number: '{num_str}'"),
    })?;

    let multiplier: u64 = match suffix.as_str() {
        // bare number = gibibytes
        "" | "G" | "GB" => 1024 * 1024 * 1024,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "T" | "TB" => 1024 * 1024 * 1024 * 1024,
        _ => {
            return Err(RudderError::Validation {
                message: format!("unknown disk size suffix: '{suffix}' (use K, M, G or T)"),
            });
        }
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| RudderError::Validation {
            message: format!("disk size overflows: '{s}'"),
        })
}

/// Requested size of a disk row in bytes, from its `size` attribute.
///
/// Missing or malformed sizes are treated as zero; zero is a no-op in the
/// growth rule, so devices without a size never trigger a resize.
pub fn disk_size_bytes(row: &DeviceRow) -> u64 {
    match row.get("size") {
        Some(v) => match v.as_int() {
            Some(n) if n >= 0 => (n as u64).saturating_mul(1024 * 1024 * 1024),
            Some(_) => 0,
            None => v
                .as_str()
                .and_then(|s| parse_disk_size(s).ok())
                .unwrap_or(0),
        },
        None => 0,
    }
}

/// Format a byte count as the `<n>G` string the resize endpoint expects.
/// Rounds up so a grow request never silently shrinks.
pub fn format_gib(bytes: u64) -> String {
    const GIB: u64 = 1024 * 1024 * 1024;
    format!("{}G", bytes.div_ceil(GIB))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::Scalar;

    #[test]
    fn parse_disk_size_units() {
        assert_eq!(parse_disk_size("20G").unwrap(), 20 * 1024 * 1024 * 1024);
        assert_eq!(parse_disk_size("512M").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_disk_size("100K").unwrap(), 100 * 1024);
        assert_eq!(parse_disk_size("1T").unwrap(), 1024u64.pow(4));
    }

    #[test]
    fn parse_disk_size_bare_number_is_gibibytes() {
        assert_eq!(parse_disk_size("32").unwrap(), 32 * 1024 * 1024 * 1024);
    }

    #[test]
    fn parse_disk_size_rejects_garbage() {
        assert!(parse_disk_size("").is_err());
        assert!(parse_disk_size("10X").is_err());
        assert!(parse_disk_size("G").is_err());
    }

    #[test]
    fn disk_size_bytes_reads_row() {
        let mut row = DeviceRow::new();
        row.insert("size".into(), Scalar::Str("10G".into()));
        assert_eq!(disk_size_bytes(&row), 10 * 1024 * 1024 * 1024);

        row.insert("size".into(), Scalar::Int(4));
        assert_eq!(disk_size_bytes(&row), 4 * 1024 * 1024 * 1024);
    }

    #[test]
    fn disk_size_bytes_missing_is_zero() {
        assert_eq!(disk_size_bytes(&DeviceRow::new()), 0);
    }

    #[test]
    fn format_gib_rounds_up() {
        assert_eq!(format_gib(10 * 1024 * 1024 * 1024), "10G");
        assert_eq!(format_gib(10 * 1024 * 1024 * 1024 + 1), "11G");
    }
}
