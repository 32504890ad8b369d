/// Current UTC timestamp in milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a Snowflake-style i64 for use as resource ID.
///
/// Layout (53 bits, fits in JavaScript's Number.MAX_SAFE_INTEGER):
///   - 41 bits: milliseconds since 2024-01-01 UTC (~69 years)
///   - 12 bits: random (4096 values per ms)
pub fn snowflake_id() -> i64 {
    use rand::Rng;
    // Custom epoch: 2024-01-01 00:00:00 UTC
    const EPOCH_MS: i64 = 1_704_067_200_000;
    let now = now_millis();
    let ts = (now - EPOCH_MS) & 0x1FF_FFFF_FFFF; // 41 bits
    let rand_bits: i64 = rand::thread_rng().gen_range(0..0x1000); // 12 bits
    (ts << 12) | rand_bits
}

/// Trim + lower-case. Suppression lookups and send records use this form.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_fits_js_safe_integer() {
        let id = snowflake_id();
        assert!(id > 0);
        assert!(id < (1_i64 << 53));
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  A@B.com "), "a@b.com");
        assert_eq!(normalize_email("a@b.com"), "a@b.com");
    }
}
