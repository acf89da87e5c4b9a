use std::time::SystemTime;

use totp_rs::{Algorithm, Secret as TotpSecret, TOTP};

use crate::error::{Error, Result};

/// Produces a current one-time code from a stored shared secret.
///
/// Kept behind a trait so the orchestration can be exercised with a canned
/// generator in tests.
pub trait OtpGenerator: Send + Sync {
    fn code(&self, seed: &str) -> Result<String>;
}

/// Time-based 6-digit code generator (SHA-1, 30 s step), the scheme used by
/// every console this tool targets.
pub struct TotpGenerator;

impl TotpGenerator {
    /// Setup pages display the seed in grouped lowercase ("abcd efgh …");
    /// base32 decoding wants it as one uppercase run.
    fn normalize_seed(seed: &str) -> String {
        seed.split_whitespace().collect::<String>().to_uppercase()
    }
}

impl OtpGenerator for TotpGenerator {
    fn code(&self, seed: &str) -> Result<String> {
        let encoded = Self::normalize_seed(seed);
        let secret_bytes = TotpSecret::Encoded(encoded)
            .to_bytes()
            .map_err(|e| Error::Config(format!("invalid 2FA seed: {:?}", e)))?;

        let totp = TOTP::new(Algorithm::SHA1, 6, 1, 30, secret_bytes)
            .map_err(|e| Error::Config(format!("unable to build TOTP: {:?}", e)))?;

        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_err(|e| Error::Config(format!("system time error: {}", e)))?
            .as_secs();

        Ok(totp.generate(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 test secret, base32-encoded ("12345678901234567890").
    const SEED: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn seed_normalization() {
        assert_eq!(
            TotpGenerator::normalize_seed("abcd efgh\nijkl"),
            "ABCDEFGHIJKL"
        );
    }

    #[test]
    fn generates_six_digits() {
        let code = TotpGenerator.code(SEED).unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn grouped_lowercase_seed_matches_plain_seed() {
        let plain = TotpGenerator.code(SEED).unwrap();
        let grouped = TotpGenerator
            .code("gezd gnbv gy3t qojq gezd gnbv gy3t qojq")
            .unwrap();
        assert_eq!(plain, grouped);
    }

    #[test]
    fn garbage_seed_is_an_error() {
        assert!(TotpGenerator.code("not-base32-!!!").is_err());
    }
}
