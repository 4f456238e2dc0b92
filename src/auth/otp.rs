use rand::{rngs::OsRng, Rng};
use time::{Duration, OffsetDateTime};

/// Number of digits in a code. Codes are always left-padded with zeros to this width.
pub const OTP_DIGITS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Otp {
    pub code: String,
    pub expires_at: OffsetDateTime,
}

impl Otp {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }
}

/// Produces one-time numeric codes. Pure: persisting the code is up to the caller.
#[derive(Debug, Clone, Copy)]
pub struct OtpGenerator {
    ttl: Duration,
}

impl OtpGenerator {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn generate(&self) -> Otp {
        self.generate_at(OffsetDateTime::now_utc())
    }

    pub fn generate_at(&self, now: OffsetDateTime) -> Otp {
        let n: u32 = OsRng.gen_range(0..1_000_000);
        Otp {
            code: format!("{n:0width$}", width = OTP_DIGITS),
            expires_at: now + self.ttl,
        }
    }
}
