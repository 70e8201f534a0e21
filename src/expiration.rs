//! Expiration arithmetic.
//!
//! The wire carries expirations as unsigned 32-bit seconds: 0 means
//! never, values up to 30 days are server-relative, larger values are
//! Unix timestamps. The client always sends 0 or an absolute Unix time.

use crate::error::{Error, Result};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// When a stored value expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    /// Keep until evicted or flushed.
    #[default]
    Never,
    /// Expire this long after now.
    ValidFor(Duration),
    /// Expire at an absolute instant.
    At(SystemTime),
}

impl Expiration {
    /// The u32 seconds value placed on the wire.
    pub fn wire(self) -> Result<u32> {
        match self {
            Expiration::Never => Ok(0),
            Expiration::ValidFor(valid_for) => wire_expiration(Some(valid_for), None),
            Expiration::At(at) => wire_expiration(None, Some(at)),
        }
    }
}

impl From<Duration> for Expiration {
    fn from(valid_for: Duration) -> Self {
        Expiration::ValidFor(valid_for)
    }
}

impl From<SystemTime> for Expiration {
    fn from(at: SystemTime) -> Self {
        Expiration::At(at)
    }
}

/// Compute the wire expiration from the two optional inputs.
///
/// Supplying both is an invalid argument; supplying neither means
/// never. A zero or effectively-unbounded `valid_for` also means never,
/// as does an `expires_at` beyond the representable range. Instants
/// before the Unix epoch are out of range.
pub fn wire_expiration(
    valid_for: Option<Duration>,
    expires_at: Option<SystemTime>,
) -> Result<u32> {
    match (valid_for, expires_at) {
        (Some(_), Some(_)) => Err(Error::InvalidArgument(
            "valid_for and expires_at are mutually exclusive".to_string(),
        )),
        (None, None) => Ok(0),
        (Some(valid_for), None) => {
            if valid_for.is_zero() || valid_for.as_secs() >= u64::from(u32::MAX) {
                return Ok(0);
            }
            let at = SystemTime::now() + valid_for;
            let unix = at
                .duration_since(UNIX_EPOCH)
                .map_err(|_| Error::InvalidArgument("expiration before Unix epoch".to_string()))?
                .as_secs();
            u32::try_from(unix)
                .map_err(|_| Error::InvalidArgument("expiration beyond year 2106".to_string()))
        }
        (None, Some(at)) => {
            let unix = at
                .duration_since(UNIX_EPOCH)
                .map_err(|_| Error::InvalidArgument("expiration before Unix epoch".to_string()))?
                .as_secs();
            // An instant past the representable range reads as "never".
            match u32::try_from(unix) {
                Ok(seconds) => Ok(seconds),
                Err(_) => Ok(0),
            }
        }
    }
}
