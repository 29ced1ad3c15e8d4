use chrono::{DateTime, Utc};
use openssl::asn1::Asn1Time;
use openssl::x509::X509;

use super::ProberError;

const SECONDS_PER_DAY: i64 = 86_400;

/// Expiry (`notAfter`) of a DER encoded certificate
pub fn not_after(der: &[u8]) -> Result<DateTime<Utc>, ProberError> {
    let invalid = |reason: String| ProberError::ProbeExecutionFailed(format!("invalid peer certificate: {}", reason));

    let cert = X509::from_der(der).map_err(|e| invalid(e.to_string()))?;
    let epoch = Asn1Time::from_unix(0).map_err(|e| invalid(e.to_string()))?;
    let offset = epoch
        .diff(cert.not_after())
        .map_err(|e| invalid(e.to_string()))?;

    let seconds = i64::from(offset.days) * SECONDS_PER_DAY + i64::from(offset.secs);
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| invalid(format!("notAfter out of range ({}s)", seconds)))
}

/// Whole days from `now` until `not_after`, truncated toward zero.
///
/// Negative values mean the certificate has already expired.
pub fn days_until(not_after: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (not_after - now).num_days()
}

/// Whole days the DER encoded certificate remains valid at `now`
pub fn days_remaining(der: &[u8], now: DateTime<Utc>) -> Result<i64, ProberError> {
    Ok(days_until(not_after(der)?, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::testing::self_signed_certificate;
    use chrono::Duration;

    fn certificate_expiring_at(not_after: DateTime<Utc>) -> Vec<u8> {
        self_signed_certificate(not_after).0.to_der().unwrap()
    }

    #[test]
    fn test_not_after_is_read_from_der() {
        let expiry = DateTime::from_timestamp(1_900_000_000, 0).unwrap();
        let der = certificate_expiring_at(expiry);
        assert_eq!(not_after(&der).unwrap(), expiry);
    }

    #[test]
    fn test_ten_days_remaining() {
        let now = DateTime::from_timestamp(1_800_000_000, 0).unwrap();
        let der = certificate_expiring_at(now + Duration::days(10) + Duration::hours(6));
        assert_eq!(days_remaining(&der, now).unwrap(), 10);

        let exact = certificate_expiring_at(now + Duration::days(10));
        assert_eq!(days_remaining(&exact, now).unwrap(), 10);
    }

    #[test]
    fn test_partial_days_truncate() {
        let now = DateTime::from_timestamp(1_800_000_000, 0).unwrap();
        assert_eq!(days_until(now + Duration::hours(47), now), 1);
        assert_eq!(days_until(now + Duration::hours(23), now), 0);
        assert_eq!(days_until(now - Duration::hours(36), now), -1);
        assert_eq!(days_until(now - Duration::days(3), now), -3);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            not_after(b"not a certificate"),
            Err(ProberError::ProbeExecutionFailed(_))
        ));
    }
}
