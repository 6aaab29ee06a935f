//! `Stripe-Signature` header verification.
//!
//! The header has the form `t=<unix seconds>,v1=<hex hmac>[,v1=...]`. The
//! signed payload is `"{t}.{raw body}"` under the endpoint's `whsec_` secret.
//! Any one matching `v1` entry is enough, which lets Stripe roll secrets.

use crate::crypto::{constant_time_eq, hmac_sha256_hex};

use super::client::StripeError;

/// Verify `header` against `payload`, returning the signed timestamp.
///
/// # Errors
///
/// - `StripeError::MalformedSignature` if the header has no timestamp or no
///   `v1` entry.
/// - `StripeError::TimestampOutsideTolerance` if `|now - t| > tolerance_seconds`.
/// - `StripeError::InvalidSignature` if no `v1` entry matches.
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<i64, StripeError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = Some(ts),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let timestamp_str =
        timestamp.ok_or_else(|| StripeError::MalformedSignature("missing timestamp".into()))?;
    let timestamp: i64 = timestamp_str
        .parse()
        .map_err(|_| StripeError::MalformedSignature(format!("bad timestamp: {timestamp_str}")))?;

    if signatures.is_empty() {
        return Err(StripeError::MalformedSignature("missing v1 signature".into()));
    }

    if (now - timestamp).abs() > tolerance_seconds {
        return Err(StripeError::TimestampOutsideTolerance {
            timestamp,
            tolerance_seconds,
        });
    }

    let expected = hmac_sha256_hex(secret, &format!("{timestamp_str}.{payload}"))
        .ok_or(StripeError::InvalidSignature)?;

    if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        Ok(timestamp)
    } else {
        Err(StripeError::InvalidSignature)
    }
}

/// Build a `Stripe-Signature` header for `payload`, as Stripe would send it.
#[must_use]
pub fn sign_payload(payload: &str, secret: &str, timestamp: i64) -> Option<String> {
    let signature = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))?;
    Some(format!("t={timestamp},v1={signature}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_760_000_000;
    const PAYLOAD: &str = r#"{"id":"evt_1","type":"checkout.session.completed"}"#;

    #[test]
    fn accepts_valid_signature() {
        let header = sign_payload(PAYLOAD, SECRET, NOW).unwrap();
        assert_eq!(verify_signature(PAYLOAD, &header, SECRET, 300, NOW).unwrap(), NOW);
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let good = sign_payload(PAYLOAD, SECRET, NOW).unwrap();
        let v1 = good.split_once(",v1=").unwrap().1;
        let header = format!("t={NOW},v1=deadbeef,v1={v1}");
        assert!(verify_signature(PAYLOAD, &header, SECRET, 300, NOW).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign_payload(PAYLOAD, SECRET, NOW).unwrap();
        let err = verify_signature(r#"{"id":"evt_2"}"#, &header, SECRET, 300, NOW).unwrap_err();
        assert!(matches!(err, StripeError::InvalidSignature));
    }

    #[test]
    fn rejects_wrong_secret() {
        let header = sign_payload(PAYLOAD, "whsec_other", NOW).unwrap();
        assert!(verify_signature(PAYLOAD, &header, SECRET, 300, NOW).is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let header = sign_payload(PAYLOAD, SECRET, NOW - 301).unwrap();
        let err = verify_signature(PAYLOAD, &header, SECRET, 300, NOW).unwrap_err();
        assert!(matches!(err, StripeError::TimestampOutsideTolerance { .. }));

        let header = sign_payload(PAYLOAD, SECRET, NOW - 300).unwrap();
        assert!(verify_signature(PAYLOAD, &header, SECRET, 300, NOW).is_ok());
    }

    #[test]
    fn rejects_malformed_headers() {
        let unsigned = format!("t={NOW}");
        for header in ["", "v1=abc", "t=abc,v1=def", unsigned.as_str()] {
            let err = verify_signature(PAYLOAD, header, SECRET, 300, NOW).unwrap_err();
            assert!(matches!(err, StripeError::MalformedSignature(_)), "{header}");
        }
    }
}
