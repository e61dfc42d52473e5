//! Signed JWT client assertions (RFC 7523).

use jsonwebtoken::{encode, Algorithm, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{SinkError, SinkErrorKind, SinkResult};

use super::certificate::SigningCertificate;

/// Validity window of an assertion, in seconds.
pub const ASSERTION_LIFETIME_SECS: i64 = 600;

/// `client_assertion_type` value for JWT bearer assertions.
pub const JWT_BEARER_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Assertion claims. Field order is the serialized order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Subject, the client id.
    pub sub: String,
    /// Unique token id.
    pub jti: String,
    /// Audience, the token endpoint URL.
    pub aud: String,
    /// Issued at.
    pub iat: i64,
    /// Not before.
    pub nbf: i64,
    /// Expiry.
    pub exp: i64,
    /// Issuer, the client id.
    pub iss: String,
}

impl AssertionClaims {
    /// Claims for `client_id` addressed to `token_url`, issued at `now`.
    pub fn new(client_id: &str, token_url: &str, now: i64) -> Self {
        Self {
            sub: client_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            aud: token_url.to_string(),
            iat: now,
            nbf: now,
            exp: now + ASSERTION_LIFETIME_SECS,
            iss: client_id.to_string(),
        }
    }
}

/// Builds and signs a client assertion with RS256.
pub fn build_assertion(
    certificate: &SigningCertificate,
    client_id: &str,
    token_url: &str,
    now: i64,
) -> SinkResult<String> {
    let header = Header {
        x5t: Some(certificate.x5t()),
        ..Header::new(Algorithm::RS256)
    };
    let claims = AssertionClaims::new(client_id, token_url, now);

    encode(&header, &claims, certificate.encoding_key()).map_err(|e| {
        SinkError::new(
            SinkErrorKind::AssertionFailed,
            format!(
                "Signing with certificate {} failed: {}",
                certificate.thumbprint(),
                e
            ),
        )
        .with_cause(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    const BUNDLE: &[u8] = include_bytes!("../../tests/fixtures/signing_bundle.pem");

    fn decode<T: serde::de::DeserializeOwned>(segment: &str) -> T {
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segment).unwrap()).unwrap()
    }

    #[test]
    fn test_assertion_layout() {
        let cert = SigningCertificate::from_pem(BUNDLE).unwrap();
        let jwt = build_assertion(&cert, "app-id", "https://login.example.com/token", 1_700_000_000)
            .unwrap();

        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);

        let header = jsonwebtoken::decode_header(&jwt).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.typ.as_deref(), Some("JWT"));
        assert_eq!(header.x5t.as_deref(), Some("VilQgvfqleaN62cLSKOEkp1V+6E="));
        assert!(header.kid.is_none());

        let claims: AssertionClaims = decode(parts[1]);
        assert_eq!(claims.sub, "app-id");
        assert_eq!(claims.iss, "app-id");
        assert_eq!(claims.aud, "https://login.example.com/token");
        assert_eq!(claims.iat, 1_700_000_000);
        assert_eq!(claims.nbf, claims.iat);
        assert_eq!(claims.exp, claims.iat + 600);
        assert!(Uuid::parse_str(&claims.jti).is_ok());

        // 2048-bit key
        assert_eq!(URL_SAFE_NO_PAD.decode(parts[2]).unwrap().len(), 256);
    }

    #[test]
    fn test_claim_order() {
        let claims = AssertionClaims::new("c", "u", 10);
        let json = serde_json::to_string(&claims).unwrap();
        let keys = ["\"sub\"", "\"jti\"", "\"aud\"", "\"iat\"", "\"nbf\"", "\"exp\"", "\"iss\""];
        let positions: Vec<usize> = keys.iter().map(|k| json.find(k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_fresh_jti_per_assertion() {
        let cert = SigningCertificate::from_pem(BUNDLE).unwrap();
        let a = build_assertion(&cert, "c", "u", 0).unwrap();
        let b = build_assertion(&cert, "c", "u", 0).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_segments_are_unpadded_base64url() {
        let cert = SigningCertificate::from_pem(BUNDLE).unwrap();
        // the x5t value carries '+' and '=' before encoding
        let jwt = build_assertion(&cert, "app+id", "https://login.example.com/t?x=/", 0).unwrap();
        assert!(jwt
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'));
    }
}
