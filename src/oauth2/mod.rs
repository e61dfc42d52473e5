//! OAuth2 client-credentials support.
//!
//! The [`TokenExchanger`] turns [`OAuth2Settings`](crate::config::OAuth2Settings)
//! into a bearer token, authenticating to the token endpoint with either a
//! shared secret or a certificate-signed JWT assertion. The token is used
//! once for SMTP XOAUTH2 and then dropped.

pub mod assertion;
pub mod certificate;
pub mod exchanger;
pub mod http;
pub mod token;

pub use assertion::{build_assertion, AssertionClaims, ASSERTION_LIFETIME_SECS};
pub use certificate::{
    normalize_thumbprint, CertificateStore, InMemoryCertificateStore, PemDirectoryStore,
    SigningCertificate,
};
pub use exchanger::{PreparedCredential, PreparedExchange, TokenExchanger};
pub use http::{HttpRequest, HttpResponse, HttpTransport, ReqwestHttpTransport};
pub use token::{parse_token_response, AccessToken, TokenErrorResponse};
