//! OAuth 1.0a HMAC-SHA1 request signing.
//!
//! Pure and stateless: for a fixed method, URL, parameter set, nonce, and
//! timestamp the output is byte-for-byte reproducible. Callers get a fresh
//! nonce and timestamp per request through [`SignatureEngine::sign`].

use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

use crate::error::EtradeError;

type HmacSha1 = Hmac<Sha1>;

const SIGNATURE_METHOD: &str = "HMAC-SHA1";
const OAUTH_VERSION: &str = "1.0";

/// Random bytes per nonce. Collision probability at 32 bytes is
/// cryptographically negligible.
const NONCE_BYTES: usize = 32;

/// One request to be signed.
#[derive(Debug, Clone, Copy)]
pub struct SignRequest<'a> {
    /// HTTP method; uppercased in the base string.
    pub method: &'a str,
    /// Base URL without any query component.
    pub url: &'a str,
    /// OAuth consumer key.
    pub consumer_key: &'a str,
    /// OAuth consumer secret.
    pub consumer_secret: &'a str,
    /// Current token (request or access), when present.
    pub token: Option<&'a str>,
    /// Secret of the current token, when present.
    pub token_secret: Option<&'a str>,
    /// `oauth_callback` value for the request-token step.
    pub callback: Option<&'a str>,
    /// `oauth_verifier` value for the access-token step.
    pub verifier: Option<&'a str>,
    /// Request parameters (query and form body). Repeated keys allowed.
    pub params: &'a [(String, String)],
}

/// Signed OAuth parameter set.
#[derive(Debug, Clone)]
pub struct SignedParams {
    /// Full `Authorization: OAuth ...` header value.
    pub authorization: String,
    /// OAuth protocol parameters including `oauth_signature`.
    pub oauth_params: Vec<(String, String)>,
}

/// OAuth 1.0a signature computation.
pub struct SignatureEngine;

impl SignatureEngine {
    /// Sign a request with a fresh nonce and the current Unix time.
    pub fn sign(request: &SignRequest<'_>) -> Result<SignedParams, EtradeError> {
        Self::sign_at(request, &nonce(), chrono::Utc::now().timestamp())
    }

    /// Sign with an explicit nonce and timestamp. Deterministic.
    pub(crate) fn sign_at(
        request: &SignRequest<'_>,
        nonce: &str,
        timestamp: i64,
    ) -> Result<SignedParams, EtradeError> {
        let mut oauth_params: Vec<(String, String)> = vec![
            ("oauth_consumer_key".to_string(), request.consumer_key.to_string()),
            ("oauth_nonce".to_string(), nonce.to_string()),
            ("oauth_signature_method".to_string(), SIGNATURE_METHOD.to_string()),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
            ("oauth_version".to_string(), OAUTH_VERSION.to_string()),
        ];
        if let Some(token) = request.token {
            oauth_params.push(("oauth_token".to_string(), token.to_string()));
        }
        if let Some(callback) = request.callback {
            oauth_params.push(("oauth_callback".to_string(), callback.to_string()));
        }
        if let Some(verifier) = request.verifier {
            oauth_params.push(("oauth_verifier".to_string(), verifier.to_string()));
        }

        let base = base_string(request.method, request.url, &oauth_params, request.params);
        let key = signing_key(request.consumer_secret, request.token_secret.unwrap_or(""));
        let signature = hmac_sha1_base64(&key, &base)?;
        oauth_params.push(("oauth_signature".to_string(), signature));

        let authorization = auth_header(&oauth_params);
        Ok(SignedParams {
            authorization,
            oauth_params,
        })
    }
}

/// Percent-encode per RFC 3986: only ALPHA, DIGIT, `-`, `.`, `_`, `~`
/// pass through.
#[must_use]
pub fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Random hex-encoded nonce.
fn nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(NONCE_BYTES * 2);
    for byte in bytes {
        // Writing to a String cannot fail.
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Canonical signature base string: method, base URL, and the sorted union
/// of OAuth and request parameters. Repeated keys each appear separately.
fn base_string(
    method: &str,
    url: &str,
    oauth_params: &[(String, String)],
    request_params: &[(String, String)],
) -> String {
    let mut pairs: Vec<(String, String)> = oauth_params
        .iter()
        .chain(request_params.iter())
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    pairs.sort();

    let param_string = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(url),
        percent_encode(&param_string)
    )
}

/// Signing key. An absent token secret yields an empty second component,
/// not an omitted `&`.
fn signing_key(consumer_secret: &str, token_secret: &str) -> String {
    format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret)
    )
}

fn hmac_sha1_base64(key: &str, message: &str) -> Result<String, EtradeError> {
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| EtradeError::Signature(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// `OAuth` header value: sorted, comma-separated, each value quoted and
/// percent-encoded.
fn auth_header(oauth_params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = oauth_params.iter().collect();
    sorted.sort();
    let parts = sorted
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("OAuth {parts}")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// OAuth Core 1.0a appendix example (photos.example.net).
    fn known_vector() -> (SignRequest<'static>, &'static str, i64) {
        static PARAMS: std::sync::LazyLock<Vec<(String, String)>> = std::sync::LazyLock::new(|| {
            vec![
                ("file".to_string(), "vacation.jpg".to_string()),
                ("size".to_string(), "original".to_string()),
            ]
        });
        (
            SignRequest {
                method: "GET",
                url: "http://photos.example.net/photos",
                consumer_key: "dpf43f3p2l4k3l03",
                consumer_secret: "kd94hf93k423kf44",
                token: Some("nnch734d00sl2jdk"),
                token_secret: Some("pfkkdhi9sl3r4s00"),
                callback: None,
                verifier: None,
                params: &PARAMS,
            },
            "kllo9940pd9333jh",
            1_191_242_096,
        )
    }

    #[test]
    fn base_string_matches_known_vector() {
        let (request, nonce, timestamp) = known_vector();
        let oauth_params = vec![
            ("oauth_consumer_key".to_string(), request.consumer_key.to_string()),
            ("oauth_nonce".to_string(), nonce.to_string()),
            ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
            ("oauth_version".to_string(), "1.0".to_string()),
            ("oauth_token".to_string(), "nnch734d00sl2jdk".to_string()),
        ];
        let base = base_string(request.method, request.url, &oauth_params, request.params);
        assert_eq!(
            base,
            "GET&http%3A%2F%2Fphotos.example.net%2Fphotos&file%3Dvacation.jpg%26\
             oauth_consumer_key%3Ddpf43f3p2l4k3l03%26oauth_nonce%3Dkllo9940pd9333jh%26\
             oauth_signature_method%3DHMAC-SHA1%26oauth_timestamp%3D1191242096%26\
             oauth_token%3Dnnch734d00sl2jdk%26oauth_version%3D1.0%26size%3Doriginal"
        );
    }

    #[test]
    fn signature_matches_known_vector() {
        let (request, nonce, timestamp) = known_vector();
        let signed = SignatureEngine::sign_at(&request, nonce, timestamp).unwrap();
        let signature = signed
            .oauth_params
            .iter()
            .find(|(k, _)| k == "oauth_signature")
            .map(|(_, v)| v.as_str())
            .unwrap();
        assert_eq!(signature, "tR3+Ty81lMeYAr/Fid0kMTYa/WM=");
    }

    #[test]
    fn signing_is_deterministic() {
        let (request, nonce, timestamp) = known_vector();
        let first = SignatureEngine::sign_at(&request, nonce, timestamp).unwrap();
        let second = SignatureEngine::sign_at(&request, nonce, timestamp).unwrap();
        assert_eq!(first.authorization, second.authorization);
    }

    #[test]
    fn authorization_header_shape() {
        let (request, nonce, timestamp) = known_vector();
        let signed = SignatureEngine::sign_at(&request, nonce, timestamp).unwrap();
        assert!(signed.authorization.starts_with("OAuth "));
        assert!(signed.authorization.contains("oauth_consumer_key=\"dpf43f3p2l4k3l03\""));
        assert!(signed.authorization.contains("oauth_signature=\""));
        // Request params never leak into the header.
        assert!(!signed.authorization.contains("vacation.jpg"));
    }

    #[test]
    fn percent_encoding_is_rfc3986() {
        assert_eq!(percent_encode("a b"), "a%20b");
        assert_eq!(percent_encode("~-._"), "~-._");
        assert_eq!(percent_encode("a+b"), "a%2Bb");
        assert_eq!(percent_encode("caf\u{e9}"), "caf%C3%A9");
        assert_eq!(percent_encode("="), "%3D");
    }

    #[test]
    fn percent_encoding_round_trips() {
        for value in ["hello world", "a=b&c=d", "100%", "caf\u{e9} ~tilde~"] {
            let encoded = percent_encode(value);
            let decoded = urlencoding::decode(&encoded).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn repeated_keys_appear_separately() {
        let params = vec![
            ("symbol".to_string(), "AAPL".to_string()),
            ("symbol".to_string(), "MSFT".to_string()),
        ];
        let base = base_string("GET", "https://api.example.com/quote", &[], &params);
        assert!(base.contains("symbol%3DAAPL"));
        assert!(base.contains("symbol%3DMSFT"));
    }

    #[test]
    fn empty_token_secret_keeps_ampersand() {
        assert_eq!(signing_key("secret", ""), "secret&");
    }

    #[test]
    fn callback_and_verifier_are_signed() {
        let params: Vec<(String, String)> = Vec::new();
        let request = SignRequest {
            method: "POST",
            url: "https://apisb.etrade.com/oauth/request_token",
            consumer_key: "ck",
            consumer_secret: "cs",
            token: None,
            token_secret: None,
            callback: Some("oob"),
            verifier: None,
            params: &params,
        };
        let signed = SignatureEngine::sign_at(&request, "abc", 1).unwrap();
        assert!(signed.authorization.contains("oauth_callback=\"oob\""));
    }

    #[test]
    fn nonce_is_long_and_unique() {
        let first = nonce();
        let second = nonce();
        assert_eq!(first.len(), NONCE_BYTES * 2);
        assert_ne!(first, second);
    }
}
