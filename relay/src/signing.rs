//! Request authentication for outbound agent invocations.
//!
//! A [`RequestSigner`] receives a fully built request (method, URL, headers,
//! body) and adds whatever credentials the endpoint expects. The AWS
//! Signature Version 4 implementation signs every header present on the
//! request plus `host` and `x-amz-date`.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::errors::{RelayError, Result};

type HmacSha256 = Hmac<Sha256>;

const SIGV4_ALGORITHM: &str = "AWS4-HMAC-SHA256";

#[derive(Debug, Clone)]
pub struct SignableRequest {
    pub method: String,
    pub url: Url,
    /// Header names are kept lowercase.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl SignableRequest {
    pub fn new(method: impl Into<String>, url: Url, body: Vec<u8>) -> Self {
        Self {
            method: method.into(),
            url,
            headers: BTreeMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

pub trait RequestSigner: Send + Sync {
    fn sign(&self, request: &mut SignableRequest, now: DateTime<Utc>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Unsigned;

impl RequestSigner for Unsigned {
    fn sign(&self, _request: &mut SignableRequest, _now: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct BearerSigner {
    token: String,
}

impl BearerSigner {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl RequestSigner for BearerSigner {
    fn sign(&self, request: &mut SignableRequest, _now: DateTime<Utc>) -> Result<()> {
        request.set_header("authorization", format!("Bearer {}", self.token));
        Ok(())
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SigV4Signer {
    credentials: Credentials,
    region: String,
    service: String,
}

impl SigV4Signer {
    pub fn new(
        credentials: Credentials,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            region: region.into(),
            service: service.into(),
        }
    }

    fn scope(&self, date: &str) -> String {
        format!("{date}/{}/{}/aws4_request", self.region, self.service)
    }

    fn signing_key(&self, date: &str) -> Result<Vec<u8>> {
        let secret = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac_sha256(secret.as_bytes(), date.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.service.as_bytes())?;
        hmac_sha256(&k_service, b"aws4_request")
    }
}

impl RequestSigner for SigV4Signer {
    fn sign(&self, request: &mut SignableRequest, now: DateTime<Utc>) -> Result<()> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let host = match (request.url.host_str(), request.url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(RelayError::InvalidRequest(format!(
                    "cannot sign request without host: {}",
                    request.url
                )))
            }
        };
        request.set_header("host", host);
        request.set_header("x-amz-date", amz_date.clone());
        if let Some(token) = &self.credentials.session_token {
            request.set_header("x-amz-security-token", token.clone());
        }
        request.headers.remove("authorization");

        let (canonical, signed_headers) = canonical_request(request);
        let string_to_sign = format!(
            "{SIGV4_ALGORITHM}\n{amz_date}\n{}\n{}",
            self.scope(&date),
            sha256_hex(canonical.as_bytes())
        );
        let signature = hex::encode(hmac_sha256(
            &self.signing_key(&date)?,
            string_to_sign.as_bytes(),
        )?);

        request.set_header(
            "authorization",
            format!(
                "{SIGV4_ALGORITHM} Credential={}/{}, SignedHeaders={signed_headers}, Signature={signature}",
                self.credentials.access_key_id,
                self.scope(&date)
            ),
        );
        Ok(())
    }
}

fn canonical_request(request: &SignableRequest) -> (String, String) {
    let path = request.url.path();
    let canonical_uri = if path.is_empty() {
        "/".to_string()
    } else {
        uri_encode(path, false)
    };

    let mut query: Vec<(String, String)> = request
        .url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k, true), uri_encode(&v, true)))
        .collect();
    query.sort();
    let canonical_query = query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut canonical_headers = String::new();
    for (name, value) in &request.headers {
        let _ = writeln!(canonical_headers, "{name}:{}", collapse_whitespace(value));
    }
    let signed_headers = request
        .headers
        .keys()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(";");

    let canonical = format!(
        "{}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{}",
        request.method.to_ascii_uppercase(),
        sha256_hex(&request.body)
    );
    (canonical, signed_headers)
}

fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            other => {
                let _ = write!(out, "%{other:02X}");
            }
        }
    }
    out
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| RelayError::InvalidRequest(format!("invalid signing key: {err}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
