//! Authentification HTTP Digest (RFC 2617) pour le transport ureq
//!
//! Le wrapper est créé à partir du challenge `WWW-Authenticate` d'une
//! réponse 401 puis conservé : chaque requête suivante porte un en-tête
//! `Authorization: Digest ...` avec un compteur de nonce croissant.

use std::sync::atomic::{AtomicU32, Ordering};

use md5::{Digest, Md5};
use parking_lot::RwLock;
use rand::RngCore;
use url::Url;

use crate::client::Credentials;
use crate::errors::{Result, SoapError};

/// Challenge Digest extrait d'un en-tête `WWW-Authenticate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
    /// Vrai si le serveur propose `qop=auth`
    pub qop_auth: bool,
    pub stale: bool,
}

impl DigestChallenge {
    /// Parse la valeur d'un en-tête `WWW-Authenticate: Digest ...`
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let params = match header.split_once(char::is_whitespace) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("digest") => rest,
            _ => {
                return Err(SoapError::Digest(format!(
                    "not a Digest challenge: {}",
                    header
                )));
            }
        };

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = None;
        let mut qop_auth = false;
        let mut stale = false;

        for (key, value) in split_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = Some(value),
                "qop" => qop_auth = value.split(',').any(|q| q.trim() == "auth"),
                "stale" => stale = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        if let Some(alg) = &algorithm {
            if !alg.eq_ignore_ascii_case("MD5") {
                return Err(SoapError::Digest(format!("unsupported algorithm {}", alg)));
            }
        }

        Ok(Self {
            realm: realm.ok_or_else(|| SoapError::Digest("missing realm".to_string()))?,
            nonce: nonce.ok_or_else(|| SoapError::Digest("missing nonce".to_string()))?,
            opaque,
            algorithm,
            qop_auth,
            stale,
        })
    }
}

/// Découpe `k1="v1", k2=v2` en paires clé/valeur, en respectant les guillemets
fn split_params(params: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = params.trim();

    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_string();
        let after = after.trim_start();

        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (quoted[..end].to_string(), &quoted[end + 1..]),
                None => (quoted.to_string(), ""),
            }
        } else {
            match after.find(',') {
                Some(end) => (after[..end].trim().to_string(), &after[end..]),
                None => (after.trim().to_string(), ""),
            }
        };

        pairs.push((key, value));
        rest = remaining.trim_start().trim_start_matches(',').trim_start();
    }

    pairs
}

/// État Digest persistant d'un transport
#[derive(Debug)]
pub struct DigestAuth {
    credentials: Credentials,
    challenge: RwLock<DigestChallenge>,
    nonce_count: AtomicU32,
}

impl DigestAuth {
    pub fn new(credentials: Credentials, challenge: DigestChallenge) -> Self {
        Self {
            credentials,
            challenge: RwLock::new(challenge),
            nonce_count: AtomicU32::new(0),
        }
    }

    /// Remplace le challenge (nonce expiré) et remet le compteur à zéro
    pub fn refresh(&self, challenge: DigestChallenge) {
        *self.challenge.write() = challenge;
        self.nonce_count.store(0, Ordering::SeqCst);
    }

    /// Construit la valeur de l'en-tête `Authorization` pour un POST vers `url`
    pub fn authorization(&self, method: &str, url: &str) -> Result<String> {
        let uri = request_uri(url)?;
        let nc = self.nonce_count.fetch_add(1, Ordering::SeqCst) + 1;

        let mut cnonce_bytes = [0u8; 8];
        rand::rng().fill_bytes(&mut cnonce_bytes);
        let cnonce = hex::encode(cnonce_bytes);

        let challenge = self.challenge.read();
        Ok(authorization_header(
            &self.credentials,
            &challenge,
            method,
            &uri,
            nc,
            &cnonce,
        ))
    }
}

/// Chemin et query de l'URL, tels qu'attendus dans le champ `uri`
fn request_uri(url: &str) -> Result<String> {
    let parsed = Url::parse(url)?;
    Ok(match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    })
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub(crate) fn authorization_header(
    credentials: &Credentials,
    challenge: &DigestChallenge,
    method: &str,
    uri: &str,
    nc: u32,
    cnonce: &str,
) -> String {
    let ha1 = md5_hex(&format!(
        "{}:{}:{}",
        credentials.username, challenge.realm, credentials.password
    ));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
        credentials.username, challenge.realm, challenge.nonce, uri
    );

    if challenge.qop_auth {
        let nc = format!("{:08x}", nc);
        let response = md5_hex(&format!(
            "{}:{}:{}:{}:auth:{}",
            ha1, challenge.nonce, nc, cnonce, ha2
        ));
        header.push_str(&format!(
            ", qop=auth, nc={}, cnonce=\"{}\", response=\"{}\"",
            nc, cnonce, response
        ));
    } else {
        let response = md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2));
        header.push_str(&format!(", response=\"{}\"", response));
    }

    if let Some(algorithm) = &challenge.algorithm {
        header.push_str(&format!(", algorithm={}", algorithm));
    }
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(", opaque=\"{}\"", opaque));
    }

    header
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mufasa() -> Credentials {
        Credentials::new("Mufasa", "Circle Of Life")
    }

    #[test]
    fn test_parse_challenge() {
        let challenge = DigestChallenge::parse(
            r#"Digest realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
        )
        .unwrap();

        assert_eq!(challenge.realm, "testrealm@host.com");
        assert_eq!(challenge.nonce, "dcd98b7102dd2f0e8b11d0f600bfb0c093");
        assert_eq!(
            challenge.opaque.as_deref(),
            Some("5ccc069c403ebaf9f0171e9517f40e41")
        );
        assert!(challenge.qop_auth);
        assert!(!challenge.stale);
    }

    #[test]
    fn test_parse_rejects_basic() {
        assert!(DigestChallenge::parse(r#"Basic realm="cam""#).is_err());
        assert!(DigestChallenge::parse(r#"Digest realm="cam""#).is_err());
        assert!(DigestChallenge::parse(r#"Digest realm="cam", nonce="n", algorithm=SHA-256"#).is_err());
    }

    #[test]
    fn test_parse_unquoted_and_stale() {
        let challenge =
            DigestChallenge::parse(r#"Digest realm="cam", nonce="abc", algorithm=MD5, stale=TRUE"#)
                .unwrap();
        assert_eq!(challenge.algorithm.as_deref(), Some("MD5"));
        assert!(challenge.stale);
        assert!(!challenge.qop_auth);
    }

    #[test]
    fn test_rfc2617_response() {
        let challenge = DigestChallenge::parse(
            r#"Digest realm="testrealm@host.com", qop="auth", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093""#,
        )
        .unwrap();

        let header = authorization_header(
            &mufasa(),
            &challenge,
            "GET",
            "/dir/index.html",
            1,
            "0a4f113b",
        );
        assert!(header.contains("nc=00000001"));
        assert!(header.contains("response=\"6629fae49393a05397450978507c4ef1\""));
    }

    #[test]
    fn test_response_without_qop() {
        let challenge = DigestChallenge::parse(r#"Digest realm="cam", nonce="abc""#).unwrap();
        let header = authorization_header(
            &Credentials::new("admin", "12345"),
            &challenge,
            "POST",
            "/onvif/device_service",
            1,
            "unused",
        );
        assert!(header.contains("response=\"afe6839c48f0dcb64f0224bb8cfbde35\""));
        assert!(!header.contains("qop"));
    }

    #[test]
    fn test_nonce_count_increments() {
        let challenge =
            DigestChallenge::parse(r#"Digest realm="cam", qop="auth", nonce="abc""#).unwrap();
        let auth = DigestAuth::new(Credentials::new("admin", "12345"), challenge.clone());

        let first = auth.authorization("POST", "http://cam/onvif/device_service").unwrap();
        let second = auth.authorization("POST", "http://cam/onvif/device_service").unwrap();
        assert!(first.contains("nc=00000001"));
        assert!(second.contains("nc=00000002"));
        assert!(first.contains("uri=\"/onvif/device_service\""));

        auth.refresh(challenge);
        let third = auth.authorization("POST", "http://cam/onvif/device_service?x=1").unwrap();
        assert!(third.contains("nc=00000001"));
        assert!(third.contains("uri=\"/onvif/device_service?x=1\""));
    }
}
