//! En-tête WS-Security UsernameToken (profil PasswordDigest)

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha1::{Digest, Sha1};

use crate::errors::{Result, SoapError};

/// Identifiant du type de mot de passe (digest salé)
pub const TYPE_PASSWORD_DIGEST: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest";

/// Identifiant de l'encodage du nonce
pub const TYPE_NONCE_BASE64: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";

/// Format de l'horodatage `wsu:Created` (UTC, à la seconde)
pub const CREATED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const NONCE_LEN: usize = 16;

/// En-tête WS-Security
///
/// Ne doit jamais être mis en cache : chaque requête en construit un nouveau.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Security {
    pub username_token: UsernameToken,
}

/// Jeton UsernameToken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsernameToken {
    pub username: String,

    /// base64(SHA-1(nonce ‖ created ‖ password))
    pub password_digest: String,

    /// Nonce encodé en base64
    pub nonce: String,

    pub created: String,
}

impl Security {
    /// Construit un en-tête avec un nonce frais et l'heure courante.
    ///
    /// Échoue uniquement si la source d'aléa du système est indisponible.
    pub fn new(username: &str, password: &str) -> Result<Self> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| SoapError::Security(format!("could not generate nonce: {}", e)))?;

        let created = Utc::now().format(CREATED_FORMAT).to_string();

        Ok(Self {
            username_token: UsernameToken::with_nonce(username, password, &nonce, &created),
        })
    }
}

impl UsernameToken {
    /// Construit un jeton à partir d'un nonce et d'un horodatage donnés
    pub fn with_nonce(username: &str, password: &str, nonce: &[u8], created: &str) -> Self {
        Self {
            username: username.to_string(),
            password_digest: password_digest(nonce, created, password),
            nonce: BASE64.encode(nonce),
            created: created.to_string(),
        }
    }
}

/// Calcule le digest PasswordDigest en une seule passe SHA-1
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    BASE64.encode(hasher.finalize())
}
