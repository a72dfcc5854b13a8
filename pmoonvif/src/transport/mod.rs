//! Transport HTTP des enveloppes SOAP
//!
//! Le client ne dépend que du trait [`SoapTransport`] : un POST, plus la
//! possibilité d'installer une authentification Digest persistante.
//! [`UreqTransport`] en est l'implémentation bloquante par défaut.

pub mod digest;

use std::time::Duration;

use tracing::debug;
use ureq::Agent;

use crate::client::Credentials;
use crate::errors::{Result, SoapError};
use digest::{DigestAuth, DigestChallenge};

pub const STATUS_UNAUTHORIZED: u16 = 401;

/// Réponse HTTP entièrement lue en mémoire
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    /// Challenge `WWW-Authenticate` retenu : le challenge Digest s'il y en a
    /// un, sinon le premier en-tête reçu
    pub www_authenticate: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_unauthorized(&self) -> bool {
        self.status == STATUS_UNAUTHORIZED
    }

    /// Challenge Digest d'un 401 signalant un nonce expiré.
    ///
    /// Un challenge absent, d'un autre schéma ou incomplet n'est pas un
    /// nonce expiré : la réponse 401 est alors rendue telle quelle.
    fn stale_challenge(&self) -> Option<DigestChallenge> {
        if !self.is_unauthorized() {
            return None;
        }
        let challenge = DigestChallenge::parse(self.www_authenticate.as_deref()?).ok()?;
        challenge.stale.then_some(challenge)
    }
}

/// Choisit le challenge Digest parmi plusieurs en-têtes `WWW-Authenticate`
fn select_challenge<'a>(values: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let values: Vec<&str> = values.into_iter().collect();
    values
        .iter()
        .find(|v| {
            v.trim_start()
                .get(..6)
                .is_some_and(|scheme| scheme.eq_ignore_ascii_case("digest"))
        })
        .or(values.first())
        .map(|v| v.to_string())
}

/// Capacité de transport requise par le client
pub trait SoapTransport: Send + Sync {
    /// Envoie `body` en POST vers `url`
    fn post(&self, url: &str, content_type: &str, body: &[u8]) -> Result<HttpResponse>;

    /// Installe l'authentification Digest à partir du challenge d'une réponse 401.
    ///
    /// L'authentification reste active pour toutes les requêtes suivantes.
    fn install_digest(&mut self, credentials: &Credentials, challenge: &HttpResponse)
    -> Result<()>;
}

/// Transport bloquant basé sur ureq
pub struct UreqTransport {
    agent: Agent,
    digest: Option<DigestAuth>,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        // Les 4xx/5xx ne doivent pas être des erreurs : un SOAP Fault arrive
        // souvent avec un statut 500 et son corps doit rester lisible.
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build();

        Self {
            agent: config.into(),
            digest: None,
        }
    }

    pub fn has_digest(&self) -> bool {
        self.digest.is_some()
    }

    fn send(&self, url: &str, content_type: &str, body: &[u8]) -> Result<HttpResponse> {
        let mut request = self.agent.post(url).header("Content-Type", content_type);
        if let Some(digest) = &self.digest {
            request = request.header("Authorization", digest.authorization("POST", url)?);
        }

        let mut response = request.send(body)?;

        let status = response.status();
        let www_authenticate = select_challenge(
            response
                .headers()
                .get_all("WWW-Authenticate")
                .iter()
                .filter_map(|v| v.to_str().ok()),
        );
        let body = response.body_mut().read_to_vec()?;

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            www_authenticate,
            body,
        })
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(crate::DEFAULT_HTTP_TIMEOUT)
    }
}

impl SoapTransport for UreqTransport {
    fn post(&self, url: &str, content_type: &str, body: &[u8]) -> Result<HttpResponse> {
        let response = self.send(url, content_type, body)?;

        // Nonce expiré : on rafraîchit le challenge et on renvoie une fois
        if let (Some(digest), Some(challenge)) = (&self.digest, response.stale_challenge()) {
            debug!(url = %url, "Digest nonce is stale, retrying with fresh challenge");
            digest.refresh(challenge);
            return self.send(url, content_type, body);
        }

        Ok(response)
    }

    fn install_digest(
        &mut self,
        credentials: &Credentials,
        challenge: &HttpResponse,
    ) -> Result<()> {
        let header = challenge.www_authenticate.as_deref().ok_or_else(|| {
            SoapError::Digest("401 response without WWW-Authenticate header".to_string())
        })?;

        let challenge = DigestChallenge::parse(header)?;
        self.digest = Some(DigestAuth::new(credentials.clone(), challenge));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_digest_requires_challenge() {
        let mut transport = UreqTransport::default();
        let credentials = Credentials::new("admin", "12345");

        let no_header = HttpResponse {
            status: 401,
            ..Default::default()
        };
        assert!(matches!(
            transport.install_digest(&credentials, &no_header),
            Err(SoapError::Digest(_))
        ));
        assert!(!transport.has_digest());

        let with_header = HttpResponse {
            status: 401,
            www_authenticate: Some(r#"Digest realm="cam", qop="auth", nonce="abc""#.to_string()),
            ..Default::default()
        };
        transport.install_digest(&credentials, &with_header).unwrap();
        assert!(transport.has_digest());
    }

    fn unauthorized(challenge: &str) -> HttpResponse {
        HttpResponse {
            status: 401,
            www_authenticate: Some(challenge.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_stale_challenge() {
        let stale = unauthorized(r#"Digest realm="cam", nonce="def", qop="auth", stale=true"#);
        assert_eq!(stale.stale_challenge().unwrap().nonce, "def");

        let fresh = unauthorized(r#"Digest realm="cam", nonce="def", qop="auth""#);
        assert!(fresh.stale_challenge().is_none());

        // Une réponse 401 hors Digest est rendue au client, pas transformée en erreur
        assert!(unauthorized(r#"Basic realm="cam""#).stale_challenge().is_none());
        assert!(unauthorized(r#"Digest stale=true"#).stale_challenge().is_none());

        let ok = HttpResponse {
            status: 200,
            ..stale.clone()
        };
        assert!(ok.stale_challenge().is_none());
    }

    #[test]
    fn test_select_challenge_prefers_digest() {
        let selected = select_challenge([
            r#"Basic realm="cam""#,
            r#"Digest realm="cam", nonce="abc""#,
        ]);
        assert_eq!(selected.as_deref(), Some(r#"Digest realm="cam", nonce="abc""#));

        let selected = select_challenge([r#"Basic realm="cam""#]);
        assert_eq!(selected.as_deref(), Some(r#"Basic realm="cam""#));

        assert!(select_challenge(std::iter::empty()).is_none());
    }
}
