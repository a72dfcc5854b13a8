//! Client SOAP/ONVIF avec négociation de l'authentification
//!
//! Un appel se déroule en au plus deux tentatives. Le mode d'authentification
//! du client ne fait que monter (`None` -> `WsSecurity` -> `Digest`) et la
//! montée est conservée pour tous les appels suivants.

use std::fmt;

use parking_lot::RwLock;
use tracing::{debug, warn};
use xmltree::{Element, EmitterConfig};

use crate::config::ClientConfig;
use crate::errors::{Result, SoapError};
use crate::soap::{
    self, Body, CONTENT_TYPE, Envelope, FaultKind, Header, Namespaces, Security,
};
use crate::transport::{HttpResponse, SoapTransport, UreqTransport};

/// Nombre maximal d'envois pour un appel (requête initiale + une relance)
const MAX_ATTEMPTS: usize = 2;

/// Stratégie d'authentification négociée
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthMode {
    #[default]
    None,
    /// En-tête WS-Security UsernameToken dans l'enveloppe
    WsSecurity,
    /// Authentification HTTP Digest portée par le transport
    Digest,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Les credentials ne comptent que si les deux champs sont renseignés
    pub fn is_configured(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Requête SOAP
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub url: String,
    /// Namespaces ajoutés à l'enveloppe
    pub namespaces: Namespaces,
    /// Contenu XML déjà sérialisé du corps
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(url: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            namespaces: Namespaces::new(),
            payload: payload.into(),
        }
    }

    /// Construit une requête dont le corps est un élément `xmltree`
    pub fn from_element(url: impl Into<String>, element: &Element) -> Result<Self> {
        let mut buf = Vec::new();
        let config = EmitterConfig::new().write_document_declaration(false);
        element
            .write_with_config(&mut buf, config)
            .map_err(|e| SoapError::Marshal(e.to_string()))?;
        Ok(Self::new(url, buf))
    }

    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespaces.insert(prefix.into(), uri.into());
        self
    }
}

/// Sens d'un message transmis au hook de diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    Request,
    Response,
}

pub type DumpHook = Box<dyn Fn(Exchange, &[u8]) + Send + Sync>;

/// État de négociation partagé : mode courant et transport installé
struct Negotiation {
    mode: AuthMode,
    transport: Box<dyn SoapTransport>,
}

/// Décision prise après une tentative
enum Outcome<'a> {
    Done(Envelope),
    Escalate(&'a Credentials, Escalation),
}

enum Escalation {
    Digest(HttpResponse),
    WsSecurity,
}

/// Client ONVIF
///
/// Partageable entre threads : les envois se font sous un verrou en lecture,
/// la montée du mode d'authentification sous le verrou en écriture. Appeler
/// [`Client::negotiate`] une fois avant de partager le client évite que
/// plusieurs appels concurrents négocient en même temps.
pub struct Client {
    credentials: Option<Credentials>,
    state: RwLock<Negotiation>,
    dump: Option<DumpHook>,
}

impl Client {
    pub fn new(transport: impl SoapTransport + 'static) -> Self {
        Self {
            credentials: None,
            state: RwLock::new(Negotiation {
                mode: AuthMode::None,
                transport: Box::new(transport),
            }),
            dump: None,
        }
    }

    /// Construit un client ureq à partir de la configuration
    pub fn from_config(config: &ClientConfig) -> Self {
        let mut client = Self::new(UreqTransport::new(config.timeout()));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            client = client.with_credentials(Credentials::new(username, password));
        }
        if config.debug {
            client.set_dump(Box::new(|exchange: Exchange, bytes: &[u8]| {
                debug!(?exchange, "{}", String::from_utf8_lossy(bytes));
            }));
        }
        client
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Installe un hook recevant les octets envoyés et reçus
    pub fn set_dump(&mut self, hook: DumpHook) {
        self.dump = Some(hook);
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.state.read().mode
    }

    /// Premier appel destiné à faire converger le mode d'authentification
    /// avant une utilisation concurrente du client.
    pub fn negotiate(&self, request: &Request) -> Result<Envelope> {
        let envelope = self.call(request)?;
        debug!(mode = ?self.auth_mode(), "Authentication mode negotiated");
        Ok(envelope)
    }

    /// Exécute une requête SOAP.
    ///
    /// Retourne l'enveloppe de réponse ; un Fault est retourné comme erreur.
    pub fn call(&self, request: &Request) -> Result<Envelope> {
        // Une montée n'est possible que si une tentative reste disponible :
        // la boucle se termine au plus tard après MAX_ATTEMPTS envois.
        let mut attempt = 1;
        loop {
            let mode = self.auth_mode();
            let can_retry = attempt < MAX_ATTEMPTS;

            match self.attempt(request, mode, can_retry)? {
                Outcome::Done(envelope) => return Ok(envelope),
                Outcome::Escalate(credentials, escalation) => {
                    self.escalate(mode, credentials, escalation)?
                }
            }
            attempt += 1;
        }
    }

    fn attempt(&self, request: &Request, mode: AuthMode, can_retry: bool) -> Result<Outcome<'_>> {
        let credentials = self.configured_credentials();

        let header = match (mode, credentials) {
            (AuthMode::WsSecurity, Some(creds)) => Some(Header::with_security(Security::new(
                &creds.username,
                &creds.password,
            )?)),
            _ => None,
        };

        let envelope = Envelope {
            namespaces: request.namespaces.clone(),
            header,
            body: Body::with_payload(request.payload.clone()),
        };
        let bytes = soap::encode_envelope(&envelope)?;

        let response = self.send(&request.url, &bytes)?;

        if response.is_unauthorized() {
            if let (true, Some(creds)) = (can_retry && mode != AuthMode::Digest, credentials) {
                return Ok(Outcome::Escalate(creds, Escalation::Digest(response)));
            }
            warn!(url = %request.url, ?mode, "HTTP 401, no further escalation");
            return Err(SoapError::unauthorized_http(response.status, &response.reason));
        }

        let envelope = soap::parse_envelope(&response.body)?;

        if let Some(fault) = &envelope.body.fault {
            if fault.classify() == FaultKind::Unauthorized {
                if let (true, Some(creds)) = (can_retry && mode == AuthMode::None, credentials) {
                    return Ok(Outcome::Escalate(creds, Escalation::WsSecurity));
                }
                warn!(url = %request.url, ?mode, "SOAP fault NotAuthorized, no further escalation");
                return Err(SoapError::unauthorized_fault(fault.clone()));
            }
            return Err(SoapError::Fault(Box::new(fault.clone())));
        }

        Ok(Outcome::Done(envelope))
    }

    fn send(&self, url: &str, bytes: &[u8]) -> Result<HttpResponse> {
        if let Some(dump) = &self.dump {
            dump(Exchange::Request, bytes);
        }

        let response = self.state.read().transport.post(url, CONTENT_TYPE, bytes)?;

        if let Some(dump) = &self.dump {
            dump(Exchange::Response, &response.body);
        }
        Ok(response)
    }

    /// Monte le mode d'authentification.
    ///
    /// Si un autre appel a déjà monté le mode depuis `observed`, rien n'est
    /// réinstallé et la relance utilise simplement le nouveau mode.
    fn escalate(
        &self,
        observed: AuthMode,
        credentials: &Credentials,
        escalation: Escalation,
    ) -> Result<()> {
        let mut state = self.state.write();
        if state.mode != observed {
            debug!(from = ?observed, to = ?state.mode, "Authentication mode already escalated");
            return Ok(());
        }

        match escalation {
            Escalation::Digest(challenge) => {
                state.transport.install_digest(credentials, &challenge)?;
                state.mode = AuthMode::Digest;
            }
            Escalation::WsSecurity => state.mode = AuthMode::WsSecurity,
        }
        debug!(from = ?observed, to = ?state.mode, "Authentication mode escalated");
        Ok(())
    }

    fn configured_credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref().filter(|c| c.is_configured())
    }
}
