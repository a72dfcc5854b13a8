//! Erreurs du client SOAP/ONVIF

use std::fmt;

use thiserror::Error;

use crate::soap::Fault;

/// Type Result personnalisé pour pmoonvif
pub type Result<T> = std::result::Result<T, SoapError>;

/// Origine d'un refus d'autorisation
#[derive(Debug, Clone)]
pub enum UnauthorizedCause {
    /// Le serveur a répondu HTTP 401
    Http { status: u16, reason: String },
    /// Le serveur a répondu par un Fault classé "not authorized"
    Fault(Box<Fault>),
}

impl fmt::Display for UnauthorizedCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnauthorizedCause::Http { status, reason } => write!(f, "HTTP {} {}", status, reason),
            UnauthorizedCause::Fault(fault) => write!(f, "{}", fault),
        }
    }
}

#[derive(Error, Debug)]
pub enum SoapError {
    /// Erreur réseau remontée par un transport quelconque
    #[error("Transport error: {0}")]
    Transport(String),

    /// Erreur HTTP du transport ureq
    #[error("HTTP error: {0}")]
    Http(#[from] ureq::Error),

    #[error("Could not marshal envelope: {0}")]
    Marshal(String),

    #[error("Could not unmarshal body: {0}")]
    Unmarshal(String),

    /// Flux XML mal formé
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Unexpected element: {0}")]
    UnexpectedElement(String),

    #[error("Unexpected token: {0}")]
    UnexpectedToken(String),

    #[error("Missing SOAP Body")]
    MissingBody,

    #[error("Server did not return a response")]
    NoResponse,

    #[error("Unauthorized: {0}")]
    Unauthorized(UnauthorizedCause),

    #[error("{0}")]
    Fault(Box<Fault>),

    /// Impossible de générer le nonce WS-Security
    #[error("Could not create security header: {0}")]
    Security(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Digest authentication error: {0}")]
    Digest(String),
}

impl SoapError {
    pub fn unauthorized_http(status: u16, reason: &str) -> Self {
        SoapError::Unauthorized(UnauthorizedCause::Http {
            status,
            reason: reason.to_string(),
        })
    }

    pub fn unauthorized_fault(fault: Fault) -> Self {
        SoapError::Unauthorized(UnauthorizedCause::Fault(Box::new(fault)))
    }

    pub fn unexpected_token(token: impl fmt::Debug) -> Self {
        SoapError::UnexpectedToken(format!("{:?}", token))
    }

    /// Vérifie si l'erreur est un refus d'autorisation (401 ou Fault)
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SoapError::Unauthorized(_))
    }

    /// Retourne le Fault porté par l'erreur, s'il y en a un
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            SoapError::Fault(fault) => Some(fault),
            SoapError::Unauthorized(UnauthorizedCause::Fault(fault)) => Some(fault),
            _ => None,
        }
    }
}
