//! # Module SOAP - enveloppes SOAP 1.2 pour ONVIF
//!
//! Ce module implémente la couche SOAP utilisée par le client ONVIF.
//!
//! ## Fonctionnalités
//!
//! - ✅ Sérialisation d'enveloppes (namespaces déclarés sur la racine)
//! - ✅ Parsing d'enveloppes avec résolution dynamique des préfixes
//! - ✅ En-tête WS-Security UsernameToken (PasswordDigest)
//! - ✅ Classification des SOAP Faults "NotAuthorized"
//!
//! ## Architecture
//!
//! - [`Envelope`] : Enveloppe SOAP complète
//! - [`Security`] : En-tête WS-Security, reconstruit à chaque requête
//! - [`Fault`] : Erreur SOAP avec sa table de namespaces
//!
//! ## Example
//!
//! ```
//! use pmoonvif::soap::{Body, Envelope, encode_envelope, parse_envelope};
//!
//! let mut envelope = Envelope::new(Body::with_payload(b"<tds:GetServices/>".to_vec()));
//! envelope.namespaces.insert(
//!     "tds".to_string(),
//!     "http://www.onvif.org/ver10/device/wsdl".to_string(),
//! );
//!
//! let xml = encode_envelope(&envelope).unwrap();
//! let decoded = parse_envelope(&xml).unwrap();
//! assert_eq!(decoded.body.payload, b"<tds:GetServices/>");
//! ```

mod builder;
mod envelope;
mod fault;
mod parser;
mod security;

pub use builder::encode_envelope;
pub use envelope::{Body, Envelope, Header, Namespaces};
pub use fault::{Fault, FaultKind};
pub use parser::parse_envelope;
pub use security::{Security, UsernameToken, password_digest};

/// Namespace de l'enveloppe SOAP 1.2
pub const NAMESPACE_ENVELOPE: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Namespaces WS-Security
pub const NAMESPACE_WSSE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const NAMESPACE_WSU: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";

/// Namespace des erreurs ONVIF (ter:NotAuthorized, ...)
pub const NAMESPACE_ONVIF_ERROR: &str = "http://www.onvif.org/ver10/error";

/// Type MIME des requêtes SOAP 1.2
pub const CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Préfixe utilisé pour l'enveloppe à l'émission
pub(crate) const ENVELOPE_PREFIX: &str = "env";
