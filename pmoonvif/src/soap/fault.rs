//! SOAP Faults et détection des refus d'autorisation ONVIF

use std::fmt;

use super::{NAMESPACE_ENVELOPE, NAMESPACE_ONVIF_ERROR, Namespaces};

/// Texte de raison renvoyé par les caméras pour un refus d'autorisation
const REASON_NOT_AUTHORIZED: &str = "sender not authorized";

/// Erreur SOAP (Fault)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fault {
    /// Namespaces de l'enveloppe, copiés après décodage
    pub namespaces: Namespaces,

    /// Code d'erreur (ex: "s:Sender")
    pub code: String,

    /// Sous-code (ex: "ter:NotAuthorized")
    pub subcode: String,

    /// Description de l'erreur
    pub reason: String,

    pub node: String,
    pub role: String,

    /// Contenu XML brut de l'élément Detail
    pub detail: Vec<u8>,
}

/// Résultat de la classification d'un Fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Unauthorized,
    Other,
}

impl Fault {
    /// Vérifie si le Fault signale une erreur d'autorisation.
    ///
    /// Le préfixe de chaque QName est résolu dans la table de namespaces du
    /// message ; un préfixe absent ou non déclaré donne `false`.
    pub fn is_unauthorized(&self) -> bool {
        self.qname_is(&self.code, NAMESPACE_ENVELOPE, "Sender")
            && self.qname_is(&self.subcode, NAMESPACE_ONVIF_ERROR, "NotAuthorized")
    }

    /// Vérifie si la raison textuelle est "Sender not authorized" (sans tenir compte de la casse)
    pub fn has_unauthorized_reason(&self) -> bool {
        self.reason.trim().eq_ignore_ascii_case(REASON_NOT_AUTHORIZED)
    }

    /// Classe le Fault.
    ///
    /// La règle structurelle (Code/Subcode) fait foi dès que les deux
    /// namespaces sont déclarés. La raison textuelle n'est consultée que
    /// lorsque la règle structurelle ne peut pas être évaluée.
    pub fn classify(&self) -> FaultKind {
        let unauthorized = if self.declares_fault_namespaces() {
            self.is_unauthorized()
        } else {
            self.has_unauthorized_reason()
        };

        if unauthorized {
            FaultKind::Unauthorized
        } else {
            FaultKind::Other
        }
    }

    /// Vrai si `qname` est `<prefixe>:<local>` avec un préfixe lié à `uri`
    fn qname_is(&self, qname: &str, uri: &str, local: &str) -> bool {
        match qname.trim().split_once(':') {
            Some((prefix, name)) => {
                name == local && self.namespaces.get(prefix).is_some_and(|ns| ns == uri)
            }
            None => false,
        }
    }

    /// Les deux namespaces nécessaires à la règle structurelle sont déclarés
    fn declares_fault_namespaces(&self) -> bool {
        let declared = |uri: &str| self.namespaces.values().any(|ns| ns == uri);
        declared(NAMESPACE_ENVELOPE) && declared(NAMESPACE_ONVIF_ERROR)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codes: Vec<&str> = [self.code.as_str(), self.subcode.as_str()]
            .into_iter()
            .filter(|c| !c.is_empty())
            .collect();

        if codes.is_empty() {
            write!(f, "SOAP fault: {}", self.reason)
        } else {
            write!(f, "SOAP fault ({}): {}", codes.join(", "), self.reason)
        }
    }
}

impl std::error::Error for Fault {}
