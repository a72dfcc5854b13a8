//! Structures de l'enveloppe SOAP

use std::collections::BTreeMap;

use quick_xml::escape::escape;
use xmltree::{Element, XMLNode};

use super::{Fault, Security};
use crate::errors::{Result, SoapError};

/// Table des namespaces XML de la forme `xmlns:<préfixe>` -> `<url>`
///
/// Exemple : `{"tds": "http://www.onvif.org/ver10/device/wsdl"}`
pub type Namespaces = BTreeMap<String, String>;

/// Enveloppe SOAP complète
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    /// Namespaces déclarés sur l'élément racine
    pub namespaces: Namespaces,

    /// En-tête SOAP optionnel
    pub header: Option<Header>,

    /// Corps SOAP, toujours présent après un décodage réussi
    pub body: Body,
}

/// En-tête SOAP
#[derive(Debug, Clone, Default)]
pub struct Header {
    /// Bloc WS-Security à émettre
    pub security: Option<Security>,

    /// Contenu XML brut d'un en-tête reçu (vide pour un en-tête construit localement)
    pub raw: Vec<u8>,
}

/// Corps SOAP
#[derive(Debug, Clone, Default)]
pub struct Body {
    /// Fault présent en premier enfant du corps
    pub fault: Option<Fault>,

    /// Contenu XML brut du corps, non interprété
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Crée une nouvelle enveloppe SOAP
    pub fn new(body: Body) -> Self {
        Self {
            namespaces: Namespaces::new(),
            header: None,
            body,
        }
    }

    /// Crée une nouvelle enveloppe avec header
    pub fn with_header(header: Header, body: Body) -> Self {
        Self {
            namespaces: Namespaces::new(),
            header: Some(header),
            body,
        }
    }

    /// Parse le contenu du corps en arbre `xmltree`.
    ///
    /// Les préfixes déclarés sur l'enveloppe restent résolubles dans
    /// l'élément retourné.
    pub fn body_element(&self) -> Result<Element> {
        let payload = self.body.payload()?;

        let mut wrapped = String::from("<Body");
        for (prefix, uri) in &self.namespaces {
            wrapped.push_str(&format!(" xmlns:{}=\"{}\"", prefix, escape(uri.as_str())));
        }
        wrapped.push('>');
        wrapped.push_str(
            std::str::from_utf8(payload).map_err(|e| SoapError::Unmarshal(e.to_string()))?,
        );
        wrapped.push_str("</Body>");

        let root = Element::parse(wrapped.as_bytes())
            .map_err(|e| SoapError::Unmarshal(e.to_string()))?;

        root.children
            .into_iter()
            .find_map(|node| match node {
                XMLNode::Element(elem) => Some(elem),
                _ => None,
            })
            .ok_or(SoapError::NoResponse)
    }
}

impl Header {
    pub fn with_security(security: Security) -> Self {
        Self {
            security: Some(security),
            raw: Vec::new(),
        }
    }
}

impl Body {
    pub fn with_payload(payload: Vec<u8>) -> Self {
        Self {
            fault: None,
            payload,
        }
    }

    pub fn with_fault(fault: Fault) -> Self {
        Self {
            fault: Some(fault),
            payload: Vec::new(),
        }
    }

    /// Retourne le contenu brut du corps, ou `NoResponse` s'il est vide
    pub fn payload(&self) -> Result<&[u8]> {
        if self.payload.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(SoapError::NoResponse);
        }
        Ok(&self.payload)
    }
}
