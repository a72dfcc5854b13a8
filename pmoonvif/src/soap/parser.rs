//! Parser d'enveloppes SOAP
//!
//! Les préfixes ne sont pas fixes : chaque message déclare les siens sur
//! l'élément racine, la table est donc reconstruite à chaque décodage.

use quick_xml::Reader;
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::PrefixDeclaration;

use super::{Body, Envelope, Fault, Header, Namespaces};
use crate::errors::{Result, SoapError};

/// Parse une enveloppe SOAP complète.
///
/// L'en-tête est optionnel, le corps est obligatoire. Si le premier enfant
/// du corps est un Fault, il est décodé et reçoit la table des namespaces.
pub fn parse_envelope(xml: &[u8]) -> Result<Envelope> {
    let mut reader = Reader::from_reader(xml);

    let root = loop {
        match reader.read_event()? {
            Event::Start(e) => break e,
            Event::Empty(e) => {
                check_envelope_name(&e)?;
                return Err(SoapError::MissingBody);
            }
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => continue,
            Event::Text(t) if is_blank(&t) => continue,
            Event::Eof => return Err(SoapError::MissingBody),
            other => return Err(SoapError::unexpected_token(other)),
        }
    };
    check_envelope_name(&root)?;

    let mut envelope = Envelope::default();
    collect_namespaces(&root, &mut envelope.namespaces)?;

    let mut body = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Header" => {
                    let span = reader.read_to_end(e.name())?;
                    envelope.header = Some(Header {
                        security: None,
                        raw: xml[span.start as usize..span.end as usize].to_vec(),
                    });
                }
                b"Body" => {
                    let span = reader.read_to_end(e.name())?;
                    let payload = xml[span.start as usize..span.end as usize].to_vec();

                    let mut scope = envelope.namespaces.clone();
                    collect_namespaces(&e, &mut scope)?;
                    let fault = parse_fault(&payload, &scope)?;

                    body = Some(Body { fault, payload });
                }
                _ => return Err(unexpected_element(&e)),
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"Header" => envelope.header = Some(Header::default()),
                b"Body" => body = Some(Body::default()),
                _ => return Err(unexpected_element(&e)),
            },
            Event::End(_) => break,
            Event::Text(t) if is_blank(&t) => continue,
            Event::Eof => {
                return Err(SoapError::UnexpectedToken(
                    "unexpected end of document".to_string(),
                ));
            }
            other => return Err(SoapError::unexpected_token(other)),
        }
    }

    envelope.body = body.ok_or(SoapError::MissingBody)?;
    Ok(envelope)
}

/// Décode le Fault s'il est le premier élément du corps
fn parse_fault(payload: &[u8], scope: &Namespaces) -> Result<Option<Fault>> {
    let mut reader = Reader::from_reader(payload);

    let mut fault = Fault {
        namespaces: scope.clone(),
        ..Default::default()
    };

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"Fault" => {
                collect_namespaces(&e, &mut fault.namespaces)?;
                break;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"Fault" => {
                collect_namespaces(&e, &mut fault.namespaces)?;
                return Ok(Some(fault));
            }
            Event::Start(_) | Event::Empty(_) | Event::Eof => return Ok(None),
            _ => continue,
        }
    }

    // Chemin des noms locaux sous <Fault>, ex: ["Code", "Subcode", "Value"]
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if path.is_empty() && local.eq_ignore_ascii_case("detail") {
                    let span = reader.read_to_end(e.name())?;
                    fault.detail = payload[span.start as usize..span.end as usize].to_vec();
                    continue;
                }
                path.push(local);
                text.clear();
            }
            Event::Text(t) => text.push_str(&decode_text(&t)?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
            Event::GeneralRef(r) => {
                if let Some(ch) = r.resolve_char_ref().map_err(quick_xml::Error::from)? {
                    text.push(ch);
                } else if let Some(resolved) =
                    resolve_predefined_entity(&String::from_utf8_lossy(&r))
                {
                    text.push_str(resolved);
                }
            }
            Event::End(_) => {
                if path.is_empty() {
                    break;
                }
                let value = text.trim().to_string();
                match path.join("/").as_str() {
                    // SOAP 1.2
                    "Code/Value" => fault.code = value,
                    "Code/Subcode/Value" => fault.subcode = value,
                    "Reason/Text" if fault.reason.is_empty() => fault.reason = value,
                    "Node" => fault.node = value,
                    "Role" => fault.role = value,
                    // SOAP 1.1
                    "faultcode" => fault.code = value,
                    "faultstring" => fault.reason = value,
                    "faultactor" => fault.role = value,
                    _ => {}
                }
                path.pop();
                text.clear();
            }
            Event::Eof => break,
            _ => continue,
        }
    }

    Ok(Some(fault))
}

/// Ajoute les déclarations `xmlns:<préfixe>` d'un élément à la table
fn collect_namespaces(start: &BytesStart<'_>, namespaces: &mut Namespaces) -> Result<()> {
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if let Some(PrefixDeclaration::Named(prefix)) = attr.key.as_namespace_binding() {
            let value = decode_text(&attr.value)?;
            namespaces.insert(String::from_utf8_lossy(prefix).into_owned(), value);
        }
    }
    Ok(())
}

fn check_envelope_name(start: &BytesStart<'_>) -> Result<()> {
    if start.local_name().as_ref() == b"Envelope" {
        Ok(())
    } else {
        Err(unexpected_element(start))
    }
}

fn unexpected_element(start: &BytesStart<'_>) -> SoapError {
    SoapError::UnexpectedElement(String::from_utf8_lossy(start.name().as_ref()).into_owned())
}

fn decode_text(raw: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| SoapError::UnexpectedToken(format!("invalid UTF-8: {}", e)))?;
    Ok(unescape(text).map_err(quick_xml::Error::from)?.into_owned())
}

fn is_blank(raw: &[u8]) -> bool {
    raw.iter().all(u8::is_ascii_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soap::{NAMESPACE_ENVELOPE, NAMESPACE_ONVIF_ERROR, encode_envelope};

    const UNAUTHORIZED_FAULT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://www.w3.org/2003/05/soap-envelope" xmlns:ter="http://www.onvif.org/ver10/error">
  <SOAP-ENV:Body>
    <SOAP-ENV:Fault>
      <SOAP-ENV:Code>
        <SOAP-ENV:Value>SOAP-ENV:Sender</SOAP-ENV:Value>
        <SOAP-ENV:Subcode>
          <SOAP-ENV:Value>ter:NotAuthorized</SOAP-ENV:Value>
        </SOAP-ENV:Subcode>
      </SOAP-ENV:Code>
      <SOAP-ENV:Reason>
        <SOAP-ENV:Text xml:lang="en">Sender not Authorized</SOAP-ENV:Text>
      </SOAP-ENV:Reason>
      <SOAP-ENV:Detail><ter:Info>bad &amp; wrong</ter:Info></SOAP-ENV:Detail>
    </SOAP-ENV:Fault>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#;

    #[test]
    fn test_parse_response() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:tds="http://www.onvif.org/ver10/device/wsdl">
  <s:Header/>
  <s:Body><tds:GetServicesResponse/></s:Body>
</s:Envelope>"#;

        let envelope = parse_envelope(xml.as_bytes()).unwrap();
        assert_eq!(
            envelope.namespaces.get("s").map(String::as_str),
            Some(NAMESPACE_ENVELOPE)
        );
        assert_eq!(envelope.namespaces.len(), 2);
        assert!(envelope.header.is_some());
        assert!(envelope.body.fault.is_none());
        assert_eq!(envelope.body.payload, b"<tds:GetServicesResponse/>");
    }

    #[test]
    fn test_missing_header_is_tolerated() {
        let xml = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Body/></env:Envelope>"#;
        let envelope = parse_envelope(xml.as_bytes()).unwrap();
        assert!(envelope.header.is_none());
        assert!(envelope.body.payload.is_empty());
        assert!(matches!(envelope.body.payload(), Err(SoapError::NoResponse)));
    }

    #[test]
    fn test_missing_body_is_an_error() {
        let xml = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Header/></env:Envelope>"#;
        assert!(matches!(
            parse_envelope(xml.as_bytes()),
            Err(SoapError::MissingBody)
        ));

        let xml = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"/>"#;
        assert!(matches!(
            parse_envelope(xml.as_bytes()),
            Err(SoapError::MissingBody)
        ));
    }

    #[test]
    fn test_unexpected_element() {
        let xml = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Other/><env:Body/></env:Envelope>"#;
        match parse_envelope(xml.as_bytes()) {
            Err(SoapError::UnexpectedElement(name)) => assert_eq!(name, "env:Other"),
            other => panic!("unexpected result: {:?}", other),
        }

        let xml = r#"<html><body/></html>"#;
        assert!(matches!(
            parse_envelope(xml.as_bytes()),
            Err(SoapError::UnexpectedElement(_))
        ));
    }

    #[test]
    fn test_unexpected_text() {
        let xml = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope">garbage<env:Body/></env:Envelope>"#;
        assert!(matches!(
            parse_envelope(xml.as_bytes()),
            Err(SoapError::UnexpectedToken(_))
        ));
    }

    #[test]
    fn test_malformed_xml() {
        let xml = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Body></env:Header></env:Envelope>"#;
        assert!(matches!(parse_envelope(xml.as_bytes()), Err(SoapError::Xml(_))));
    }

    #[test]
    fn test_parse_fault() {
        let envelope = parse_envelope(UNAUTHORIZED_FAULT.as_bytes()).unwrap();
        let fault = envelope.body.fault.as_ref().unwrap();

        assert_eq!(fault.code, "SOAP-ENV:Sender");
        assert_eq!(fault.subcode, "ter:NotAuthorized");
        assert_eq!(fault.reason, "Sender not Authorized");
        assert_eq!(fault.detail, b"<ter:Info>bad &amp; wrong</ter:Info>");
        assert_eq!(fault.namespaces, envelope.namespaces);
        assert!(fault.is_unauthorized());
        // Le contenu brut est conservé
        assert!(envelope.body.payload().unwrap().starts_with(b"\n    <SOAP-ENV:Fault>"));
    }

    #[test]
    fn test_fault_sees_namespaces_declared_on_body() {
        let xml = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
<s:Body xmlns:ter="http://www.onvif.org/ver10/error"><s:Fault><s:Code><s:Value>s:Sender</s:Value><s:Subcode><s:Value>ter:NotAuthorized</s:Value></s:Subcode></s:Code><s:Reason><s:Text>x &lt; y</s:Text></s:Reason></s:Fault></s:Body>
</s:Envelope>"#;

        let envelope = parse_envelope(xml.as_bytes()).unwrap();
        assert!(!envelope.namespaces.contains_key("ter"));
        let fault = envelope.body.fault.unwrap();
        assert_eq!(
            fault.namespaces.get("ter").map(String::as_str),
            Some(NAMESPACE_ONVIF_ERROR)
        );
        assert_eq!(fault.reason, "x < y");
        assert!(fault.is_unauthorized());
    }

    #[test]
    fn test_parse_soap11_fault() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>Sender not authorized</faultstring></s:Fault></s:Body></s:Envelope>"#;

        let fault = parse_envelope(xml.as_bytes()).unwrap().body.fault.unwrap();
        assert_eq!(fault.code, "s:Client");
        assert_eq!(fault.reason, "Sender not authorized");
        assert!(!fault.is_unauthorized());
        assert!(fault.has_unauthorized_reason());
    }

    #[test]
    fn test_round_trip() {
        let mut envelope = Envelope::new(Body::with_payload(
            b"<trt:GetVideoSourceModes><trt:VideoSourceToken>vs0</trt:VideoSourceToken></trt:GetVideoSourceModes>"
                .to_vec(),
        ));
        envelope.namespaces.insert(
            "trt".to_string(),
            "http://www.onvif.org/ver10/media/wsdl".to_string(),
        );
        envelope.namespaces.insert(
            "tt".to_string(),
            "http://www.onvif.org/ver10/schema".to_string(),
        );

        let decoded = parse_envelope(&encode_envelope(&envelope).unwrap()).unwrap();

        // La racine déclare aussi le préfixe de l'enveloppe
        let mut expected = envelope.namespaces.clone();
        expected.insert("env".to_string(), NAMESPACE_ENVELOPE.to_string());
        assert_eq!(decoded.namespaces, expected);
        assert_eq!(decoded.body.payload, envelope.body.payload);
        assert!(decoded.header.is_none());

        // Un second passage ne change rien
        let again = parse_envelope(&encode_envelope(&decoded).unwrap()).unwrap();
        assert_eq!(again.namespaces, decoded.namespaces);
        assert_eq!(again.body.payload, decoded.body.payload);
    }
}
