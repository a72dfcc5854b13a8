//! Sérialisation des enveloppes SOAP

use std::io::Write;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::security::{TYPE_NONCE_BASE64, TYPE_PASSWORD_DIGEST};
use super::{
    ENVELOPE_PREFIX, Envelope, Fault, NAMESPACE_ENVELOPE, NAMESPACE_WSSE, NAMESPACE_WSU, Security,
};
use crate::errors::{Result, SoapError};

/// Sérialise une enveloppe SOAP.
///
/// Les namespaces de l'appelant sont déclarés sur la racine uniquement, le
/// contenu du corps est recopié tel quel.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());

    write(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;

    let root = env_name("Envelope");
    let mut start = BytesStart::new(root.as_str());
    start.push_attribute((format!("xmlns:{}", ENVELOPE_PREFIX).as_str(), NAMESPACE_ENVELOPE));
    for (prefix, uri) in &envelope.namespaces {
        if prefix.is_empty() {
            return Err(SoapError::Marshal("empty namespace prefix".to_string()));
        }
        if prefix == ENVELOPE_PREFIX {
            if uri != NAMESPACE_ENVELOPE {
                return Err(SoapError::Marshal(format!(
                    "prefix {} is reserved for the SOAP envelope",
                    ENVELOPE_PREFIX
                )));
            }
            continue;
        }
        start.push_attribute((format!("xmlns:{}", prefix).as_str(), uri.as_str()));
    }
    write(&mut writer, Event::Start(start))?;

    if let Some(header) = &envelope.header {
        let name = env_name("Header");
        write(&mut writer, Event::Start(BytesStart::new(name.as_str())))?;
        if let Some(security) = &header.security {
            write_security(&mut writer, security)?;
        }
        write(&mut writer, Event::End(BytesEnd::new(name.as_str())))?;
    }

    let body = env_name("Body");
    write(&mut writer, Event::Start(BytesStart::new(body.as_str())))?;
    match &envelope.body.fault {
        // Un Fault décodé est déjà présent dans le contenu brut
        Some(fault) if envelope.body.payload.is_empty() => write_fault(&mut writer, fault)?,
        _ => writer
            .get_mut()
            .write_all(&envelope.body.payload)
            .map_err(|e| SoapError::Marshal(e.to_string()))?,
    }
    write(&mut writer, Event::End(BytesEnd::new(body.as_str())))?;

    write(&mut writer, Event::End(BytesEnd::new(root.as_str())))?;

    Ok(writer.into_inner())
}

fn write_security(writer: &mut Writer<Vec<u8>>, security: &Security) -> Result<()> {
    let token = &security.username_token;

    let mut start = BytesStart::new("wsse:Security");
    start.push_attribute(("xmlns:wsse", NAMESPACE_WSSE));
    start.push_attribute(("xmlns:wsu", NAMESPACE_WSU));
    write(writer, Event::Start(start))?;

    write(writer, Event::Start(BytesStart::new("wsse:UsernameToken")))?;
    write_text_element(writer, "wsse:Username", &[], &token.username)?;
    write_text_element(
        writer,
        "wsse:Password",
        &[("Type", TYPE_PASSWORD_DIGEST)],
        &token.password_digest,
    )?;
    write_text_element(
        writer,
        "wsse:Nonce",
        &[("EncodingType", TYPE_NONCE_BASE64)],
        &token.nonce,
    )?;
    write_text_element(writer, "wsu:Created", &[], &token.created)?;
    write(writer, Event::End(BytesEnd::new("wsse:UsernameToken")))?;

    write(writer, Event::End(BytesEnd::new("wsse:Security")))
}

fn write_fault(writer: &mut Writer<Vec<u8>>, fault: &Fault) -> Result<()> {
    let fault_name = env_name("Fault");
    let code_name = env_name("Code");
    let value_name = env_name("Value");

    write(writer, Event::Start(BytesStart::new(fault_name.as_str())))?;

    write(writer, Event::Start(BytesStart::new(code_name.as_str())))?;
    write_text_element(writer, &value_name, &[], &fault.code)?;
    if !fault.subcode.is_empty() {
        let subcode_name = env_name("Subcode");
        write(writer, Event::Start(BytesStart::new(subcode_name.as_str())))?;
        write_text_element(writer, &value_name, &[], &fault.subcode)?;
        write(writer, Event::End(BytesEnd::new(subcode_name.as_str())))?;
    }
    write(writer, Event::End(BytesEnd::new(code_name.as_str())))?;

    let reason_name = env_name("Reason");
    write(writer, Event::Start(BytesStart::new(reason_name.as_str())))?;
    write_text_element(writer, &env_name("Text"), &[("xml:lang", "en")], &fault.reason)?;
    write(writer, Event::End(BytesEnd::new(reason_name.as_str())))?;

    if !fault.node.is_empty() {
        write_text_element(writer, &env_name("Node"), &[], &fault.node)?;
    }
    if !fault.role.is_empty() {
        write_text_element(writer, &env_name("Role"), &[], &fault.role)?;
    }
    if !fault.detail.is_empty() {
        let detail_name = env_name("Detail");
        write(writer, Event::Start(BytesStart::new(detail_name.as_str())))?;
        writer
            .get_mut()
            .write_all(&fault.detail)
            .map_err(|e| SoapError::Marshal(e.to_string()))?;
        write(writer, Event::End(BytesEnd::new(detail_name.as_str())))?;
    }

    write(writer, Event::End(BytesEnd::new(fault_name.as_str())))
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    attributes: &[(&str, &str)],
    text: &str,
) -> Result<()> {
    let mut start = BytesStart::new(name);
    for attribute in attributes {
        start.push_attribute(*attribute);
    }
    write(writer, Event::Start(start))?;
    write(writer, Event::Text(BytesText::new(text)))?;
    write(writer, Event::End(BytesEnd::new(name)))
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| SoapError::Marshal(e.to_string()))
}

fn env_name(local: &str) -> String {
    format!("{}:{}", ENVELOPE_PREFIX, local)
}
