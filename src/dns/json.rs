//! The DoH JSON response document, shaped after the Google Public DNS
//! JSON API.

use serde::{Deserialize, Serialize};

use super::{Message, Record};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DohResponse {
    #[serde(rename = "Status")]
    pub status: u32,
    #[serde(rename = "TC")]
    pub truncated: bool,
    #[serde(rename = "RD")]
    pub recursion_desired: bool,
    #[serde(rename = "RA")]
    pub recursion_available: bool,
    #[serde(rename = "AD")]
    pub authenticated_data: bool,
    #[serde(rename = "CD")]
    pub checking_disabled: bool,
    #[serde(rename = "Question")]
    pub question: Vec<DohQuestion>,
    #[serde(rename = "Answer")]
    pub answer: Vec<DohRecord>,
    #[serde(rename = "Authority", default, skip_serializing_if = "Vec::is_empty")]
    pub authority: Vec<DohRecord>,
    #[serde(rename = "Additional", default, skip_serializing_if = "Vec::is_empty")]
    pub additional: Vec<DohRecord>,
    #[serde(rename = "Comment", default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(
        rename = "edns_client_subnet",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub edns_client_subnet: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DohQuestion {
    pub name: String,
    #[serde(rename = "type")]
    pub rtype: u16,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DohRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub rtype: u16,
    #[serde(rename = "TTL")]
    pub ttl: u32,
    pub data: String,
}

impl From<&Record> for DohRecord {
    fn from(record: &Record) -> Self {
        DohRecord {
            name: record.name.clone(),
            rtype: record.rtype.into(),
            ttl: record.ttl,
            data: record.data.clone(),
        }
    }
}

impl From<&Message> for DohResponse {
    fn from(msg: &Message) -> Self {
        let edns_client_subnet = msg
            .edns
            .as_ref()
            .and_then(|opt| opt.client_subnet())
            .map(|subnet| format!("{}/{}", subnet.address, subnet.source_netmask))
            .unwrap_or_default();

        DohResponse {
            status: msg.header.rcode as u32,
            truncated: msg.header.tc,
            recursion_desired: msg.header.rd,
            recursion_available: msg.header.ra,
            authenticated_data: msg.header.ad,
            checking_disabled: msg.header.cd,
            question: msg
                .questions
                .iter()
                .map(|q| DohQuestion {
                    name: q.name.clone(),
                    rtype: q.qtype.into(),
                })
                .collect(),
            answer: msg.answers.iter().map(DohRecord::from).collect(),
            authority: msg.authorities.iter().map(DohRecord::from).collect(),
            additional: msg.additionals.iter().map(DohRecord::from).collect(),
            comment: String::new(),
            edns_client_subnet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{ClientSubnet, EdnsOpt, Message, Record, RecordType};

    #[test]
    fn message_maps_to_document() {
        let mut msg = Message::query("example.com.", RecordType::AAAA);
        msg.header.qr = true;
        msg.header.ra = true;
        msg.answers.push(Record::new(
            "example.com.",
            RecordType::AAAA,
            299,
            "2606:2800:220:1:248:1893:25c8:1946",
        ));
        let mut opt = EdnsOpt::new();
        opt.set_client_subnet(ClientSubnet::for_address("203.0.113.7".parse().unwrap(), None));
        msg.edns = Some(opt);

        let doc = DohResponse::from(&msg);
        assert_eq!(doc.status, 0);
        assert!(doc.recursion_available);
        assert_eq!(doc.question[0].rtype, 28);
        assert_eq!(doc.answer[0].ttl, 299);
        assert_eq!(doc.answer[0].data, "2606:2800:220:1:248:1893:25c8:1946");
        assert_eq!(doc.edns_client_subnet, "203.0.113.0/24");
    }

    #[test]
    fn empty_sections_are_omitted_from_json() {
        let mut msg = Message::query("example.com.", RecordType::A);
        msg.header.qr = true;
        let doc = DohResponse::from(&msg);
        let body = serde_json::to_string(&doc).unwrap();
        assert!(body.contains("\"Answer\":[]"));
        assert!(!body.contains("Authority"));
        assert!(!body.contains("Additional"));
        assert!(!body.contains("Comment"));
        assert!(!body.contains("edns_client_subnet"));
    }

    #[test]
    fn json_field_names_match_the_wire_contract() {
        let mut msg = Message::query("example.com.", RecordType::A);
        msg.header.qr = true;
        msg.answers
            .push(Record::new("example.com.", RecordType::A, 300, "93.184.216.34"));

        let body = serde_json::to_string(&DohResponse::from(&msg)).unwrap();
        for key in ["\"Status\"", "\"TC\"", "\"RD\"", "\"RA\"", "\"AD\"", "\"CD\"", "\"TTL\"", "\"type\"", "\"data\""] {
            assert!(body.contains(key), "missing {} in {}", key, body);
        }

        let parsed: DohResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.answer[0].data, "93.184.216.34");
    }
}
