//! SOAP 1.1 client for `wslwebservices.leg.wa.gov`.
//!
//! Responses are parsed namespace-agnostically: elements are matched by local name only.

use async_trait::async_trait;
use billsync_core::{canonical_bill_id, BillDetail, BillKey, Chamber, HearingRef, RosterEntry};
use billsync_storage::{HttpClientConfig, HttpFetcher};
use chrono::{NaiveDate, NaiveDateTime};
use roxmltree::{Document, Node};
use tracing::{debug, warn};

use crate::{HearingItem, LegislativeRegistry, RegistryError};

pub const SERVICE_NAMESPACE: &str = "http://WSLWebServices.leg.wa.gov/";
pub const DEFAULT_SERVICE_BASE: &str = "https://wslwebservices.leg.wa.gov";

pub struct SoapRegistry {
    http: HttpFetcher,
    service_base: String,
}

impl SoapRegistry {
    pub fn new(service_base: impl Into<String>, http: HttpClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(http)?,
            service_base: service_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn service_url(&self, service: &str) -> String {
        format!("{}/{service}", self.service_base)
    }

    async fn call(
        &self,
        service: &str,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<String, RegistryError> {
        let url = self.service_url(service);
        let action = format!("{SERVICE_NAMESPACE}{method}");
        let response = self
            .http
            .post_soap(&url, &action, build_soap_envelope(method, params))
            .await?;
        debug!(method, bytes = response.body.len(), "soap response received");
        Ok(response.text())
    }
}

#[async_trait]
impl LegislativeRegistry for SoapRegistry {
    fn endpoint(&self) -> &str {
        &self.service_base
    }

    async fn roster_by_year(&self, year: i32) -> Result<Vec<RosterEntry>, RegistryError> {
        let xml = self
            .call(
                "LegislationService.asmx",
                "GetLegislationByYear",
                &[("year", year.to_string())],
            )
            .await?;
        parse_roster(&xml)
    }

    async fn prefiled_roster(&self) -> Result<Vec<RosterEntry>, RegistryError> {
        let xml = self
            .call("LegislationService.asmx", "GetPreFiledLegislationInfo", &[])
            .await?;
        parse_roster(&xml)
    }

    async fn bill_detail(&self, biennium: &str, number: u32) -> Result<BillDetail, RegistryError> {
        let xml = self
            .call(
                "LegislationService.asmx",
                "GetLegislation",
                &[
                    ("biennium", biennium.to_string()),
                    ("billNumber", number.to_string()),
                ],
            )
            .await?;
        parse_bill_detail(&xml, number)
    }

    async fn hearings(
        &self,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HearingItem>, RegistryError> {
        let xml = self
            .call(
                "CommitteeMeetingService.asmx",
                "GetCommitteeMeetings",
                &[
                    ("beginDate", begin.format("%Y-%m-%d").to_string()),
                    ("endDate", end.format("%Y-%m-%d").to_string()),
                ],
            )
            .await?;
        let meetings = parse_meetings(&xml)?;

        let mut items = Vec::new();
        for meeting in meetings {
            let xml = self
                .call(
                    "CommitteeMeetingService.asmx",
                    "GetCommitteeMeetingItems",
                    &[("agendaId", meeting.agenda_id.to_string())],
                )
                .await?;
            for bill_id in parse_agenda_bill_ids(&xml)? {
                items.push(HearingItem {
                    bill_id,
                    hearing: meeting.hearing.clone(),
                });
            }
        }
        Ok(items)
    }
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn build_soap_envelope(method: &str, params: &[(&str, String)]) -> String {
    let body = params
        .iter()
        .map(|(name, value)| format!("<{name}>{}</{name}>", escape_xml(value)))
        .collect::<String>();
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<soap:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
            r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
            r#"xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">"#,
            r#"<soap:Body><{method} xmlns="{ns}">{body}</{method}></soap:Body></soap:Envelope>"#
        ),
        method = method,
        ns = SERVICE_NAMESPACE,
        body = body
    )
}

fn parse_document<'a>(xml: &'a str, context: &str) -> Result<Document<'a>, RegistryError> {
    Document::parse(xml).map_err(|e| RegistryError::parse(context, e.to_string()))
}

fn elements_named<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.descendants()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    child(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn child_flag(node: Node<'_, '_>, name: &str) -> bool {
    child_text(node, name).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

fn parse_upstream_date(raw: &str) -> Option<NaiveDate> {
    raw.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

fn chamber_for(node: Node<'_, '_>, bill_id: &str) -> Chamber {
    child_text(node, "OriginalAgency")
        .map(|agency| Chamber::from_agency(&agency))
        .filter(|chamber| *chamber != Chamber::Other)
        .or_else(|| BillKey::parse(bill_id).map(|key| key.chamber()))
        .unwrap_or(Chamber::Other)
}

/// `LegislationInfo` listing; entries without a usable number are skipped.
pub fn parse_roster(xml: &str) -> Result<Vec<RosterEntry>, RegistryError> {
    let doc = parse_document(xml, "roster")?;
    let mut entries = Vec::new();
    for info in elements_named(doc.root(), "LegislationInfo") {
        let bill_id = child_text(info, "BillId");
        let number = child_text(info, "BillNumber")
            .and_then(|n| n.parse::<u32>().ok())
            .or_else(|| bill_id.as_deref().and_then(BillKey::parse).map(|k| k.number));
        let (Some(bill_id), Some(number)) = (bill_id, number) else {
            warn!("skipping roster entry without BillId/BillNumber");
            continue;
        };
        entries.push(RosterEntry {
            chamber: chamber_for(info, &bill_id),
            id: canonical_bill_id(&bill_id),
            number,
            active: child_flag(info, "Active"),
        });
    }
    Ok(entries)
}

/// First `Legislation` element of a `GetLegislation` response.
pub fn parse_bill_detail(xml: &str, requested_number: u32) -> Result<BillDetail, RegistryError> {
    let context = format!("GetLegislation({requested_number})");
    let doc = parse_document(xml, &context)?;
    let legislation = elements_named(doc.root(), "Legislation")
        .next()
        .ok_or_else(|| RegistryError::parse(&context, "no Legislation element"))?;
    let current = child(legislation, "CurrentStatus");

    let raw_id = child_text(legislation, "BillId")
        .or_else(|| current.and_then(|c| child_text(c, "BillId")))
        .ok_or_else(|| RegistryError::parse(&context, "missing BillId"))?;
    let number = child_text(legislation, "BillNumber")
        .and_then(|n| n.parse::<u32>().ok())
        .or_else(|| BillKey::parse(&raw_id).map(|k| k.number))
        .unwrap_or(requested_number);

    let introduced_date = match child_text(legislation, "IntroducedDate") {
        Some(raw) => Some(parse_upstream_date(&raw).ok_or_else(|| {
            RegistryError::parse(&context, format!("invalid IntroducedDate {raw:?}"))
        })?),
        None => None,
    };

    let short = child_text(legislation, "ShortDescription");
    let long = child_text(legislation, "LongDescription");
    let title = short
        .clone()
        .or_else(|| long.clone())
        .or_else(|| child_text(legislation, "Title"))
        .unwrap_or_default();

    Ok(BillDetail {
        chamber: chamber_for(legislation, &raw_id),
        id: canonical_bill_id(&raw_id),
        number,
        title,
        description: long.or(short).unwrap_or_default(),
        sponsor: child_text(legislation, "Sponsor").unwrap_or_default(),
        status_text: current
            .and_then(|c| child_text(c, "Status"))
            .unwrap_or_default(),
        history_text: current
            .and_then(|c| child_text(c, "HistoryLine"))
            .unwrap_or_default(),
        introduced_date,
        requested_by_governor: child_flag(legislation, "RequestedByGovernor"),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meeting {
    pub agenda_id: u64,
    pub hearing: HearingRef,
}

/// Non-cancelled `CommitteeMeeting` elements with a usable agenda id and date.
pub fn parse_meetings(xml: &str) -> Result<Vec<Meeting>, RegistryError> {
    let doc = parse_document(xml, "GetCommitteeMeetings")?;
    let mut meetings = Vec::new();
    for node in elements_named(doc.root(), "CommitteeMeeting") {
        if child_flag(node, "Cancelled") {
            continue;
        }
        let Some(agenda_id) = child_text(node, "AgendaId").and_then(|v| v.parse().ok()) else {
            continue;
        };
        let Some(raw_date) = child_text(node, "Date") else {
            continue;
        };
        let Some(date) = parse_upstream_date(&raw_date) else {
            continue;
        };
        let time = NaiveDateTime::parse_from_str(&raw_date, "%Y-%m-%dT%H:%M:%S")
            .ok()
            .map(|dt| dt.format("%H:%M").to_string());
        let committee = elements_named(node, "Committee")
            .find_map(|c| child_text(c, "LongName").or_else(|| child_text(c, "Name")))
            .or_else(|| child_text(node, "Agency"))
            .unwrap_or_default();
        let location = [child_text(node, "Building"), child_text(node, "Room")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");

        meetings.push(Meeting {
            agenda_id,
            hearing: HearingRef {
                date,
                committee,
                time,
                location: (!location.is_empty()).then_some(location),
            },
        });
    }
    Ok(meetings)
}

/// Canonical bill ids referenced by a meeting's agenda items.
pub fn parse_agenda_bill_ids(xml: &str) -> Result<Vec<String>, RegistryError> {
    let doc = parse_document(xml, "GetCommitteeMeetingItems")?;
    let mut ids = Vec::new();
    for item in elements_named(doc.root(), "CommitteeMeetingItem") {
        if let Some(bill_id) = child_text(item, "BillId") {
            let id = canonical_bill_id(&bill_id);
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    Ok(ids)
}
