//! FHIR resource shapes used by the record graph
//!
//! Only the elements this crate writes or reads are modelled. Unknown elements
//! returned by the server are ignored on deserialization.

use super::catalog::{ASSEMBLY_TAG_SYSTEM, INCOMPLETE_TAG_CODE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn new(system: &str, code: &str, display: &str) -> Self {
        Self {
            system: Some(system.to_string()),
            code: Some(code.to_string()),
            display: Some(display.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConcept {
    pub fn single(coding: Coding) -> Self {
        Self {
            coding: vec![coding],
            text: None,
        }
    }

    /// True when any coding carries `code`, regardless of system.
    pub fn has_code(&self, code: &str) -> bool {
        self.coding.iter().any(|c| c.code.as_deref() == Some(code))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Reference {
    #[serde(default)]
    pub reference: String,
}

impl Reference {
    pub fn patient(patient_id: &str) -> Self {
        Self {
            reference: format!("Patient/{patient_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HumanName {
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>, // usual | official | temp | nickname | anonymous | old | maiden

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub given: Vec<String>,
}

impl HumanName {
    /// Display form: `text`, else given names followed by family name.
    pub fn display(&self) -> Option<String> {
        if let Some(text) = self.text.as_deref().map(str::trim) {
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
        let parts: Vec<&str> = self
            .given
            .iter()
            .map(String::as_str)
            .chain(self.family.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Meta {
    #[serde(rename = "lastUpdated", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag: Vec<Coding>,
}

impl Meta {
    pub fn has_tag(&self, system: &str, code: &str) -> bool {
        self.tag
            .iter()
            .any(|t| t.system.as_deref() == Some(system) && t.code.as_deref() == Some(code))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<HumanName>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl Patient {
    /// Tagged by a retained partial assembly.
    pub fn is_incomplete(&self) -> bool {
        self.meta.as_ref().map_or(false, |m| {
            m.has_tag(ASSEMBLY_TAG_SYSTEM, INCOMPLETE_TAG_CODE)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub resource_type: String,
    pub status: String,
    pub code: CodeableConcept,
    pub subject: Reference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_quantity: Option<Quantity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_codeable_concept: Option<CodeableConcept>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub code: CodeableConcept,

    #[serde(default)]
    pub subject: Reference,
}

/// MedicationStatement.status values this crate writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MedicationStatus {
    Active,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationStatement {
    pub resource_type: String,
    pub medication_codeable_concept: CodeableConcept,
    pub status: MedicationStatus,
    pub subject: Reference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RiskPredictionComponent {
    #[serde(default)]
    pub outcome: Option<CodeableConcept>,

    #[serde(default)]
    pub probability_decimal: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence_date_time: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prediction: Vec<RiskPredictionComponent>,
}

impl RiskAssessment {
    /// Timestamp used to order assessments: occurrence, else last update.
    pub fn recorded_at(&self) -> Option<&str> {
        self.occurrence_date_time
            .as_deref()
            .or_else(|| self.meta.as_ref()?.last_updated.as_deref())
    }
}

/// Search result bundle. Entries keep the raw resource body.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Bundle {
    #[serde(default)]
    pub entry: Vec<BundleEntry>,

    #[serde(default)]
    pub link: Vec<BundleLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleEntry {
    #[serde(default)]
    pub resource: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

impl Bundle {
    pub fn next_url(&self) -> Option<&str> {
        self.link
            .iter()
            .find(|l| l.relation == "next")
            .map(|l| l.url.as_str())
    }

    pub fn into_resources(self) -> Vec<serde_json::Value> {
        self.entry.into_iter().filter_map(|e| e.resource).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn human_name_prefers_text() {
        let name = HumanName {
            use_: Some("official".into()),
            text: Some("Jane Doe".into()),
            family: Some("Ignored".into()),
            given: vec![],
        };
        assert_eq!(name.display().as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn human_name_falls_back_to_parts() {
        let name: HumanName =
            serde_json::from_value(json!({"family": "Everyman", "given": ["Adam", "B"]})).unwrap();
        assert_eq!(name.display().as_deref(), Some("Adam B Everyman"));
        assert_eq!(HumanName::default().display(), None);
    }

    #[test]
    fn bundle_without_entries_is_empty() {
        let bundle: Bundle =
            serde_json::from_value(json!({"resourceType": "Bundle", "type": "searchset", "total": 0}))
                .unwrap();
        assert!(bundle.next_url().is_none());
        assert!(bundle.into_resources().is_empty());
    }

    #[test]
    fn bundle_next_link() {
        let bundle: Bundle = serde_json::from_value(json!({
            "resourceType": "Bundle",
            "link": [
                {"relation": "self", "url": "http://x/Patient"},
                {"relation": "next", "url": "http://x/Patient?page=2"}
            ],
            "entry": [{"resource": {"resourceType": "Patient", "id": "p1"}}, {"fullUrl": "urn:x"}]
        }))
        .unwrap();
        assert_eq!(bundle.next_url(), Some("http://x/Patient?page=2"));
        assert_eq!(bundle.into_resources().len(), 1);
    }

    #[test]
    fn incomplete_tag_is_read_from_patient_meta() {
        let tagged: Patient = serde_json::from_value(json!({
            "resourceType": "Patient",
            "meta": {
                "lastUpdated": "2024-03-01T10:00:00Z",
                "tag": [{"system": "urn:cardiorisk:assembly", "code": "incomplete"}]
            }
        }))
        .unwrap();
        assert!(tagged.is_incomplete());

        let other_system: Patient = serde_json::from_value(json!({
            "resourceType": "Patient",
            "meta": {"tag": [{"system": "urn:other", "code": "incomplete"}]}
        }))
        .unwrap();
        assert!(!other_system.is_incomplete());

        let untagged: Patient =
            serde_json::from_value(json!({"resourceType": "Patient"})).unwrap();
        assert!(!untagged.is_incomplete());
    }

    #[test]
    fn medication_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(MedicationStatus::Stopped).unwrap(),
            json!("stopped")
        );
    }
}
