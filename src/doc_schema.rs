//! Declarative field schema for each supported document type.
//!
//! The vendor's webhook body has the shape
//! `{ success, requestId, timestamp, data: { attributes: { attribute_types: {...} } }, metadata }`
//! where every section under `attribute_types` maps field keys to
//! `{ value, data_check }` objects. One schema per document type describes which
//! sections to show and in which order; the same extraction code serves all of them.

use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentType {
    Passport,
    DrivingLicence,
    ProofOfAddress,
    Generic,
}

impl DocumentType {
    pub const ALL: [DocumentType; 4] = [
        DocumentType::Passport,
        DocumentType::DrivingLicence,
        DocumentType::ProofOfAddress,
        DocumentType::Generic,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            Self::Passport => "passport",
            Self::DrivingLicence => "driving-licence",
            Self::ProofOfAddress => "proof-of-address",
            Self::Generic => "generic",
        }
    }

    pub fn from_slug(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.slug() == s)
    }

    /// Guess the document type from a vendor endpoint URL.
    pub fn from_endpoint(endpoint: &str) -> Self {
        [Self::DrivingLicence, Self::ProofOfAddress, Self::Passport]
            .into_iter()
            .find(|t| endpoint.contains(t.slug()))
            .unwrap_or(Self::Generic)
    }

    pub fn schema(&self) -> &'static DocumentSchema {
        match self {
            Self::Passport => &PASSPORT,
            Self::DrivingLicence => &DRIVING_LICENCE,
            Self::ProofOfAddress => &PROOF_OF_ADDRESS,
            Self::Generic => &GENERIC,
        }
    }
}

/// How a section's fields are grouped when rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionLayout {
    Fields,
    /// Fields split into first/second holder by `_one` / `_two` in the key.
    Holders,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SectionSpec {
    pub key: &'static str,
    pub title: &'static str,
    pub expanded_by_default: bool,
    pub layout: SectionLayout,
}

#[derive(Debug, Serialize)]
pub struct DocumentSchema {
    pub title: &'static str,
    /// Empty means "every section present in the payload, in payload order".
    pub sections: &'static [SectionSpec],
}

const fn section(key: &'static str, title: &'static str, expanded: bool) -> SectionSpec {
    SectionSpec {
        key,
        title,
        expanded_by_default: expanded,
        layout: SectionLayout::Fields,
    }
}

const IDENTITY_SECTIONS: &[SectionSpec] = &[
    section("pre_validation", "Pre-Validation", true),
    section("security_assessment", "Security Assessment", false),
    section("personal_information", "Personal Information", true),
    section("document_details", "Document Details", false),
    section("validity_status", "Validity Status", false),
];

static PASSPORT: DocumentSchema = DocumentSchema {
    title: "Passport Document",
    sections: IDENTITY_SECTIONS,
};

static DRIVING_LICENCE: DocumentSchema = DocumentSchema {
    title: "Driving Licence Document",
    sections: IDENTITY_SECTIONS,
};

static PROOF_OF_ADDRESS: DocumentSchema = DocumentSchema {
    title: "Proof of Address Document",
    sections: &[
        section("pre_validation", "Pre-Validation", true),
        section("document_provider", "Document Provider", false),
        section("address_information", "Address Information", true),
        SectionSpec {
            key: "personal_information",
            title: "Personal Information",
            expanded_by_default: true,
            layout: SectionLayout::Holders,
        },
        section("document_age", "Document Age", false),
    ],
};

// Layout defaults for sections discovered in the payload.
const GENERIC_SECTION: SectionSpec = section("", "", true);

static GENERIC: DocumentSchema = DocumentSchema {
    title: "Parsed Document",
    sections: &[],
};

const METADATA_KEYS: &[&str] = &[
    "totalRequestTime",
    "aiProcessingTime",
    "creditsCharged",
    "remainingBalance",
    "businessId",
    "documentPart",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldView {
    pub key: String,
    pub label: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionView {
    pub key: String,
    pub title: String,
    pub expanded: bool,
    pub layout: SectionLayout,
    pub fields: Vec<FieldView>,
    /// Present only for [`SectionLayout::Holders`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holders: Option<HolderSplit>,
}

/// First and second account holder fields of a holder-style section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HolderSplit {
    pub first: Vec<FieldView>,
    pub second: Vec<FieldView>,
}

impl HolderSplit {
    fn from_fields(fields: &[FieldView]) -> Self {
        let pick = |marker: &str| -> Vec<FieldView> {
            fields
                .iter()
                .filter(|f| f.key.contains(marker))
                .cloned()
                .collect()
        };
        Self {
            first: pick("_one"),
            second: pick("_two"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub document_type: DocumentType,
    pub title: String,
    pub success: Option<bool>,
    pub request_id: Option<String>,
    pub metadata: Map<String, Value>,
    pub sections: Vec<SectionView>,
}

impl DocumentView {
    /// Build a view of a webhook body according to the type's schema.
    pub fn from_body(doc_type: DocumentType, body: &Value) -> Self {
        let data = body.get("data").filter(|d| d.is_object());
        // Both `data.attributes.attribute_types` and `data.attribute_types` occur.
        let attributes = data
            .and_then(|d| d.get("attributes"))
            .filter(|a| a.is_object())
            .or(data);
        let attribute_types = attributes
            .and_then(|a| a.get("attribute_types"))
            .and_then(Value::as_object);

        let schema = doc_type.schema();
        let sections = match attribute_types {
            None => Vec::new(),
            Some(types) if schema.sections.is_empty() => types
                .iter()
                .filter(|(_, v)| v.is_object())
                .map(|(key, v)| build_section(&GENERIC_SECTION, key, &title_case(key), v))
                .collect(),
            Some(types) => schema
                .sections
                .iter()
                .filter_map(|section| {
                    let v = types.get(section.key).filter(|v| !v.is_null())?;
                    Some(build_section(section, section.key, section.title, v))
                })
                .collect(),
        };

        let metadata = body
            .get("metadata")
            .and_then(Value::as_object)
            .map(|m| {
                METADATA_KEYS
                    .iter()
                    .filter_map(|k| {
                        m.get(*k)
                            .filter(|v| !v.is_null())
                            .map(|v| (k.to_string(), v.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            document_type: doc_type,
            title: schema.title.to_string(),
            success: body.get("success").and_then(Value::as_bool),
            request_id: body
                .get("requestId")
                .and_then(Value::as_str)
                .map(str::to_string),
            metadata,
            sections,
        }
    }
}

fn build_section(layout: &SectionSpec, key: &str, title: &str, value: &Value) -> SectionView {
    let fields: Vec<FieldView> = value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(_, v)| v.is_object())
                .map(|(field_key, v)| FieldView {
                    key: field_key.clone(),
                    label: title_case(field_key),
                    value: v.get("value").cloned().unwrap_or(Value::Null),
                    evidence: v.get("data_check").filter(|e| !e.is_null()).cloned(),
                })
                .collect()
        })
        .unwrap_or_default();

    let holders = match layout.layout {
        SectionLayout::Holders => Some(HolderSplit::from_fields(&fields)),
        SectionLayout::Fields => None,
    };

    SectionView {
        key: key.to_string(),
        title: title.to_string(),
        expanded: layout.expanded_by_default,
        layout: layout.layout,
        fields,
        holders,
    }
}

/// `date_of_birth` -> `Date Of Birth`.
pub fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
