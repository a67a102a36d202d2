use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Textarea,
    Email,
    Url,
    Phone,
    Number,
    Currency,
    Percent,
    AutoNumber,
    Boolean,
    Date,
    Datetime,
    Time,
    Select,
    Lookup,
    MasterDetail,
    File,
    Image,
    Object,
}

impl FieldType {
    /// Lookup-like kinds carry a `reference_to` target object.
    pub fn is_reference(self) -> bool {
        matches!(self, FieldType::Lookup | FieldType::MasterDetail)
    }

    pub fn is_attachment(self) -> bool {
        matches!(self, FieldType::File | FieldType::Image)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A typed field in an object definition, together with its optional
/// constraints. Constraints that do not apply to the field's kind are
/// simply never consulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
    /// Multiple-valued fields hold a JSON array of the base kind.
    #[serde(default)]
    pub multiple: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Lower/upper bounds for numbers and dates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FieldFormat>,
    /// Accepted URL schemes for `format: url` (default http/https).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocols: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<SelectOption>>,
    /// Target object FQN for lookup / master_detail fields. Stored as
    /// a string and resolved lazily, so definition cycles are fine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_extensions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_width: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u64>,
}

impl FieldDefinition {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            label: None,
            required: false,
            multiple: false,
            default_value: None,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            pattern: None,
            format: None,
            protocols: None,
            options: None,
            reference_to: None,
            accepted_extensions: None,
            min_size: None,
            max_size: None,
            min_width: None,
            max_width: None,
            min_height: None,
            max_height: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn reference_to(mut self, target: impl Into<String>) -> Self {
        self.reference_to = Some(target.into());
        self
    }

    /// Whether any constraint on this field needs a validation pass.
    pub fn has_constraints(&self) -> bool {
        self.required
            || self.min.is_some()
            || self.max.is_some()
            || self.min_length.is_some()
            || self.max_length.is_some()
            || self.pattern.is_some()
            || self.format.is_some()
            || self.options.is_some()
            || self.accepted_extensions.is_some()
            || self.min_size.is_some()
            || self.max_size.is_some()
            || self.min_width.is_some()
            || self.max_width.is_some()
            || self.min_height.is_some()
            || self.max_height.is_some()
            || self.effective_format().is_some()
    }

    /// The format implied by the field kind when none is declared
    /// (email/url/phone fields validate their format by construction).
    pub fn effective_format(&self) -> Option<FieldFormat> {
        self.format.or(match self.field_type {
            FieldType::Email => Some(FieldFormat::Email),
            FieldType::Url => Some(FieldFormat::Url),
            FieldType::Phone => Some(FieldFormat::Phone),
            _ => None,
        })
    }
}

/// Recognized value formats for `field` validation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldFormat {
    Email,
    Url,
    Phone,
    Uuid,
    Iso8601,
}
