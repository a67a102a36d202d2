//! Metadata-driven validation: field constraints, cross-field rules,
//! and state machines, with severity buckets and trigger scoping.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use objectql_data::eval::{compare_values, values_equal};
use objectql_data::{Error, Record};

use crate::metadata::{
    CrossFieldOperator, FieldDefinition, FieldFormat, FieldType, ObjectDefinition, RuleKind,
    Severity, TriggerOp, ValidationRule,
};

/// The operation being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    fn as_trigger(self) -> TriggerOp {
        match self {
            Operation::Create => TriggerOp::Create,
            Operation::Update => TriggerOp::Update,
            Operation::Delete => TriggerOp::Delete,
        }
    }
}

/// Everything a rule can look at.
pub struct ValidationContext<'a> {
    pub record: &'a Record,
    /// The stored record before this write. Immutable inside rules.
    pub previous: Option<&'a Record>,
    pub operation: Operation,
    /// Fields whose value differs from `previous`. `None` disables
    /// changed-field scoping (all rules run).
    pub changed_fields: Option<&'a [String]>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub code: String,
    pub message: String,
}

/// Rule results bucketed by severity. Only errors block the write.
#[derive(Debug, Default, Serialize)]
pub struct ValidationOutcome {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub info: Vec<ValidationIssue>,
}

impl ValidationOutcome {
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, severity: Severity, issue: ValidationIssue) {
        match severity {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
            Severity::Info => self.info.push(issue),
        }
    }

    /// Collapse into the wire error, or `None` when valid.
    pub fn into_error(self) -> Option<Error> {
        if self.valid() {
            return None;
        }
        let message = self
            .errors
            .first()
            .map(|issue| issue.message.clone())
            .unwrap_or_else(|| "validation failed".to_string());
        Some(
            Error::validation(message).with_details(
                serde_json::json!({ "errors": self.errors, "warnings": self.warnings }),
            ),
        )
    }
}

/// Evaluate a rule set against a record.
pub fn validate(rules: &[ValidationRule], ctx: &ValidationContext<'_>) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();
    for rule in rules {
        if let Some(trigger) = &rule.trigger {
            if !trigger.contains(&ctx.operation.as_trigger()) {
                continue;
            }
        }
        if let (Some(scope), Some(changed)) = (&rule.fields, ctx.changed_fields) {
            if !changed.iter().any(|f| scope.contains(f)) {
                continue;
            }
        }
        for issue in evaluate(rule, ctx) {
            outcome.push(rule.severity, issue);
        }
    }
    outcome
}

/// Derive the implicit `field` rules from an object's constrained
/// fields. These run on create and update only.
pub fn field_rules_for(object: &ObjectDefinition) -> Vec<ValidationRule> {
    object
        .fields
        .iter()
        .filter(|(_, def)| def.has_constraints())
        .map(|(name, def)| {
            ValidationRule::new(RuleKind::Field {
                field: name.clone(),
                definition: Box::new(def.clone()),
            })
            .trigger(vec![TriggerOp::Create, TriggerOp::Update])
        })
        .collect()
}

fn evaluate(rule: &ValidationRule, ctx: &ValidationContext<'_>) -> Vec<ValidationIssue> {
    match &rule.kind {
        RuleKind::Field { field, definition } => check_field(rule, field, definition, ctx),
        RuleKind::CrossField {
            field,
            operator,
            compare_to,
            value,
        } => check_cross_field(rule, field, *operator, compare_to.as_deref(), value.as_ref(), ctx),
        RuleKind::StateMachine { field, transitions } => {
            check_state_machine(rule, field, transitions, ctx)
        }
    }
}

fn issue(
    rule: &ValidationRule,
    field: Option<&str>,
    default_code: &str,
    default_message: String,
    ctx: &ValidationContext<'_>,
    extra: &[(&str, String)],
) -> ValidationIssue {
    let message = match &rule.message {
        Some(template) => render_template(template, ctx.record, extra),
        None => default_message,
    };
    ValidationIssue {
        rule: rule.name.clone(),
        field: field.map(str::to_string),
        code: rule
            .error_code
            .clone()
            .unwrap_or_else(|| default_code.to_string()),
        message,
    }
}

// ── field rules ────────────────────────────────────────────

fn check_field(
    rule: &ValidationRule,
    field: &str,
    def: &FieldDefinition,
    ctx: &ValidationContext<'_>,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let value = ctx.record.get(field);

    let missing = match value {
        None => true,
        Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    };
    if missing {
        // A required field must be present on create; an update only
        // fails when it explicitly blanks the field.
        let blanked = ctx.operation == Operation::Create || ctx.record.contains_key(field);
        if def.required && blanked {
            issues.push(issue(
                rule,
                Some(field),
                "required",
                format!("field '{field}' is required"),
                ctx,
                &[],
            ));
        }
        return issues;
    }
    let value = value.expect("present");

    if def.multiple {
        match value.as_array() {
            Some(items) => {
                for item in items {
                    check_scalar(rule, field, def, item, ctx, &mut issues);
                }
            }
            None => issues.push(issue(
                rule,
                Some(field),
                "multiple",
                format!("field '{field}' must be an array"),
                ctx,
                &[],
            )),
        }
    } else {
        check_scalar(rule, field, def, value, ctx, &mut issues);
    }
    issues
}

fn check_scalar(
    rule: &ValidationRule,
    field: &str,
    def: &FieldDefinition,
    value: &Value,
    ctx: &ValidationContext<'_>,
    issues: &mut Vec<ValidationIssue>,
) {
    if let (Some(min), Some(max)) = (&def.min, &def.max) {
        let dateish = matches!(def.field_type, FieldType::Date | FieldType::Datetime);
        if dateish && compare_values(min, max) == Some(std::cmp::Ordering::Greater) {
            issues.push(issue(
                rule,
                Some(field),
                "INVALID_DATE_RANGE",
                format!("field '{field}' has an inverted date range ({min} > {max})"),
                ctx,
                &[],
            ));
            return;
        }
    }
    if let Some(min) = &def.min {
        if compare_values(value, min) == Some(std::cmp::Ordering::Less) {
            issues.push(issue(
                rule,
                Some(field),
                "min",
                format!("field '{field}' must be at least {min}"),
                ctx,
                &[],
            ));
        }
    }
    if let Some(max) = &def.max {
        if compare_values(value, max) == Some(std::cmp::Ordering::Greater) {
            issues.push(issue(
                rule,
                Some(field),
                "max",
                format!("field '{field}' must be at most {max}"),
                ctx,
                &[],
            ));
        }
    }
    if let Some(text) = value.as_str() {
        let len = text.chars().count() as u64;
        if let Some(min) = def.min_length {
            if len < min {
                issues.push(issue(
                    rule,
                    Some(field),
                    "min_length",
                    format!("field '{field}' is shorter than {min} characters"),
                    ctx,
                    &[],
                ));
            }
        }
        if let Some(max) = def.max_length {
            if len > max {
                issues.push(issue(
                    rule,
                    Some(field),
                    "max_length",
                    format!("field '{field}' is longer than {max} characters"),
                    ctx,
                    &[],
                ));
            }
        }
        if let Some(pattern) = &def.pattern {
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(text) {
                        issues.push(issue(
                            rule,
                            Some(field),
                            "pattern",
                            format!("field '{field}' does not match pattern '{pattern}'"),
                            ctx,
                            &[],
                        ));
                    }
                }
                // An invalid pattern fails the rule itself.
                Err(e) => issues.push(issue(
                    rule,
                    Some(field),
                    "INVALID_REGEX",
                    format!("field '{field}' has an invalid pattern: {e}"),
                    ctx,
                    &[],
                )),
            }
        }
        if let Some(format) = def.effective_format() {
            if let Some(message) = check_format(field, format, def, text) {
                issues.push(issue(rule, Some(field), "format", message, ctx, &[]));
            }
        }
    }
    if let Some(options) = &def.options {
        if !options.iter().any(|opt| values_equal(&opt.value, value)) {
            issues.push(issue(
                rule,
                Some(field),
                "options",
                format!("field '{field}' has a value outside its options"),
                ctx,
                &[],
            ));
        }
    }
    if def.field_type.is_attachment() {
        check_attachment(rule, field, def, value, ctx, issues);
    }
}

fn check_format(
    field: &str,
    format: FieldFormat,
    def: &FieldDefinition,
    text: &str,
) -> Option<String> {
    match format {
        FieldFormat::Email => {
            let re = regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex");
            (!re.is_match(text)).then(|| format!("field '{field}' is not a valid email address"))
        }
        FieldFormat::Url => match url::Url::parse(text) {
            Err(_) => Some(format!("field '{field}' is not a valid URL")),
            Ok(parsed) => {
                let default = ["http".to_string(), "https".to_string()];
                let allowed: &[String] = def.protocols.as_deref().unwrap_or(&default);
                (!allowed.iter().any(|p| p == parsed.scheme()))
                    .then(|| format!("field '{field}' must use one of the schemes {allowed:?}"))
            }
        },
        FieldFormat::Phone => {
            let re = regex::Regex::new(r"^\+?[0-9][0-9 \-().]{4,}$").expect("static regex");
            (!re.is_match(text)).then(|| format!("field '{field}' is not a valid phone number"))
        }
        FieldFormat::Uuid => uuid::Uuid::parse_str(text)
            .is_err()
            .then(|| format!("field '{field}' is not a valid UUID")),
        FieldFormat::Iso8601 => {
            let ok = chrono::DateTime::parse_from_rfc3339(text).is_ok()
                || chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok();
            (!ok).then(|| format!("field '{field}' is not an ISO-8601 date"))
        }
    }
}

fn check_attachment(
    rule: &ValidationRule,
    field: &str,
    def: &FieldDefinition,
    value: &Value,
    ctx: &ValidationContext<'_>,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(meta) = value.as_object() else {
        issues.push(issue(
            rule,
            Some(field),
            "attachment",
            format!("field '{field}' must be an attachment object"),
            ctx,
            &[],
        ));
        return;
    };
    if let (Some(exts), Some(name)) = (&def.accepted_extensions, meta.get("name").and_then(Value::as_str)) {
        let matched = name
            .rsplit('.')
            .next()
            .map(|ext| exts.iter().any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext)))
            .unwrap_or(false);
        if !matched {
            issues.push(issue(
                rule,
                Some(field),
                "extension",
                format!("field '{field}' only accepts extensions {exts:?}"),
                ctx,
                &[],
            ));
        }
    }
    if let Some(size) = meta.get("size").and_then(Value::as_u64) {
        if def.min_size.is_some_and(|min| size < min) || def.max_size.is_some_and(|max| size > max) {
            issues.push(issue(
                rule,
                Some(field),
                "size",
                format!("field '{field}' attachment size {size} is out of bounds"),
                ctx,
                &[],
            ));
        }
    }
    let out_of_bounds = |value: Option<u64>, min: Option<u64>, max: Option<u64>| {
        value.is_some_and(|v| min.is_some_and(|m| v < m) || max.is_some_and(|m| v > m))
    };
    let width = meta.get("width").and_then(Value::as_u64);
    let height = meta.get("height").and_then(Value::as_u64);
    if out_of_bounds(width, def.min_width, def.max_width)
        || out_of_bounds(height, def.min_height, def.max_height)
    {
        issues.push(issue(
            rule,
            Some(field),
            "dimensions",
            format!("field '{field}' image dimensions are out of bounds"),
            ctx,
            &[],
        ));
    }
}

// ── cross-field rules ──────────────────────────────────────

fn check_cross_field(
    rule: &ValidationRule,
    field: &str,
    operator: CrossFieldOperator,
    compare_to: Option<&str>,
    literal: Option<&Value>,
    ctx: &ValidationContext<'_>,
) -> Vec<ValidationIssue> {
    let left = ctx.record.get(field).cloned().unwrap_or(Value::Null);
    let right = match (compare_to, literal) {
        (Some(other), _) => ctx.record.get(other).cloned().unwrap_or(Value::Null),
        (None, Some(value)) => value.clone(),
        (None, None) => Value::Null,
    };

    let ordering = || compare_values(&left, &right);
    let holds = match operator {
        CrossFieldOperator::Eq => values_equal(&left, &right),
        CrossFieldOperator::Ne => !values_equal(&left, &right),
        CrossFieldOperator::Lt => ordering() == Some(std::cmp::Ordering::Less),
        CrossFieldOperator::Lte => {
            matches!(ordering(), Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal))
        }
        CrossFieldOperator::Gt => ordering() == Some(std::cmp::Ordering::Greater),
        CrossFieldOperator::Gte => {
            matches!(ordering(), Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal))
        }
        CrossFieldOperator::In => right
            .as_array()
            .is_some_and(|list| list.iter().any(|v| values_equal(&left, v))),
        CrossFieldOperator::NotIn => !right
            .as_array()
            .is_some_and(|list| list.iter().any(|v| values_equal(&left, v))),
        CrossFieldOperator::Contains => match &left {
            Value::String(s) => right.as_str().is_some_and(|sub| s.contains(sub)),
            Value::Array(items) => items.iter().any(|v| values_equal(v, &right)),
            _ => false,
        },
    };

    if holds {
        Vec::new()
    } else {
        let target = compare_to
            .map(|other| format!("field '{other}'"))
            .unwrap_or_else(|| format!("{right}"));
        vec![issue(
            rule,
            Some(field),
            "cross_field",
            format!("field '{field}' must be {} {target}", cross_op_label(operator)),
            ctx,
            &[],
        )]
    }
}

fn cross_op_label(operator: CrossFieldOperator) -> &'static str {
    match operator {
        CrossFieldOperator::Eq => "equal to",
        CrossFieldOperator::Ne => "different from",
        CrossFieldOperator::Lt => "less than",
        CrossFieldOperator::Lte => "at most",
        CrossFieldOperator::Gt => "greater than",
        CrossFieldOperator::Gte => "at least",
        CrossFieldOperator::In => "one of",
        CrossFieldOperator::NotIn => "none of",
        CrossFieldOperator::Contains => "containing",
    }
}

// ── state machines ─────────────────────────────────────────

fn check_state_machine(
    rule: &ValidationRule,
    field: &str,
    transitions: &std::collections::BTreeMap<String, crate::metadata::StateTransition>,
    ctx: &ValidationContext<'_>,
) -> Vec<ValidationIssue> {
    let new = match ctx.record.get(field).and_then(Value::as_str) {
        Some(new) => new,
        // The write does not touch the state field.
        None => return Vec::new(),
    };
    let old = match ctx.previous.and_then(|p| p.get(field)).and_then(Value::as_str) {
        Some(old) => old,
        // First assignment; any initial state is allowed.
        None => return Vec::new(),
    };
    if old == new {
        return Vec::new();
    }

    let allowed = transitions
        .get(old)
        .is_some_and(|t| !t.is_terminal && t.allowed_next.iter().any(|s| s == new));
    if allowed {
        return Vec::new();
    }

    let extra = [
        ("old_status", old.to_string()),
        ("new_status", new.to_string()),
    ];
    vec![issue(
        rule,
        Some(field),
        "INVALID_STATE_TRANSITION",
        format!("invalid transition of '{field}' from '{old}' to '{new}'"),
        ctx,
        &extra,
    )]
}

// ── message templating ─────────────────────────────────────

/// Replace `{{name}}` placeholders from the extras first, then from
/// the record. Unknown placeholders stay verbatim.
fn render_template(template: &str, record: &Record, extra: &[(&str, String)]) -> String {
    let re = regex::Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("static regex");
    re.replace_all(template, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        if let Some((_, value)) = extra.iter().find(|(k, _)| *k == key) {
            return value.clone();
        }
        match record.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => caps[0].to_string(),
        }
    })
    .into_owned()
}
