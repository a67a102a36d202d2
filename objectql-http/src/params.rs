//! Parsing of the wire argument shapes shared by the operation
//! envelope and the REST adapter.

use serde_json::{Map, Value};

use objectql_core::{
    normalize, Error, FilterCondition, QueryAst, Record, Result, SortOrder, SortSpec,
};

/// Parse the `filters` argument (any normalizable spelling).
pub fn parse_filters(value: Option<&Value>) -> Result<Option<FilterCondition>> {
    match value {
        Some(value) => normalize(value),
        None => Ok(None),
    }
}

/// Parse a `sort` argument: an array of `{ field, order }` objects or
/// `"field"` / `"field desc"` strings, or one such string with commas.
pub fn parse_sort(value: &Value) -> Result<Vec<SortSpec>> {
    match value {
        Value::String(spec) => spec
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_sort_token)
            .collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(token) => parse_sort_token(token),
                Value::Object(_) => serde_json::from_value(item.clone())
                    .map_err(|e| Error::validation(format!("malformed sort entry: {e}"))),
                other => Err(Error::validation(format!(
                    "unsupported sort entry: {other}"
                ))),
            })
            .collect(),
        other => Err(Error::validation(format!("unsupported sort form: {other}"))),
    }
}

fn parse_sort_token(token: &str) -> Result<SortSpec> {
    let mut parts = token.split_whitespace();
    let field = parts
        .next()
        .ok_or_else(|| Error::validation("empty sort token"))?;
    let order = match parts.next() {
        None => SortOrder::Asc,
        Some(dir) if dir.eq_ignore_ascii_case("asc") => SortOrder::Asc,
        Some(dir) if dir.eq_ignore_ascii_case("desc") => SortOrder::Desc,
        Some(dir) => {
            return Err(Error::validation(format!("unknown sort direction '{dir}'")))
        }
    };
    Ok(SortSpec {
        field: field.to_string(),
        order,
    })
}

fn parse_string_list(value: &Value, what: &str) -> Result<Vec<String>> {
    match value {
        Value::String(one) => Ok(one
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    Error::validation(format!("{what} entries must be strings"))
                })
            })
            .collect(),
        other => Err(Error::validation(format!("unsupported {what} form: {other}"))),
    }
}

fn parse_limit(value: &Value, what: &str) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| Error::validation(format!("{what} must be a non-negative integer")))
}

/// The parsed read arguments of `find` / REST list requests.
pub struct FindArgs {
    pub query: QueryAst,
    pub expand: Vec<String>,
}

/// Build a [`QueryAst`] from envelope args:
/// `{ fields?, filters?, sort?, limit|top?, skip|offset?, expand? }`.
pub fn parse_find_args(object: &str, args: &Map<String, Value>) -> Result<FindArgs> {
    let mut query = QueryAst::new(object);
    if let Some(fields) = args.get("fields") {
        query.fields = Some(parse_string_list(fields, "fields")?);
    }
    query.filter = parse_filters(args.get("filters").or_else(|| args.get("filter")))?;
    if let Some(sort) = args.get("sort") {
        query.order_by = parse_sort(sort)?;
    }
    if let Some(limit) = args.get("limit").or_else(|| args.get("top")) {
        query.limit = Some(parse_limit(limit, "limit")?);
    }
    if let Some(offset) = args.get("skip").or_else(|| args.get("offset")) {
        query.offset = Some(parse_limit(offset, "skip")?);
    }
    let expand = match args.get("expand") {
        Some(expand) => parse_string_list(expand, "expand")?,
        None => Vec::new(),
    };
    Ok(FindArgs { query, expand })
}

/// Page metadata for list responses carrying a total.
pub fn list_meta(total: u64, limit: u64, offset: u64, returned: usize) -> Value {
    let size = limit.max(1);
    let page = offset / size + 1;
    let pages = total.div_ceil(size);
    serde_json::json!({
        "total": total,
        "page": page,
        "size": limit,
        "pages": pages,
        "has_next": (offset + returned as u64) < total,
    })
}

/// A single-record response: the record plus its `@type` tag.
pub fn with_type(record: Record, object: &str) -> Value {
    let mut record = record;
    record.insert("@type".to_string(), Value::String(object.to_string()));
    Value::Object(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sort_spellings() {
        let specs = parse_sort(&json!("name, created_at desc")).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].field, "name");
        assert_eq!(specs[0].order, SortOrder::Asc);
        assert_eq!(specs[1].order, SortOrder::Desc);

        let specs = parse_sort(&json!([{ "field": "n", "order": "desc" }, "m asc"])).unwrap();
        assert_eq!(specs[0].order, SortOrder::Desc);
        assert_eq!(specs[1].field, "m");

        assert!(parse_sort(&json!("name sideways")).is_err());
    }

    #[test]
    fn find_args_accept_aliases() {
        let args = json!({
            "fields": ["a", "b"],
            "filters": [["a", "=", 1]],
            "top": 10,
            "offset": 20,
            "expand": "owner",
        });
        let parsed = parse_find_args("todo", args.as_object().unwrap()).unwrap();
        assert_eq!(parsed.query.object, "todo");
        assert_eq!(parsed.query.fields.as_ref().unwrap().len(), 2);
        assert!(parsed.query.filter.is_some());
        assert_eq!(parsed.query.limit, Some(10));
        assert_eq!(parsed.query.offset, Some(20));
        assert_eq!(parsed.expand, ["owner"]);
    }

    #[test]
    fn meta_math() {
        let meta = list_meta(10, 3, 6, 3);
        assert_eq!(meta["total"], 10);
        assert_eq!(meta["page"], 3);
        assert_eq!(meta["pages"], 4);
        assert_eq!(meta["has_next"], true);

        let meta = list_meta(10, 5, 5, 5);
        assert_eq!(meta["has_next"], false);
    }
}
