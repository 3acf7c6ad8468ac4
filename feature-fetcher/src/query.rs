//! Immutable description of a feature-service query and the URLs built from it.

use std::fmt;
use url::Url;

pub const DEFAULT_SPATIAL_REFERENCE: u32 = 4326;
pub const DEFAULT_PAGE_SIZE: u32 = 2000;

/// The `where` filter sent to the feature service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WhereClause {
    /// Unfiltered, rendered as `1=1`.
    All,
    Raw(String),
    /// Records whose `field` is at or after the given epoch milliseconds.
    Since { field: String, epoch_millis: i64 },
}

impl WhereClause {
    pub fn is_all(&self) -> bool {
        matches!(self, WhereClause::All)
    }

    /// Attributes the filter depends on. A server error naming one of them
    /// means the filter itself is unusable on that endpoint. Raw clauses are
    /// scanned for identifiers outside string literals.
    pub fn filter_fields(&self) -> Vec<&str> {
        match self {
            WhereClause::All => Vec::new(),
            WhereClause::Since { field, .. } => vec![field.as_str()],
            WhereClause::Raw(clause) => raw_identifiers(clause),
        }
    }

    /// Combines this clause with an additional condition.
    pub fn and(&self, condition: &str) -> String {
        match self {
            WhereClause::All => condition.to_string(),
            other => format!("({other}) AND {condition}"),
        }
    }
}

const SQL_KEYWORDS: &[&str] = &[
    "AND", "BETWEEN", "DATE", "ESCAPE", "FALSE", "IN", "IS", "LIKE", "NOT", "NULL", "OR",
    "TIMESTAMP", "TRUE",
];

fn raw_identifiers(clause: &str) -> Vec<&str> {
    let mut identifiers: Vec<&str> = Vec::new();
    let mut in_literal = false;
    let mut start = None;

    for (i, c) in clause.char_indices() {
        let is_ident = c.is_ascii_alphanumeric() || c == '_';
        if in_literal {
            in_literal = c != '\'';
            continue;
        }
        match (start, is_ident) {
            (None, true) => start = Some(i),
            (Some(s), false) => {
                identifiers.push(&clause[s..i]);
                start = None;
            }
            _ => {}
        }
        in_literal = c == '\'';
    }
    if let Some(s) = start {
        identifiers.push(&clause[s..]);
    }

    identifiers.retain(|word| {
        !word.starts_with(|c: char| c.is_ascii_digit())
            && !SQL_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
    });
    identifiers.dedup();
    identifiers
}

impl fmt::Display for WhereClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WhereClause::All => f.write_str("1=1"),
            WhereClause::Raw(clause) => f.write_str(clause),
            WhereClause::Since {
                field,
                epoch_millis,
            } => write!(f, "{field} >= {epoch_millis}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutFields {
    All,
    Fields(Vec<String>),
}

impl OutFields {
    pub fn from_names(names: &[String]) -> Self {
        if names.is_empty() || names.iter().any(|n| n == "*") {
            OutFields::All
        } else {
            OutFields::Fields(names.to_vec())
        }
    }

    pub fn render(&self) -> String {
        match self {
            OutFields::All => "*".to_string(),
            OutFields::Fields(names) => names.join(","),
        }
    }
}

/// Per-page request parameters produced by a pagination strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageParams {
    pub where_clause: String,
    pub record_count: u32,
    pub result_offset: Option<u64>,
    pub order_by: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FeatureQuery {
    pub endpoint: Url,
    pub where_clause: WhereClause,
    pub out_fields: OutFields,
    pub spatial_reference: u32,
    pub page_size: u32,
    /// Stable ascending id used for ordering and as the cursor watermark.
    pub order_field: Option<String>,
}

impl FeatureQuery {
    pub fn new(endpoint: Url) -> Self {
        FeatureQuery {
            endpoint,
            where_clause: WhereClause::All,
            out_fields: OutFields::All,
            spatial_reference: DEFAULT_SPATIAL_REFERENCE,
            page_size: DEFAULT_PAGE_SIZE,
            order_field: None,
        }
    }

    pub fn with_where(mut self, where_clause: WhereClause) -> Self {
        self.where_clause = where_clause;
        self
    }

    pub fn with_out_fields(mut self, out_fields: OutFields) -> Self {
        self.out_fields = out_fields;
        self
    }

    pub fn with_spatial_reference(mut self, wkid: u32) -> Self {
        self.spatial_reference = wkid;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_order_field(mut self, field: impl Into<String>) -> Self {
        self.order_field = Some(field.into());
        self
    }

    /// The same query with the filter dropped.
    pub fn relaxed(&self) -> Self {
        self.clone().with_where(WhereClause::All)
    }

    /// Builds the URL for one page. Every value goes through the form
    /// encoder, so the filter is sent as e.g. `where=1%3D1`.
    pub fn page_url(&self, params: &PageParams) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("where", &params.where_clause)
                .append_pair("outFields", &self.out_fields.render())
                .append_pair("outSR", &self.spatial_reference.to_string())
                .append_pair("f", "json")
                .append_pair("resultRecordCount", &params.record_count.to_string());
            if let Some(offset) = params.result_offset {
                pairs.append_pair("resultOffset", &offset.to_string());
            }
            if let Some(order_by) = &params.order_by {
                pairs.append_pair("orderByFields", order_by);
            }
            pairs.append_pair("returnGeometry", "true");
        }
        url
    }

    pub fn count_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("where", &self.where_clause.to_string())
            .append_pair("returnCountOnly", "true")
            .append_pair("f", "json");
        url
    }
}
