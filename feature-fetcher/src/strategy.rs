//! Pagination strategies.
//!
//! Each strategy is a small state machine: `CursorState` describes the next
//! page to request and `CursorState::advance` decides, from the page just
//! received, whether another request is needed. Neither does any I/O.

use crate::page::FeaturePage;
use crate::query::{FeatureQuery, PageParams};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attributes checked for an object id when the query has no order field, or
/// when a feature lacks it.
pub const KNOWN_ID_FIELDS: &[&str] = &["ESRI_OID", "OBJECTID", "OID"];

/// Id field assumed by the cursor strategy when the query names none.
pub const DEFAULT_ID_FIELD: &str = "OBJECTID";

pub const DEFAULT_SINGLE_SHOT_RECORD_COUNT: u32 = 32000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// `resultOffset` paging ordered by the id field.
    Offset,
    /// `id > watermark` paging, for services that reject offsets.
    Cursor,
    /// One large request, for services that reject both.
    SingleShot,
}

impl Strategy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Strategy::Offset => "offset",
            Strategy::Cursor => "cursor",
            Strategy::SingleShot => "single_shot",
        }
    }

    pub fn initial_state(&self, single_shot_record_count: u32) -> CursorState {
        match self {
            Strategy::Offset => CursorState::Offset { page_index: 0 },
            Strategy::Cursor => CursorState::Watermark { last_seen: None },
            Strategy::SingleShot => CursorState::SingleShot {
                record_count: single_shot_record_count,
            },
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CursorState {
    Offset { page_index: u64 },
    Watermark { last_seen: Option<i64> },
    SingleShot { record_count: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Fewer records than requested came back.
    ShortPage,
    /// The service did not flag more records beyond this page.
    NoMoreRecords,
    EmptyPage,
    /// The watermark did not move forward.
    NoProgress,
    SafetyCap,
    SinglePage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Continue(CursorState),
    Done(StopReason),
}

impl CursorState {
    pub fn strategy(&self) -> Strategy {
        match self {
            CursorState::Offset { .. } => Strategy::Offset,
            CursorState::Watermark { .. } => Strategy::Cursor,
            CursorState::SingleShot { .. } => Strategy::SingleShot,
        }
    }

    pub fn page_params(&self, query: &FeatureQuery) -> PageParams {
        match self {
            CursorState::Offset { page_index } => PageParams {
                where_clause: query.where_clause.to_string(),
                record_count: query.page_size,
                result_offset: Some(page_index * u64::from(query.page_size)),
                order_by: query.order_field.as_ref().map(|f| format!("{f} ASC")),
            },
            CursorState::Watermark { last_seen } => {
                let id_field = cursor_field(query);
                let where_clause = match last_seen {
                    None => query.where_clause.to_string(),
                    Some(id) => query.where_clause.and(&format!("{id_field} > {id}")),
                };
                PageParams {
                    where_clause,
                    record_count: query.page_size,
                    result_offset: None,
                    order_by: Some(format!("{id_field} ASC")),
                }
            }
            CursorState::SingleShot { record_count } => PageParams {
                where_clause: query.where_clause.to_string(),
                record_count: *record_count,
                result_offset: None,
                order_by: query.order_field.as_ref().map(|f| format!("{f} ASC")),
            },
        }
    }

    /// Decides what follows `page`. `accumulated` is the record count after
    /// this page was added.
    pub fn advance(
        &self,
        query: &FeatureQuery,
        page: &FeaturePage,
        accumulated: usize,
        safety_cap: usize,
    ) -> Step {
        let returned = page.features.len();
        let short_page = returned < query.page_size as usize;

        match self {
            CursorState::Offset { page_index } => {
                if accumulated >= safety_cap {
                    Step::Done(StopReason::SafetyCap)
                } else if returned == 0 {
                    Step::Done(StopReason::EmptyPage)
                } else if short_page {
                    Step::Done(StopReason::ShortPage)
                } else if !page.exceeded_transfer_limit {
                    Step::Done(StopReason::NoMoreRecords)
                } else {
                    Step::Continue(CursorState::Offset {
                        page_index: page_index + 1,
                    })
                }
            }
            CursorState::Watermark { last_seen } => {
                if returned == 0 {
                    return Step::Done(StopReason::EmptyPage);
                }
                let max_id = max_id(query, page);
                let progressed = match (max_id, last_seen) {
                    (None, _) => false,
                    (Some(max), Some(last)) => max > *last,
                    (Some(_), None) => true,
                };
                if !progressed {
                    Step::Done(StopReason::NoProgress)
                } else if accumulated >= safety_cap {
                    Step::Done(StopReason::SafetyCap)
                } else if short_page {
                    Step::Done(StopReason::ShortPage)
                } else {
                    Step::Continue(CursorState::Watermark { last_seen: max_id })
                }
            }
            CursorState::SingleShot { .. } => Step::Done(StopReason::SinglePage),
        }
    }
}

fn cursor_field(query: &FeatureQuery) -> &str {
    query.order_field.as_deref().unwrap_or(DEFAULT_ID_FIELD)
}

/// Largest object id on the page, reading the query's order field first and
/// the well-known id attributes after it.
fn max_id(query: &FeatureQuery, page: &FeaturePage) -> Option<i64> {
    page.features
        .iter()
        .filter_map(|feature| {
            query
                .order_field
                .iter()
                .map(String::as_str)
                .chain(KNOWN_ID_FIELDS.iter().copied())
                .find_map(|field| feature.integer_attribute(field))
        })
        .max()
}
