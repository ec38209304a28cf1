//! Query-string interpretation and pagination math shared by the listing
//! endpoints. Kept free of database types so it can be tested directly.

use std::collections::HashMap;

use chrono::NaiveDate;
use uuid::Uuid;

pub const MEMBER_PAGE_SIZE: i64 = 10;
pub const ADMIN_PAGE_SIZE: i64 = 12;

const QUERY_DATE_FORMAT: &str = "%d/%m/%Y";

/// What the free-text query parses to beyond plain text. Parse failures
/// mean "no scalar match", never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarQuery {
    None,
    Date(NaiveDate),
    Number(i32),
}

#[derive(Debug, Clone)]
pub struct SearchTerms {
    pub text: String,
    pub scalar: ScalarQuery,
}

impl SearchTerms {
    /// Day/month/year takes precedence, then integer; anything else
    /// matches as substring text only. Blank input means no search.
    pub fn parse(raw: &str) -> Option<Self> {
        let text = raw.trim();
        if text.is_empty() {
            return None;
        }

        let scalar = if let Ok(date) = NaiveDate::parse_from_str(text, QUERY_DATE_FORMAT) {
            ScalarQuery::Date(date)
        } else if let Ok(number) = text.parse::<i32>() {
            ScalarQuery::Number(number)
        } else {
            ScalarQuery::None
        };

        Some(Self {
            text: text.to_string(),
            scalar,
        })
    }

    pub fn pattern(&self) -> String {
        format!("%{}%", self.text)
    }
}

/// Active-tab selector: non-negative integer, anything else coerces to 0.
pub fn parse_tab(raw: Option<&str>) -> i32 {
    raw.and_then(|value| value.trim().parse::<i32>().ok())
        .filter(|tab| *tab >= 0)
        .unwrap_or(0)
}

/// Name of the per-department page cursor parameter.
pub fn page_param(department_id: Uuid) -> String {
    format!("page_{department_id}")
}

/// Requested page number for `key`, defaulting malformed or missing
/// values to the first page.
pub fn requested_page(params: &HashMap<String, String>, key: &str) -> i64 {
    params
        .get(key)
        .and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|page| *page >= 1)
        .unwrap_or(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageBounds {
    pub page: i64,
    pub total_pages: i64,
    pub offset: i64,
}

/// Out-of-range requests clamp to the last page; an empty result set
/// still reports one (empty) page.
pub fn page_bounds(total: i64, page_size: i64, requested: i64) -> PageBounds {
    let total_pages = if total <= 0 {
        1
    } else {
        (total + page_size - 1) / page_size
    };
    let page = requested.clamp(1, total_pages);
    PageBounds {
        page,
        total_pages,
        offset: (page - 1) * page_size,
    }
}
