use serde::Deserialize;
use time::{macros::format_description, Date};

use super::{
    repo_types::{PageRequest, UserFilter},
    services::UpdateUserInput,
};

/// Query string of `GET /users`. Every field is taken as raw text and parsed
/// leniently: bad numbers fall back to defaults, bad dates and booleans are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersQuery {
    pub page: Option<String>,
    #[serde(alias = "per_page")]
    pub page_size: Option<String>,
    pub search: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub is_admin: Option<String>,
    pub is_verified: Option<String>,
}

fn parse_int(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|v| v.trim().parse().ok())
}

/// Accepts the usual spellings: `1 t T TRUE true True` and `0 f F FALSE false False`.
fn parse_bool(raw: Option<&str>) -> Option<bool> {
    match raw?.trim() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn parse_date(raw: Option<&str>) -> Option<Date> {
    Date::parse(raw?.trim(), format_description!("[year]-[month]-[day]")).ok()
}

impl ListUsersQuery {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(
            parse_int(self.page.as_deref()),
            parse_int(self.page_size.as_deref()),
        )
    }

    pub fn filter(&self) -> UserFilter {
        UserFilter {
            search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            is_admin: parse_bool(self.is_admin.as_deref()),
            is_verified: parse_bool(self.is_verified.as_deref()),
            ..Default::default()
        }
        .with_created_range(
            parse_date(self.start_date.as_deref()),
            parse_date(self.end_date.as_deref()),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl From<UpdateUserRequest> for UpdateUserInput {
    fn from(req: UpdateUserRequest) -> Self {
        Self {
            first_name: req.first_name,
            last_name: req.last_name,
            is_admin: req.is_admin,
        }
    }
}
