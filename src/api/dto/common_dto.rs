//! Shared DTO types used across multiple endpoints.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::Kwh;
use crate::error::LedgerError;

/// Pagination query parameters for list endpoints.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationParams {
    /// Page number (1-indexed). Defaults to 1.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Items per page (max 100). Defaults to 20.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

/// Pagination metadata included in list responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaginationMeta {
    /// Current page number.
    pub page: u32,
    /// Items per page.
    pub per_page: u32,
    /// Total number of items.
    pub total: u32,
    /// Total number of pages.
    pub total_pages: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PaginationParams {
    /// Clamps `per_page` to the allowed maximum of 100.
    #[must_use]
    pub fn clamped(&self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, 100),
        }
    }

    /// Returns the requested page of `items` with its metadata.
    #[must_use]
    pub fn paginate<T>(&self, items: Vec<T>) -> (Vec<T>, PaginationMeta) {
        let params = self.clamped();
        let total = u32::try_from(items.len()).unwrap_or(u32::MAX);
        let total_pages = if total == 0 {
            0
        } else {
            total.div_ceil(params.per_page)
        };
        let start = (params.page.saturating_sub(1) as usize).saturating_mul(params.per_page as usize);
        let data = items
            .into_iter()
            .skip(start)
            .take(params.per_page as usize)
            .collect();
        (
            data,
            PaginationMeta {
                page: params.page,
                per_page: params.per_page,
                total,
                total_pages,
            },
        )
    }
}

/// Parses an optional decimal string field into kWh.
///
/// # Errors
///
/// Returns [`LedgerError::InvalidValue`] naming `field` if the value is not
/// a finite decimal number.
pub fn parse_kwh(field: &str, raw: Option<&str>) -> Result<Option<Kwh>, LedgerError> {
    raw.map(|value| {
        value
            .parse::<Kwh>()
            .map_err(|e| LedgerError::InvalidValue(format!("{field}: {e}")))
    })
    .transpose()
}

/// Parses an optional decimal string field.
///
/// # Errors
///
/// Returns [`LedgerError::InvalidValue`] naming `field` on malformed input.
pub fn parse_decimal(
    field: &str,
    raw: Option<&str>,
) -> Result<Option<rust_decimal::Decimal>, LedgerError> {
    raw.map(|value| {
        value
            .trim()
            .parse::<rust_decimal::Decimal>()
            .map_err(|e| LedgerError::InvalidValue(format!("{field}: {e}")))
    })
    .transpose()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn paginate_returns_requested_slice() {
        let params = PaginationParams {
            page: 2,
            per_page: 2,
        };
        let (data, meta) = params.paginate(vec![1, 2, 3, 4, 5]);
        assert_eq!(data, vec![3, 4]);
        assert_eq!(meta.total, 5);
        assert_eq!(meta.total_pages, 3);
    }

    #[test]
    fn paginate_clamps_page_size() {
        let params = PaginationParams {
            page: 0,
            per_page: 1_000,
        };
        let (data, meta) = params.paginate((0..150).collect::<Vec<u32>>());
        assert_eq!(data.len(), 100);
        assert_eq!(meta.page, 1);
        assert_eq!(meta.per_page, 100);
    }

    #[test]
    fn empty_list_has_no_pages() {
        let (data, meta) = PaginationParams::default().paginate(Vec::<u8>::new());
        assert!(data.is_empty());
        assert_eq!(meta.total_pages, 0);
    }

    #[test]
    fn parse_kwh_names_the_field() {
        let Err(LedgerError::InvalidValue(msg)) = parse_kwh("balance_kwh", Some("x")) else {
            panic!("expected invalid value");
        };
        assert!(msg.starts_with("balance_kwh"));
        assert!(matches!(parse_kwh("balance_kwh", None), Ok(None)));
        assert!(matches!(
            parse_kwh("balance_kwh", Some("12.5")),
            Ok(Some(v)) if v == Kwh::from_parts(125, 1)
        ));
    }
}
