//! Page-number pagination for list endpoints.

use serde::Deserialize;

/// Upper bound accepted for `page_size`.
pub const MAX_PAGE_SIZE: u64 = 10_000;

/// `?page=&page_size=` query parameters.
///
/// Pagination only kicks in when `page` is given; `page_size` alone is
/// ignored and falls back to the configured default when absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationQueryParams {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

impl<'de> serde::de::Deserialize<'de> for PaginationQueryParams {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Schema {
            page: Option<u64>,
            page_size: Option<u64>,
        }
        let Schema { page, page_size } = Schema::deserialize(deserializer)?;
        if page == Some(0) {
            return Err(serde::de::Error::custom("invalid page 0, pages start at 1"));
        }
        if let Some(size) = page_size
            && !(0 < size && size <= MAX_PAGE_SIZE)
        {
            return Err(serde::de::Error::custom(format!(
                "invalid page size ({size}), expected an integer 0 < page_size <= {MAX_PAGE_SIZE}",
            )));
        }
        Ok(Self { page, page_size })
    }
}

/// A resolved page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u64,
    pub page_size: u64,
}

impl PaginationQueryParams {
    /// The page to fetch, or `None` when the request is unpaginated.
    pub fn page(&self, default_page_size: u64) -> Option<Page> {
        self.page.map(|page| Page {
            page,
            page_size: self
                .page_size
                .unwrap_or(default_page_size)
                .clamp(1, MAX_PAGE_SIZE),
        })
    }
}

impl Page {
    /// `(limit, offset)` for the store, or `None` when the offset overflows.
    pub fn bounds(&self) -> Option<(i64, i64)> {
        let limit = i64::try_from(self.page_size).ok()?;
        let offset = self
            .page
            .checked_sub(1)?
            .checked_mul(self.page_size)
            .and_then(|offset| i64::try_from(offset).ok())?;
        Some((limit, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_page_means_no_pagination() {
        let params: PaginationQueryParams =
            serde_json::from_value(json!({"page_size": 5})).unwrap();
        assert_eq!(params.page(100), None);
    }

    #[test]
    fn page_offsets_follow_page_size() {
        let params: PaginationQueryParams =
            serde_json::from_value(json!({"page": 3, "page_size": 20})).unwrap();
        let page = params.page(100).unwrap();
        assert_eq!(page.bounds(), Some((20, 40)));
    }

    #[test]
    fn overflowing_offsets_have_no_bounds() {
        let page = Page {
            page: u64::MAX,
            page_size: 2,
        };
        assert_eq!(page.bounds(), None);

        let page = Page {
            page: i64::MAX as u64 / 2 + 2,
            page_size: 2,
        };
        assert_eq!(page.bounds(), None);
    }

    #[test]
    fn default_page_size_applies() {
        let params: PaginationQueryParams = serde_json::from_value(json!({"page": 1})).unwrap();
        assert_eq!(
            params.page(25),
            Some(Page {
                page: 1,
                page_size: 25
            })
        );
    }

    #[test]
    fn rejects_page_zero_and_oversized_pages() {
        assert!(serde_json::from_value::<PaginationQueryParams>(json!({"page": 0})).is_err());
        assert!(
            serde_json::from_value::<PaginationQueryParams>(
                json!({"page": 1, "page_size": MAX_PAGE_SIZE + 1})
            )
            .is_err()
        );
    }
}
