use serde::{Deserialize, Serialize};

/// Caller-supplied pagination; missing or zero limits fall back to the default
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl PageRequest {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }

    pub fn resolve(&self, limits: PageLimits) -> Page {
        let limit = match self.limit {
            Some(0) | None => limits.default_limit,
            Some(requested) => requested.min(limits.max_limit),
        };
        Page {
            limit,
            offset: self.offset.unwrap_or(0),
        }
    }
}

/// Default and ceiling for one listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_limit: u32,
    pub max_limit: u32,
}

pub const CLOSED_POSITION_PAGE: PageLimits = PageLimits {
    default_limit: 50,
    max_limit: 100,
};

pub const EQUITY_PAGE: PageLimits = PageLimits {
    default_limit: 200,
    max_limit: 500,
};

pub const TRADE_PAGE: PageLimits = PageLimits {
    default_limit: 50,
    max_limit: 100,
};

pub const TRADE_FEED_PAGE: PageLimits = PageLimits {
    default_limit: 20,
    max_limit: 50,
};

pub const LEADERBOARD_PAGE: PageLimits = PageLimits {
    default_limit: 50,
    max_limit: 100,
};

/// Resolved limit/offset pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing_or_zero() {
        let page = PageRequest::default().resolve(EQUITY_PAGE);
        assert_eq!(page, Page { limit: 200, offset: 0 });

        let page = PageRequest::new(0, 5).resolve(CLOSED_POSITION_PAGE);
        assert_eq!(page, Page { limit: 50, offset: 5 });
    }

    #[test]
    fn test_limit_is_clamped() {
        let page = PageRequest::new(10_000, 0).resolve(CLOSED_POSITION_PAGE);
        assert_eq!(page.limit, 100);

        assert_eq!(PageRequest::default().resolve(TRADE_FEED_PAGE).limit, 20);
        assert_eq!(PageRequest::new(500, 0).resolve(TRADE_FEED_PAGE).limit, 50);
    }

    #[test]
    fn test_apply_slices() {
        let page = PageRequest::new(2, 1).resolve(TRADE_PAGE);
        assert_eq!(page.apply(vec![1, 2, 3, 4]), vec![2, 3]);
        assert!(PageRequest::new(2, 10).resolve(TRADE_PAGE).apply(vec![1, 2]).is_empty());
    }
}
