use serde::{Deserialize, Serialize};

/// A page of objects returned by a list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse<T> {
    /// The objects on this page.
    pub data: Vec<T>,

    /// Identifier of the first object on the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_id: Option<String>,

    /// Identifier of the last object on the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_id: Option<String>,

    /// Whether more pages are available.
    #[serde(default)]
    pub has_more: bool,
}

/// Sort order for list endpoints.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ListOrder {
    /// Oldest first.
    Asc,

    /// Newest first.
    #[default]
    Desc,
}

impl ListOrder {
    /// The query-string value.
    pub fn as_str(self) -> &'static str {
        match self {
            ListOrder::Asc => "asc",
            ListOrder::Desc => "desc",
        }
    }
}

/// Query parameters for listing the messages of a thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListMessagesParams {
    /// Sort order by creation time.
    pub order: ListOrder,

    /// Maximum number of messages to return.
    pub limit: Option<u32>,

    /// Only return messages produced by this run.
    pub run_id: Option<String>,
}

impl ListMessagesParams {
    /// Newest-first listing restricted to one run.
    pub fn for_run(run_id: impl Into<String>) -> Self {
        Self {
            order: ListOrder::Desc,
            limit: Some(20),
            run_id: Some(run_id.into()),
        }
    }

    /// Key/value pairs to append to the request URL.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("order", self.order.as_str().to_string())];
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(run_id) = &self.run_id {
            pairs.push(("run_id", run_id.clone()));
        }
        pairs
    }
}
