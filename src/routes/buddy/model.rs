use serde::{Deserialize, Serialize};

use crate::domain::models::{BuddyRequest, RequestDirection};
use crate::utils::PaginationQuery;

#[derive(Debug, Deserialize)]
pub struct BuddyListQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub page: PaginationQuery,
}

impl BuddyListQuery {
    /// Anything other than `outgoing` lists incoming requests.
    pub fn direction(&self) -> RequestDirection {
        match self.kind.as_deref() {
            Some("outgoing") => RequestDirection::Outgoing,
            _ => RequestDirection::Incoming,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RespondBuddyRequest {
    pub accept: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct BuddyMessage {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MutualAccept {
    pub message: &'static str,
    pub request: BuddyRequest,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, RequestDirection::Incoming)]
    #[case(Some("incoming"), RequestDirection::Incoming)]
    #[case(Some("outgoing"), RequestDirection::Outgoing)]
    #[case(Some("sideways"), RequestDirection::Incoming)]
    fn list_direction_defaults_to_incoming(
        #[case] kind: Option<&str>,
        #[case] expected: RequestDirection,
    ) {
        let query = BuddyListQuery {
            kind: kind.map(str::to_string),
            page: PaginationQuery::default(),
        };
        assert_eq!(query.direction(), expected);
    }
}
