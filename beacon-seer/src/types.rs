use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A grouping record of a single issue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateGroupingRecordData {
    /// The issue the record belongs to.
    pub group_id: u64,
    /// The primary hash of the issue.
    pub hash: String,
    /// The project of the issue.
    pub project_id: u64,
    /// The issue's title.
    pub message: String,
    /// The type of the top exception, if any.
    pub exception_type: Option<String>,
}

/// A batch of grouping records to upload.
///
/// `group_id_list`, `data` and `stacktrace_list` are parallel lists.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateGroupingRecordsRequest {
    /// Ids of the submitted issues.
    pub group_id_list: Vec<u64>,
    /// One record per issue.
    pub data: Vec<CreateGroupingRecordData>,
    /// The stack trace of every issue, rendered as text.
    pub stacktrace_list: Vec<String>,
}

impl CreateGroupingRecordsRequest {
    /// Returns the project of the first record.
    pub fn project_id(&self) -> Option<u64> {
        self.data.first().map(|record| record.project_id)
    }

    /// Returns the total number of characters of all stack traces.
    pub fn stacktrace_length_sum(&self) -> usize {
        self.stacktrace_list
            .iter()
            .map(|stacktrace| stacktrace.chars().count())
            .sum()
    }
}

/// The nearest neighbor of a submitted issue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimilarIssueData {
    /// Distance between the stack traces.
    pub stacktrace_distance: f64,
    /// Distance between the messages.
    pub message_distance: f64,
    /// Whether the issues should be merged.
    pub should_group: bool,
    /// Hash of the neighboring issue.
    pub parent_hash: String,
}

/// Response to a bulk upload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulkCreateGroupingRecordsResponse {
    /// Whether the records were stored.
    pub success: bool,
    /// Neighbors found for the submitted issues, keyed by group id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups_with_neighbor: Option<HashMap<String, SimilarIssueData>>,
}

impl BulkCreateGroupingRecordsResponse {
    /// A successful response without neighbors.
    pub fn success() -> Self {
        Self {
            success: true,
            groups_with_neighbor: None,
        }
    }

    /// An unsuccessful response.
    pub fn failure() -> Self {
        Self {
            success: false,
            groups_with_neighbor: None,
        }
    }
}

/// Body of a request deleting grouping records by hash.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct DeleteGroupingRecordsByHashRequest<'a> {
    /// The project the hashes belong to.
    pub project_id: u64,
    /// Hashes of the records to delete.
    pub hash_list: &'a [String],
}

#[cfg(test)]
mod tests {
    use insta::assert_json_snapshot;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = CreateGroupingRecordsRequest {
            group_id_list: vec![1],
            data: vec![CreateGroupingRecordData {
                group_id: 1,
                hash: "abc".to_owned(),
                project_id: 2,
                message: "ZeroDivisionError".to_owned(),
                exception_type: None,
            }],
            stacktrace_list: vec!["frame".to_owned()],
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "group_id_list": [1],
                "data": [{
                    "group_id": 1,
                    "hash": "abc",
                    "project_id": 2,
                    "message": "ZeroDivisionError",
                    "exception_type": null
                }],
                "stacktrace_list": ["frame"]
            })
        );
        assert_eq!(request.project_id(), Some(2));
        assert_eq!(request.stacktrace_length_sum(), 5);
    }

    #[test]
    fn test_response_without_neighbors() {
        let response: BulkCreateGroupingRecordsResponse =
            serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert_eq!(response, BulkCreateGroupingRecordsResponse::success());
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"success":true}"#
        );
    }

    #[test]
    fn test_response_with_neighbors() {
        let response: BulkCreateGroupingRecordsResponse = serde_json::from_value(json!({
            "success": true,
            "groups_with_neighbor": {
                "1": {
                    "stacktrace_distance": 0.01,
                    "message_distance": 0.05,
                    "should_group": true,
                    "parent_hash": "def"
                }
            }
        }))
        .unwrap();

        assert_json_snapshot!(response, @r###"
        {
          "success": true,
          "groups_with_neighbor": {
            "1": {
              "stacktrace_distance": 0.01,
              "message_distance": 0.05,
              "should_group": true,
              "parent_hash": "def"
            }
          }
        }
        "###);
    }

    #[test]
    fn test_delete_by_hash_wire_format() {
        let hashes = vec!["a".to_owned(), "b".to_owned()];
        let request = DeleteGroupingRecordsByHashRequest {
            project_id: 3,
            hash_list: &hashes,
        };
        assert_eq!(
            serde_json::to_value(request).unwrap(),
            json!({"project_id": 3, "hash_list": ["a", "b"]})
        );
    }
}
