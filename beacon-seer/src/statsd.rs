use beacon_metrics::{CounterMetric, TimerMetric};

/// Counter metrics of the similarity service client.
pub enum SeerCounters {
    /// Number of bulk grouping record uploads.
    ///
    /// This metric is tagged with:
    /// - `result`: `success`, `timeout` or `failure`.
    BulkRecordsPosted,
    /// Number of neighbors returned for groups that were not part of the upload.
    ///
    /// These neighbors are dropped from the response.
    UnknownNeighborGroups,
    /// Number of project-wide grouping record deletions.
    ///
    /// This metric is tagged with:
    /// - `result`: `success`, `timeout` or `failure`.
    ProjectRecordsDeleted,
    /// Number of grouping record deletions by hash.
    ///
    /// This metric is tagged with:
    /// - `result`: `success`, `timeout` or `failure`.
    HashRecordsDeleted,
}

impl CounterMetric for SeerCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::BulkRecordsPosted => "seer.grouping_records.bulk_create",
            Self::UnknownNeighborGroups => "seer.grouping_records.unknown_neighbor",
            Self::ProjectRecordsDeleted => "seer.grouping_records.delete_project",
            Self::HashRecordsDeleted => "seer.grouping_records.delete_by_hash",
        }
    }
}

/// Timer metrics of the similarity service client.
pub enum SeerTimers {
    /// Duration of a bulk grouping record upload, including parsing the response.
    ///
    /// This metric is tagged with:
    /// - `result`: `success` or `failure`.
    BulkRecordsDuration,
}

impl TimerMetric for SeerTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::BulkRecordsDuration => "seer.grouping_records.bulk_create.duration",
        }
    }
}
