//! # Task Model
//!
//! An image-processing unit of work: a file, the operation to run on it, and the
//! blob references the worker needs. Tasks are immutable once created; identity is
//! the file name plus the arrival sequence assigned when the task enters the
//! pending queue, so duplicate submissions remain independent tasks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported image-processing operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    WatershedSegmentation,
    CannyEdgeDetector,
    FaceDetection,
    FeatureMatching,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::WatershedSegmentation,
        Operation::CannyEdgeDetector,
        Operation::FaceDetection,
        Operation::FeatureMatching,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::WatershedSegmentation => "watershed_segmentation",
            Operation::CannyEdgeDetector => "canny_edge_detector",
            Operation::FaceDetection => "face_detection",
            Operation::FeatureMatching => "feature_matching",
        }
    }

    /// Feature matching compares two images and needs a second source reference
    pub fn requires_secondary_reference(&self) -> bool {
        matches!(self, Operation::FeatureMatching)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = TaskParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| TaskParseError::UnknownOperation(s.to_string()))
    }
}

/// Errors raised when a queue descriptor or wire message cannot be turned into a task
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskParseError {
    #[error("expected {expected} comma-separated fields, found {found}")]
    FieldCount { expected: &'static str, found: usize },

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("file name is empty")]
    EmptyFileName,

    #[error("source reference is empty")]
    EmptyReference,

    #[error("operation feature_matching requires a secondary reference")]
    MissingSecondaryReference,

    #[error("operation {0} does not take a secondary reference")]
    UnexpectedSecondaryReference(Operation),
}

/// A parsed task descriptor, before it is assigned an arrival sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub file_name: String,
    pub operation: Operation,
    pub primary_reference: String,
    pub secondary_reference: Option<String>,
}

impl TaskDescriptor {
    pub fn new(
        file_name: impl Into<String>,
        operation: Operation,
        primary_reference: impl Into<String>,
        secondary_reference: Option<String>,
    ) -> Result<Self, TaskParseError> {
        let descriptor = Self {
            file_name: file_name.into(),
            operation,
            primary_reference: primary_reference.into(),
            secondary_reference,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Parse an external queue message: `fileName,operation,sourceURL[,secondaryReference]`
    pub fn parse_queue_message(content: &str) -> Result<Self, TaskParseError> {
        let fields: Vec<&str> = content.trim().split(',').map(str::trim).collect();

        if !(3..=4).contains(&fields.len()) {
            return Err(TaskParseError::FieldCount {
                expected: "3 or 4",
                found: fields.len(),
            });
        }

        let operation: Operation = fields[1].parse()?;
        Self::new(
            fields[0],
            operation,
            fields[2],
            fields.get(3).map(|s| s.to_string()),
        )
    }

    fn validate(&self) -> Result<(), TaskParseError> {
        if self.file_name.is_empty() {
            return Err(TaskParseError::EmptyFileName);
        }
        if self.primary_reference.is_empty() {
            return Err(TaskParseError::EmptyReference);
        }

        match (
            self.operation.requires_secondary_reference(),
            self.secondary_reference.as_deref(),
        ) {
            (true, None) => Err(TaskParseError::MissingSecondaryReference),
            (true, Some("")) => Err(TaskParseError::EmptyReference),
            (false, Some(_)) => Err(TaskParseError::UnexpectedSecondaryReference(
                self.operation,
            )),
            _ => Ok(()),
        }
    }
}

/// A task admitted to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    sequence: u64,
    #[serde(flatten)]
    descriptor: TaskDescriptor,
}

impl Task {
    pub fn new(sequence: u64, descriptor: TaskDescriptor) -> Self {
        Self {
            sequence,
            descriptor,
        }
    }

    /// Arrival order within the owning dispatcher
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn file_name(&self) -> &str {
        &self.descriptor.file_name
    }

    pub fn operation(&self) -> Operation {
        self.descriptor.operation
    }

    pub fn secondary_reference(&self) -> Option<&str> {
        self.descriptor.secondary_reference.as_deref()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} ({})",
            self.sequence, self.descriptor.file_name, self.descriptor.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_round_trip_names() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        assert_eq!(
            "sharpen".parse::<Operation>(),
            Err(TaskParseError::UnknownOperation("sharpen".to_string()))
        );
    }

    #[test]
    fn test_parse_single_image_message() {
        let descriptor =
            TaskDescriptor::parse_queue_message("a.jpg,canny_edge_detector,https://x/a.jpg")
                .unwrap();
        assert_eq!(descriptor.file_name, "a.jpg");
        assert_eq!(descriptor.operation, Operation::CannyEdgeDetector);
        assert_eq!(descriptor.primary_reference, "https://x/a.jpg");
        assert!(descriptor.secondary_reference.is_none());
    }

    #[test]
    fn test_parse_feature_matching_message() {
        let descriptor = TaskDescriptor::parse_queue_message(
            "left.jpg,feature_matching,https://x/left.jpg,right.jpg\n",
        )
        .unwrap();
        assert_eq!(descriptor.operation, Operation::FeatureMatching);
        assert_eq!(descriptor.secondary_reference.as_deref(), Some("right.jpg"));
    }

    #[test]
    fn test_parse_rejects_malformed_messages() {
        assert!(matches!(
            TaskDescriptor::parse_queue_message("a.jpg,canny_edge_detector"),
            Err(TaskParseError::FieldCount { found: 2, .. })
        ));
        assert_eq!(
            TaskDescriptor::parse_queue_message("a.jpg,blur,https://x/a.jpg"),
            Err(TaskParseError::UnknownOperation("blur".to_string()))
        );
        assert_eq!(
            TaskDescriptor::parse_queue_message(",face_detection,https://x/a.jpg"),
            Err(TaskParseError::EmptyFileName)
        );
        assert_eq!(
            TaskDescriptor::parse_queue_message("a.jpg,feature_matching,https://x/a.jpg"),
            Err(TaskParseError::MissingSecondaryReference)
        );
        assert_eq!(
            TaskDescriptor::parse_queue_message("a.jpg,face_detection,https://x/a.jpg,b.jpg"),
            Err(TaskParseError::UnexpectedSecondaryReference(
                Operation::FaceDetection
            ))
        );
    }

    #[test]
    fn test_duplicate_submissions_are_distinct_tasks() {
        let descriptor =
            TaskDescriptor::parse_queue_message("a.jpg,face_detection,https://x/a.jpg").unwrap();
        let first = Task::new(1, descriptor.clone());
        let second = Task::new(2, descriptor);
        assert_ne!(first, second);
        assert_eq!(first.file_name(), second.file_name());
    }
}
