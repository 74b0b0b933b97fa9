use proptest::prelude::*;

use imgproc_dispatcher::Operation;

/// Strategy for generating file names without separators
pub fn file_name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,24}\\.(jpg|png)"
}

/// Strategy for generating blob URLs
pub fn reference_strategy() -> impl Strategy<Value = String> {
    "https://blob\\.example/[a-z0-9]{1,16}/[a-z0-9_]{1,16}\\.jpg"
}

pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop::sample::select(Operation::ALL.to_vec())
}

/// Strategy for generating well-formed queue messages
pub fn queue_message_strategy() -> impl Strategy<Value = String> {
    (
        file_name_strategy(),
        operation_strategy(),
        reference_strategy(),
        file_name_strategy(),
    )
        .prop_map(|(file, operation, reference, second)| {
            if operation.requires_secondary_reference() {
                format!("{file},{operation},{reference},{second}")
            } else {
                format!("{file},{operation},{reference}")
            }
        })
}
