//! Path traversal rejection tests.

use std::collections::HashMap;

use straylight::types::ExecutionRequest;
use straylight::workspace::{self, WorkspaceError};

fn request_with_file(name: &str) -> ExecutionRequest {
    let mut files = HashMap::new();
    files.insert(name.to_owned(), String::new());
    ExecutionRequest {
        code: String::new(),
        files: Some(files),
    }
}

#[test]
fn traversal_filenames_are_rejected() {
    for name in ["../evil.py", "..", "a/b.txt", "/etc/passwd", "a\\b", ""] {
        let result = workspace::build_archive(&request_with_file(name));
        assert!(
            matches!(result, Err(WorkspaceError::InvalidFilename(_))),
            "{name:?} should be rejected"
        );
    }
}

#[test]
fn ordinary_filenames_are_accepted() {
    for name in ["data.csv", "input.txt", ".hidden", "weird name.bin"] {
        assert!(
            workspace::build_archive(&request_with_file(name)).is_ok(),
            "{name:?} should be accepted"
        );
    }
}
