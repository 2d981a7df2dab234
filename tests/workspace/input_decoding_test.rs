//! Input file decoding tests.

use std::collections::HashMap;
use std::io::Read as _;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use straylight::types::ExecutionRequest;
use straylight::workspace;

fn file_content(archive: &[u8], path: &str) -> Option<Vec<u8>> {
    let mut archive = tar::Archive::new(archive);
    for entry in archive.entries().expect("archive should parse") {
        let mut entry = entry.expect("entry should parse");
        let entry_path = entry.path().expect("entry path").to_string_lossy().into_owned();
        if entry_path == path {
            let mut content = Vec::new();
            entry.read_to_end(&mut content).expect("entry content");
            return Some(content);
        }
    }
    None
}

#[test]
fn base64_inputs_round_trip_byte_for_byte() {
    let payload: Vec<u8> = vec![0, 1, 2, 254, 255, 10, 13];
    let mut files = HashMap::new();
    files.insert("blob.bin".to_owned(), BASE64.encode(&payload));
    let request = ExecutionRequest {
        code: String::new(),
        files: Some(files),
    };

    let archive = workspace::build_archive(&request).expect("archive");
    assert_eq!(file_content(&archive, "files/blob.bin"), Some(payload));
}

#[test]
fn invalid_base64_becomes_an_empty_file_with_the_same_name() {
    let mut files = HashMap::new();
    files.insert("bad.bin".to_owned(), "!!!not-base64!!!".to_owned());
    let request = ExecutionRequest {
        code: String::new(),
        files: Some(files),
    };

    let archive = workspace::build_archive(&request).expect("archive");
    assert_eq!(file_content(&archive, "files/bad.bin"), Some(Vec::new()));
}

#[test]
fn empty_files_map_is_equivalent_to_no_files() {
    let request = ExecutionRequest {
        code: String::new(),
        files: Some(HashMap::new()),
    };
    let archive = workspace::build_archive(&request).expect("archive");
    assert!(file_content(&archive, "files/").is_some() || file_content(&archive, "files").is_some());
}
