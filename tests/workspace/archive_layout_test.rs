//! Workspace archive layout tests.

use std::collections::HashMap;
use std::io::Read as _;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use straylight::types::ExecutionRequest;
use straylight::workspace;

struct Entry {
    path: String,
    kind: tar::EntryType,
    mode: u32,
    uid: u64,
    gid: u64,
    content: Vec<u8>,
}

fn read_entries(archive: &[u8]) -> Vec<Entry> {
    let mut archive = tar::Archive::new(archive);
    let mut collected = Vec::new();
    for entry in archive.entries().expect("archive should parse") {
        let mut entry = entry.expect("entry should parse");
        let path = entry
            .path()
            .expect("entry path")
            .to_string_lossy()
            .trim_end_matches('/')
            .to_owned();
        let kind = entry.header().entry_type();
        let mode = entry.header().mode().expect("mode");
        let uid = entry.header().uid().expect("uid");
        let gid = entry.header().gid().expect("gid");
        let mut content = Vec::new();
        entry.read_to_end(&mut content).expect("entry content");
        collected.push(Entry {
            path,
            kind,
            mode,
            uid,
            gid,
            content,
        });
    }
    collected
}

fn find<'a>(entries: &'a [Entry], path: &str) -> &'a Entry {
    entries
        .iter()
        .find(|entry| entry.path == path)
        .unwrap_or_else(|| panic!("archive is missing {path:?}"))
}

#[test]
fn archive_contains_entry_file_with_code() {
    let request = ExecutionRequest {
        code: "print('hi')".to_owned(),
        files: None,
    };
    let archive = workspace::build_archive(&request).expect("archive");
    let entries = read_entries(&archive);

    let main = find(&entries, "main.py");
    assert!(main.kind.is_file());
    assert_eq!(main.content, b"print('hi')");
    assert_eq!(main.mode, 0o644);
    assert_eq!(main.uid, 1000);
    assert_eq!(main.gid, 1000);
}

#[test]
fn archive_contains_files_and_output_dirs_without_inputs() {
    let request = ExecutionRequest {
        code: String::new(),
        files: None,
    };
    let archive = workspace::build_archive(&request).expect("archive");
    let entries = read_entries(&archive);

    assert!(find(&entries, "files").kind.is_dir());
    let output = find(&entries, "output");
    assert!(output.kind.is_dir());
    assert_eq!(output.mode, 0o777);
}

#[test]
fn archive_precreates_writable_cache_dirs() {
    let request = ExecutionRequest {
        code: String::new(),
        files: None,
    };
    let archive = workspace::build_archive(&request).expect("archive");
    let entries = read_entries(&archive);

    for dir in [".cache", ".config", ".config/matplotlib", "__pycache__"] {
        let entry = find(&entries, dir);
        assert!(entry.kind.is_dir(), "{dir} should be a directory");
        assert_eq!(entry.mode, 0o777, "{dir} should be world-writable");
        assert_eq!(entry.uid, 1000);
    }
}

#[test]
fn user_files_land_under_files_dir_with_sandbox_ownership() {
    let mut files = HashMap::new();
    files.insert("input.txt".to_owned(), BASE64.encode("hello"));
    let request = ExecutionRequest {
        code: String::new(),
        files: Some(files),
    };
    let archive = workspace::build_archive(&request).expect("archive");
    let entries = read_entries(&archive);

    let input = find(&entries, "files/input.txt");
    assert!(input.kind.is_file());
    assert_eq!(input.content, b"hello");
    assert_eq!(input.mode, 0o644);
    assert_eq!(input.uid, 1000);
    assert_eq!(input.gid, 1000);
}
