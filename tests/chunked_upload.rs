//! Chunked upload tests: concurrent chunks, the merge, and fault propagation.

mod common;

use std::sync::Arc;

use serde_json::Value;

use common::{names, tree, TestVolumes};
use elfinder_connector::{Connector, ConnectorCommand, UploadedFile};

const FILE_NAME: &str = "big.bin";

fn chunk_request(cid: &str, chunk_no: usize, last: usize, data: &[u8], total: usize) -> ConnectorCommand {
    let start = chunk_no * data.len();
    let mut cmd = ConnectorCommand::from_pairs([
        ("cmd", "upload".to_string()),
        ("target", "v1_".to_string()),
        ("cid", cid.to_string()),
        ("chunk", format!("{FILE_NAME}.{chunk_no}_{last}.part")),
        ("range", format!("{start},{},{total}", data.len())),
    ]);
    cmd.files.push(UploadedFile::new("blob", data.to_vec()));
    cmd
}

async fn send(connector: &Connector, cmd: ConnectorCommand) -> Value {
    connector
        .process(cmd)
        .await
        .json()
        .cloned()
        .expect("Expected a JSON result")
}

#[tokio::test]
async fn test_concurrent_chunks_merge_in_order() {
    let vols = TestVolumes::new(1).await;
    let parts: Vec<Vec<u8>> = vec![vec![b'a'; 4], vec![b'b'; 4], vec![b'c'; 4]];

    let mut handles = Vec::new();
    // Send the last chunk first so arrival order differs from chunk order
    for chunk_no in (0..parts.len()).rev() {
        let connector = Arc::clone(&vols.connector);
        let cmd = chunk_request("1001", chunk_no, parts.len() - 1, &parts[chunk_no], 12);
        handles.push(tokio::spawn(async move { send(&connector, cmd).await }));
    }

    let mut merged = Vec::new();
    for handle in handles {
        let response = handle.await.unwrap();
        assert!(response.get("error").is_none(), "{response}");
        if let Some(dir) = response["_chunkmerged"].as_str() {
            assert_eq!(response["_name"], FILE_NAME);
            merged.push(dir.to_string());
        }
    }
    assert_eq!(merged.len(), 1, "exactly one chunk reports completion");
    assert!(!vols.full(0, FILE_NAME).exists());

    let response = vols
        .json(&[
            ("cmd", "upload"),
            ("target", "v1_"),
            ("chunk", &merged[0]),
            ("upload", FILE_NAME),
        ])
        .await;
    assert_eq!(names(&response["added"]), vec![FILE_NAME]);
    assert_eq!(vols.read(0, FILE_NAME), b"aaaabbbbcccc");

    // The chunk directory is gone after the merge
    assert!(!vols.full(0, &format!(".chunks/{}", merged[0])).exists());
    assert_eq!(tree(vols.root(0)), vec![FILE_NAME]);
}

#[tokio::test]
async fn test_merge_without_overwrite_uses_suffixed_name() {
    let vols = TestVolumes::new(1).await;
    vols.write(0, FILE_NAME, b"old");

    let mut merged = None;
    for chunk_no in 0..2 {
        let response = send(
            &vols.connector,
            chunk_request("2002", chunk_no, 1, b"xy", 4),
        )
        .await;
        if let Some(dir) = response["_chunkmerged"].as_str() {
            merged = Some(dir.to_string());
        }
    }
    let merged = merged.expect("last chunk reports completion");

    let response = vols
        .json(&[
            ("cmd", "upload"),
            ("target", "v1_"),
            ("chunk", &merged),
            ("upload", FILE_NAME),
            ("overwrite", "0"),
        ])
        .await;
    assert_eq!(names(&response["added"]), vec!["big~1.bin"]);
    assert_eq!(vols.read(0, FILE_NAME), b"old");
    assert_eq!(vols.read(0, "big~1.bin"), b"xyxy");
}

#[tokio::test]
async fn test_fault_is_raised_to_later_chunks() {
    let vols = TestVolumes::new(1).await;

    let first = send(&vols.connector, chunk_request("3003", 0, 2, b"aaaa", 12)).await;
    assert!(first.get("error").is_none(), "{first}");

    // Resending a stored part faults the upload and drops its chunk directory
    let duplicate = send(&vols.connector, chunk_request("3003", 0, 2, b"aaaa", 12)).await;
    assert_eq!(duplicate["error"], "errPerm");

    let later = send(&vols.connector, chunk_request("3003", 1, 2, b"bbbb", 12)).await;
    assert_eq!(later["error"], "errPerm");

    let chunk_root = vols.full(0, ".chunks");
    let leftovers = std::fs::read_dir(&chunk_root)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
    assert!(!vols.full(0, FILE_NAME).exists());
}

#[tokio::test]
async fn test_chunkfail_discards_parts() {
    let vols = TestVolumes::new(1).await;

    let first = send(&vols.connector, chunk_request("4004", 0, 1, b"aaaa", 8)).await;
    assert!(first.get("error").is_none(), "{first}");
    assert_eq!(std::fs::read_dir(vols.full(0, ".chunks")).unwrap().count(), 1);

    let failed = vols
        .json(&[
            ("cmd", "upload"),
            ("target", "v1_"),
            ("cid", "4004"),
            ("chunk", &format!("{FILE_NAME}.0_1.part")),
            ("upload", "chunkfail"),
            ("mimes", "chunkfail"),
        ])
        .await;
    assert_eq!(failed["error"], "errAbort");
    assert_eq!(std::fs::read_dir(vols.full(0, ".chunks")).unwrap().count(), 0);

    let later = send(&vols.connector, chunk_request("4004", 1, 1, b"bbbb", 8)).await;
    assert_eq!(later["error"], "errAbort");
}

#[tokio::test]
async fn test_chunk_size_checked_against_total() {
    let vols = TestVolumes::with(1, |v| v.max_upload_size = Some(10)).await;

    let response = send(&vols.connector, chunk_request("5005", 0, 2, b"aaaa", 12)).await;
    assert_eq!(response["error"], "errUploadFileSize");
    assert!(tree(vols.root(0)).is_empty());
}

#[tokio::test]
async fn test_plain_upload_into_new_subdirectories() {
    let vols = TestVolumes::new(1).await;

    let mut cmd = ConnectorCommand::from_pairs([
        ("cmd", "upload".to_string()),
        ("target", "v1_".to_string()),
        ("upload_path[]", vols.hash(0, "/a/b")),
        ("upload_path[]", vols.hash(0, "/c")),
    ]);
    cmd.files.push(UploadedFile::new("one.txt", b"1".to_vec()));
    cmd.files.push(UploadedFile::new("two.txt", b"2".to_vec()));

    let response = send(&vols.connector, cmd).await;
    assert!(response.get("error").is_none(), "{response}");
    assert_eq!(
        names(&response["added"]),
        vec!["a", "b", "c", "one.txt", "two.txt"]
    );
    assert_eq!(tree(vols.root(0)), vec!["a/b/one.txt", "c/two.txt"]);
}

#[tokio::test]
async fn test_upload_with_overwrite_off_keeps_existing() {
    let vols = TestVolumes::new(1).await;
    vols.write(0, "a.txt", b"old");

    let mut cmd = ConnectorCommand::from_pairs([
        ("cmd", "upload"),
        ("target", "v1_"),
        ("overwrite", "0"),
    ]);
    cmd.files.push(UploadedFile::new("a.txt", b"new".to_vec()));

    let response = send(&vols.connector, cmd).await;
    assert_eq!(names(&response["added"]), vec!["a~1.txt"]);
    assert_eq!(vols.read(0, "a.txt"), b"old");
    assert_eq!(vols.read(0, "a~1.txt"), b"new");
}
