use windlass_protocol::reassemble;

use crate::error::PullError;
use crate::pull::ServerStream;
use crate::testutil::*;

const LIMIT: usize = 1024;

/// Deterministic test payload of the given size.
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn store_with_backup(comp: &[u8]) -> (MemoryMetadataStore, MemoryBlobClient) {
    let mut meta = MemoryMetadataStore::new();
    meta.insert_backup(backup_record("u1", "b1", "c1"));
    let mut blobs = MemoryBlobClient::new();
    blobs.insert("c1", comp.to_vec());
    (meta, blobs)
}

#[test]
fn compaction_only_small() {
    let comp = payload(50);
    let (meta, blobs) = store_with_backup(&comp);

    let session = open_session(&meta, blobs, "u1", "b1", LIMIT).unwrap();
    let (frames, result) = drive(&session);
    result.unwrap();

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].backup_id, "b1");
    assert_eq!(frames[0].attachment_holders, "att-b1");
    assert_eq!(frames[0].compaction_chunk, comp);
    assert!(frames[0].log_chunk.is_empty());
    assert_frame_caps(&frames, LIMIT);

    session.terminate(None).unwrap();
}

#[test]
fn compaction_spanning_frames() {
    let comp = payload(5000);
    let (meta, blobs) = store_with_backup(&comp);

    let session = open_session(&meta, blobs, "u1", "b1", LIMIT).unwrap();
    let (frames, result) = drive(&session);
    result.unwrap();

    assert!(frames.len() >= 5, "expected >= 5 frames, got {}", frames.len());
    assert_frame_caps(&frames, LIMIT);

    let mut reassembled = Vec::new();
    for frame in &frames {
        assert_eq!(frame.backup_id, "b1");
        assert!(frame.log_chunk.is_empty());
        reassembled.extend_from_slice(&frame.compaction_chunk);
    }
    assert_eq!(reassembled, comp);

    // The holders string rides only on the first frame.
    assert_eq!(frames[0].attachment_holders, "att-b1");
    assert!(frames[1..].iter().all(|f| f.attachment_holders.is_empty()));

    session.terminate(None).unwrap();
}

#[test]
fn one_inline_log() {
    let comp = payload(10);
    let (mut meta, blobs) = store_with_backup(&comp);
    meta.insert_log(inline_log("b1", "l1", b"hello"));

    let session = open_session(&meta, blobs, "u1", "b1", LIMIT).unwrap();
    let (frames, result) = drive(&session);
    result.unwrap();

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].compaction_chunk, comp);
    assert_eq!(frames[1].log_id, "l1");
    assert_eq!(frames[1].log_chunk, b"hello");
    assert_eq!(frames[1].attachment_holders, "att-l1");
    assert_frame_caps(&frames, LIMIT);

    session.terminate(None).unwrap();
}

#[test]
fn mixed_inline_and_blob_logs() {
    let comp = payload(100);
    let log2 = payload(3000);
    let (mut meta, mut blobs) = store_with_backup(&comp);
    meta.insert_log(inline_log("b1", "l1", b"a"));
    meta.insert_log(blob_log("b1", "l2", "h-l2"));
    meta.insert_log(inline_log("b1", "l3", b"z"));
    blobs.insert("h-l2", log2.clone());

    let session = open_session(&meta, blobs, "u1", "b1", LIMIT).unwrap();
    let (frames, result) = drive(&session);
    result.unwrap();
    assert_frame_caps(&frames, LIMIT);

    let pulled = reassemble(&as_stream(&frames)).unwrap();
    assert_eq!(pulled.backup_id, "b1");
    assert_eq!(pulled.compaction, comp);
    assert_eq!(pulled.logs.len(), 3);
    assert_eq!(pulled.logs[0].log_id, "l1");
    assert_eq!(pulled.logs[0].value, b"a");
    assert_eq!(pulled.logs[1].log_id, "l2");
    assert_eq!(pulled.logs[1].value, log2);
    assert_eq!(pulled.logs[1].attachment_holders, "att-l2");
    assert_eq!(pulled.logs[2].log_id, "l3");
    assert_eq!(pulled.logs[2].value, b"z");

    // Compaction frames strictly precede log frames.
    let first_log = frames.iter().position(|f| !f.log_chunk.is_empty()).unwrap();
    assert!(frames[first_log..]
        .iter()
        .all(|f| f.compaction_chunk.is_empty()));

    session.terminate(None).unwrap();
}

#[test]
fn blob_error_mid_compaction() {
    let (meta, mut blobs) = store_with_backup(&payload(2000));
    blobs.fail = Some(FailPoint {
        holder: "c1".into(),
        after_bytes: 500,
        message: "stream reset by blob store".into(),
    });

    let session = open_session(&meta, blobs, "u1", "b1", LIMIT).unwrap();
    let (frames, result) = drive(&session);

    let err = result.unwrap_err();
    assert!(matches!(err, PullError::BlobStore(_)));
    assert!(err.to_string().contains("stream reset by blob store"));
    // Whatever made it out is compaction data only, never log frames.
    assert!(frames.iter().all(|f| f.log_chunk.is_empty()));

    // Teardown surfaces the blob failure once, then settles.
    assert!(session.terminate(None).is_err());
    session.terminate(None).unwrap();
}

#[test]
fn blob_error_mid_log() {
    let comp = payload(10);
    let (mut meta, mut blobs) = store_with_backup(&comp);
    meta.insert_log(blob_log("b1", "l1", "h-l1"));
    meta.insert_log(inline_log("b1", "l2", b"z"));
    blobs.insert("h-l1", payload(500));
    blobs.fail = Some(FailPoint {
        holder: "h-l1".into(),
        after_bytes: 100,
        message: "blob read failed".into(),
    });

    let session = open_session(&meta, blobs, "u1", "b1", LIMIT).unwrap();
    let (frames, result) = drive(&session);

    let err = result.unwrap_err();
    assert!(err.to_string().contains("blob read failed"));
    // The failing log stops the stream before any later log is reached.
    assert!(frames.iter().all(|f| f.log_id != "l2"));

    assert!(session.terminate(None).is_err());
}

#[test]
fn missing_backup_is_not_found() {
    let meta = MemoryMetadataStore::new();
    let err = match open_session(&meta, MemoryBlobClient::new(), "u", "nope", LIMIT) {
        Ok(_) => panic!("expected error"),
        Err(e) => e,
    };
    match err {
        PullError::BackupNotFound { user_id, backup_id } => {
            assert_eq!(user_id, "u");
            assert_eq!(backup_id, "nope");
        }
        other => panic!("expected BackupNotFound, got {other}"),
    }
}

#[test]
fn empty_ids_are_invalid() {
    let meta = MemoryMetadataStore::new();
    let err = match open_session(&meta, MemoryBlobClient::new(), "", "b1", LIMIT) {
        Ok(_) => panic!("expected error"),
        Err(e) => e,
    };
    assert!(matches!(err, PullError::InvalidRequest(_)));

    let err = match open_session(&meta, MemoryBlobClient::new(), "u1", "", LIMIT) {
        Ok(_) => panic!("expected error"),
        Err(e) => e,
    };
    assert!(matches!(err, PullError::InvalidRequest(_)));
}

#[test]
fn logs_emitted_in_log_id_order() {
    let (mut meta, blobs) = store_with_backup(&payload(5));
    // Inserted out of order; the store contract orders by log id.
    meta.insert_log(inline_log("b1", "l3", b"three"));
    meta.insert_log(inline_log("b1", "l1", b"one"));
    meta.insert_log(inline_log("b1", "l2", b"two"));

    let session = open_session(&meta, blobs, "u1", "b1", LIMIT).unwrap();
    let (frames, result) = drive(&session);
    result.unwrap();

    let pulled = reassemble(&as_stream(&frames)).unwrap();
    let order: Vec<&str> = pulled.logs.iter().map(|l| l.log_id.as_str()).collect();
    assert_eq!(order, ["l1", "l2", "l3"]);

    session.terminate(None).unwrap();
}

#[test]
fn two_consecutive_blob_logs() {
    let comp = payload(40);
    let log1 = payload(1500);
    let log2 = payload(10);
    let (mut meta, mut blobs) = store_with_backup(&comp);
    meta.insert_log(blob_log("b1", "l1", "h-l1"));
    meta.insert_log(blob_log("b1", "l2", "h-l2"));
    blobs.insert("h-l1", log1.clone());
    blobs.insert("h-l2", log2.clone());

    let session = open_session(&meta, blobs, "u1", "b1", LIMIT).unwrap();
    let (frames, result) = drive(&session);
    result.unwrap();
    assert_frame_caps(&frames, LIMIT);

    let pulled = reassemble(&as_stream(&frames)).unwrap();
    assert_eq!(pulled.compaction, comp);
    assert_eq!(pulled.logs.len(), 2);
    assert_eq!(pulled.logs[0].value, log1);
    assert_eq!(pulled.logs[1].value, log2);

    session.terminate(None).unwrap();
}

#[test]
fn blob_log_sized_at_chunk_limit_multiple() {
    let comp = payload(10);
    let log1 = payload(2 * LIMIT);
    let (mut meta, mut blobs) = store_with_backup(&comp);
    meta.insert_log(blob_log("b1", "l1", "h-l1"));
    blobs.insert("h-l1", log1.clone());

    let session = open_session(&meta, blobs, "u1", "b1", LIMIT).unwrap();
    let (frames, result) = drive(&session);
    result.unwrap();
    assert_frame_caps(&frames, LIMIT);

    let pulled = reassemble(&as_stream(&frames)).unwrap();
    assert_eq!(pulled.logs.len(), 1);
    assert_eq!(pulled.logs[0].value, log1);

    session.terminate(None).unwrap();
}

#[test]
fn empty_compaction_with_logs() {
    let (mut meta, blobs) = store_with_backup(&[]);
    meta.insert_log(inline_log("b1", "l1", b"only"));

    let session = open_session(&meta, blobs, "u1", "b1", LIMIT).unwrap();
    let (frames, result) = drive(&session);
    result.unwrap();

    assert!(frames.iter().all(|f| f.compaction_chunk.is_empty()));
    let pulled = reassemble(&as_stream(&frames)).unwrap();
    assert!(pulled.compaction.is_empty());
    assert_eq!(pulled.logs.len(), 1);
    assert_eq!(pulled.logs[0].value, b"only");

    session.terminate(None).unwrap();
}

#[test]
fn empty_blob_log_contributes_no_bytes() {
    let comp = payload(10);
    let (mut meta, mut blobs) = store_with_backup(&comp);
    meta.insert_log(blob_log("b1", "l1", "h-l1"));
    meta.insert_log(inline_log("b1", "l2", b"after"));
    blobs.insert("h-l1", Vec::new());

    let session = open_session(&meta, blobs, "u1", "b1", LIMIT).unwrap();
    let (frames, result) = drive(&session);
    result.unwrap();

    let pulled = reassemble(&as_stream(&frames)).unwrap();
    assert_eq!(pulled.compaction, comp);
    // The empty log yields no log_chunk frames; only the later log shows up.
    assert_eq!(pulled.logs.len(), 1);
    assert_eq!(pulled.logs[0].log_id, "l2");
    assert_eq!(pulled.logs[0].value, b"after");

    session.terminate(None).unwrap();
}

#[test]
fn tiny_chunk_limit_still_reassembles() {
    // Limits close to the metadata size force the packer to trickle bytes.
    let comp = payload(120);
    let (meta, mut blobs) = store_with_backup(&comp);
    blobs.chunk_size = 17;

    let session = open_session(&meta, blobs, "u1", "b1", 64).unwrap();
    let (frames, result) = drive(&session);
    result.unwrap();
    assert_frame_caps(&frames, 64);

    let mut reassembled = Vec::new();
    for frame in &frames {
        reassembled.extend_from_slice(&frame.compaction_chunk);
    }
    assert_eq!(reassembled, comp);

    session.terminate(None).unwrap();
}
