pub mod helpers;
use self::helpers::{Fault, MIB, MockStore, TRACER, data};

use resumable_transfer::destination::{FileDestination, MemoryDestination};
use resumable_transfer::error::ErrorKind;
use resumable_transfer::ledger::MemoryRecorder;
use resumable_transfer::progress::TransferProgress;
use resumable_transfer::{ByteSize, DownloadBuilder};
use std::ops::Range;
use std::sync::{Arc, Mutex};

const URI: (&str, &str) = ("a-bucket", "an/object/key.bin");

fn builder(store: &Arc<MockStore>, recorder: &MemoryRecorder) -> DownloadBuilder<Arc<MockStore>> {
    DownloadBuilder::new(store.clone())
        .part_size(ByteSize::mib(1))
        .recorder(recorder.clone())
}

fn mib(start: usize, end: usize) -> Option<Range<u64>> {
    Some(start as u64..end as u64)
}

#[tokio::test(flavor = "multi_thread")]
async fn downloads_in_concurrent_ranges() {
    let _ = &*TRACER;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::new(MockStore::new());
    let recorder = MemoryRecorder::new();
    let downloader = builder(&store, &recorder)
        .concurrency(4)
        .on_progress({
            let seen = seen.clone();
            move |p: &TransferProgress| seen.lock().unwrap().push(p.transferred)
        })
        .build();
    let data = data(10 * MIB + 123);
    let etag = store.put_object(URI, &data);

    let dest = MemoryDestination::new().with_key("mem:dest");
    let object = downloader.download(URI, &dest).await.unwrap();
    assert_eq!(object.etag, etag);
    assert_eq!(object.size, data.len() as u64);
    assert_eq!(dest.contents(), data);

    let ranges = store.take_ranges();
    assert_eq!(ranges.len(), 11);
    assert_eq!(ranges[10], mib(10 * MIB, 10 * MIB + 123));
    assert!(recorder.is_empty());

    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last().copied(), Some(data.len() as u64));
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_continues_from_written_bytes() {
    let _ = &*TRACER;

    let store = Arc::new(MockStore::new());
    let recorder = MemoryRecorder::new();
    let downloader = builder(&store, &recorder)
        .concurrency(2)
        .part_attempts(3)
        .build();
    let data = data(4 * MIB);
    store.put_object(URI, &data);

    store.inject(2 * MIB as u64, Fault::Cut(300_000), 1);
    let dest = MemoryDestination::new();
    downloader.download(URI, &dest).await.unwrap();
    assert_eq!(dest.contents(), data);

    let ranges = store.take_ranges();
    assert_eq!(ranges.len(), 5);
    assert!(ranges.contains(&mib(2 * MIB + 300_000, 3 * MIB)));
}

#[tokio::test(flavor = "multi_thread")]
async fn interrupted_download_resumes() {
    let _ = &*TRACER;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MockStore::new());
    let recorder = MemoryRecorder::new();
    let downloader = builder(&store, &recorder)
        .concurrency(1)
        .part_attempts(1)
        .build();
    let data = data(4 * MIB + 10);
    store.put_object(URI, &data);
    let dest = FileDestination::new(dir.path().join("out/object.bin")).unwrap();

    store.inject(2 * MIB as u64, Fault::Cut(300_000), 1);
    let err = downloader.download(URI, &dest).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(
        store.take_ranges(),
        vec![mib(0, MIB), mib(MIB, 2 * MIB), mib(2 * MIB, 3 * MIB)]
    );
    assert_eq!(recorder.len(), 1);

    downloader.download(URI, &dest).await.unwrap();
    assert_eq!(
        store.take_ranges(),
        vec![
            mib(2 * MIB + 300_000, 3 * MIB),
            mib(3 * MIB, 4 * MIB),
            mib(4 * MIB, 4 * MIB + 10),
        ]
    );
    assert_eq!(std::fs::read(dest.path()).unwrap(), data);
    assert!(recorder.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn changed_object_restarts_download() {
    let _ = &*TRACER;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MockStore::new());
    let recorder = MemoryRecorder::new();
    let downloader = builder(&store, &recorder)
        .concurrency(1)
        .part_attempts(1)
        .build();
    let dest = FileDestination::new(dir.path().join("object.bin")).unwrap();

    store.put_object(URI, &data(3 * MIB));
    store.inject(MIB as u64, Fault::Cut(1000), 1);
    assert!(downloader.download(URI, &dest).await.is_err());
    store.take_ranges();

    let changed: Vec<u8> = data(3 * MIB).into_iter().rev().collect();
    let etag = store.put_object(URI, &changed);
    let object = downloader.download(URI, &dest).await.unwrap();
    assert_eq!(object.etag, etag);
    assert_eq!(
        store.take_ranges(),
        vec![mib(0, MIB), mib(MIB, 2 * MIB), mib(2 * MIB, 3 * MIB)]
    );
    assert_eq!(std::fs::read(dest.path()).unwrap(), changed);
}

#[tokio::test(flavor = "multi_thread")]
async fn object_replaced_after_probe_writes_nothing() {
    let _ = &*TRACER;

    let store = Arc::new(MockStore::new());
    let recorder = MemoryRecorder::new();
    let downloader = builder(&store, &recorder).concurrency(3).build();
    let data = data(3 * MIB);
    store.put_object(URI, &data);
    store.replace_after_probe(URI, &data[..MIB]);

    let dest = MemoryDestination::new().with_key("mem:dest");
    let err = downloader.download(URI, &dest).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IdentityMismatch);
    assert!(dest.contents().iter().all(|b| *b == 0));
    assert!(recorder.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn gzip_objects_are_decoded() {
    let _ = &*TRACER;

    let store = Arc::new(MockStore::new());
    let recorder = MemoryRecorder::new();
    let downloader = builder(&store, &recorder).concurrency(4).build();
    let data = data(3 * MIB + 7);
    store.put_gzipped(URI, &data);

    let dest = MemoryDestination::new().with_key("mem:dest");
    let object = downloader.download(URI, &dest).await.unwrap();
    assert_eq!(object.size, data.len() as u64);
    assert_eq!(dest.contents(), data);
    assert_eq!(store.take_ranges(), vec![None]);
    assert!(recorder.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupt_ranges_fail_the_object_checksum() {
    let _ = &*TRACER;

    let store = Arc::new(MockStore::new());
    let recorder = MemoryRecorder::new();
    let downloader = builder(&store, &recorder).concurrency(2).build();
    let data = data(3 * MIB + 5);
    store.put_object(URI, &data);

    store.inject(MIB as u64, Fault::Corrupt, 1);
    let dest = MemoryDestination::new().with_key("mem:dest");
    let err = downloader.download(URI, &dest).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert_eq!(store.take_ranges().len(), 4);
    assert!(recorder.is_empty());

    downloader.download(URI, &dest).await.unwrap();
    assert_eq!(store.take_ranges().len(), 4);
    assert_eq!(dest.contents(), data);
}

#[tokio::test(flavor = "multi_thread")]
async fn objects_of_unknown_size_are_streamed() {
    let _ = &*TRACER;

    let store = Arc::new(MockStore::new());
    let recorder = MemoryRecorder::new();
    let downloader = builder(&store, &recorder).build();
    let data = data(2 * MIB + 1);
    store.put_unsized(URI, &data);

    let dest = MemoryDestination::new();
    let object = downloader.download(URI, &dest).await.unwrap();
    assert_eq!(object.size, data.len() as u64);
    assert_eq!(dest.contents(), data);
    assert_eq!(store.take_ranges(), vec![None]);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_object_needs_no_ranges() {
    let _ = &*TRACER;

    let store = Arc::new(MockStore::new());
    let recorder = MemoryRecorder::new();
    let downloader = builder(&store, &recorder).build();
    store.put_object(URI, &[]);

    let dest = MemoryDestination::new().with_key("mem:dest");
    let object = downloader.download(URI, &dest).await.unwrap();
    assert_eq!(object.size, 0);
    assert!(dest.contents().is_empty());
    assert!(store.take_ranges().is_empty());
}
