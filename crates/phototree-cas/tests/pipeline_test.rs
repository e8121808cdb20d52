use std::fs;
use std::path::Path;

use phototree_cas::testing::ExifFixture;
use phototree_cas::{
    ContentDigest, DateSource, IngestError, IngestOptions, IngestOutcome, IngestPipeline, Upload,
    ValidationError,
};
use tempfile::TempDir;
use walkdir::WalkDir;

fn stored_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}

fn upload<'a>(data: &'a [u8], filename: &'a str) -> Upload<'a> {
    Upload {
        data,
        filename,
        identity: "tester",
    }
}

#[test]
fn test_ten_bytes_without_metadata() {
    let temp = TempDir::new().unwrap();
    let (pipeline, report) = IngestPipeline::open(IngestOptions::new(temp.path())).unwrap();
    assert_eq!(report.indexed, 0);

    let data = b"0123456789";
    let first = pipeline.ingest(&upload(data, "plain.jpg")).unwrap();
    let IngestOutcome::Stored(item) = &first else {
        panic!("first upload must be stored, got {:?}", first);
    };
    assert_eq!(item.digest, ContentDigest::of(data));
    assert_eq!(item.digest.to_hex(), blake3::hash(data).to_hex().to_string());
    assert_eq!(item.date_source, DateSource::Unknown);
    assert_eq!(item.size, 10);
    assert!(item.path.as_str().starts_with("unknown/"));
    assert_eq!(fs::read(pipeline.store().absolute(&item.path)).unwrap(), data);

    let second = pipeline.ingest(&upload(data, "again.jpg")).unwrap();
    assert!(second.is_duplicate());
    assert_eq!(second.path(), first.path());
    assert_eq!(stored_files(temp.path()).len(), 1);
}

#[test]
fn test_oversized_upload_leaves_no_trace() {
    let temp = TempDir::new().unwrap();
    let mut options = IngestOptions::new(temp.path());
    options.max_blob_bytes = 16;
    let (pipeline, _) = IngestPipeline::open(options).unwrap();

    let data = vec![7u8; 17];
    let err = pipeline.ingest(&upload(&data, "big.jpg")).unwrap_err();
    assert!(matches!(
        err,
        IngestError::Validation(ValidationError::TooLarge { size: 17, limit: 16 })
    ));
    assert!(err.is_validation());

    assert!(stored_files(temp.path()).is_empty());
    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    assert!(pipeline.index().is_empty());
    assert_eq!(pipeline.index().reserved_count(), 0);
}

#[test]
fn test_date_cascade_end_to_end() {
    let temp = TempDir::new().unwrap();
    let (pipeline, _) = IngestPipeline::open(IngestOptions::new(temp.path())).unwrap();

    let cases = [
        (
            ExifFixture::new()
                .original("2018:03:04 05:06:07")
                .digitized("2019:01:01 00:00:00")
                .datetime("2020:01:01 00:00:00"),
            DateSource::Original,
            "2018/03/04",
        ),
        (
            ExifFixture::new()
                .digitized("2019:08:09 10:11:12")
                .datetime("2020:01:01 00:00:00"),
            DateSource::Digitized,
            "2019/08/09",
        ),
        (
            ExifFixture::new().big_endian().datetime("2020:11:12 13:14:15"),
            DateSource::FileTimestamp,
            "2020/11/12",
        ),
        (
            ExifFixture::new().original("not a date at all"),
            DateSource::Unknown,
            "unknown",
        ),
    ];

    for (fixture, source, partition) in cases {
        let jpeg = fixture.to_jpeg();
        let outcome = pipeline.ingest(&upload(&jpeg, "shot.jpeg")).unwrap();
        let IngestOutcome::Stored(item) = outcome else {
            panic!("distinct fixtures must all be stored");
        };
        assert_eq!(item.date_source, source);
        assert_eq!(item.path.partition(), partition);
        assert!(item.path.file_name().ends_with(".jpeg"));
    }
}

#[test]
fn test_raw_tiff_blob_is_dated() {
    let temp = TempDir::new().unwrap();
    let (pipeline, _) = IngestPipeline::open(IngestOptions::new(temp.path())).unwrap();

    let tiff = ExifFixture::new().original("2015:10:21 16:29:00").to_tiff();
    let outcome = pipeline.ingest(&upload(&tiff, "raw.TIF")).unwrap();
    assert_eq!(outcome.path().partition(), "2015/10/21");
    assert!(outcome.path().file_name().ends_with(".tif"));
}

#[test]
fn test_restart_rebuilds_index_from_tree() {
    let temp = TempDir::new().unwrap();
    let blobs: Vec<Vec<u8>> = (0..5)
        .map(|i| format!("photo number {}", i).into_bytes())
        .collect();
    let dated = ExifFixture::new().original("2010:05:05 05:05:05").to_jpeg();

    let mut paths = Vec::new();
    {
        let (pipeline, _) = IngestPipeline::open(IngestOptions::new(temp.path())).unwrap();
        for blob in &blobs {
            paths.push(pipeline.ingest(&upload(blob, "p.png")).unwrap().path().clone());
        }
        paths.push(pipeline.ingest(&upload(&dated, "d.jpg")).unwrap().path().clone());
    }

    let (pipeline, report) = IngestPipeline::open(IngestOptions::new(temp.path())).unwrap();
    assert_eq!(report.files, 6);
    assert_eq!(report.indexed, 6);
    assert!(report.duplicates.is_empty());

    for (blob, path) in blobs.iter().zip(&paths) {
        assert_eq!(pipeline.index().lookup(&ContentDigest::of(blob)).as_ref(), Some(path));
        let again = pipeline.ingest(&upload(blob, "p.png")).unwrap();
        assert!(again.is_duplicate());
        assert_eq!(again.path(), path);
    }
    assert_eq!(stored_files(temp.path()).len(), 6);
}

#[test]
fn test_outcome_serializes_with_tag() {
    let temp = TempDir::new().unwrap();
    let (pipeline, _) = IngestPipeline::open(IngestOptions::new(temp.path())).unwrap();

    let stored = pipeline.ingest(&upload(b"json me", "j.jpg")).unwrap();
    let value = serde_json::to_value(&stored).unwrap();
    assert_eq!(value["outcome"], "stored");
    assert_eq!(value["date_source"], "unknown");
    assert!(value["capture_date"].is_null());
    assert_eq!(value["uploaded_by"], "tester");

    let dup = pipeline.ingest(&upload(b"json me", "j.jpg")).unwrap();
    let value = serde_json::to_value(&dup).unwrap();
    assert_eq!(value["outcome"], "duplicate");
    assert_eq!(value["digest"], ContentDigest::of(b"json me").to_hex());
}
