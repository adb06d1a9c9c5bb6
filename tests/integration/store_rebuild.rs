#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use sombra_ids::idgen::file::IdFileImage;
use sombra_ids::primitives::io::{FileSystem, StdFileSystem};
use sombra_ids::types::Result;
use sombra_ids::{IdGenerator, IdType, RebuildMode, RecordFormat, RecordStore, StoreConfig};
use tempfile::TempDir;

fn setup() -> (TempDir, Arc<dyn FileSystem>) {
    (tempfile::tempdir().expect("tempdir"), Arc::new(StdFileSystem))
}

fn id_path(dir: &Path, id_type: IdType) -> std::path::PathBuf {
    dir.join(RecordFormat::of(id_type).id_file_name())
}

/// Fills a node store past one fast-scan chunk and deletes every third record.
fn seed_nodes(fs: &Arc<dyn FileSystem>, dir: &Path, count: u64) -> Result<Vec<u64>> {
    let config = StoreConfig::default().default_grab_size(64);
    let store = RecordStore::create(Arc::clone(fs), dir, IdType::Node, &config)?;
    for _ in 0..count {
        let id = store.allocate()?;
        store.write_record(id, &id.to_be_bytes())?;
    }
    let mut deleted = Vec::new();
    for id in (0..count).step_by(3) {
        store.delete_record(id)?;
        deleted.push(id);
    }
    store.close()?;
    Ok(deleted)
}

fn rebuild_with(
    fs: &Arc<dyn FileSystem>,
    dir: &Path,
    id_type: IdType,
    mode: RebuildMode,
) -> Result<Vec<u8>> {
    let path = id_path(dir, id_type);
    if fs.exists(&path) {
        fs.delete(&path)?;
    }
    let config = StoreConfig::default().rebuild_mode(mode);
    let store = RecordStore::open(Arc::clone(fs), dir, id_type, &config)?;
    store.close()?;
    Ok(std::fs::read(&path)?)
}

#[test]
fn slow_and_fast_rebuild_write_identical_files() -> Result<()> {
    let (dir, fs) = setup();
    let count = 10_000;
    let deleted = seed_nodes(&fs, dir.path(), count)?;

    let slow = rebuild_with(&fs, dir.path(), IdType::Node, RebuildMode::Slow)?;
    let fast = rebuild_with(&fs, dir.path(), IdType::Node, RebuildMode::Fast)?;
    assert_eq!(slow, fast);

    let image = IdFileImage::decode_strict(&slow)?;
    assert!(!image.header.sticky);
    // 9999 is deleted, so the watermark stops at the last live record.
    assert_eq!(image.header.high_id, count - 1);
    let expected: Vec<u64> = deleted.into_iter().filter(|&id| id < count - 1).collect();
    assert_eq!(image.free_ids, expected);
    Ok(())
}

#[test]
fn deleted_id_file_is_rebuilt_on_open() -> Result<()> {
    let (dir, fs) = setup();
    let config = StoreConfig::default().default_grab_size(4);
    let store = RecordStore::create(Arc::clone(&fs), dir.path(), IdType::Relationship, &config)?;
    for _ in 0..8 {
        let id = store.allocate()?;
        store.write_record(id, b"rel")?;
    }
    store.delete_record(1)?;
    store.delete_record(4)?;
    store.close()?;
    std::fs::remove_file(id_path(dir.path(), IdType::Relationship))?;

    let store = RecordStore::open(Arc::clone(&fs), dir.path(), IdType::Relationship, &config)?;
    assert_eq!(store.high_id()?, 8);
    assert_eq!(store.number_of_ids_in_use()?, 6);
    let mut reused = vec![store.allocate()?, store.allocate()?];
    reused.sort_unstable();
    assert_eq!(reused, vec![1, 4]);
    assert_eq!(store.allocate()?, 8);
    store.close()?;
    Ok(())
}

#[test]
fn empty_stores_rebuild_to_reserved_low_ids() -> Result<()> {
    let (dir, fs) = setup();
    let config = StoreConfig::default();
    for id_type in [IdType::Node, IdType::StringBlock, IdType::LabelTokenName] {
        RecordStore::create(Arc::clone(&fs), dir.path(), id_type, &config)?.close()?;
        rebuild_with(&fs, dir.path(), id_type, RebuildMode::Fast)?;
        let high_id = IdGenerator::read_high_id(&*fs, id_path(dir.path(), id_type))?;
        assert_eq!(high_id, RecordFormat::of(id_type).reserved_low_ids, "{id_type}");
    }
    Ok(())
}

#[test]
fn dynamic_store_never_frees_its_header_slot() -> Result<()> {
    let (dir, fs) = setup();
    let config = StoreConfig::default();
    let store = RecordStore::create(Arc::clone(&fs), dir.path(), IdType::ArrayBlock, &config)?;
    let ids: Vec<u64> = (0..4).map(|_| store.allocate()).collect::<Result<_>>()?;
    assert_eq!(ids, vec![1, 2, 3, 4]);
    for &id in &ids {
        store.write_record(id, b"block")?;
    }
    store.delete_record(2)?;
    store.close()?;

    for mode in [RebuildMode::Slow, RebuildMode::Fast] {
        let bytes = rebuild_with(&fs, dir.path(), IdType::ArrayBlock, mode)?;
        let image = IdFileImage::decode(&bytes)?;
        assert_eq!(image.header.high_id, 5);
        assert_eq!(image.free_ids, vec![2]);
    }
    Ok(())
}

#[test]
fn rebuild_beyond_capacity_fails_with_recognizable_message() -> Result<()> {
    let (dir, fs) = setup();
    let config = StoreConfig::default();
    let id_type = IdType::RelationshipTypeToken;
    let format = RecordFormat::of(id_type);
    RecordStore::create(Arc::clone(&fs), dir.path(), id_type, &config)?.close()?;

    let store_file = fs.open_rw(&dir.path().join(format.store_file_name()))?;
    let beyond = format.max_id() + 1;
    store_file.write_at(beyond * format.record_size as u64, &format.header_record())?;
    fs.delete(&id_path(dir.path(), id_type))?;

    let err = RecordStore::open(Arc::clone(&fs), dir.path(), id_type, &config).unwrap_err();
    assert!(err.is_capacity_exceeded());
    assert!(err.to_string().starts_with("Id capacity exceeded"));
    Ok(())
}

#[test]
fn allocation_beyond_capacity_surfaces_from_the_store() -> Result<()> {
    let (dir, fs) = setup();
    let config = StoreConfig::default();
    let id_type = IdType::RelationshipTypeToken;
    let store = RecordStore::create(Arc::clone(&fs), dir.path(), id_type, &config)?;
    let max_id = store.format().max_id();
    store.id_generator().set_high_id(max_id)?;
    assert_eq!(store.allocate()?, max_id);
    let err = store.allocate().unwrap_err();
    assert!(err.is_storage_failure());
    assert!(err.to_string().starts_with("Id capacity exceeded"));
    assert_eq!(store.high_id()?, max_id + 1);
    store.close()?;
    Ok(())
}
