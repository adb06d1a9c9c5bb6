#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use sombra_ids::idgen::file::{IdFileImage, STICKY_GENERATOR, STICKY_MARKER};
use sombra_ids::idgen::INTEGER_MINUS_ONE;
use sombra_ids::primitives::io::{FileSystem, MemFileSystem, StdFileSystem};
use sombra_ids::types::{ErrorKind, Result};
use sombra_ids::{IdGenerator, IdGeneratorOptions, IdType};
use tempfile::TempDir;

fn options(grab_size: u32, max_id: u64) -> IdGeneratorOptions {
    IdGeneratorOptions::new(IdType::Node, grab_size, max_id)
}

fn std_fs() -> (TempDir, Arc<dyn FileSystem>) {
    (tempfile::tempdir().expect("tempdir"), Arc::new(StdFileSystem))
}

#[test]
fn free_ids_come_back_in_the_next_session() -> Result<()> {
    let (dir, fs) = std_fs();
    let path = dir.path().join("node.db.id");
    IdGenerator::create(&*fs, &path, 0, true)?;

    let ids = IdGenerator::open(Arc::clone(&fs), &path, options(3, 1000))?;
    for expected in 0..=6 {
        assert_eq!(ids.next_id()?, expected);
    }
    for id in [1, 3, 5] {
        ids.free_id(id)?;
    }
    assert_eq!(ids.next_id()?, 7);
    ids.free_id(6)?;
    ids.close()?;

    let ids = IdGenerator::open(Arc::clone(&fs), &path, options(5, 1000))?;
    ids.free_id(2)?;
    ids.free_id(4)?;
    let reused: Vec<u64> = (0..4).map(|_| ids.next_id()).collect::<Result<_>>()?;
    assert_eq!(reused, vec![1, 3, 5, 6]);
    ids.close()?;
    Ok(())
}

#[test]
fn aggressive_reuse_prefers_free_ids_over_growth() -> Result<()> {
    let fs: Arc<dyn FileSystem> = Arc::new(MemFileSystem::new());
    let ids = IdGenerator::open(
        Arc::clone(&fs),
        "node.db.id",
        options(4, 1000).aggressive_reuse(true),
    )?;
    for _ in 0..5 {
        ids.next_id()?;
    }
    ids.free_id(3)?;
    assert_eq!(ids.next_id()?, 3);
    assert_eq!(ids.high_id()?, 5);
    assert_eq!(ids.next_id()?, 5);
    ids.close()?;
    Ok(())
}

#[test]
fn sentinel_skip_is_stable_across_reopen() -> Result<()> {
    let (dir, fs) = std_fs();
    let path = dir.path().join("node.db.id");
    let opts = || options(4, 1 << 35).reserved_id(Some(INTEGER_MINUS_ONE));

    let ids = IdGenerator::open(Arc::clone(&fs), &path, opts())?;
    ids.set_high_id(INTEGER_MINUS_ONE)?;
    assert_eq!(ids.next_id()?, INTEGER_MINUS_ONE + 1);
    ids.close()?;

    let ids = IdGenerator::open(Arc::clone(&fs), &path, opts())?;
    assert_eq!(ids.high_id()?, INTEGER_MINUS_ONE + 2);
    assert_eq!(ids.next_id()?, INTEGER_MINUS_ONE + 2);
    ids.close()?;

    IdFileImage::new(INTEGER_MINUS_ONE + 5, vec![INTEGER_MINUS_ONE, 7])
        .write_to(&*fs.open_rw(&path)?)?;
    let ids = IdGenerator::open(Arc::clone(&fs), &path, opts())?;
    assert_eq!(ids.next_id()?, 7);
    assert_eq!(ids.next_id()?, INTEGER_MINUS_ONE + 5);
    ids.close()?;
    Ok(())
}

fn replay(fs: &Arc<dyn FileSystem>, path: &Path) -> Result<()> {
    IdGenerator::create(&**fs, path, 0, true)?;
    for session in 0..3u64 {
        let ids = IdGenerator::open(Arc::clone(fs), path, options(2, 10_000))?;
        for _ in 0..20 {
            ids.next_id()?;
        }
        for id in (session..20).step_by(3) {
            ids.free_id(id)?;
        }
        ids.next_id()?;
        ids.close()?;
    }
    Ok(())
}

#[test]
fn same_operations_produce_identical_files() -> Result<()> {
    let a = MemFileSystem::new();
    let b = MemFileSystem::new();
    let path = Path::new("node.db.id");
    replay(&(Arc::new(a.clone()) as Arc<dyn FileSystem>), path)?;
    replay(&(Arc::new(b.clone()) as Arc<dyn FileSystem>), path)?;
    assert_eq!(a.snapshot(path), b.snapshot(path));

    let (dir, fs) = std_fs();
    let disk_path = dir.path().join("node.db.id");
    replay(&fs, &disk_path)?;
    assert_eq!(Some(std::fs::read(&disk_path)?), a.snapshot(path));
    Ok(())
}

#[test]
fn capacity_exhaustion_leaves_state_untouched() -> Result<()> {
    let (dir, fs) = std_fs();
    let path = dir.path().join("node.db.id");
    let ids = IdGenerator::open(Arc::clone(&fs), &path, options(3, 2))?;
    for expected in 0..=2 {
        assert_eq!(ids.next_id()?, expected);
    }
    let err = ids.next_id().unwrap_err();
    assert!(err.to_string().starts_with("Id capacity exceeded"));
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert_eq!(ids.high_id()?, 3);
    ids.free_id(1)?;
    ids.close()?;

    let ids = IdGenerator::open(Arc::clone(&fs), &path, options(3, 2))?;
    assert_eq!(ids.next_id()?, 1);
    assert!(ids.next_id().unwrap_err().is_capacity_exceeded());
    ids.close()?;
    Ok(())
}

#[test]
fn crash_leaves_file_sticky() -> Result<()> {
    let (dir, fs) = std_fs();
    let path = dir.path().join("node.db.id");
    let ids = IdGenerator::open(Arc::clone(&fs), &path, options(3, 100))?;
    ids.next_id()?;
    drop(ids);

    let bytes = std::fs::read(&path)?;
    assert_eq!(bytes[STICKY_MARKER], STICKY_GENERATOR);
    let err = IdGenerator::open(Arc::clone(&fs), &path, options(3, 100)).unwrap_err();
    assert!(err.is_sticky());
    assert!(err.to_string().contains("node.db.id"));

    let image = IdGenerator::read_image(&*fs, &path)?;
    assert!(image.header.sticky);
    Ok(())
}

#[test]
fn closed_generator_rejects_everything_but_close() -> Result<()> {
    let (dir, fs) = std_fs();
    let path = dir.path().join("node.db.id");
    let ids = IdGenerator::open(Arc::clone(&fs), &path, options(3, 100))?;
    ids.next_id()?;
    ids.close()?;
    ids.close()?;
    assert_eq!(ids.next_id().unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(ids.free_id(0).unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(ids.high_id().unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(ids.free_id_count().unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(IdGenerator::read_high_id(&*fs, &path)?, 1);
    ids.delete()?;
    assert!(!path.exists());
    Ok(())
}

#[test]
fn reopened_free_ids_are_reused_lowest_first() -> Result<()> {
    let (dir, fs) = std_fs();
    let path = dir.path().join("node.db.id");
    let ids = IdGenerator::open(Arc::clone(&fs), &path, options(3, 1000))?;
    for expected in 0..6 {
        assert_eq!(ids.next_id()?, expected);
    }
    for id in [5, 3, 1] {
        ids.free_id(id)?;
    }
    ids.close()?;
    assert_eq!(IdGenerator::read_image(&*fs, &path)?.free_ids, vec![5, 3, 1]);

    let ids = IdGenerator::open(Arc::clone(&fs), &path, options(3, 1000))?;
    let reused: Vec<u64> = (0..4).map(|_| ids.next_id()).collect::<Result<_>>()?;
    assert_eq!(reused, vec![1, 3, 5, 6]);
    ids.close()?;
    Ok(())
}
