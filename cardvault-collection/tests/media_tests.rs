use cardvault_collection::Collection;
use cardvault_core::{Error, Model, Note, DEFAULT_DECK_ID};
use std::path::{Path, PathBuf};

async fn open_col(dir: &Path) -> Collection {
    Collection::open(dir.join("collection.anki2")).await.unwrap()
}

fn stage_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

#[tokio::test]
async fn same_bytes_dedup_different_bytes_rename() {
    let tmp = tempfile::tempdir().unwrap();
    let stage = tempfile::tempdir().unwrap();
    let mut col = open_col(tmp.path()).await;

    let src = stage_file(stage.path(), "hola.jpg", b"first image");
    assert_eq!(col.add_media_file(&src).await.unwrap(), "hola.jpg");
    // Re-adding identical content is a no-op on the name.
    assert_eq!(col.add_media_file(&src).await.unwrap(), "hola.jpg");

    let other = stage_file(stage.path(), "hola.jpg", b"different image");
    assert_eq!(col.add_media_file(&other).await.unwrap(), "hola (1).jpg");

    // The original was never overwritten.
    let media_dir = col.media().unwrap().dir().to_path_buf();
    assert_eq!(std::fs::read(media_dir.join("hola.jpg")).unwrap(), b"first image");
    assert_eq!(
        std::fs::read(media_dir.join("hola (1).jpg")).unwrap(),
        b"different image"
    );
}

#[tokio::test]
async fn dangerous_characters_are_stripped_on_add() {
    let tmp = tempfile::tempdir().unwrap();
    let stage = tempfile::tempdir().unwrap();
    let mut col = open_col(tmp.path()).await;

    let src = stage_file(stage.path(), "a b?c.png", b"png bytes");
    assert_eq!(col.add_media_file(&src).await.unwrap(), "a bc.png");
}

#[tokio::test]
async fn empty_files_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let stage = tempfile::tempdir().unwrap();
    let mut col = open_col(tmp.path()).await;

    let src = stage_file(stage.path(), "zero.mp3", b"");
    let err = col.add_media_file(&src).await.unwrap_err();
    assert!(matches!(err, Error::EmptyMedia(_)), "got {err:?}");
}

#[tokio::test]
async fn removed_file_tombstones_exactly_once() {
    let tmp = tempfile::tempdir().unwrap();
    let stage = tempfile::tempdir().unwrap();
    let mut col = open_col(tmp.path()).await;

    let src = stage_file(stage.path(), "gone.wav", b"audio");
    col.add_media_file(&src).await.unwrap();
    let media_dir = col.media().unwrap().dir().to_path_buf();
    std::fs::remove_file(media_dir.join("gone.wav")).unwrap();

    let report = col.media().unwrap().find_changes(true).await.unwrap();
    assert_eq!(report.removed, vec!["gone.wav".to_string()]);

    // The tombstone is already recorded; a second scan is quiet.
    let report = col.media().unwrap().find_changes(true).await.unwrap();
    assert!(report.removed.is_empty());
    assert!(report.added.is_empty());
}

#[tokio::test]
async fn scan_picks_up_files_dropped_into_the_folder() {
    let tmp = tempfile::tempdir().unwrap();
    let mut col = open_col(tmp.path()).await;
    let media_dir = col.media().unwrap().dir().to_path_buf();

    std::fs::write(media_dir.join("dropped.png"), b"dropped bytes").unwrap();
    std::fs::write(media_dir.join("Thumbs.db"), b"os junk").unwrap();
    std::fs::write(media_dir.join("empty.png"), b"").unwrap();

    let report = col.media().unwrap().find_changes(true).await.unwrap();
    assert_eq!(report.added, vec!["dropped.png".to_string()]);
    assert!(report.errors.is_empty());

    // The empty file is skipped, never deleted.
    assert!(media_dir.join("empty.png").exists());
}

#[tokio::test]
async fn check_reports_missing_unused_and_invalid() {
    let tmp = tempfile::tempdir().unwrap();
    let stage = tempfile::tempdir().unwrap();
    let mut col = open_col(tmp.path()).await;

    let mut model = Model::new("Basic");
    model.add_field("Front");
    model.add_template("Card 1", "{{Front}}", "{{Front}}");
    let mid = col.add_model(model).await.unwrap();
    let note = Note::new(mid, vec!["hola [sound:gone.mp3]".to_string()]);
    col.add_note(note, DEFAULT_DECK_ID).await.unwrap();

    let src = stage_file(stage.path(), "orphan.jpg", b"unreferenced");
    col.add_media_file(&src).await.unwrap();
    let media_dir = col.media().unwrap().dir().to_path_buf();
    std::fs::write(media_dir.join("_static.css"), b"shared asset").unwrap();
    std::fs::write(media_dir.join("bad|name.png"), b"untrackable").unwrap();

    let check = col.check_media().await.unwrap();
    assert_eq!(check.missing, vec!["gone.mp3".to_string()]);
    assert_eq!(check.unused, vec!["orphan.jpg".to_string()]);
    assert_eq!(check.invalid, vec!["bad|name.png".to_string()]);
    assert!(check.errors.is_empty());
}
