use cardvault_collection::{Collection, ImportOptions};
use cardvault_core::{Error, Model, ModelId, Note, DEFAULT_DECK_ID};
use std::path::Path;
use tokio_util::sync::CancellationToken;

async fn open_col(dir: &Path, name: &str) -> Collection {
    Collection::open(dir.join(name)).await.unwrap()
}

fn basic_model() -> Model {
    let mut model = Model::new("Basic");
    model.add_field("Front");
    model.add_field("Back");
    model.add_template("Card 1", "{{Front}}", "{{Back}}");
    model
}

async fn add_note(col: &mut Collection, mid: ModelId, front: &str) {
    let note = Note::new(mid, vec![front.to_string(), "back".to_string()]);
    col.add_note(note, DEFAULT_DECK_ID).await.unwrap();
}

async fn note_count(col: &Collection) -> i64 {
    col.store().scalar("SELECT count(*) FROM notes").await.unwrap()
}

#[tokio::test]
async fn round_trip_import_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let mut src = open_col(tmp.path(), "src.anki2").await;
    let mid = src.add_model(basic_model()).await.unwrap();
    add_note(&mut src, mid, "uno [sound:hola.mp3]").await;
    add_note(&mut src, mid, "dos").await;
    std::fs::write(tmp.path().join("hola.mp3"), b"audio bytes").unwrap();
    src.add_media_file(tmp.path().join("hola.mp3")).await.unwrap();

    let pkg = tmp.path().join("export.apkg");
    let packed = src.export_package(&pkg).await.unwrap();
    assert_eq!(packed, 1);

    let mut dst = open_col(tmp.path(), "dst.anki2").await;
    let cancel = CancellationToken::new();
    let summary = dst
        .import_package(&pkg, &ImportOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(summary.notes_added, 2);
    assert_eq!(summary.cards_added, 2);
    assert_eq!(summary.dupes, 0);
    assert_eq!(summary.conflicting, 0);
    assert_eq!(summary.media_added, 1);
    assert_eq!(note_count(&dst).await, 2);

    // Importing the same package again adds nothing.
    let again = dst
        .import_package(&pkg, &ImportOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(again.notes_added, 0);
    assert_eq!(again.notes_updated, 0);
    assert_eq!(again.dupes, 2);
    assert_eq!(again.cards_added, 0);
    assert_eq!(note_count(&dst).await, 2);
}

#[tokio::test]
async fn newer_source_note_updates_by_guid() {
    let tmp = tempfile::tempdir().unwrap();
    let mut src = open_col(tmp.path(), "src.anki2").await;
    let mid = src.add_model(basic_model()).await.unwrap();
    add_note(&mut src, mid, "original").await;
    let pkg1 = tmp.path().join("v1.apkg");
    src.export_package(&pkg1).await.unwrap();

    let mut dst = open_col(tmp.path(), "dst.anki2").await;
    let cancel = CancellationToken::new();
    dst.import_package(&pkg1, &ImportOptions::default(), &cancel)
        .await
        .unwrap();

    // Edit the source note so it is strictly newer, then re-export.
    let nid: i64 = src.store().scalar("SELECT id FROM notes").await.unwrap();
    let mut note = src.get_note(nid).await.unwrap();
    note.fields[0] = "edited".to_string();
    src.update_note(note).await.unwrap();
    sqlx::query("UPDATE notes SET mod = mod + 10")
        .execute(src.store().pool())
        .await
        .unwrap();
    let pkg2 = tmp.path().join("v2.apkg");
    src.export_package(&pkg2).await.unwrap();

    let summary = dst
        .import_package(&pkg2, &ImportOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(summary.notes_added, 0);
    assert_eq!(summary.notes_updated, 1);
    assert_eq!(note_count(&dst).await, 1);

    let flds: String = dst.store().scalar("SELECT flds FROM notes").await.unwrap();
    assert!(flds.starts_with("edited"));
}

#[tokio::test]
async fn conflicting_media_is_renamed_and_fields_rewritten() {
    let tmp = tempfile::tempdir().unwrap();
    let mut src = open_col(tmp.path(), "src.anki2").await;
    let mid = src.add_model(basic_model()).await.unwrap();
    add_note(&mut src, mid, r#"<img src="pic.jpg">"#).await;
    std::fs::write(tmp.path().join("pic.jpg"), b"incoming bytes").unwrap();
    src.add_media_file(tmp.path().join("pic.jpg")).await.unwrap();
    let pkg = tmp.path().join("export.apkg");
    src.export_package(&pkg).await.unwrap();

    let mut dst = open_col(tmp.path(), "dst.anki2").await;
    let dst_media = dst.media().unwrap().dir().to_path_buf();
    std::fs::write(dst_media.join("pic.jpg"), b"local bytes").unwrap();

    let cancel = CancellationToken::new();
    let summary = dst
        .import_package(&pkg, &ImportOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(summary.notes_added, 1);

    // The local file kept its name and bytes; the incoming one moved.
    assert_eq!(std::fs::read(dst_media.join("pic.jpg")).unwrap(), b"local bytes");
    assert_eq!(
        std::fs::read(dst_media.join("pic (1).jpg")).unwrap(),
        b"incoming bytes"
    );
    let flds: String = dst.store().scalar("SELECT flds FROM notes").await.unwrap();
    assert!(flds.contains("pic (1).jpg"), "fields were {flds}");
}

#[tokio::test]
async fn model_id_collision_needs_explicit_consent() {
    let tmp = tempfile::tempdir().unwrap();
    let mut src = open_col(tmp.path(), "src.anki2").await;
    let mut model = basic_model();
    model.id = 555_000;
    let mid = src.add_model(model).await.unwrap();
    assert_eq!(mid, 555_000);
    add_note(&mut src, mid, "colisión").await;
    let pkg = tmp.path().join("export.apkg");
    src.export_package(&pkg).await.unwrap();

    let mut dst = open_col(tmp.path(), "dst.anki2").await;
    let mut other = Model::new("Incompatible");
    other.id = 555_000;
    other.add_field("Only");
    other.add_template("Card 1", "{{Only}}", "{{Only}}");
    dst.add_model(other).await.unwrap();

    let cancel = CancellationToken::new();
    let err = dst
        .import_package(&pkg, &ImportOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SchemaChangeRejected(_)), "got {err:?}");
    assert_eq!(note_count(&dst).await, 0, "a rejected import writes nothing");

    let opts = ImportOptions {
        allow_schema_change: true,
        ..ImportOptions::default()
    };
    let summary = dst.import_package(&pkg, &opts, &cancel).await.unwrap();
    assert_eq!(summary.notes_added, 1);
    assert_eq!(dst.models().len(), 2, "incoming model re-homed to a fresh id");
}

#[tokio::test]
async fn rejected_import_copies_no_media() {
    let tmp = tempfile::tempdir().unwrap();
    let mut src = open_col(tmp.path(), "src.anki2").await;
    let mut model = basic_model();
    model.id = 777_000;
    let mid = src.add_model(model).await.unwrap();
    add_note(&mut src, mid, "ruido [sound:clip.mp3]").await;
    std::fs::write(tmp.path().join("clip.mp3"), b"pcm bytes").unwrap();
    src.add_media_file(tmp.path().join("clip.mp3")).await.unwrap();
    let pkg = tmp.path().join("export.apkg");
    src.export_package(&pkg).await.unwrap();

    let mut dst = open_col(tmp.path(), "dst.anki2").await;
    let mut other = Model::new("Incompatible");
    other.id = 777_000;
    other.add_field("Only");
    other.add_template("Card 1", "{{Only}}", "{{Only}}");
    dst.add_model(other).await.unwrap();
    let dst_media = dst.media().unwrap().dir().to_path_buf();

    let cancel = CancellationToken::new();
    let err = dst
        .import_package(&pkg, &ImportOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SchemaChangeRejected(_)), "got {err:?}");

    // The rejection fired before any media side effect: no file in the
    // folder and no change-log row.
    assert!(!dst_media.join("clip.mp3").exists());
    assert_eq!(std::fs::read_dir(&dst_media).unwrap().count(), 0);
    let logged: i64 = dst.store().scalar("SELECT count(*) FROM media").await.unwrap();
    assert_eq!(logged, 0);
}

#[tokio::test]
async fn cancelled_import_stages_no_decks() {
    let tmp = tempfile::tempdir().unwrap();
    let mut src = open_col(tmp.path(), "src.anki2").await;
    let mid = src.add_model(basic_model()).await.unwrap();
    let did = src.add_deck("Imported::Stuff").await.unwrap();
    let note = Note::new(mid, vec!["x".to_string(), "back".to_string()]);
    src.add_note(note, did).await.unwrap();
    let pkg = tmp.path().join("export.apkg");
    src.export_package(&pkg).await.unwrap();

    let mut dst = open_col(tmp.path(), "dst.anki2").await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = dst
        .import_package(&pkg, &ImportOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    // Neither the cache nor the persisted blob picked up the incoming
    // deck tree.
    assert!(dst.decks().values().all(|d| d.name == "Default"));
    let blob: String = dst.store().scalar("SELECT decks FROM col").await.unwrap();
    assert!(!blob.contains("Imported"), "decks blob was {blob}");
}

#[tokio::test]
async fn cancelled_import_leaves_no_rows_behind() {
    let tmp = tempfile::tempdir().unwrap();
    let mut src = open_col(tmp.path(), "src.anki2").await;
    let mid = src.add_model(basic_model()).await.unwrap();
    add_note(&mut src, mid, "nunca").await;
    let pkg = tmp.path().join("export.apkg");
    src.export_package(&pkg).await.unwrap();

    let mut dst = open_col(tmp.path(), "dst.anki2").await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = dst
        .import_package(&pkg, &ImportOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(note_count(&dst).await, 0);
}
