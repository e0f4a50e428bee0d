use cardvault_collection::{Collection, DeckRemovalPolicy};
use cardvault_core::{Error, Model, Note, DEFAULT_DECK_ID};

fn basic_model() -> Model {
    let mut model = Model::new("Basic");
    model.add_field("Front");
    model.add_field("Back");
    model.add_template("Card 1", "{{Front}}", "{{Back}}");
    model
}

#[tokio::test]
async fn models_and_decks_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("collection.anki2");
    let mid;
    {
        let mut col = Collection::open(&path).await.unwrap();
        mid = col.add_model(basic_model()).await.unwrap();
        col.add_deck("Spanish::Verbs").await.unwrap();
        col.close().await;
    }
    let col = Collection::open(&path).await.unwrap();
    let model = col.get_model(mid).expect("model persisted");
    assert_eq!(model.name, "Basic");
    assert_eq!(model.fields.len(), 2);

    let names: Vec<&str> = col.decks().values().map(|d| d.name.as_str()).collect();
    assert!(names.contains(&"Spanish"), "parent deck auto-created");
    assert!(names.contains(&"Spanish::Verbs"));
    assert!(names.contains(&"Default"));
    col.close().await;
}

#[tokio::test]
async fn usn_counts_one_per_logical_operation() {
    let mut col = Collection::open_memory().await.unwrap();
    assert_eq!(col.usn().await.unwrap(), 0);

    let mid = col.add_model(basic_model()).await.unwrap();
    assert_eq!(col.usn().await.unwrap(), 1);

    // One flush covers the whole `::` chain.
    col.add_deck("Idioms::Common").await.unwrap();
    assert_eq!(col.usn().await.unwrap(), 2);

    let note = Note::new(mid, vec!["uno".into(), "one".into()]);
    col.add_note(note, DEFAULT_DECK_ID).await.unwrap();
    assert_eq!(col.usn().await.unwrap(), 3);
}

#[tokio::test]
async fn schema_change_needs_confirmation() {
    let mut col = Collection::open_memory().await.unwrap();
    let mid = col.add_model(basic_model()).await.unwrap();

    let mut wider = col.get_model(mid).unwrap().clone();
    wider.add_field("Hint");
    let err = col.update_model(wider.clone(), false).await.unwrap_err();
    assert!(matches!(err, Error::SchemaChangeRejected(_)));

    col.update_model(wider, true).await.unwrap();
    assert_eq!(col.get_model(mid).unwrap().fields.len(), 3);
}

#[tokio::test]
async fn removing_a_template_deletes_its_cards() {
    let mut col = Collection::open_memory().await.unwrap();
    let mut model = basic_model();
    model.add_template("Card 2", "{{Back}}", "{{Front}}");
    let mid = col.add_model(model).await.unwrap();
    let note = Note::new(mid, vec!["tres".into(), "three".into()]);
    let made = col.add_note(note, DEFAULT_DECK_ID).await.unwrap();
    assert_eq!(made, 2);

    let mut narrower = col.get_model(mid).unwrap().clone();
    narrower.templates.pop();
    col.update_model(narrower, true).await.unwrap();

    // No card may point past the template list; the second card is gone
    // and its removal logged.
    let ords: Vec<i64> = sqlx::query_scalar("SELECT ord FROM cards")
        .fetch_all(col.store().pool())
        .await
        .unwrap();
    assert_eq!(ords, vec![0]);
    let graves: i64 = col
        .store()
        .scalar(&format!(
            "SELECT count(*) FROM graves WHERE type = {}",
            cardvault_store::GRAVE_CARD
        ))
        .await
        .unwrap();
    assert_eq!(graves, 1);
}

#[tokio::test]
async fn removed_deck_can_reassign_cards_to_default() {
    let mut col = Collection::open_memory().await.unwrap();
    let mid = col.add_model(basic_model()).await.unwrap();
    let did = col.add_deck("Doomed").await.unwrap();
    let note = Note::new(mid, vec!["dos".into(), "two".into()]);
    col.add_note(note, did).await.unwrap();

    col.remove_deck(did, DeckRemovalPolicy::ReassignToDefault)
        .await
        .unwrap();
    let homes: Vec<i64> = sqlx::query_scalar("SELECT DISTINCT did FROM cards")
        .fetch_all(col.store().pool())
        .await
        .unwrap();
    assert_eq!(homes, vec![DEFAULT_DECK_ID]);
    assert!(col.get_deck(did).is_none());
}
