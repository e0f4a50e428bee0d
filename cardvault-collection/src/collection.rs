//! The collection aggregate: owns the store handle, the deck/model
//! caches, and lazily built scheduler and media manager. All mutating
//! operations run inside a single store transaction and bump the USN
//! exactly once.

use crate::media::MediaManager;
use crate::sched::{AnswerOutcome, Scheduler, UndoStep};
use cardvault_core::{
    now_millis, now_secs, Card, CardId, CollectionConfig, Deck, DeckId, Ease, Error, Model,
    ModelId, Note, NoteId, Result, DEFAULT_DECK_ID,
};
use cardvault_store::{
    add_grave, bump_usn, card_from_row, db_err, note_from_row, upsert_card, upsert_note, Store,
    CARD_COLS, GRAVE_CARD, GRAVE_DECK, GRAVE_NOTE, NOTE_COLS,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What to do with a deleted deck's cards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeckRemovalPolicy {
    DeleteCards,
    ReassignToDefault,
}

pub struct Collection {
    store: Arc<Store>,
    path: PathBuf,
    crt: i64,
    config: CollectionConfig,
    decks: HashMap<DeckId, Deck>,
    models: HashMap<ModelId, Model>,
    sched: Option<Scheduler>,
    media: Option<MediaManager>,
    undo: Option<UndoStep>,
}

impl Collection {
    /// Open or create the collection at `path`. Corruption surfaces as
    /// [`Error::CorruptDatabase`]; the file is never deleted here.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let store = Arc::new(Store::open(&path).await?);
        let mut col = Self {
            store,
            path,
            crt: 0,
            config: CollectionConfig::default(),
            decks: HashMap::new(),
            models: HashMap::new(),
            sched: None,
            media: None,
            undo: None,
        };
        col.load_meta().await?;
        Ok(col)
    }

    /// In-memory collection for tests.
    pub async fn open_memory() -> Result<Self> {
        let store = Arc::new(Store::open_memory().await?);
        let mut col = Self {
            store,
            path: PathBuf::from(":memory:"),
            crt: 0,
            config: CollectionConfig::default(),
            decks: HashMap::new(),
            models: HashMap::new(),
            sched: None,
            media: None,
            undo: None,
        };
        col.load_meta().await?;
        Ok(col)
    }

    async fn load_meta(&mut self) -> Result<()> {
        let row = sqlx::query_as::<_, (i64, String, String, String)>(
            "SELECT crt, conf, models, decks FROM col",
        )
        .fetch_one(self.store.pool())
        .await
        .map_err(db_err)?;
        self.crt = row.0;
        self.config = serde_json::from_str(&row.1)?;
        let models: HashMap<String, Model> = serde_json::from_str(&row.2)?;
        self.models = models.into_values().map(|m| (m.id, m)).collect();
        let decks: HashMap<String, Deck> = serde_json::from_str(&row.3)?;
        self.decks = decks.into_values().map(|d| (d.id, d)).collect();
        Ok(())
    }

    /// Release the database handle.
    pub async fn close(self) {
        self.store.close().await;
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn crt(&self) -> i64 {
        self.crt
    }

    /// Days elapsed since collection creation. Review cards are due at
    /// day-numbers relative to this, so a clock change mid-session cannot
    /// reorder the queue.
    pub fn today(&self) -> i64 {
        ((now_secs() - self.crt) / 86_400).max(0)
    }

    /// Epoch seconds at which `today` rolls over.
    pub fn day_cutoff(&self) -> i64 {
        self.crt + (self.today() + 1) * 86_400
    }

    pub async fn usn(&self) -> Result<i64> {
        self.store.usn().await
    }

    // ===== Models =====

    pub fn models(&self) -> &HashMap<ModelId, Model> {
        &self.models
    }

    pub fn get_model(&self, id: ModelId) -> Option<&Model> {
        self.models.get(&id)
    }

    pub async fn add_model(&mut self, mut model: Model) -> Result<ModelId> {
        self.undo = None;
        while self.models.contains_key(&model.id) {
            model.id += 1;
        }
        model.mtime_secs = now_secs();
        self.models.insert(model.id, model.clone());
        let blob = self.models_blob()?;
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    bump_usn(conn).await?;
                    sqlx::query("UPDATE col SET models = ?")
                        .bind(&blob)
                        .execute(conn)
                        .await
                        .map_err(db_err)?;
                    Ok(())
                })
            })
            .await?;
        Ok(model.id)
    }

    /// Replace a model. Changing the field or template count invalidates
    /// every card generated from the model, so it requires
    /// `confirm_schema_change`; cards generated from removed templates
    /// are deleted with the update, leaving no card pointing past the
    /// template list.
    pub async fn update_model(&mut self, mut model: Model, confirm_schema_change: bool) -> Result<()> {
        let existing = self
            .models
            .get(&model.id)
            .ok_or(Error::NotFound("model"))?;
        let schema_changed = existing.fields.len() != model.fields.len()
            || existing.templates.len() != model.templates.len();
        if schema_changed && !confirm_schema_change {
            return Err(Error::SchemaChangeRejected(model.name));
        }
        let templates_removed = model.templates.len() < existing.templates.len();
        let mid = model.id;
        let template_count = model.templates.len() as i64;
        model.mtime_secs = now_secs();
        self.models.insert(model.id, model);
        let blob = self.models_blob()?;
        self.undo = None;
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    let usn = bump_usn(conn).await?;
                    if templates_removed {
                        let orphaned: Vec<i64> = sqlx::query_scalar(
                            "SELECT c.id FROM cards c JOIN notes n ON n.id = c.nid
                             WHERE n.mid = ? AND c.ord >= ?",
                        )
                        .bind(mid)
                        .bind(template_count)
                        .fetch_all(&mut *conn)
                        .await
                        .map_err(db_err)?;
                        for cid in &orphaned {
                            add_grave(conn, usn, *cid, GRAVE_CARD).await?;
                            sqlx::query("DELETE FROM cards WHERE id = ?")
                                .bind(cid)
                                .execute(&mut *conn)
                                .await
                                .map_err(db_err)?;
                        }
                    }
                    sqlx::query("UPDATE col SET models = ?")
                        .bind(&blob)
                        .execute(conn)
                        .await
                        .map_err(db_err)?;
                    Ok(())
                })
            })
            .await?;
        self.invalidate_queues();
        Ok(())
    }

    fn models_blob(&self) -> Result<String> {
        let by_key: HashMap<String, &Model> =
            self.models.iter().map(|(id, m)| (id.to_string(), m)).collect();
        Ok(serde_json::to_string(&by_key)?)
    }

    // ===== Decks =====

    pub fn decks(&self) -> &HashMap<DeckId, Deck> {
        &self.decks
    }

    pub fn get_deck(&self, id: DeckId) -> Option<&Deck> {
        self.decks.get(&id)
    }

    pub fn deck_id_by_name(&self, name: &str) -> Option<DeckId> {
        self.decks
            .values()
            .find(|d| d.name == name)
            .map(|d| d.id)
    }

    /// Return the deck id for `name`, creating the deck (and any missing
    /// `::` parents) when absent.
    pub async fn add_deck(&mut self, name: &str) -> Result<DeckId> {
        if let Some(id) = self.deck_id_by_name(name) {
            return Ok(id);
        }
        self.undo = None;
        let id = self.stage_deck(name);
        self.flush_decks().await?;
        Ok(id)
    }

    /// Ensure `name` and any missing `::` parents exist in the cache,
    /// without flushing; the caller persists the decks blob in its own
    /// transaction. New decks carry usn -1 until a sync assigns one.
    pub(crate) fn stage_deck(&mut self, name: &str) -> DeckId {
        let mut head = String::new();
        let mut last_id = DEFAULT_DECK_ID;
        for part in name.split("::") {
            if !head.is_empty() {
                head.push_str("::");
            }
            head.push_str(part);
            last_id = match self.deck_id_by_name(&head) {
                Some(id) => id,
                None => {
                    let mut deck = Deck::new(head.clone());
                    while self.decks.contains_key(&deck.id) {
                        deck.id += 1;
                    }
                    deck.new_per_day = self.config.sched.new_per_day;
                    deck.rev_per_day = self.config.sched.rev_per_day;
                    let id = deck.id;
                    self.decks.insert(id, deck);
                    id
                }
            };
        }
        last_id
    }

    pub async fn add_filtered_deck(&mut self, name: &str, search: &str) -> Result<DeckId> {
        if self.deck_id_by_name(name).is_some() {
            return Err(Error::ConstraintViolation(format!(
                "deck '{name}' already exists"
            )));
        }
        self.undo = None;
        let mut deck = Deck::new_filtered(name, search);
        while self.decks.contains_key(&deck.id) {
            deck.id += 1;
        }
        let id = deck.id;
        self.decks.insert(id, deck);
        self.flush_decks().await?;
        Ok(id)
    }

    /// Remove a deck. A filtered deck first sends its cards home; a
    /// regular deck's cards are deleted or reassigned per `policy`.
    pub async fn remove_deck(&mut self, id: DeckId, policy: DeckRemovalPolicy) -> Result<()> {
        if id == DEFAULT_DECK_ID {
            return Err(Error::Invalid("the default deck cannot be removed"));
        }
        self.undo = None;
        let deck = self.decks.remove(&id).ok_or(Error::NotFound("deck"))?;
        let blob = self.decks_blob()?;
        let filtered = deck.is_filtered();
        let result = self
            .store
            .transaction(move |conn| {
                Box::pin(async move {
                    let usn = bump_usn(conn).await?;
                    if filtered {
                        crate::sched::send_filtered_cards_home(conn, id, usn).await?;
                    } else {
                        match policy {
                            DeckRemovalPolicy::ReassignToDefault => {
                                sqlx::query(
                                    "UPDATE cards SET did = ?, usn = ?, mod = ? WHERE did = ?",
                                )
                                .bind(DEFAULT_DECK_ID)
                                .bind(usn)
                                .bind(now_secs())
                                .bind(id)
                                .execute(&mut *conn)
                                .await
                                .map_err(db_err)?;
                            }
                            DeckRemovalPolicy::DeleteCards => {
                                delete_deck_cards(conn, id, usn).await?;
                            }
                        }
                    }
                    add_grave(conn, usn, id, GRAVE_DECK).await?;
                    sqlx::query("UPDATE col SET decks = ?")
                        .bind(&blob)
                        .execute(conn)
                        .await
                        .map_err(db_err)?;
                    Ok(())
                })
            })
            .await;
        if result.is_err() {
            self.decks.insert(id, deck);
        }
        result?;
        self.invalidate_queues();
        Ok(())
    }

    fn decks_blob(&self) -> Result<String> {
        let by_key: HashMap<String, &Deck> =
            self.decks.iter().map(|(id, d)| (id.to_string(), d)).collect();
        Ok(serde_json::to_string(&by_key)?)
    }

    async fn flush_decks(&self) -> Result<()> {
        let blob = self.decks_blob()?;
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    bump_usn(conn).await?;
                    sqlx::query("UPDATE col SET decks = ?")
                        .bind(&blob)
                        .execute(conn)
                        .await
                        .map_err(db_err)?;
                    Ok(())
                })
            })
            .await
    }

    /// Serialized models and decks, for the import merger to persist
    /// inside its own transaction so the whole merge stays one atomic
    /// unit.
    pub(crate) fn meta_blobs(&self) -> Result<(String, String)> {
        Ok((self.models_blob()?, self.decks_blob()?))
    }

    pub(crate) fn insert_model_unchecked(&mut self, model: Model) {
        self.models.insert(model.id, model);
    }

    // ===== Notes and cards =====

    /// Add a note and generate one card per model template. Returns the
    /// number of cards created.
    pub async fn add_note(&mut self, mut note: Note, deck_id: DeckId) -> Result<usize> {
        let model = self
            .models
            .get(&note.model_id)
            .ok_or(Error::NotFound("model"))?;
        if note.fields.len() != model.fields.len() {
            return Err(Error::ConstraintViolation(format!(
                "note has {} fields, model '{}' expects {}",
                note.fields.len(),
                model.name,
                model.fields.len()
            )));
        }
        if !self.decks.contains_key(&deck_id) {
            return Err(Error::NotFound("deck"));
        }
        let sort_field = note.sort_field(model).to_string();
        let template_count = model.templates.len().max(1);
        self.undo = None;
        note.mtime_secs = now_secs();
        while self.note_exists(note.id).await? {
            note.id += 999;
        }

        let next_pos: Option<i64> = sqlx::query_scalar(
            "SELECT max(due) FROM cards WHERE queue = 0",
        )
        .fetch_one(self.store.pool())
        .await
        .map_err(db_err)?;
        let base_pos = next_pos.unwrap_or(0) + 1;

        let mut cards = Vec::with_capacity(template_count);
        let mut card_id = now_millis();
        for ord in 0..template_count {
            let mut card = Card::new(note.id, deck_id, ord as u16, base_pos + ord as i64);
            card.id = card_id;
            card_id += 1;
            cards.push(card);
        }

        let count = cards.len();
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    let usn = bump_usn(conn).await?;
                    note.usn = usn;
                    upsert_note(conn, &note, &sort_field).await?;
                    for card in &mut cards {
                        card.usn = usn;
                        upsert_card(conn, card).await?;
                    }
                    Ok(())
                })
            })
            .await?;
        self.invalidate_queues();
        Ok(count)
    }

    pub async fn update_note(&mut self, mut note: Note) -> Result<()> {
        let model = self
            .models
            .get(&note.model_id)
            .ok_or(Error::NotFound("model"))?;
        if note.fields.len() != model.fields.len() {
            return Err(Error::ConstraintViolation(
                "field count does not match the note's model".into(),
            ));
        }
        if !self.note_exists(note.id).await? {
            return Err(Error::NotFound("note"));
        }
        let sort_field = note.sort_field(model).to_string();
        self.undo = None;
        note.mtime_secs = now_secs();
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    let usn = bump_usn(conn).await?;
                    note.usn = usn;
                    upsert_note(conn, &note, &sort_field).await?;
                    Ok(())
                })
            })
            .await
    }

    /// Delete notes; their cards cascade and every removal is recorded in
    /// the deletion log.
    pub async fn remove_notes(&mut self, note_ids: &[NoteId]) -> Result<()> {
        if note_ids.is_empty() {
            return Ok(());
        }
        self.undo = None;
        let ids = note_ids.to_vec();
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    let usn = bump_usn(conn).await?;
                    for nid in ids {
                        let card_ids: Vec<i64> =
                            sqlx::query_scalar("SELECT id FROM cards WHERE nid = ?")
                                .bind(nid)
                                .fetch_all(&mut *conn)
                                .await
                                .map_err(db_err)?;
                        for cid in card_ids {
                            add_grave(conn, usn, cid, GRAVE_CARD).await?;
                        }
                        sqlx::query("DELETE FROM cards WHERE nid = ?")
                            .bind(nid)
                            .execute(&mut *conn)
                            .await
                            .map_err(db_err)?;
                        sqlx::query("DELETE FROM notes WHERE id = ?")
                            .bind(nid)
                            .execute(&mut *conn)
                            .await
                            .map_err(db_err)?;
                        add_grave(conn, usn, nid, GRAVE_NOTE).await?;
                    }
                    Ok(())
                })
            })
            .await?;
        self.invalidate_queues();
        Ok(())
    }

    async fn note_exists(&self, id: NoteId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM notes WHERE id = ? LIMIT 1")
            .bind(id)
            .fetch_optional(self.store.pool())
            .await
            .map_err(db_err)?;
        Ok(found.is_some())
    }

    pub async fn get_note(&self, id: NoteId) -> Result<Note> {
        let row = sqlx::query(&format!("SELECT {NOTE_COLS} FROM notes WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.store.pool())
            .await
            .map_err(db_err)?
            .ok_or(Error::NotFound("note"))?;
        note_from_row(row)
    }

    pub async fn get_card(&self, id: CardId) -> Result<Card> {
        let row = sqlx::query(&format!("SELECT {CARD_COLS} FROM cards WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.store.pool())
            .await
            .map_err(db_err)?
            .ok_or(Error::NotFound("card"))?;
        card_from_row(row)
    }

    pub async fn note_cards(&self, note_id: NoteId) -> Result<Vec<Card>> {
        let rows = sqlx::query(&format!(
            "SELECT {CARD_COLS} FROM cards WHERE nid = ? ORDER BY ord"
        ))
        .bind(note_id)
        .fetch_all(self.store.pool())
        .await
        .map_err(db_err)?;
        rows.into_iter().map(card_from_row).collect()
    }

    // ===== Scheduler =====

    fn sched_mut(&mut self) -> &mut Scheduler {
        if self.sched.is_none() {
            self.sched = Some(Scheduler::new(
                Arc::clone(&self.store),
                self.crt,
                self.config.sched.clone(),
            ));
        }
        self.sched.as_mut().expect("just initialized")
    }

    fn invalidate_queues(&mut self) {
        if let Some(s) = self.sched.as_mut() {
            s.invalidate();
        }
    }

    /// Populate the scheduler's candidate queues for `deck_id` and its
    /// `::` descendants, or the whole collection when `None`.
    pub async fn build_queues(&mut self, deck_id: Option<DeckId>) -> Result<()> {
        let decks: Vec<Deck> = match deck_id {
            Some(id) => {
                let root = self.decks.get(&id).ok_or(Error::NotFound("deck"))?.clone();
                self.decks
                    .values()
                    .filter(|d| root.includes_name(&d.name))
                    .cloned()
                    .collect()
            }
            None => self.decks.values().cloned().collect(),
        };
        self.sched_mut().build_queues(&decks).await
    }

    /// Head of the highest-priority non-empty queue; `None` when review
    /// is finished. No side effects.
    pub async fn get_next_card(&mut self) -> Result<Option<Card>> {
        self.sched_mut().get_next_card().await
    }

    /// (new, learning, review) counts of the built queues.
    pub fn queue_counts(&mut self) -> (usize, usize, usize) {
        self.sched_mut().counts()
    }

    /// Answer `card` with `ease`. The review log insert, card update and
    /// any leech-triggered suspension commit atomically; the pre-answer
    /// row image is retained for a single-level undo.
    pub async fn answer_card(&mut self, card: &mut Card, ease: Ease) -> Result<AnswerOutcome> {
        let (outcome, undo) = self.sched_mut().answer_card(card, ease).await?;
        self.undo = Some(undo);
        Ok(outcome)
    }

    /// Undo the last answer, restoring the exact pre-answer row image in
    /// a fresh transaction. Returns the restored card id, or `None` when
    /// there is nothing to undo; queues require a rebuild afterwards.
    /// The step only survives while the answer is the latest mutating
    /// operation; anything else retires it.
    pub async fn undo(&mut self) -> Result<Option<CardId>> {
        let Some(step) = self.undo.take() else {
            return Ok(None);
        };
        let id = self.sched_mut().undo(step).await?;
        Ok(Some(id))
    }

    pub async fn suspend_cards(&mut self, card_ids: &[CardId]) -> Result<()> {
        self.undo = None;
        self.sched_mut().suspend_cards(card_ids).await
    }

    pub async fn unsuspend_cards(&mut self, card_ids: &[CardId]) -> Result<()> {
        self.undo = None;
        self.sched_mut().unsuspend_cards(card_ids).await
    }

    pub async fn bury_cards(&mut self, card_ids: &[CardId]) -> Result<()> {
        self.undo = None;
        self.sched_mut().bury_cards(card_ids).await
    }

    pub async fn unbury_all(&mut self) -> Result<()> {
        self.undo = None;
        self.sched_mut().unbury_all().await
    }

    /// Suspend every sibling card of the note.
    pub async fn suspend_note(&mut self, note_id: NoteId) -> Result<()> {
        self.undo = None;
        let ids: Vec<CardId> = self.note_cards(note_id).await?.iter().map(|c| c.id).collect();
        self.sched_mut().suspend_cards(&ids).await
    }

    /// Bury every sibling card of the note.
    pub async fn bury_note(&mut self, note_id: NoteId) -> Result<()> {
        self.undo = None;
        let ids: Vec<CardId> = self.note_cards(note_id).await?.iter().map(|c| c.id).collect();
        self.sched_mut().bury_cards(&ids).await
    }

    /// Re-home cards matching the filtered deck's search into it.
    pub async fn rebuild_filtered_deck(&mut self, deck_id: DeckId) -> Result<usize> {
        self.undo = None;
        let deck = self
            .decks
            .get(&deck_id)
            .ok_or(Error::NotFound("deck"))?
            .clone();
        let decks: Vec<Deck> = self.decks.values().cloned().collect();
        self.sched_mut().rebuild_filtered(&deck, &decks).await
    }

    /// Send a filtered deck's cards back to their home decks.
    pub async fn empty_filtered_deck(&mut self, deck_id: DeckId) -> Result<()> {
        self.undo = None;
        let deck = self.decks.get(&deck_id).ok_or(Error::NotFound("deck"))?;
        if !deck.is_filtered() {
            return Err(Error::Invalid("deck is not a filtered deck"));
        }
        self.sched_mut().empty_filtered(deck_id).await
    }

    // ===== Media =====

    pub fn media(&mut self) -> Result<&MediaManager> {
        if self.media.is_none() {
            self.media = Some(MediaManager::new(
                Arc::clone(&self.store),
                &self.path,
            )?);
        }
        Ok(self.media.as_ref().expect("just initialized"))
    }

    /// Copy `path` into the media folder, deduplicating by checksum, and
    /// return the filename the content ended up under.
    pub async fn add_media_file(&mut self, path: impl AsRef<Path>) -> Result<String> {
        self.undo = None;
        self.media()?.add_file(path.as_ref()).await
    }

    /// Cross-reference note fields against the media folder.
    pub async fn check_media(&mut self) -> Result<crate::media::MediaCheck> {
        self.media()?.check().await
    }

    // ===== Packages =====

    /// Write the collection and its media folder into a package at
    /// `out`. Only file-backed collections can be exported.
    pub async fn export_package(&mut self, out: impl AsRef<Path>) -> Result<usize> {
        let media_dir = self.media()?.dir().to_path_buf();
        crate::package::export_package(&self.store, &self.path, Some(&media_dir), out.as_ref())
            .await
    }

    /// Merge the package at `path` into this collection.
    pub async fn import_package(
        &mut self,
        path: impl AsRef<Path>,
        opts: &crate::import::ImportOptions,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<crate::import::ImportSummary> {
        self.undo = None;
        let summary = crate::import::import_package(self, path.as_ref(), opts, cancel).await;
        if summary.is_err() {
            // The caches may hold models/decks the failed merge staged.
            self.load_meta().await?;
        }
        self.invalidate_queues();
        summary
    }
}

async fn delete_deck_cards(
    conn: &mut sqlx::SqliteConnection,
    deck_id: DeckId,
    usn: i64,
) -> Result<()> {
    let card_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM cards WHERE did = ?")
        .bind(deck_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;
    for cid in &card_ids {
        add_grave(conn, usn, *cid, GRAVE_CARD).await?;
    }
    sqlx::query("DELETE FROM cards WHERE did = ?")
        .bind(deck_id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    // Notes left without any card go too.
    let orphaned: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM notes WHERE id NOT IN (SELECT nid FROM cards)",
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;
    for nid in orphaned {
        sqlx::query("DELETE FROM notes WHERE id = ?")
            .bind(nid)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        add_grave(conn, usn, nid, GRAVE_NOTE).await?;
    }
    Ok(())
}
