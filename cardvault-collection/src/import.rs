//! Merging a package into an open collection. Notes are matched by GUID,
//! models by schema fingerprint, decks by name. The whole merge is
//! planned against a read-only view of the package first, so a rejected
//! or cancelled plan leaves no trace. Only once the plan stands are
//! media files copied in, and every row write commits in a single
//! transaction, so a failed import leaves the collection rows untouched.

use crate::collection::Collection;
use crate::media::MediaManager;
use crate::package::PackageReader;
use cardvault_core::{
    new_guid, now_secs, Card, CardType, Deck, DeckId, Error, MediaRefs, Model, ModelId, Note,
    NoteId, Queue, Result, ReviewEntry, DEFAULT_DECK_ID,
};
use cardvault_store::{
    bump_usn, card_from_row, db_err, insert_revlog, note_from_row, revlog_from_row, upsert_card,
    upsert_note, Store, CARD_COLS, NOTE_COLS,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// What to do when an incoming note's GUID already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DupePolicy {
    /// Take the incoming note when it is newer than ours.
    #[default]
    Update,
    /// Keep ours, count the incoming note as a duplicate.
    Ignore,
    /// Import under a fresh GUID, duplicating the note.
    AddAlways,
}

#[derive(Clone, Debug, Default)]
pub struct ImportOptions {
    pub dupe_policy: DupePolicy,
    /// Permit re-homing an incoming model whose id collides with an
    /// incompatible local model. Off by default; the merge then fails
    /// before writing anything.
    pub allow_schema_change: bool,
    /// Optional deck name prefix; incoming decks land under
    /// `prefix::name`.
    pub deck_prefix: Option<String>,
}

/// Counts reported after a merge. A repeated import of the same package
/// reports zero added and all-dupes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub notes_added: usize,
    pub notes_updated: usize,
    pub dupes: usize,
    /// Notes whose GUID matched but whose model no longer lines up.
    pub conflicting: usize,
    pub cards_added: usize,
    pub media_added: usize,
}

struct NotePlan {
    note: Note,
    sort_field: String,
}

pub async fn import_package(
    col: &mut Collection,
    path: &Path,
    opts: &ImportOptions,
    cancel: &CancellationToken,
) -> Result<ImportSummary> {
    let mut reader = PackageReader::open(path)?;
    let src = Store::open(reader.db_path()).await?;
    let result = merge(col, &mut reader, &src, opts, cancel).await;
    src.close().await;
    result
}

async fn merge(
    col: &mut Collection,
    reader: &mut PackageReader,
    src: &Store,
    opts: &ImportOptions,
    cancel: &CancellationToken,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    // ----- Source metadata. -----
    let (src_crt, src_models_blob, src_decks_blob) =
        sqlx::query_as::<_, (i64, String, String)>("SELECT crt, models, decks FROM col")
            .fetch_one(src.pool())
            .await
            .map_err(db_err)?;
    let src_models: HashMap<String, Model> = serde_json::from_str(&src_models_blob)?;
    let src_decks: HashMap<String, Deck> = serde_json::from_str(&src_decks_blob)?;
    // Review due-days are relative to each collection's creation day, so
    // rebase by the difference in "today".
    let src_today = ((now_secs() - src_crt) / 86_400).max(0);
    let ahead_by = src_today - col.today();

    // Schema checks run before anything touches disk; incoming decks are
    // staged in the cache and persisted by the final transaction.
    let (model_map, rehomed_models) =
        map_models(col, src_models.into_values(), opts.allow_schema_change)?;
    let deck_map = map_decks(col, src_decks.into_values(), opts.deck_prefix.as_deref());

    // ----- Existing notes by GUID. -----
    let mut dst_guids: HashMap<String, (NoteId, i64, ModelId)> = HashMap::new();
    for row in sqlx::query("SELECT guid, id, mod, mid FROM notes")
        .fetch_all(col.store().pool())
        .await
        .map_err(db_err)?
    {
        use sqlx::Row;
        dst_guids.insert(
            row.get("guid"),
            (row.get("id"), row.get("mod"), row.get("mid")),
        );
    }
    let mut dst_note_ids: HashSet<NoteId> = HashSet::new();
    for row in sqlx::query_scalar::<_, i64>("SELECT id FROM notes")
        .fetch_all(col.store().pool())
        .await
        .map_err(db_err)?
    {
        dst_note_ids.insert(row);
    }
    let mut dst_card_ids: HashSet<i64> = HashSet::new();
    let mut dst_note_ords: HashMap<NoteId, HashSet<i64>> = HashMap::new();
    for row in sqlx::query("SELECT id, nid, ord FROM cards")
        .fetch_all(col.store().pool())
        .await
        .map_err(db_err)?
    {
        use sqlx::Row;
        dst_card_ids.insert(row.get("id"));
        dst_note_ords
            .entry(row.get("nid"))
            .or_default()
            .insert(row.get("ord"));
    }

    // ----- Plan notes. -----
    let src_note_rows = sqlx::query(&format!("SELECT {NOTE_COLS} FROM notes ORDER BY id"))
        .fetch_all(src.pool())
        .await
        .map_err(db_err)?;

    let mut planned_notes: Vec<Note> = Vec::new();
    // src note id -> dst note id, for every note whose cards may come over
    let mut nid_map: HashMap<NoteId, NoteId> = HashMap::new();
    // dst note ids that are newly added here (their cards must come over)
    let mut added_notes: HashSet<NoteId> = HashSet::new();

    for row in src_note_rows {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut note = note_from_row(row)?;
        let src_id = note.id;
        let mapped_mid = *model_map
            .get(&note.model_id)
            .ok_or(Error::Invalid("package note references a missing model"))?;
        note.model_id = mapped_mid;
        // Notes moving onto a re-homed model are a different note type
        // now; give them fresh GUIDs so they never merge with the old
        // line of the note elsewhere.
        if rehomed_models.contains(&mapped_mid) {
            note.guid = new_guid();
        }

        let existing = if opts.dupe_policy == DupePolicy::AddAlways {
            None
        } else {
            dst_guids.get(&note.guid).copied()
        };
        match existing {
            Some((_, _, dst_mid)) if dst_mid != mapped_mid => {
                // Same note, incompatible model on the two sides.
                summary.conflicting += 1;
            }
            Some((dst_id, dst_mod, _)) => match opts.dupe_policy {
                DupePolicy::Ignore => {
                    summary.dupes += 1;
                    nid_map.insert(src_id, dst_id);
                }
                DupePolicy::Update | DupePolicy::AddAlways => {
                    if note.mtime_secs > dst_mod {
                        note.id = dst_id;
                        planned_notes.push(note);
                        summary.notes_updated += 1;
                    } else {
                        summary.dupes += 1;
                    }
                    nid_map.insert(src_id, dst_id);
                }
            },
            None => {
                if opts.dupe_policy == DupePolicy::AddAlways && dst_guids.contains_key(&note.guid) {
                    note.guid = new_guid();
                }
                while dst_note_ids.contains(&note.id) {
                    note.id += 999;
                }
                dst_note_ids.insert(note.id);
                nid_map.insert(src_id, note.id);
                added_notes.insert(note.id);
                planned_notes.push(note);
                summary.notes_added += 1;
            }
        }
    }

    // ----- Plan cards and their review history. -----
    let src_card_rows = sqlx::query(&format!("SELECT {CARD_COLS} FROM cards ORDER BY id"))
        .fetch_all(src.pool())
        .await
        .map_err(db_err)?;
    let mut card_plans: Vec<Card> = Vec::new();
    let mut revlog_plans: Vec<ReviewEntry> = Vec::new();

    for row in src_card_rows {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut card = card_from_row(row)?;
        let src_card_id = card.id;
        let Some(&dst_nid) = nid_map.get(&card.note_id) else {
            continue; // note was skipped
        };
        let fresh_note = added_notes.contains(&dst_nid);
        if !fresh_note {
            // An existing note already holding a card at this ordinal
            // keeps it; scheduling state never gets overwritten.
            let taken = dst_note_ords
                .get(&dst_nid)
                .is_some_and(|ords| ords.contains(&(card.template_ord as i64)));
            if taken || dst_card_ids.contains(&card.id) {
                continue;
            }
        }
        while dst_card_ids.contains(&card.id) {
            card.id += 999;
        }
        dst_card_ids.insert(card.id);
        dst_note_ords
            .entry(dst_nid)
            .or_default()
            .insert(card.template_ord as i64);
        card.note_id = dst_nid;

        // Cards caught inside a filtered deck go back to their home deck.
        if card.in_filtered_deck() {
            card.deck_id = card.original_deck_id;
            if card.original_due > 0 {
                card.due = card.original_due;
            }
            card.original_deck_id = 0;
            card.original_due = 0;
        }
        card.deck_id = *deck_map.get(&card.deck_id).unwrap_or(&DEFAULT_DECK_ID);

        // Learning state does not survive the clock change between
        // collections; those cards restart as new.
        if card.ctype == CardType::Learning || card.queue == Queue::Learning {
            card.ctype = CardType::New;
            if !card.queue.is_out_of_play() {
                card.queue = Queue::New;
            }
            card.due = card.id % 1_000_000;
            card.steps_left = 0;
        } else if card.ctype == CardType::Review {
            card.due -= ahead_by;
        }
        if card.queue == Queue::Buried {
            card.queue = match card.ctype {
                CardType::New => Queue::New,
                CardType::Learning => Queue::New,
                CardType::Review => Queue::Review,
            };
        }

        for rl_row in sqlx::query(&format!("SELECT {} FROM revlog WHERE cid = ?", cardvault_store::REVLOG_COLS))
            .bind(src_card_id)
            .fetch_all(src.pool())
            .await
            .map_err(db_err)?
        {
            let mut entry = revlog_from_row(rl_row)?;
            entry.card_id = card.id;
            revlog_plans.push(entry);
        }
        card_plans.push(card);
    }
    summary.cards_added = card_plans.len();

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    // ----- Media, now that the plan stands. -----
    let renames = import_media(col.media()?, reader, cancel, &mut summary).await?;
    let refs = MediaRefs::new();
    let mut note_plans: Vec<NotePlan> = Vec::with_capacity(planned_notes.len());
    for mut note in planned_notes {
        for field in &mut note.fields {
            *field = refs.rewrite_refs(field, |f| renames.get(f).cloned());
        }
        let sort_field = sort_field_for(col, &note)?;
        note_plans.push(NotePlan { note, sort_field });
    }

    // ----- Apply everything in one transaction. -----
    let (models_blob, decks_blob) = col.meta_blobs()?;
    col.store()
        .transaction(move |conn| {
            Box::pin(async move {
                let usn = bump_usn(conn).await?;
                for plan in &note_plans {
                    let mut note = plan.note.clone();
                    note.usn = usn;
                    upsert_note(conn, &note, &plan.sort_field).await?;
                }
                for card in &card_plans {
                    let mut card = card.clone();
                    card.usn = usn;
                    upsert_card(conn, &card).await?;
                }
                for entry in &revlog_plans {
                    let mut entry = entry.clone();
                    entry.usn = usn;
                    insert_revlog(conn, &entry).await?;
                }
                sqlx::query("UPDATE col SET models = ?, decks = ?")
                    .bind(&models_blob)
                    .bind(&decks_blob)
                    .execute(conn)
                    .await
                    .map_err(db_err)?;
                Ok(())
            })
        })
        .await?;

    tracing::info!(
        added = summary.notes_added,
        updated = summary.notes_updated,
        dupes = summary.dupes,
        conflicting = summary.conflicting,
        cards = summary.cards_added,
        media = summary.media_added,
        "import finished"
    );
    Ok(summary)
}

/// Copy the package's media into the folder under dedup rules, and
/// return the incoming-name to final-name pairs that differ.
async fn import_media(
    media: &MediaManager,
    reader: &mut PackageReader,
    cancel: &CancellationToken,
    summary: &mut ImportSummary,
) -> Result<HashMap<String, String>> {
    let mut renames = HashMap::new();
    let entries: Vec<(String, String)> = reader
        .media_entries()
        .map(|(num, name)| (num.to_string(), name.to_string()))
        .collect();
    for (num, name) in entries {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let data = reader.read_media(&num)?;
        if data.is_empty() {
            tracing::warn!(file = %name, "skipping empty media entry");
            continue;
        }
        let final_name = media.add_data(&name, &data).await?;
        summary.media_added += 1;
        if final_name != name {
            renames.insert(name, final_name);
        }
    }
    Ok(renames)
}

/// Map incoming models onto local ones by schema fingerprint, adding or
/// re-homing models as needed. Fails before any write when a schema
/// collision is found and `allow_schema_change` is off.
fn map_models(
    col: &mut Collection,
    src_models: impl Iterator<Item = Model>,
    allow_schema_change: bool,
) -> Result<(HashMap<ModelId, ModelId>, HashSet<ModelId>)> {
    let mut src: Vec<Model> = src_models.collect();
    src.sort_by_key(|m| m.id);
    let mut map = HashMap::new();
    let mut rehomed = HashSet::new();
    for model in src {
        let src_id = model.id;
        if let Some(local) = col.get_model(src_id) {
            if local.same_schema(&model) {
                map.insert(src_id, src_id);
                continue;
            }
        }
        if let Some(compatible) = col
            .models()
            .values()
            .find(|m| m.same_schema(&model))
        {
            map.insert(src_id, compatible.id);
            continue;
        }
        let collided = col.get_model(src_id).is_some();
        if collided && !allow_schema_change {
            return Err(Error::SchemaChangeRejected(model.name));
        }
        let mut fresh = model;
        while col.get_model(fresh.id).is_some() {
            fresh.id += 1;
        }
        map.insert(src_id, fresh.id);
        if collided {
            rehomed.insert(fresh.id);
        }
        col.insert_model_unchecked(fresh);
    }
    Ok((map, rehomed))
}

/// Map incoming decks onto local decks by name, staging missing ones in
/// the cache only; the decks blob is persisted by the merge transaction.
/// Filtered decks do not come over; their cards were sent home already.
fn map_decks(
    col: &mut Collection,
    src_decks: impl Iterator<Item = Deck>,
    prefix: Option<&str>,
) -> HashMap<DeckId, DeckId> {
    let mut src: Vec<Deck> = src_decks.filter(|d| !d.is_filtered()).collect();
    src.sort_by(|a, b| a.name.cmp(&b.name));
    let mut map = HashMap::new();
    for deck in src {
        let name = match prefix {
            Some(p) => format!("{p}::{}", deck.name),
            None => deck.name.clone(),
        };
        let dst_id = if prefix.is_none() && deck.id == DEFAULT_DECK_ID {
            DEFAULT_DECK_ID
        } else {
            col.stage_deck(&name)
        };
        map.insert(deck.id, dst_id);
    }
    map
}

fn sort_field_for(col: &Collection, note: &Note) -> Result<String> {
    let model = col
        .get_model(note.model_id)
        .ok_or(Error::NotFound("model"))?;
    Ok(note.sort_field(model).to_string())
}
