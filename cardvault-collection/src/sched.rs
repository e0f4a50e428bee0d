//! Card selection and the answer state machine.
//!
//! Queue priority is fixed: learning cards already due, then review
//! cards, then new cards, and finally learning cards fetched slightly
//! ahead of time when nothing else is left. Every answer commits the
//! review log row, the card update and any leech-triggered suspension in
//! one transaction, and retains a typed pre-image for single-level undo.

use cardvault_core::{
    fuzzed_interval, is_leech, lapse_interval, learn_step_delay_secs, next_review_interval,
    now_millis, now_secs, updated_factor, Card, CardId, CardType, Deck, DeckId, Ease, Error,
    LeechAction, NewOrder, Note, Queue, Result, ReviewEntry, ReviewKind, SchedConfig,
};
use cardvault_store::{
    bump_usn, card_from_row, db_err, insert_revlog, upsert_card, upsert_note, Store, CARD_COLS,
    NOTE_COLS,
};
use rand::seq::SliceRandom;
use sqlx::Row;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Raised when a card crosses the leech threshold, so the caller can
/// notify the user. Distinguishes tag-only flagging from auto-suspension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeechSignal {
    Flagged,
    FlaggedAndSuspended,
}

#[derive(Clone, Debug)]
pub struct AnswerOutcome {
    pub leech: Option<LeechSignal>,
    pub next_due: i64,
    pub next_interval: i32,
}

/// Pre-image of everything `answer_card` mutates; restoring it is the
/// whole of `undo`.
#[derive(Clone, Debug)]
pub struct UndoStep {
    card: Card,
    revlog_id: i64,
    note: Option<(Note, String)>,
}

pub struct Scheduler {
    store: Arc<Store>,
    crt: i64,
    cfg: SchedConfig,
    today: i64,
    day_cutoff: i64,
    lrn_queue: BinaryHeap<Reverse<(i64, CardId)>>,
    rev_queue: VecDeque<CardId>,
    new_queue: VecDeque<CardId>,
    built: bool,
    last_revlog_id: i64,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, crt: i64, cfg: SchedConfig) -> Self {
        let mut s = Self {
            store,
            crt,
            cfg,
            today: 0,
            day_cutoff: 0,
            lrn_queue: BinaryHeap::new(),
            rev_queue: VecDeque::new(),
            new_queue: VecDeque::new(),
            built: false,
            last_revlog_id: 0,
        };
        s.update_day();
        s
    }

    fn update_day(&mut self) {
        self.today = ((now_secs() - self.crt) / 86_400).max(0);
        self.day_cutoff = self.crt + (self.today + 1) * 86_400;
    }

    pub fn today(&self) -> i64 {
        self.today
    }

    /// Drop the in-memory queues; the next `get_next_card` requires a
    /// `build_queues` first.
    pub fn invalidate(&mut self) {
        self.built = false;
        self.lrn_queue.clear();
        self.rev_queue.clear();
        self.new_queue.clear();
    }

    /// Fill the candidate queues from `decks`, honoring each deck's
    /// daily limits net of what was already answered today.
    pub async fn build_queues(&mut self, decks: &[Deck]) -> Result<()> {
        self.invalidate();
        self.update_day();
        if decks.is_empty() {
            return Ok(());
        }
        let day_start_ms = (self.crt + self.today * 86_400) * 1000;
        let in_clause = decks
            .iter()
            .map(|d| d.id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        // Learning cards, due soonest first.
        let lrn_rows = sqlx::query(&format!(
            "SELECT id, due FROM cards WHERE did IN ({in_clause}) AND queue = 1 ORDER BY due"
        ))
        .fetch_all(self.store.pool())
        .await
        .map_err(db_err)?;
        for row in lrn_rows {
            self.lrn_queue
                .push(Reverse((row.get::<i64, _>("due"), row.get::<i64, _>("id"))));
        }

        // Review cards by ascending due-day, card id as the tie-break.
        let mut rev: Vec<(i64, CardId)> = Vec::new();
        for deck in decks {
            let done: i64 = sqlx::query_scalar(
                "SELECT count(*) FROM revlog r JOIN cards c ON c.id = r.cid
                 WHERE r.id >= ? AND r.type = 1 AND c.did = ?",
            )
            .bind(day_start_ms)
            .bind(deck.id)
            .fetch_one(self.store.pool())
            .await
            .map_err(db_err)?;
            let remaining = (deck.rev_per_day as i64 - done).max(0);
            if remaining == 0 {
                continue;
            }
            let rows = sqlx::query(
                "SELECT id, due FROM cards WHERE did = ? AND queue = 2 AND due <= ?
                 ORDER BY due, id LIMIT ?",
            )
            .bind(deck.id)
            .bind(self.today)
            .bind(remaining)
            .fetch_all(self.store.pool())
            .await
            .map_err(db_err)?;
            for row in rows {
                rev.push((row.get::<i64, _>("due"), row.get::<i64, _>("id")));
            }
        }
        rev.sort_unstable();
        self.rev_queue = rev.into_iter().map(|(_, id)| id).collect();

        // New cards in creation order unless random order is configured.
        let mut new_ids: Vec<CardId> = Vec::new();
        for deck in decks {
            let done: i64 = sqlx::query_scalar(
                "SELECT count(*) FROM revlog r JOIN cards c ON c.id = r.cid
                 WHERE r.id >= ? AND r.type = 0 AND c.did = ?",
            )
            .bind(day_start_ms)
            .bind(deck.id)
            .fetch_one(self.store.pool())
            .await
            .map_err(db_err)?;
            let remaining = (deck.new_per_day as i64 - done).max(0);
            if remaining == 0 {
                continue;
            }
            let rows = sqlx::query(
                "SELECT id FROM cards WHERE did = ? AND queue = 0 ORDER BY due, id LIMIT ?",
            )
            .bind(deck.id)
            .bind(remaining)
            .fetch_all(self.store.pool())
            .await
            .map_err(db_err)?;
            for row in rows {
                new_ids.push(row.get::<i64, _>("id"));
            }
        }
        if self.cfg.new_order == NewOrder::Random {
            new_ids.shuffle(&mut rand::thread_rng());
        }
        self.new_queue = new_ids.into_iter().collect();

        self.built = true;
        tracing::debug!(
            learning = self.lrn_queue.len(),
            review = self.rev_queue.len(),
            new = self.new_queue.len(),
            "queues built"
        );
        Ok(())
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (self.new_queue.len(), self.lrn_queue.len(), self.rev_queue.len())
    }

    /// Head of the highest-priority non-empty queue, or `None` when the
    /// session is finished. Never mutates persistent state.
    pub async fn get_next_card(&mut self) -> Result<Option<Card>> {
        if !self.built {
            return Err(Error::Invalid("queues not built; call build_queues first"));
        }
        let now = now_secs();
        loop {
            // Learning card already due?
            if let Some(&Reverse((due, id))) = self.lrn_queue.peek() {
                if due <= now {
                    self.lrn_queue.pop();
                    match self.load_if_queued(id, Queue::Learning).await? {
                        Some(card) => return Ok(Some(card)),
                        None => continue,
                    }
                }
            }
            if let Some(id) = self.rev_queue.pop_front() {
                match self.load_if_queued(id, Queue::Review).await? {
                    Some(card) => return Ok(Some(card)),
                    None => continue,
                }
            }
            if let Some(id) = self.new_queue.pop_front() {
                match self.load_if_queued(id, Queue::New).await? {
                    Some(card) => return Ok(Some(card)),
                    None => continue,
                }
            }
            // Last resort: a learning card slightly ahead of its time.
            if let Some(&Reverse((due, id))) = self.lrn_queue.peek() {
                if due <= now + self.cfg.learn_ahead_secs {
                    self.lrn_queue.pop();
                    match self.load_if_queued(id, Queue::Learning).await? {
                        Some(card) => return Ok(Some(card)),
                        None => continue,
                    }
                }
            }
            return Ok(None);
        }
    }

    /// Skip queue entries whose card was mutated since the build.
    async fn load_if_queued(&self, id: CardId, expect: Queue) -> Result<Option<Card>> {
        let row = sqlx::query(&format!("SELECT {CARD_COLS} FROM cards WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.store.pool())
            .await
            .map_err(db_err)?;
        let Some(row) = row else { return Ok(None) };
        let card = card_from_row(row)?;
        if card.queue == expect {
            Ok(Some(card))
        } else {
            Ok(None)
        }
    }

    /// Apply `ease` to `card`. Returns the outcome plus the undo step
    /// the collection retains.
    pub async fn answer_card(
        &mut self,
        card: &mut Card,
        ease: Ease,
    ) -> Result<(AnswerOutcome, UndoStep)> {
        if card.queue.is_out_of_play() {
            return Err(Error::Invalid("card is suspended or buried"));
        }
        self.update_day();
        let now = now_secs();
        let preimage = card.clone();
        let mut next = card.clone();
        next.reps += 1;
        next.mtime_secs = now;

        let relearning = card.ctype == CardType::Review && card.queue == Queue::Learning;
        let mut leech = None;
        let kind;

        match card.queue {
            Queue::New | Queue::Learning => {
                kind = if relearning {
                    ReviewKind::Relearning
                } else {
                    ReviewKind::Learning
                };
                self.answer_learning(&mut next, ease, relearning, now);
            }
            Queue::Review => {
                kind = ReviewKind::Review;
                if ease == Ease::Again {
                    leech = self.answer_lapse(&mut next, now);
                } else {
                    self.answer_review(&mut next, ease);
                }
            }
            Queue::Suspended | Queue::Buried => unreachable!("checked above"),
        }

        // Leech tagging touches the note, so capture its pre-image too.
        let note_update = if leech.is_some() {
            let row = sqlx::query(&format!("SELECT {NOTE_COLS} FROM notes WHERE id = ?"))
            .bind(next.note_id)
            .fetch_optional(self.store.pool())
            .await
            .map_err(db_err)?;
            match row {
                Some(row) => {
                    let sfld: String = row.get("sfld");
                    let note = cardvault_store::note_from_row(row)?;
                    let mut tagged = note.clone();
                    tagged.add_tag("leech");
                    tagged.mtime_secs = now;
                    Some((note, tagged, sfld))
                }
                None => None,
            }
        } else {
            None
        };

        let revlog_id = self.next_revlog_id();
        let entry = ReviewEntry {
            id: revlog_id,
            card_id: next.id,
            usn: 0,
            ease,
            interval: if next.queue == Queue::Learning {
                -((next.due - now).max(0) as i32)
            } else {
                next.interval
            },
            last_interval: preimage.interval,
            factor: next.factor,
            taken_millis: 0,
            kind,
        };

        let mut to_write = next.clone();
        let note_for_txn = note_update
            .as_ref()
            .map(|(_, tagged, sfld)| (tagged.clone(), sfld.clone()));
        let mut entry_for_txn = entry;
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    let usn = bump_usn(conn).await?;
                    to_write.usn = usn;
                    entry_for_txn.usn = usn;
                    upsert_card(conn, &to_write).await?;
                    insert_revlog(conn, &entry_for_txn).await?;
                    if let Some((mut note, sfld)) = note_for_txn {
                        note.usn = usn;
                        upsert_note(conn, &note, &sfld).await?;
                    }
                    Ok(())
                })
            })
            .await?;

        // Short learning delays come straight back into the queue.
        if next.queue == Queue::Learning && next.due < self.day_cutoff {
            self.lrn_queue.push(Reverse((next.due, next.id)));
        }

        let outcome = AnswerOutcome {
            leech,
            next_due: next.due,
            next_interval: next.interval,
        };
        let undo = UndoStep {
            card: preimage,
            revlog_id,
            note: note_update.map(|(orig, _, sfld)| (orig, sfld)),
        };
        *card = next;
        Ok((outcome, undo))
    }

    fn answer_learning(&self, next: &mut Card, ease: Ease, relearning: bool, now: i64) {
        let steps = if relearning {
            &self.cfg.relearn_steps_mins
        } else {
            &self.cfg.learn_steps_mins
        };
        if next.queue == Queue::New {
            next.queue = Queue::Learning;
            if !relearning {
                next.ctype = CardType::Learning;
            }
            next.steps_left = steps.len() as u32;
        }
        match ease {
            Ease::Again => {
                next.steps_left = steps.len() as u32;
                next.due = now + learn_step_delay_secs(steps, next.steps_left.max(1));
            }
            Ease::Hard => {
                // Repeat the current step.
                if next.steps_left == 0 {
                    next.steps_left = steps.len() as u32;
                }
                next.due = now + learn_step_delay_secs(steps, next.steps_left);
            }
            Ease::Good => {
                if next.steps_left > 1 && !steps.is_empty() {
                    next.steps_left -= 1;
                    next.due = now + learn_step_delay_secs(steps, next.steps_left);
                } else {
                    self.graduate(next, false, relearning);
                }
            }
            Ease::Easy => {
                self.graduate(next, true, relearning);
            }
        }
    }

    fn graduate(&self, next: &mut Card, easy: bool, relearning: bool) {
        next.ctype = CardType::Review;
        next.queue = Queue::Review;
        next.steps_left = 0;
        if !relearning {
            next.interval = if easy {
                self.cfg.easy_interval
            } else {
                self.cfg.graduating_interval
            };
            if next.factor == 0 {
                next.factor = self.cfg.initial_factor;
            }
        }
        next.due = self.today + next.interval as i64;
        if next.in_filtered_deck() {
            next.deck_id = next.original_deck_id;
            next.original_deck_id = 0;
            next.original_due = 0;
        }
    }

    fn answer_lapse(&self, next: &mut Card, now: i64) -> Option<LeechSignal> {
        next.lapses += 1;
        next.factor = updated_factor(next.factor, Ease::Again);
        next.interval = lapse_interval(next, &self.cfg);
        if self.cfg.relearn_steps_mins.is_empty() {
            next.due = self.today + next.interval as i64;
        } else {
            next.steps_left = self.cfg.relearn_steps_mins.len() as u32;
            next.queue = Queue::Learning;
            next.due = now + learn_step_delay_secs(&self.cfg.relearn_steps_mins, next.steps_left);
        }
        if next.in_filtered_deck() {
            next.deck_id = next.original_deck_id;
            next.original_deck_id = 0;
            next.original_due = 0;
        }
        if is_leech(next.lapses, self.cfg.leech_threshold) {
            match self.cfg.leech_action {
                LeechAction::Suspend => {
                    next.queue = Queue::Suspended;
                    Some(LeechSignal::FlaggedAndSuspended)
                }
                LeechAction::TagOnly => Some(LeechSignal::Flagged),
            }
        } else {
            None
        }
    }

    fn answer_review(&self, next: &mut Card, ease: Ease) {
        let days_late = (self.today - next.due).max(0);
        let ideal = next_review_interval(next, ease, days_late, &self.cfg);
        next.interval = fuzzed_interval(ideal, &self.cfg);
        next.factor = updated_factor(next.factor, ease);
        next.due = self.today + next.interval as i64;
        next.queue = Queue::Review;
        if next.in_filtered_deck() {
            next.deck_id = next.original_deck_id;
            next.original_deck_id = 0;
            next.original_due = 0;
        }
    }

    fn next_revlog_id(&mut self) -> i64 {
        let id = now_millis().max(self.last_revlog_id + 1);
        self.last_revlog_id = id;
        id
    }

    /// Restore the pre-image captured by the matching `answer_card`, in
    /// a fresh transaction. Queues require a rebuild afterwards.
    pub async fn undo(&mut self, step: UndoStep) -> Result<CardId> {
        let card_id = step.card.id;
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    bump_usn(conn).await?;
                    upsert_card(conn, &step.card).await?;
                    sqlx::query("DELETE FROM revlog WHERE id = ?")
                        .bind(step.revlog_id)
                        .execute(&mut *conn)
                        .await
                        .map_err(db_err)?;
                    if let Some((note, sfld)) = &step.note {
                        upsert_note(conn, note, sfld).await?;
                    }
                    Ok(())
                })
            })
            .await?;
        self.invalidate();
        Ok(card_id)
    }

    // ===== Suspend / bury =====

    pub async fn suspend_cards(&mut self, card_ids: &[CardId]) -> Result<()> {
        self.set_queue(card_ids, Queue::Suspended).await
    }

    pub async fn bury_cards(&mut self, card_ids: &[CardId]) -> Result<()> {
        self.set_queue(card_ids, Queue::Buried).await
    }

    async fn set_queue(&mut self, card_ids: &[CardId], queue: Queue) -> Result<()> {
        if card_ids.is_empty() {
            return Ok(());
        }
        let in_clause = card_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let q = queue.as_i64();
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    let usn = bump_usn(conn).await?;
                    sqlx::query(&format!(
                        "UPDATE cards SET queue = ?, usn = ?, mod = ? WHERE id IN ({in_clause})"
                    ))
                    .bind(q)
                    .bind(usn)
                    .bind(now_secs())
                    .execute(conn)
                    .await
                    .map_err(db_err)?;
                    Ok(())
                })
            })
            .await?;
        self.invalidate();
        Ok(())
    }

    pub async fn unsuspend_cards(&mut self, card_ids: &[CardId]) -> Result<()> {
        self.restore_queue("queue = -1 AND id IN", Some(card_ids)).await
    }

    pub async fn unbury_all(&mut self) -> Result<()> {
        self.restore_queue("queue = -2", None).await
    }

    async fn restore_queue(&mut self, cond: &str, card_ids: Option<&[CardId]>) -> Result<()> {
        let where_clause = match card_ids {
            Some(ids) if ids.is_empty() => return Ok(()),
            Some(ids) => format!(
                "{cond} ({})",
                ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",")
            ),
            None => cond.to_string(),
        };
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    let usn = bump_usn(conn).await?;
                    sqlx::query(&format!(
                        "UPDATE cards SET queue = type, usn = ?, mod = ? WHERE {where_clause}"
                    ))
                    .bind(usn)
                    .bind(now_secs())
                    .execute(conn)
                    .await
                    .map_err(db_err)?;
                    Ok(())
                })
            })
            .await?;
        self.invalidate();
        Ok(())
    }

    // ===== Filtered decks =====

    /// Empty then repopulate a filtered deck from its search definition.
    /// Returns the number of cards moved in.
    pub async fn rebuild_filtered(&mut self, deck: &Deck, all_decks: &[Deck]) -> Result<usize> {
        let filter = deck
            .filter
            .as_ref()
            .ok_or(Error::Invalid("deck is not a filtered deck"))?;
        self.update_day();
        let where_sql = search_to_sql(&filter.search, all_decks, self.today)?;
        let deck_id = deck.id;
        let limit = filter.limit as i64;
        let sql = format!(
            "SELECT c.id FROM cards c JOIN notes n ON c.nid = n.id
             WHERE {where_sql} AND c.odid = 0 AND c.queue >= 0 AND c.did != {deck_id}
             ORDER BY c.due, c.id LIMIT {limit}"
        );
        let store = Arc::clone(&self.store);
        let moved = store
            .transaction(move |conn| {
                Box::pin(async move {
                    let usn = bump_usn(conn).await?;
                    send_filtered_cards_home(conn, deck_id, usn).await?;
                    let ids: Vec<i64> = sqlx::query_scalar(&sql)
                        .fetch_all(&mut *conn)
                        .await
                        .map_err(db_err)?;
                    if !ids.is_empty() {
                        let in_clause = ids
                            .iter()
                            .map(|id| id.to_string())
                            .collect::<Vec<_>>()
                            .join(",");
                        sqlx::query(&format!(
                            "UPDATE cards SET odid = did, odue = due, did = ?, usn = ?, mod = ?
                             WHERE id IN ({in_clause})"
                        ))
                        .bind(deck_id)
                        .bind(usn)
                        .bind(now_secs())
                        .execute(&mut *conn)
                        .await
                        .map_err(db_err)?;
                    }
                    Ok(ids.len())
                })
            })
            .await?;
        self.invalidate();
        Ok(moved)
    }

    /// Send every card of a filtered deck back home.
    pub async fn empty_filtered(&mut self, deck_id: DeckId) -> Result<()> {
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    let usn = bump_usn(conn).await?;
                    send_filtered_cards_home(conn, deck_id, usn).await?;
                    Ok(())
                })
            })
            .await?;
        self.invalidate();
        Ok(())
    }
}

/// Restore cards re-homed into filtered deck `deck_id`: back to the home
/// deck, learning state collapsed to new, original due reinstated.
pub(crate) async fn send_filtered_cards_home(
    conn: &mut sqlx::SqliteConnection,
    deck_id: DeckId,
    usn: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE cards SET
           did = odid,
           queue = CASE WHEN type = 1 THEN 0 ELSE type END,
           type = CASE WHEN type = 1 THEN 0 ELSE type END,
           due = CASE WHEN odue > 0 THEN odue ELSE due END,
           odue = 0,
           odid = 0,
           usn = ?,
           mod = ?
         WHERE did = ? AND odid != 0",
    )
    .bind(usn)
    .bind(now_secs())
    .bind(deck_id)
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Translate the small filtered-deck search language into SQL. Supported
/// terms: `deck:Name`, `tag:x`, `is:due`, `is:new`; terms conjoin.
fn search_to_sql(search: &str, all_decks: &[Deck], today: i64) -> Result<String> {
    let mut clauses: Vec<String> = Vec::new();
    for token in search.split_whitespace() {
        if let Some(name) = token.strip_prefix("deck:") {
            let ids: Vec<String> = all_decks
                .iter()
                .filter(|d| {
                    d.name == name || d.name.starts_with(&format!("{name}::"))
                })
                .map(|d| d.id.to_string())
                .collect();
            if ids.is_empty() {
                return Err(Error::NotFound("deck"));
            }
            clauses.push(format!("c.did IN ({})", ids.join(",")));
        } else if let Some(tag) = token.strip_prefix("tag:") {
            let escaped = tag.replace('\'', "''");
            clauses.push(format!("n.tags LIKE '% {escaped} %'"));
        } else if token == "is:due" {
            clauses.push(format!("c.queue = 2 AND c.due <= {today}"));
        } else if token == "is:new" {
            clauses.push("c.queue = 0".to_string());
        } else {
            return Err(Error::Invalid("unsupported search term"));
        }
    }
    if clauses.is_empty() {
        clauses.push("1 = 1".to_string());
    }
    Ok(clauses.join(" AND "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_terms_translate() {
        let mut deck = Deck::new("Spanish");
        deck.id = 7;
        let sql = search_to_sql("deck:Spanish is:due", &[deck], 5).unwrap();
        assert!(sql.contains("c.did IN (7)"));
        assert!(sql.contains("c.due <= 5"));
        assert!(search_to_sql("foo:bar", &[], 0).is_err());
    }
}
