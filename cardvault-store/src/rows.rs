//! Row mapping between the stable on-disk columns and the domain types,
//! plus the write helpers used inside transactions.

use crate::store::db_err;
use cardvault_core::{
    field_checksum, join_fields, split_fields, Card, CardType, Error, MediaEntry, Note, Queue,
    Result, ReviewEntry, ReviewKind,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

pub const NOTE_COLS: &str = "id, guid, mid, mod, usn, tags, flds, sfld, csum, flags, data";
pub const CARD_COLS: &str =
    "id, nid, did, ord, mod, usn, type, queue, due, ivl, factor, reps, lapses, left, odue, odid, flags, data";
pub const REVLOG_COLS: &str = "id, cid, usn, ease, ivl, lastIvl, factor, time, type";

pub fn note_from_row(row: SqliteRow) -> Result<Note> {
    Ok(Note {
        id: row.get("id"),
        guid: row.get("guid"),
        model_id: row.get("mid"),
        mtime_secs: row.get("mod"),
        usn: row.get("usn"),
        tags: split_tags(row.get::<String, _>("tags").as_str()),
        fields: split_fields(row.get::<String, _>("flds").as_str()),
        flags: row.get("flags"),
    })
}

pub fn card_from_row(row: SqliteRow) -> Result<Card> {
    Ok(Card {
        id: row.get("id"),
        note_id: row.get("nid"),
        deck_id: row.get("did"),
        template_ord: row.get::<i64, _>("ord") as u16,
        mtime_secs: row.get("mod"),
        usn: row.get("usn"),
        ctype: CardType::from_i64(row.get("type")).ok_or(Error::Invalid("card type"))?,
        queue: Queue::from_i64(row.get("queue")).ok_or(Error::Invalid("card queue"))?,
        due: row.get("due"),
        interval: row.get::<i64, _>("ivl") as i32,
        factor: row.get::<i64, _>("factor") as u32,
        reps: row.get::<i64, _>("reps") as u32,
        lapses: row.get::<i64, _>("lapses") as u32,
        steps_left: row.get::<i64, _>("left") as u32,
        original_due: row.get("odue"),
        original_deck_id: row.get("odid"),
        flags: row.get("flags"),
    })
}

pub fn revlog_from_row(row: SqliteRow) -> Result<ReviewEntry> {
    Ok(ReviewEntry {
        id: row.get("id"),
        card_id: row.get("cid"),
        usn: row.get("usn"),
        ease: cardvault_core::Ease::from_grade(row.get("ease"))
            .ok_or(Error::Invalid("review ease"))?,
        interval: row.get::<i64, _>("ivl") as i32,
        last_interval: row.get::<i64, _>("lastIvl") as i32,
        factor: row.get::<i64, _>("factor") as u32,
        taken_millis: row.get("time"),
        kind: ReviewKind::from_i64(row.get("type")).ok_or(Error::Invalid("review kind"))?,
    })
}

pub fn media_from_row(row: SqliteRow) -> Result<MediaEntry> {
    Ok(MediaEntry {
        fname: row.get("fname"),
        checksum: row.get("csum"),
        mtime_secs: row.get("mtime"),
        dirty: row.get::<i64, _>("dirty") != 0,
    })
}

/// Tags are stored space-joined with sentinel spaces for substring search.
pub fn join_tags(tags: &[String]) -> String {
    if tags.is_empty() {
        String::new()
    } else {
        format!(" {} ", tags.join(" "))
    }
}

pub fn split_tags(tags: &str) -> Vec<String> {
    tags.split_whitespace().map(str::to_string).collect()
}

pub async fn upsert_note(conn: &mut SqliteConnection, note: &Note, sort_field: &str) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO notes (id, guid, mid, mod, usn, tags, flds, sfld, csum, flags, data)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '')",
    )
    .bind(note.id)
    .bind(&note.guid)
    .bind(note.model_id)
    .bind(note.mtime_secs)
    .bind(note.usn)
    .bind(join_tags(&note.tags))
    .bind(join_fields(&note.fields))
    .bind(sort_field)
    .bind(field_checksum(note.fields.first().map(String::as_str).unwrap_or("")))
    .bind(note.flags)
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn upsert_card(conn: &mut SqliteConnection, card: &Card) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO cards
           (id, nid, did, ord, mod, usn, type, queue, due, ivl, factor, reps, lapses, left, odue, odid, flags, data)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '')",
    )
    .bind(card.id)
    .bind(card.note_id)
    .bind(card.deck_id)
    .bind(card.template_ord as i64)
    .bind(card.mtime_secs)
    .bind(card.usn)
    .bind(card.ctype.as_i64())
    .bind(card.queue.as_i64())
    .bind(card.due)
    .bind(card.interval as i64)
    .bind(card.factor as i64)
    .bind(card.reps as i64)
    .bind(card.lapses as i64)
    .bind(card.steps_left as i64)
    .bind(card.original_due)
    .bind(card.original_deck_id)
    .bind(card.flags)
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn insert_revlog(conn: &mut SqliteConnection, entry: &ReviewEntry) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO revlog (id, cid, usn, ease, ivl, lastIvl, factor, time, type)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.id)
    .bind(entry.card_id)
    .bind(entry.usn)
    .bind(entry.ease.as_grade())
    .bind(entry.interval as i64)
    .bind(entry.last_interval as i64)
    .bind(entry.factor as i64)
    .bind(entry.taken_millis)
    .bind(entry.kind.as_i64())
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn add_grave(
    conn: &mut SqliteConnection,
    usn: i64,
    oid: i64,
    kind: i64,
) -> Result<()> {
    sqlx::query("INSERT INTO graves (usn, oid, type) VALUES (?, ?, ?)")
        .bind(usn)
        .bind(oid)
        .bind(kind)
        .execute(conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_with_sentinels() {
        let tags = vec!["leech".to_string(), "verb".to_string()];
        let joined = join_tags(&tags);
        assert_eq!(joined, " leech verb ");
        assert_eq!(split_tags(&joined), tags);
        assert_eq!(join_tags(&[]), "");
    }
}
