use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type NoteId = i64;
pub type CardId = i64;
pub type DeckId = i64;
pub type ModelId = i64;

/// Ease factors are stored as permille to avoid floating drift across
/// repeated multiplications.
pub const FACTOR_MIN: u32 = 1300;
pub const FACTOR_INITIAL: u32 = 2500;

/// Unit separator; field values are joined with this on disk.
pub const FIELD_SEP: char = '\u{1f}';

/// The default deck every collection starts with.
pub const DEFAULT_DECK_ID: DeckId = 1;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Ease {
    Again,
    Hard,
    Good,
    Easy,
}

impl Ease {
    pub fn as_grade(self) -> i64 {
        match self {
            Ease::Again => 1,
            Ease::Hard => 2,
            Ease::Good => 3,
            Ease::Easy => 4,
        }
    }

    pub fn from_grade(g: i64) -> Option<Ease> {
        match g {
            1 => Some(Ease::Again),
            2 => Some(Ease::Hard),
            3 => Some(Ease::Good),
            4 => Some(Ease::Easy),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    New,
    Learning,
    Review,
}

impl CardType {
    pub fn as_i64(self) -> i64 {
        match self {
            CardType::New => 0,
            CardType::Learning => 1,
            CardType::Review => 2,
        }
    }

    pub fn from_i64(v: i64) -> Option<CardType> {
        match v {
            0 => Some(CardType::New),
            1 => Some(CardType::Learning),
            2 => Some(CardType::Review),
            _ => None,
        }
    }
}

/// Where a card currently sits. Suspended and buried cards are both out of
/// play; suspension is user-driven and sticky, burial clears at the next
/// day rollover.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    New,
    Learning,
    Review,
    Suspended,
    Buried,
}

impl Queue {
    pub fn as_i64(self) -> i64 {
        match self {
            Queue::New => 0,
            Queue::Learning => 1,
            Queue::Review => 2,
            Queue::Suspended => -1,
            Queue::Buried => -2,
        }
    }

    pub fn from_i64(v: i64) -> Option<Queue> {
        match v {
            0 => Some(Queue::New),
            1 => Some(Queue::Learning),
            2 => Some(Queue::Review),
            -1 => Some(Queue::Suspended),
            -2 => Some(Queue::Buried),
            _ => None,
        }
    }

    pub fn is_out_of_play(self) -> bool {
        matches!(self, Queue::Suspended | Queue::Buried)
    }
}

pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Fresh note guid; stable across merges once assigned.
pub fn new_guid() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: NoteId,
    pub guid: String,
    pub model_id: ModelId,
    pub mtime_secs: i64,
    pub usn: i64,
    pub tags: Vec<String>,
    pub fields: Vec<String>,
    pub flags: i64,
}

impl Note {
    pub fn new(model_id: ModelId, fields: Vec<String>) -> Self {
        Self {
            id: now_millis(),
            guid: new_guid(),
            model_id,
            mtime_secs: now_secs(),
            usn: -1,
            tags: Vec::new(),
            fields,
            flags: 0,
        }
    }

    pub fn sort_field<'a>(&'a self, model: &Model) -> &'a str {
        self.fields
            .get(model.sort_field_idx.min(self.fields.len().saturating_sub(1)))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    pub fn add_tag(&mut self, tag: &str) {
        if !self.has_tag(tag) {
            self.tags.push(tag.to_string());
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Card {
    pub id: CardId,
    pub note_id: NoteId,
    pub deck_id: DeckId,
    pub template_ord: u16,
    pub mtime_secs: i64,
    pub usn: i64,
    pub ctype: CardType,
    pub queue: Queue,
    /// Position for new cards, epoch seconds for learning cards, and a
    /// day-number relative to collection creation for review cards.
    pub due: i64,
    /// Whole days once the card is out of learning.
    pub interval: i32,
    /// Permille ease factor, e.g. 2500 = 250%.
    pub factor: u32,
    pub reps: u32,
    pub lapses: u32,
    /// Remaining learning steps.
    pub steps_left: u32,
    /// Original due value while re-homed into a filtered deck.
    pub original_due: i64,
    /// Original deck while re-homed into a filtered deck; 0 when not.
    pub original_deck_id: DeckId,
    pub flags: i64,
}

impl Card {
    pub fn new(note_id: NoteId, deck_id: DeckId, template_ord: u16, due: i64) -> Self {
        Self {
            id: now_millis(),
            note_id,
            deck_id,
            template_ord,
            mtime_secs: now_secs(),
            usn: -1,
            ctype: CardType::New,
            queue: Queue::New,
            due,
            interval: 0,
            factor: 0,
            reps: 0,
            lapses: 0,
            steps_left: 0,
            original_due: 0,
            original_deck_id: 0,
            flags: 0,
        }
    }

    pub fn in_filtered_deck(&self) -> bool {
        self.original_deck_id != 0
    }

    /// The deck the card permanently belongs to, looking through any
    /// filtered overlay.
    pub fn home_deck_id(&self) -> DeckId {
        if self.in_filtered_deck() {
            self.original_deck_id
        } else {
            self.deck_id
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ord: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateDef {
    pub name: String,
    pub ord: u16,
    pub qfmt: String,
    pub afmt: String,
}

/// A note type: the schema of a note's fields and the templates its cards
/// are generated from. Shared by every note referencing it, so changes to
/// field or template count ripple across the whole collection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Model {
    pub id: ModelId,
    pub name: String,
    pub mtime_secs: i64,
    pub usn: i64,
    pub fields: Vec<FieldDef>,
    pub templates: Vec<TemplateDef>,
    pub sort_field_idx: usize,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: now_millis(),
            name: name.into(),
            mtime_secs: now_secs(),
            usn: -1,
            fields: Vec::new(),
            templates: Vec::new(),
            sort_field_idx: 0,
        }
    }

    pub fn add_field(&mut self, name: impl Into<String>) {
        let ord = self.fields.len() as u16;
        self.fields.push(FieldDef { name: name.into(), ord });
    }

    pub fn add_template(&mut self, name: impl Into<String>, qfmt: &str, afmt: &str) {
        let ord = self.templates.len() as u16;
        self.templates.push(TemplateDef {
            name: name.into(),
            ord,
            qfmt: qfmt.to_string(),
            afmt: afmt.to_string(),
        });
    }

    /// Hash over the field and template signature. Two models with equal
    /// hashes can safely share notes; differing hashes mean a schema
    /// change.
    pub fn schema_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for f in &self.fields {
            hasher.update(f.name.as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(&[0xff]);
        for t in &self.templates {
            hasher.update(t.name.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().to_string()
    }

    pub fn same_schema(&self, other: &Model) -> bool {
        self.schema_hash() == other.schema_hash()
    }
}

/// Search definition of a filtered deck.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterSpec {
    pub search: String,
    pub limit: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deck {
    pub id: DeckId,
    pub name: String,
    pub mtime_secs: i64,
    pub usn: i64,
    pub desc: String,
    pub new_per_day: u32,
    pub rev_per_day: u32,
    /// Present on filtered (dynamic) decks only.
    pub filter: Option<FilterSpec>,
}

impl Deck {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: now_millis(),
            name: name.into(),
            mtime_secs: now_secs(),
            usn: -1,
            desc: String::new(),
            new_per_day: 20,
            rev_per_day: 100,
            filter: None,
        }
    }

    pub fn new_filtered(name: impl Into<String>, search: impl Into<String>) -> Self {
        let mut d = Self::new(name);
        d.filter = Some(FilterSpec { search: search.into(), limit: 100 });
        d
    }

    pub fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }

    /// True when `other` is this deck or one of its `::`-separated
    /// descendants.
    pub fn includes_name(&self, other: &str) -> bool {
        other == self.name || other.starts_with(&format!("{}::", self.name))
    }
}

/// One row of the media change log. `checksum == None` is a tombstone for
/// a file known to have been removed since the last scan; absence of a row
/// means the file has never been tracked at all.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaEntry {
    pub fname: String,
    pub checksum: Option<String>,
    pub mtime_secs: i64,
    pub dirty: bool,
}

/// One row of the review log.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReviewEntry {
    /// Epoch millis; doubles as the primary key.
    pub id: i64,
    pub card_id: CardId,
    pub usn: i64,
    pub ease: Ease,
    pub interval: i32,
    pub last_interval: i32,
    pub factor: u32,
    pub taken_millis: i64,
    pub kind: ReviewKind,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    Learning,
    Review,
    Relearning,
}

impl ReviewKind {
    pub fn as_i64(self) -> i64 {
        match self {
            ReviewKind::Learning => 0,
            ReviewKind::Review => 1,
            ReviewKind::Relearning => 2,
        }
    }

    pub fn from_i64(v: i64) -> Option<ReviewKind> {
        match v {
            0 => Some(ReviewKind::Learning),
            1 => Some(ReviewKind::Review),
            2 => Some(ReviewKind::Relearning),
            _ => None,
        }
    }
}

pub fn join_fields(fields: &[String]) -> String {
    fields.join(&FIELD_SEP.to_string())
}

pub fn split_fields(flds: &str) -> Vec<String> {
    flds.split(FIELD_SEP).map(str::to_string).collect()
}

/// Checksum of the first field, used for local duplicate detection.
pub fn field_checksum(first_field: &str) -> i64 {
    let digest = blake3::hash(first_field.as_bytes());
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&digest.as_bytes()[..4]);
    u32::from_be_bytes(buf) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_round_trip() {
        let fields = vec!["front".to_string(), "back".to_string()];
        assert_eq!(split_fields(&join_fields(&fields)), fields);
    }

    #[test]
    fn schema_hash_tracks_counts() {
        let mut a = Model::new("Basic");
        a.add_field("Front");
        a.add_field("Back");
        a.add_template("Card 1", "{{Front}}", "{{Back}}");
        let mut b = a.clone();
        assert!(a.same_schema(&b));
        b.add_field("Extra");
        assert!(!a.same_schema(&b));
    }

    #[test]
    fn deck_hierarchy_inclusion() {
        let d = Deck::new("Spanish");
        assert!(d.includes_name("Spanish"));
        assert!(d.includes_name("Spanish::Verbs"));
        assert!(!d.includes_name("SpanishLit"));
    }
}
