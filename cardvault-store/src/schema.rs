//! Collection file schema. Table and column names follow the wider
//! ecosystem's single-file format so packages produced elsewhere remain
//! importable here and vice versa. Models, decks and config are stored
//! as structured JSON text blobs in the single `col` row; the media
//! change log lives in the same file rather than a sidecar database so
//! one handle covers the whole collection.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS col (
  id      INTEGER PRIMARY KEY,
  crt     INTEGER NOT NULL,
  mod     INTEGER NOT NULL,
  scm     INTEGER NOT NULL,
  ver     INTEGER NOT NULL,
  dty     INTEGER NOT NULL,
  usn     INTEGER NOT NULL,
  ls      INTEGER NOT NULL,
  conf    TEXT NOT NULL,
  models  TEXT NOT NULL,
  decks   TEXT NOT NULL,
  dconf   TEXT NOT NULL,
  tags    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notes (
  id      INTEGER PRIMARY KEY,
  guid    TEXT NOT NULL,
  mid     INTEGER NOT NULL,
  mod     INTEGER NOT NULL,
  usn     INTEGER NOT NULL,
  tags    TEXT NOT NULL,
  flds    TEXT NOT NULL,
  sfld    TEXT NOT NULL,
  csum    INTEGER NOT NULL,
  flags   INTEGER NOT NULL,
  data    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cards (
  id      INTEGER PRIMARY KEY,
  nid     INTEGER NOT NULL,
  did     INTEGER NOT NULL,
  ord     INTEGER NOT NULL,
  mod     INTEGER NOT NULL,
  usn     INTEGER NOT NULL,
  type    INTEGER NOT NULL,
  queue   INTEGER NOT NULL,
  due     INTEGER NOT NULL,
  ivl     INTEGER NOT NULL,
  factor  INTEGER NOT NULL,
  reps    INTEGER NOT NULL,
  lapses  INTEGER NOT NULL,
  left    INTEGER NOT NULL,
  odue    INTEGER NOT NULL,
  odid    INTEGER NOT NULL,
  flags   INTEGER NOT NULL,
  data    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS revlog (
  id      INTEGER PRIMARY KEY,
  cid     INTEGER NOT NULL,
  usn     INTEGER NOT NULL,
  ease    INTEGER NOT NULL,
  ivl     INTEGER NOT NULL,
  lastIvl INTEGER NOT NULL,
  factor  INTEGER NOT NULL,
  time    INTEGER NOT NULL,
  type    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS graves (
  usn     INTEGER NOT NULL,
  oid     INTEGER NOT NULL,
  type    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS media (
  fname   TEXT PRIMARY KEY,
  csum    TEXT,
  mtime   INTEGER NOT NULL,
  dirty   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS media_meta (
  dir_mod INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS ix_notes_usn ON notes (usn);
CREATE INDEX IF NOT EXISTS ix_notes_csum ON notes (csum);
CREATE INDEX IF NOT EXISTS ix_cards_usn ON cards (usn);
CREATE INDEX IF NOT EXISTS ix_cards_nid ON cards (nid);
CREATE INDEX IF NOT EXISTS ix_cards_sched ON cards (did, queue, due);
CREATE INDEX IF NOT EXISTS ix_revlog_usn ON revlog (usn);
CREATE INDEX IF NOT EXISTS ix_revlog_cid ON revlog (cid);
"#;

/// Kinds recorded in the deletion log.
pub const GRAVE_NOTE: i64 = 0;
pub const GRAVE_CARD: i64 = 1;
pub const GRAVE_DECK: i64 = 2;

/// Schema version written into `col.ver`.
pub const SCHEMA_VERSION: i64 = 11;
