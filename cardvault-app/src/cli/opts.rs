use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[command(name = "cardvault", version, about = "CardVault collection CLI")]
pub struct Cli {
    /// Collection file path (defaults to the app data dir)
    #[arg(long)]
    pub collection: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Collection summary: counts, due today, media state
    Info,
    /// Deck operations
    #[command(subcommand)]
    Deck(DeckCmd),
    /// Note operations
    #[command(subcommand)]
    Note(NoteCmd),
    /// Interactive review loop
    Review(ReviewCmd),
    /// Write the collection and media into a package file
    Export { path: PathBuf },
    /// Merge a package file into the collection
    Import(ImportCmd),
    /// Media tools
    #[command(subcommand)]
    Media(MediaCmd),
}

#[derive(Debug, Subcommand, Clone)]
pub enum DeckCmd {
    Add { name: String },
    List,
    Rm {
        name: String,
        /// Move the deck's cards to the default deck instead of deleting
        #[arg(long)]
        keep_cards: bool,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum NoteCmd {
    Add(NoteAdd),
    Rm { note_id: i64 },
    Suspend { note_id: i64 },
    Bury { note_id: i64 },
}

#[derive(Debug, Args, Clone)]
pub struct NoteAdd {
    #[arg(long, default_value = "Default")]
    pub deck: String,
    /// Field values in model order
    #[arg(long = "field", required = true)]
    pub fields: Vec<String>,
    /// Model to use; defaults to the first model in the collection
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long = "tag")]
    pub tags: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ReviewCmd {
    #[arg(long)]
    pub deck: Option<String>,
    #[arg(long, default_value_t = 100)]
    pub max: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DupeMode {
    Update,
    Ignore,
    AddAlways,
}

#[derive(Debug, Args, Clone)]
pub struct ImportCmd {
    pub path: PathBuf,
    #[arg(long, value_enum, default_value_t = DupeMode::Update)]
    pub dupes: DupeMode,
    /// Accept incoming note types that collide with incompatible local ones
    #[arg(long)]
    pub allow_schema_change: bool,
    /// Put imported decks under this deck name
    #[arg(long)]
    pub prefix: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum MediaCmd {
    /// Copy a file into the media folder, deduplicating by content
    Add { path: PathBuf },
    /// List missing, unused and invalid media
    Check,
    /// Rescan the media folder and update the change log
    Scan {
        #[arg(long)]
        force: bool,
    },
}
