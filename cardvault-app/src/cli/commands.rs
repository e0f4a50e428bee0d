use crate::cli::opts::*;

use anyhow::{anyhow, bail, Result};
use cardvault_collection::{Collection, DeckRemovalPolicy, DupePolicy, ImportOptions};
use cardvault_core::{Ease, Note};
use directories::ProjectDirs;
use std::io::{stdin, stdout, Write};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

pub async fn run_cli(args: Cli) -> Result<()> {
    let mut col = open_collection(args.collection.clone()).await?;
    let result = match args.cmd {
        Command::Info => info_cmd(&mut col).await,
        Command::Deck(cmd) => deck_cmd(&mut col, cmd).await,
        Command::Note(cmd) => note_cmd(&mut col, cmd).await,
        Command::Review(cmd) => review_cmd(&mut col, cmd).await,
        Command::Export { path } => {
            let media = col.export_package(&path).await?;
            println!("wrote {} ({media} media files)", path.display());
            Ok(())
        }
        Command::Import(cmd) => import_cmd(&mut col, cmd).await,
        Command::Media(cmd) => media_cmd(&mut col, cmd).await,
    };
    col.close().await;
    result
}

pub async fn open_collection(path: Option<PathBuf>) -> Result<Collection> {
    let path = match path {
        Some(p) => p,
        None => {
            let dirs = ProjectDirs::from("", "", "cardvault")
                .ok_or_else(|| anyhow!("cannot determine a data directory"))?;
            std::fs::create_dir_all(dirs.data_dir())?;
            dirs.data_dir().join("collection.anki2")
        }
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    Ok(Collection::open(&path).await?)
}

async fn info_cmd(col: &mut Collection) -> Result<()> {
    let notes: i64 = col.store().scalar("SELECT count(*) FROM notes").await?;
    let cards: i64 = col.store().scalar("SELECT count(*) FROM cards").await?;
    let reviews: i64 = col.store().scalar("SELECT count(*) FROM revlog").await?;
    col.build_queues(None).await?;
    let (new, lrn, due) = col.queue_counts();
    println!("collection: {}", col.path().display());
    println!("notes: {notes}  cards: {cards}  reviews: {reviews}");
    println!("today: new {new}, learning {lrn}, due {due}");
    Ok(())
}

async fn deck_cmd(col: &mut Collection, cmd: DeckCmd) -> Result<()> {
    match cmd {
        DeckCmd::Add { name } => {
            let id = col.add_deck(&name).await?;
            println!("{id}");
        }
        DeckCmd::List => {
            let mut decks: Vec<_> = col.decks().values().cloned().collect();
            decks.sort_by(|a, b| a.name.cmp(&b.name));
            for d in decks {
                let kind = if d.is_filtered() { "filtered" } else { "deck" };
                println!("{}\t{}\t{}", d.id, d.name, kind);
            }
        }
        DeckCmd::Rm { name, keep_cards } => {
            let id = col
                .deck_id_by_name(&name)
                .ok_or_else(|| anyhow!("no deck named '{name}'"))?;
            let policy = if keep_cards {
                DeckRemovalPolicy::ReassignToDefault
            } else {
                DeckRemovalPolicy::DeleteCards
            };
            col.remove_deck(id, policy).await?;
            println!("ok");
        }
    }
    Ok(())
}

async fn note_cmd(col: &mut Collection, cmd: NoteCmd) -> Result<()> {
    match cmd {
        NoteCmd::Add(a) => {
            let model_id = match &a.model {
                Some(name) => col
                    .models()
                    .values()
                    .find(|m| m.name == *name)
                    .map(|m| m.id)
                    .ok_or_else(|| anyhow!("no model named '{name}'"))?,
                None => col
                    .models()
                    .values()
                    .map(|m| m.id)
                    .min()
                    .ok_or_else(|| anyhow!("the collection has no models yet"))?,
            };
            let deck_id = col
                .deck_id_by_name(&a.deck)
                .ok_or_else(|| anyhow!("no deck named '{}'", a.deck))?;
            let mut note = Note::new(model_id, a.fields);
            for tag in &a.tags {
                note.add_tag(tag);
            }
            let id = note.id;
            let cards = col.add_note(note, deck_id).await?;
            println!("{id} ({cards} cards)");
        }
        NoteCmd::Rm { note_id } => {
            col.remove_notes(&[note_id]).await?;
            println!("ok");
        }
        NoteCmd::Suspend { note_id } => {
            col.suspend_note(note_id).await?;
            println!("ok");
        }
        NoteCmd::Bury { note_id } => {
            col.bury_note(note_id).await?;
            println!("ok");
        }
    }
    Ok(())
}

async fn review_cmd(col: &mut Collection, cmd: ReviewCmd) -> Result<()> {
    let deck_id = match &cmd.deck {
        Some(name) => Some(
            col.deck_id_by_name(name)
                .ok_or_else(|| anyhow!("no deck named '{name}'"))?,
        ),
        None => None,
    };
    col.build_queues(deck_id).await?;

    let mut done = 0usize;
    while done < cmd.max {
        let Some(mut card) = col.get_next_card().await? else {
            break;
        };
        let note = col.get_note(card.note_id).await?;
        println!();
        println!("Q: {}", note.fields.first().map(String::as_str).unwrap_or(""));
        print!("[enter = show answer, q = quit] ");
        stdout().flush()?;
        let line = read_line()?;
        if line.trim() == "q" {
            break;
        }
        println!("A: {}", note.fields.join(" / "));
        print!("[1 again, 2 hard, 3 good, 4 easy, u undo, q quit] ");
        stdout().flush()?;
        let answer = read_line()?;
        match answer.trim() {
            "q" => break,
            "u" => {
                match col.undo().await? {
                    Some(id) => println!("undid card {id}"),
                    None => println!("nothing to undo"),
                }
                col.build_queues(deck_id).await?;
                continue;
            }
            g => {
                let ease = g
                    .parse::<i64>()
                    .ok()
                    .and_then(Ease::from_grade)
                    .ok_or_else(|| anyhow!("expected a grade between 1 and 4"))?;
                let outcome = col.answer_card(&mut card, ease).await?;
                if outcome.leech.is_some() {
                    println!("(card flagged as a leech)");
                }
                done += 1;
            }
        }
    }
    println!("reviewed {done} cards");
    Ok(())
}

async fn import_cmd(col: &mut Collection, cmd: ImportCmd) -> Result<()> {
    let opts = ImportOptions {
        dupe_policy: match cmd.dupes {
            DupeMode::Update => DupePolicy::Update,
            DupeMode::Ignore => DupePolicy::Ignore,
            DupeMode::AddAlways => DupePolicy::AddAlways,
        },
        allow_schema_change: cmd.allow_schema_change,
        deck_prefix: cmd.prefix,
    };
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watcher.cancel();
        }
    });
    let summary = col.import_package(&cmd.path, &opts, &cancel).await?;
    println!(
        "added {} notes, updated {}, {} duplicates, {} conflicting, {} cards, {} media files",
        summary.notes_added,
        summary.notes_updated,
        summary.dupes,
        summary.conflicting,
        summary.cards_added,
        summary.media_added
    );
    Ok(())
}

async fn media_cmd(col: &mut Collection, cmd: MediaCmd) -> Result<()> {
    match cmd {
        MediaCmd::Add { path } => {
            if !path.is_file() {
                bail!("{} is not a file", path.display());
            }
            let name = col.add_media_file(&path).await?;
            println!("{name}");
        }
        MediaCmd::Check => {
            let check = col.check_media().await?;
            for f in &check.missing {
                println!("missing\t{f}");
            }
            for f in &check.unused {
                println!("unused\t{f}");
            }
            for f in &check.invalid {
                println!("invalid\t{f}");
            }
            for (f, why) in &check.errors {
                println!("unreadable\t{f}\t{why}");
            }
            println!(
                "{} missing, {} unused, {} invalid, {} unreadable",
                check.missing.len(),
                check.unused.len(),
                check.invalid.len(),
                check.errors.len()
            );
        }
        MediaCmd::Scan { force } => {
            let report = col.media()?.find_changes(force).await?;
            for f in &report.added {
                println!("added\t{f}");
            }
            for f in &report.removed {
                println!("removed\t{f}");
            }
            for (f, why) in &report.errors {
                println!("error\t{f}\t{why}");
            }
        }
    }
    Ok(())
}

fn read_line() -> Result<String> {
    let mut buf = String::new();
    stdin().read_line(&mut buf)?;
    Ok(buf)
}
