pub mod collection;
pub mod import;
pub mod media;
pub mod package;
pub mod sched;

pub use collection::{Collection, DeckRemovalPolicy};
pub use import::{DupePolicy, ImportOptions, ImportSummary};
pub use media::{ChangeReport, MediaCheck, MediaManager};
pub use package::{PackageReader, COLLECTION_ENTRY, MANIFEST_ENTRY};
pub use sched::{AnswerOutcome, LeechSignal, Scheduler, UndoStep};
