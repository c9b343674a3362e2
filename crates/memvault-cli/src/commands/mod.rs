pub mod ingest;
pub mod maintenance;
pub mod query;

pub use ingest::{AddArgs, InferArgs};
pub use maintenance::{DecayArgs, DeleteArgs, ReconcileArgs, ResetArgs, WatchArgs};
pub use query::{GetArgs, HistoryArgs, ListArgs, SearchArgs};
