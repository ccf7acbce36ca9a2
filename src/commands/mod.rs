use clap::ValueEnum;

mod collect;
mod config_cmd;
mod history;
mod sync_cmd;
mod tree;

pub use collect::CollectCommand;
pub use config_cmd::ConfigCommand;
pub use history::HistoryCommand;
pub use sync_cmd::SyncCommand;
pub use tree::TreeCommand;

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
