use clap::Args;

use rubber_sync::db::LocalStore;

use super::OutputFormat;

/// Show or prune a tree's collection history
#[derive(Args)]
pub struct HistoryCommand {
    /// Tree ID
    #[arg(required_unless_present = "delete")]
    tree_id: Option<String>,

    /// Delete one collection from this device by its local number.
    /// The authority keeps its copy.
    #[arg(long, value_name = "ID", conflicts_with = "tree_id")]
    delete: Option<i64>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl HistoryCommand {
    pub async fn run(&self, store: &LocalStore) -> Result<(), Box<dyn std::error::Error>> {
        let observations = store.observations();

        if let Some(id) = self.delete {
            if observations.delete(id).await? {
                println!("Deleted collection #{} from this device.", id);
                return Ok(());
            }
            return Err(format!("Collection not found: #{}", id).into());
        }

        let Some(tree_id) = &self.tree_id else {
            return Err("Tree ID is required".into());
        };

        let history = observations.list_for_site(tree_id.trim()).await?;
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&history)?),
            OutputFormat::Text => {
                if history.is_empty() {
                    println!("No collections recorded for {}.", tree_id.trim());
                    return Ok(());
                }
                let total: f64 = history.iter().map(|o| o.milk_amount).sum();
                println!(
                    "{}: {} collection(s), {:.2} milk total",
                    tree_id.trim(),
                    history.len(),
                    total
                );
                for observation in &history {
                    println!("  {}", observation);
                }
            }
        }
        Ok(())
    }
}
