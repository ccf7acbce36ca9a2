use clap::Args;

use rubber_sync::db::LocalStore;
use rubber_sync::models::NewObservation;

/// Record a tapping at a tree
#[derive(Args)]
pub struct CollectCommand {
    /// Tree ID
    tree_id: String,

    /// Number of cuts made
    #[arg(long)]
    cuts: u32,

    /// Amount of latex collected
    #[arg(long)]
    milk: f64,

    /// Free-text note
    #[arg(long)]
    note: Option<String>,
}

impl CollectCommand {
    pub async fn run(&self, store: &LocalStore) -> Result<(), Box<dyn std::error::Error>> {
        let mut observation = NewObservation::new(&self.tree_id, self.cuts, self.milk);
        if let Some(note) = &self.note {
            observation = observation.with_note(note);
        }

        // Collections for unregistered trees are kept; the tree may have
        // been registered on another device.
        if store
            .sites()
            .get_by_tree_id(&observation.tree_id)
            .await?
            .is_none()
        {
            eprintln!(
                "Warning: tree '{}' is not registered on this device",
                observation.tree_id
            );
        }

        let created = store.observations().create(&observation).await?;
        println!("Recorded collection for {}:", created.tree_id);
        println!("  {}", created);
        Ok(())
    }
}
