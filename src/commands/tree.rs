use clap::{Args, Subcommand};

use rubber_sync::db::{LocalStore, StoreError};
use rubber_sync::models::{NewSite, Site, SiteUpdate, SyncStatus};

use super::OutputFormat;

#[derive(Args)]
pub struct TreeCommand {
    #[command(subcommand)]
    pub command: TreeSubcommand,
}

#[derive(Subcommand)]
pub enum TreeSubcommand {
    /// Register a new tree
    Register {
        /// Tree ID painted on the trunk, e.g. T-101
        tree_id: String,

        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Free-text note
        #[arg(long)]
        note: Option<String>,
    },

    /// List registered trees
    List {
        /// Only trees whose ID or note contains this text
        #[arg(long, short)]
        search: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a tree's details
    Show {
        tree_id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the tree after this one in the tapping round
    Next { tree_id: String },

    /// Change a tree's location or note
    Edit {
        tree_id: String,

        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,

        #[arg(long, allow_hyphen_values = true)]
        lng: Option<f64>,

        /// New note; pass an empty string to clear it
        #[arg(long)]
        note: Option<String>,
    },
}

impl TreeCommand {
    pub async fn run(&self, store: &LocalStore) -> Result<(), Box<dyn std::error::Error>> {
        let sites = store.sites();
        match &self.command {
            TreeSubcommand::Register {
                tree_id,
                lat,
                lng,
                note,
            } => {
                let mut site = NewSite::new(tree_id, *lat, *lng);
                if let Some(note) = note {
                    site = site.with_note(note);
                }

                let created = match sites.create(&site).await {
                    Ok(created) => created,
                    Err(StoreError::DuplicateTree(id)) => {
                        return Err(format!(
                            "Tree '{}' is already registered on this device. Use `tree edit` to change it.",
                            id
                        )
                        .into())
                    }
                    Err(e) => return Err(e.into()),
                };
                println!("Registered tree:");
                print!("{}", created);
                Ok(())
            }

            TreeSubcommand::List { search, format } => {
                let list = match search {
                    Some(q) => sites.search(q).await?,
                    None => sites.list().await?,
                };

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&list)?);
                    }
                    OutputFormat::Text => {
                        if list.is_empty() {
                            println!("No trees found.");
                        } else {
                            print_site_table(&list);
                        }
                    }
                }
                Ok(())
            }

            TreeSubcommand::Show { tree_id, format } => {
                let site = find_site(store, tree_id).await?;
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&site)?),
                    OutputFormat::Text => print!("{}", site),
                }
                Ok(())
            }

            TreeSubcommand::Next { tree_id } => {
                let site = find_site(store, tree_id).await?;
                match sites.next_after(site.id).await? {
                    Some(next) => print!("{}", next),
                    None => println!("Round complete: {} is the last tree.", site.tree_id),
                }
                Ok(())
            }

            TreeSubcommand::Edit {
                tree_id,
                lat,
                lng,
                note,
            } => {
                let site = find_site(store, tree_id).await?;
                let update = SiteUpdate {
                    lat: *lat,
                    lng: *lng,
                    note: note.clone().map(Some),
                    status: None,
                };
                if update.is_empty() {
                    return Err("Nothing to change. Pass --lat, --lng or --note.".into());
                }

                // An edited tree must be pushed again.
                let update = SiteUpdate {
                    status: Some(SyncStatus::Pending),
                    ..update
                };
                let updated = sites.update(site.id, &update).await?;
                println!("Updated tree:");
                print!("{}", updated);
                Ok(())
            }
        }
    }
}

pub(super) async fn find_site(
    store: &LocalStore,
    tree_id: &str,
) -> Result<Site, Box<dyn std::error::Error>> {
    store
        .sites()
        .get_by_tree_id(tree_id.trim())
        .await?
        .ok_or_else(|| format!("Tree not found: {}", tree_id.trim()).into())
}

fn print_site_table(sites: &[Site]) {
    let width = sites
        .iter()
        .map(|s| s.tree_id.len())
        .max()
        .unwrap_or(0)
        .max(7);
    println!(
        "{:<width$}  {:>10}  {:>11}  {:<7}  NOTE",
        "TREE ID",
        "LAT",
        "LNG",
        "STATUS",
        width = width
    );
    for site in sites {
        println!(
            "{:<width$}  {:>10.5}  {:>11.5}  {:<7}  {}",
            site.tree_id,
            site.lat,
            site.lng,
            site.status.to_string(),
            site.note.as_deref().unwrap_or(""),
            width = width
        );
    }
}
