use anyhow::bail;
use tracing::info;

use ghostlink_bridge::BridgeConfig;
use ghostlink_db::Database;
use ghostlink_types::ids::MessageId;

const USAGE: &str = "usage: ghostlink-admin [migrate | stats | reactions <message_id>]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ghostlink=debug".into()),
        )
        .init();

    let config = BridgeConfig::from_env()?;
    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_else(|| "migrate".into());

    // Opening runs any pending migrations
    let db = Database::open(&config.db_path, config.bridge_id.clone())?;
    info!(bridge_id = %config.bridge_id, path = %config.db_path.display(), "Database ready");

    match command.as_str() {
        "migrate" => {
            println!("schema version {}", db.schema_version()?);
        }
        "stats" => {
            println!("ghosts       {}", db.count_ghosts()?);
            println!("user logins  {}", db.count_user_logins()?);
            println!("reactions    {}", db.count_reactions()?);
        }
        "reactions" => {
            let Some(message_id) = args.next() else {
                bail!("{USAGE}");
            };
            let reactions = db.get_reactions_to_message(&MessageId::from(message_id))?;
            for r in &reactions {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    r.message_part_id,
                    r.sender_id,
                    r.emoji_id,
                    r.mxid,
                    r.timestamp.to_rfc3339()
                );
            }
            info!(count = reactions.len(), "Listed reactions");
        }
        other => bail!("unknown command {other:?}\n{USAGE}"),
    }

    Ok(())
}
