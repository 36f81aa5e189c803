use std::env;

use taskdeck::config::{self, Config};
use taskdeck::db::Database;
use taskdeck::models::TaskOrigin;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <search_query>", args[0]);
        eprintln!("Search query matches against sender, subject or title.");
        std::process::exit(1);
    }

    let query = &args[1];
    let config = Config::load(config::DEFAULT_PATH)?;
    let db = Database::new(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    db.run_migrations().await?;

    let tasks = db.search_tasks(query).await?;
    let Some(task) = tasks.first() else {
        println!("No tasks found matching '{}'", query);
        return Ok(());
    };

    println!("Found {} task(s), showing the newest:", tasks.len());
    println!("ID: {}", task.id);
    println!("Title: {}", task.title);
    println!("Label: {}", task.label);
    println!("Created: {}", task.created_at.to_rfc3339());
    println!("Status changed: {}", task.last_status_change.to_rfc3339());
    match &task.origin {
        TaskOrigin::Manual => println!("Source: manual"),
        TaskOrigin::Imported(from) => {
            println!("Source: gmail");
            println!("Message ID: {}", from.external_id);
            println!("From: {}", from.sender);
            println!("Account: {:?}", from.account);
            println!("Subject: {:?}", from.subject);
        }
    }
    println!(
        "--------------------------------------------------------------------------------"
    );
    println!("DESCRIPTION (Raw Debug):");
    println!("{:?}", task.description);
    println!(
        "--------------------------------------------------------------------------------"
    );
    println!("DESCRIPTION (Display):");
    println!("{}", task.description);

    Ok(())
}
