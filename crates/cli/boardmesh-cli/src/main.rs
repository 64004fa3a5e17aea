#![deny(unsafe_code)]

mod cli;
mod commands;
mod error;

use clap::Parser;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::GenKey { output } => commands::gen_key::run(output),
        Commands::InitBoard {
            board_id,
            title,
            description,
            private_key,
            content_store,
            data_dir,
        } => commands::init_board::run(board_id, title, description, private_key, content_store, data_dir).await,
        Commands::AddBoard {
            board_meta_cid,
            content_store,
            data_dir,
        } => commands::add_board::run(board_meta_cid, content_store, data_dir).await,
        Commands::ListTrustedIndexers { data_dir } => commands::trusted_indexers::list(data_dir),
        Commands::AddTrustedIndexer { url, data_dir } => commands::trusted_indexers::add(url, data_dir),
        Commands::RemoveTrustedIndexer { url, data_dir } => commands::trusted_indexers::remove(url, data_dir),
        Commands::SyncTrustedIndexers { data_dir, timeout_secs } => {
            commands::trusted_indexers::sync(data_dir, timeout_secs).await
        }
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::ExitCode::from(e.exit_code() as u8)
        }
    }
}
