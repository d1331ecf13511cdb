use async_trait::async_trait;
use log::warn;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use crate::core::{FetchOutcome, OwnerSelector, PeerInfo, PeerNode};
use crate::storage::FileStore;
use crate::utils::Result;

/// A line typed at a peer's operator console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCommand {
    Publish { dir: PathBuf, file: String },
    Fetch(String),
    Exit,
}

impl FromStr for PeerCommand {
    type Err = String;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["publish", dir, file] => Ok(PeerCommand::Publish {
                dir: PathBuf::from(dir),
                file: file.to_string(),
            }),
            ["fetch", file] => Ok(PeerCommand::Fetch(file.to_string())),
            ["exit"] => Ok(PeerCommand::Exit),
            _ => Err("Incorrect command".to_string()),
        }
    }
}

/// Lets the operator pick an owner by its number in the printed table.
struct PromptSelector<'a, R> {
    lines: &'a mut Lines<R>,
}

#[async_trait]
impl<'a, R> OwnerSelector for PromptSelector<'a, R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn select(&mut self, file_name: &str, owners: &[PeerInfo]) -> Option<usize> {
        println!("Owners of {}:", file_name);
        println!("Num      PeerID      Address");
        for (i, owner) in owners.iter().enumerate() {
            println!("{:<8} {:<11} {}", i + 1, owner.id, owner.address);
        }
        println!("Please choose a Num to fetch from:");

        let line = match self.lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read selection: {}", e);
                return None;
            }
        };

        match line.trim().parse::<usize>() {
            Ok(num) if (1..=owners.len()).contains(&num) => Some(num - 1),
            _ => {
                println!("Invalid choice: {}", line.trim());
                None
            }
        }
    }
}

fn print_menu() {
    println!("\nPlease enter a command:");
    println!("1. publish [dir] [file]");
    println!("2. fetch [file]");
    println!("3. exit");
}

/// Read commands from `input` until `exit` or end of input. A `fetch` reads
/// the owner choice from the same input.
pub async fn run_peer_console<R>(node: &PeerNode, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut lines = input.lines();

    loop {
        print_menu();
        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<PeerCommand>() {
            Ok(command) => command,
            Err(msg) => {
                println!("{}", msg);
                continue;
            }
        };

        match command {
            PeerCommand::Exit => {
                println!("Peer shutting down");
                return Ok(());
            }
            PeerCommand::Publish { dir, file } => {
                if !FileStore::exists(&dir, &file).await {
                    println!("File does not exist in your local file system");
                    continue;
                }
                match node.register_file(&file, &dir).await {
                    Ok(true) => println!("Registered file {}", dir.join(&file).display()),
                    Ok(false) => println!("Directory did not accept {}", file),
                    Err(e) => println!("Failed to register {}: {}", file, e),
                }
            }
            PeerCommand::Fetch(file) => {
                let mut selector = PromptSelector { lines: &mut lines };
                match node.search_and_fetch(&file, &mut selector).await {
                    Ok(FetchOutcome::NotFound) => println!("File {} not found", file),
                    Ok(FetchOutcome::Cancelled) => println!("Fetch cancelled"),
                    Ok(FetchOutcome::Missing { owner }) => {
                        println!("Peer {} no longer has {}", owner, file)
                    }
                    Ok(FetchOutcome::Fetched {
                        owner,
                        path,
                        registered,
                    }) => {
                        println!("Fetched {} from Peer {} into {}", file, owner, path.display());
                        if !registered {
                            println!("Warning: the directory was not told about this copy");
                        }
                    }
                    Err(e) => println!("Fetch of {} failed: {}", file, e),
                }
            }
        }
    }
}
