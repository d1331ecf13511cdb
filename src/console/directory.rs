use log::warn;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::core::{DirectoryService, PeerId};
use crate::utils::Result;

/// A line typed at the directory's operator console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCommand {
    Discover(PeerId),
    Ping(PeerId),
    List,
    Exit,
}

impl FromStr for DirectoryCommand {
    type Err = String;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["discover", id] => parse_id(id).map(DirectoryCommand::Discover),
            ["ping", id] => parse_id(id).map(DirectoryCommand::Ping),
            ["list"] => Ok(DirectoryCommand::List),
            ["exit"] => Ok(DirectoryCommand::Exit),
            _ => Err("Incorrect command".to_string()),
        }
    }
}

fn parse_id(raw: &str) -> std::result::Result<PeerId, String> {
    raw.parse::<u64>()
        .map(PeerId)
        .map_err(|_| format!("Invalid PeerID: {}", raw))
}

fn print_menu() {
    println!("\nPlease enter a command:");
    println!("1. discover [PeerID]");
    println!("2. ping [PeerID]");
    println!("3. list");
    println!("4. exit");
}

/// Read commands from `input` until `exit` or end of input.
pub async fn run_directory_console<R>(service: &DirectoryService, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
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

        let command = match line.parse::<DirectoryCommand>() {
            Ok(command) => command,
            Err(msg) => {
                println!("{}", msg);
                continue;
            }
        };

        match command {
            DirectoryCommand::Exit => {
                println!("Server shutting down");
                return Ok(());
            }
            DirectoryCommand::List => {
                println!("Num      PeerID      Address");
                for (i, peer) in service.list_peers().await.iter().enumerate() {
                    println!("{:<8} {:<11} {}", i + 1, peer.id, peer.address);
                }
            }
            DirectoryCommand::Ping(id) => match service.ping_peer(id).await {
                Ok(outcome) if outcome.is_live() => {
                    println!(
                        "{}/{} connection success",
                        outcome.successes, outcome.attempts
                    );
                    println!("Peer live!");
                }
                Ok(_) => println!("Peer not live!"),
                Err(e) => println!("{}", e),
            },
            DirectoryCommand::Discover(id) => match service.list_files(id).await {
                Ok(Some(files)) => {
                    println!("Num      Files");
                    for (i, file) in files.iter().enumerate() {
                        println!("{:<8} {}", i + 1, file);
                    }
                }
                Ok(None) => println!("Peer {} is not reachable", id),
                Err(e) => {
                    warn!("Discover on Peer {} failed: {}", id, e);
                    println!("{}", e);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DirectoryConfig;
    use crate::core::protocol::ConnectRequest;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "discover 3".parse::<DirectoryCommand>(),
            Ok(DirectoryCommand::Discover(PeerId(3)))
        );
        assert_eq!(
            "  ping   12 \n".parse::<DirectoryCommand>(),
            Ok(DirectoryCommand::Ping(PeerId(12)))
        );
        assert_eq!("list".parse::<DirectoryCommand>(), Ok(DirectoryCommand::List));
        assert_eq!("exit".parse::<DirectoryCommand>(), Ok(DirectoryCommand::Exit));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("ping".parse::<DirectoryCommand>().is_err());
        assert!("ping one".parse::<DirectoryCommand>().unwrap_err().contains("Invalid PeerID"));
        assert!("discover 1 2".parse::<DirectoryCommand>().is_err());
        assert!("shutdown".parse::<DirectoryCommand>().is_err());
    }

    #[tokio::test]
    async fn test_console_stops_on_exit() {
        let service = DirectoryService::new(DirectoryConfig::default());
        service
            .connect(ConnectRequest {
                address: "127.0.0.1:1".to_string(),
            })
            .await
            .unwrap();

        let input: &[u8] = b"list\nbogus\nping 7\nexit\nlist\n";
        run_directory_console(&service, input).await.unwrap();
        assert_eq!(service.list_peers().await.len(), 1);
    }
}
