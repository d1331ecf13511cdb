//! Replication walkthrough: one directory, three peers, one file that spreads.

use mini_rendezvous::core::PeerInfo;
use mini_rendezvous::utils::setup_logging;
use mini_rendezvous::{DirectoryConfig, DirectoryService, FetchOutcome, PeerConfig, PeerNode};
use std::path::PathBuf;
use tokio::fs;

#[tokio::main]
async fn main() -> mini_rendezvous::Result<()> {
    setup_logging();

    println!("Rendezvous Replication Demo");
    println!("===========================");

    setup_demo_files().await?;

    let (_directory, directory_handle) = DirectoryService::start(DirectoryConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        ..DirectoryConfig::default()
    })
    .await?;
    let directory_addr = directory_handle.local_addr().to_string();
    println!("Directory listening on {}", directory_addr);

    let mut peers = Vec::new();
    let mut handles = Vec::new();
    for name in ["alice", "bob", "carol"] {
        let (node, handle) = PeerNode::start(PeerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            directory_addr: directory_addr.clone(),
            storage_dir: PathBuf::from(format!("./demo_store/{}", name)),
            ..PeerConfig::default()
        })
        .await?;
        let peer_id = node.connect_to_directory().await?;
        println!("{} joined as Peer {} on {}", name, peer_id, node.address());
        peers.push(node);
        handles.push(handle);
    }

    let alice = &peers[0];
    alice
        .register_file("hello.txt", &PathBuf::from("./demo_shared"))
        .await?;
    print_owners(alice, "hello.txt").await?;

    // bob can only fetch from alice.
    fetch(&peers[1], "bob", |_: &str, _: &[PeerInfo]| -> Option<usize> { Some(0) }).await?;
    print_owners(alice, "hello.txt").await?;

    // carol picks the newest replica, which is bob's.
    fetch(&peers[2], "carol", |_: &str, owners: &[PeerInfo]| -> Option<usize> {
        owners.len().checked_sub(1)
    })
    .await?;
    print_owners(alice, "hello.txt").await?;

    let content = fs::read_to_string("./demo_store/carol/hello.txt").await?;
    println!("carol's copy: {}", content.lines().next().unwrap_or_default());

    for handle in &handles {
        handle.shutdown();
    }
    directory_handle.shutdown();
    println!("Demo stopped");
    Ok(())
}

async fn fetch<F>(node: &PeerNode, name: &str, mut choose: F) -> mini_rendezvous::Result<()>
where
    F: FnMut(&str, &[PeerInfo]) -> Option<usize> + Send,
{
    match node.search_and_fetch("hello.txt", &mut choose).await? {
        FetchOutcome::Fetched { owner, path, .. } => {
            println!("{} fetched hello.txt from Peer {} into {}", name, owner, path.display())
        }
        other => println!("{} did not get hello.txt: {:?}", name, other),
    }
    Ok(())
}

async fn print_owners(node: &PeerNode, file_name: &str) -> mini_rendezvous::Result<()> {
    let reply = node.search(file_name).await?;
    println!("Owners of {}:", file_name);
    for owner in &reply.owners {
        println!("  Peer {} at {}", owner.id, owner.address);
    }
    Ok(())
}

async fn setup_demo_files() -> mini_rendezvous::Result<()> {
    // Clean up previous runs
    let _ = fs::remove_dir_all("./demo_shared").await;
    let _ = fs::remove_dir_all("./demo_store").await;

    fs::create_dir_all("./demo_shared").await?;
    fs::write(
        "./demo_shared/hello.txt",
        "Hello, rendezvous!\nEvery peer that fetches this file starts serving it.",
    )
    .await?;
    println!("Created demo_shared/hello.txt");
    Ok(())
}
