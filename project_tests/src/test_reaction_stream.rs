use anyhow::{Context, Result, bail};
use clap::Parser;
use lib_qbox::{FrameDecoder, FrameKind, ReactionBoard};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Live client for the reaction stream", long_about = None)]
struct Args {
    /// Base URL of a running server_qbox
    #[clap(short, long, default_value = "http://127.0.0.1:8080")]
    url: String,

    /// Question to react to
    #[clap(short, long, default_value_t = 1)]
    question: u64,

    /// Reaction symbol sent in the burst
    #[clap(short, long, default_value = "👍")]
    emoji: String,

    /// Number of concurrent reactions to fire (0 = listen only)
    #[clap(short, long, default_value_t = 0)]
    burst: usize,

    /// Seconds to keep listening after the burst
    #[clap(short, long, default_value_t = 5)]
    listen_secs: u64,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: u16,
    message: String,
    data: Value,
}

#[derive(Default)]
struct Observed {
    board: ReactionBoard,
    frames: HashMap<FrameKind, usize>,
    last_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();
    let observed = Arc::new(Mutex::new(Observed::default()));

    println!("Connecting to {}/api/sse ...", args.url);
    let mut response = client
        .get(format!("{}/api/sse", args.url))
        .send()
        .await
        .context("Failed to open stream")?;
    if !response.status().is_success() {
        bail!("Stream request failed with {}", response.status());
    }

    let observed_reader = Arc::clone(&observed);
    let reader = tokio::spawn(async move {
        let mut decoder = FrameDecoder::new();
        while let Ok(Some(chunk)) = response.chunk().await {
            for frame in decoder.push_bytes(&chunk) {
                let mut data = observed_reader.lock().unwrap();
                *data.frames.entry(frame.kind).or_default() += 1;
                if let Some(Ok(event)) = frame.event() {
                    data.board.apply(&event);
                    data.last_id = frame.id.clone();
                }
            }
        }
        println!("Stream ended.");
    });

    if args.burst > 0 {
        let started = Instant::now();
        let tasks: Vec<_> = (0..args.burst)
            .map(|_| {
                let client = client.clone();
                let url = format!("{}/api/question/{}/emoji", args.url, args.question);
                let emoji = args.emoji.clone();
                tokio::spawn(async move {
                    client
                        .post(url)
                        .form(&[("emoji", emoji)])
                        .send()
                        .await?
                        .json::<Envelope>()
                        .await
                })
            })
            .collect();

        let mut codes: HashMap<u16, usize> = HashMap::new();
        for task in tasks {
            match task.await? {
                Ok(envelope) => {
                    if envelope.code != 200 {
                        println!("Rejected: {} {}", envelope.code, envelope.message);
                    }
                    *codes.entry(envelope.code).or_default() += 1;
                }
                Err(e) => println!("Request failed: {}", e),
            }
        }
        println!(
            "Burst of {} finished in {:?}: {:?}",
            args.burst,
            started.elapsed(),
            codes
        );
    }

    sleep(Duration::from_secs(args.listen_secs)).await;
    reader.abort();

    let snapshot: Envelope = client
        .get(format!("{}/api/question/{}/emoji", args.url, args.question))
        .send()
        .await?
        .json()
        .await?;

    let data = observed.lock().unwrap();
    println!("\n----- Stream Summary -----");
    for kind in [FrameKind::Connected, FrameKind::Heartbeat, FrameKind::Emoji, FrameKind::Retry] {
        println!("{:>10}: {}", kind.as_str(), data.frames.get(&kind).copied().unwrap_or(0));
    }
    println!("Last emoji id: {}", data.last_id.as_deref().unwrap_or("-"));
    for (question, reactions) in data.board.iter() {
        let line = reactions
            .iter()
            .map(|r| format!("{} {}", r.value, r.count))
            .collect::<Vec<_>>()
            .join(", ");
        println!("Question {}: {}", question, line);
    }

    let seen = data.board.count_of(args.question, &args.emoji);
    let stored = snapshot.data["emojis"]
        .as_array()
        .and_then(|list| list.iter().find(|r| r["value"] == args.emoji.as_str()))
        .and_then(|r| r["count"].as_u64())
        .unwrap_or(0);
    println!("{} on question {}: streamed {}, stored {}", args.emoji, args.question, seen, stored);
    println!("--------------------------\n");

    if seen != stored {
        bail!("Stream view differs from stored count");
    }
    Ok(())
}
