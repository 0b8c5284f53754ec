//! Minimal controller for poking a running server from a terminal.
//!
//! Joins a side, reports ready, sends a few paddle moves and prints every
//! command the server sends back until the connection closes.

use clap::Parser;
use shared::{Command, Frame, Side};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    server: String,
    /// Side to join: left or right
    #[clap(long, default_value = "left")]
    side: String,
    /// Player name
    #[clap(short, long, default_value = "tester")]
    name: String,
    /// Paddle moves to send after joining, e.g. "up,up,down"
    #[clap(short, long, default_value = "")]
    moves: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let side = Side::parse(&args.side).ok_or_else(|| format!("unknown side {:?}", args.side))?;

    let stream = TcpStream::connect(&args.server).await?;
    println!("Connected to {}", stream.peer_addr()?);
    let (reader, mut writer) = stream.into_split();

    let reader_task = tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match Command::parse(&line) {
                Command::State(json) => println!("<- STATE ({} bytes)", json.len()),
                command => println!("<- {:?}", command),
            }
        }
        println!("Server closed the connection");
    });

    let mut frames = vec![
        Frame::Join {
            side,
            name: args.name.clone(),
        },
        Frame::Ready(true),
    ];
    for movement in args.moves.split(',').map(str::trim) {
        match movement {
            "up" => frames.push(Frame::Up),
            "down" => frames.push(Frame::Down),
            "" => {}
            other => eprintln!("Skipping unknown move {:?}", other),
        }
    }

    for frame in frames {
        println!("-> {}", frame);
        writer.write_all(format!("{}\n", frame).as_bytes()).await?;
        sleep(Duration::from_millis(100)).await;
    }

    tokio::select! {
        _ = reader_task => {}
        _ = tokio::signal::ctrl_c() => {
            let leave = Frame::Leave { name: args.name };
            writer.write_all(format!("{}\n", leave).as_bytes()).await?;
        }
    }

    Ok(())
}
