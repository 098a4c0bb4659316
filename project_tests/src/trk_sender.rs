//! Load generator for server_trackd: signs beacons with a tracker's token and
//! fires them over HTTP (one GET per beacon) or UDP (fire-and-forget), then
//! prints a tally of the replies and the achieved rate.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lib_trackd::auth::sign_fields;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Transport {
    Http,
    Udp,
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "Send signed tracking beacons to server_trackd", long_about = None)]
struct Args {
    /// Daemon address (host:port)
    #[clap(short, long, default_value = "127.0.0.1:8010")]
    target: String,

    /// Transport to use
    #[clap(short, long, value_enum, default_value_t = Transport::Http)]
    mode: Transport,

    /// Operation code
    #[clap(long, default_value_t = 1)]
    op: u8,

    /// Tracker id
    #[clap(long, default_value_t = 42)]
    trk_id: u32,

    /// Secret token shared with the daemon for (op, trk_id)
    #[clap(long)]
    token: String,

    /// Value carried in `data`
    #[clap(long, default_value_t = 1)]
    data: i64,

    /// Date bucket (YYYYMMDD); today when omitted
    #[clap(long)]
    date: Option<String>,

    /// Number of beacons to send
    #[clap(short, long, default_value_t = 100)]
    count: usize,

    /// Concurrent senders
    #[clap(long, default_value_t = 4)]
    concurrency: usize,
}

/// Query string for one beacon, salt included.
fn beacon_query(args: &Args, date: &str) -> String {
    let date_value: i64 = date.parse().unwrap_or_default();
    let salt = sign_fields(i64::from(args.trk_id), args.data, date_value, &args.token);
    format!(
        "op={}&trk_id={}&data={}&date={}&salt={}",
        args.op, args.trk_id, args.data, date, salt
    )
}

/// Datagram for one beacon: the query plus the declared data length.
fn beacon_datagram(args: &Args, date: &str) -> String {
    format!("{}&dtlen={}", beacon_query(args, date), args.data.to_string().len())
}

async fn send_http(args: Arc<Args>, date: String, share: usize, tally: Arc<Mutex<BTreeMap<String, usize>>>) -> Result<()> {
    let client = reqwest::Client::new();
    let url = format!("http://{}/?{}", args.target, beacon_query(&args, &date));
    for _ in 0..share {
        let reply = match client.get(&url).send().await {
            Ok(response) => response.text().await.unwrap_or_else(|e| format!("body error: {e}")),
            Err(e) => format!("request error: {e}"),
        };
        *tally.lock().await.entry(reply).or_default() += 1;
    }
    Ok(())
}

async fn send_udp(args: Arc<Args>, date: String, share: usize, tally: Arc<Mutex<BTreeMap<String, usize>>>) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.context("cannot bind UDP socket")?;
    let datagram = beacon_datagram(&args, &date);
    for _ in 0..share {
        let outcome = match socket.send_to(datagram.as_bytes(), args.target.as_str()).await {
            Ok(_) => "sent".to_string(),
            Err(e) => format!("send error: {e}"),
        };
        *tally.lock().await.entry(outcome).or_default() += 1;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Arc::new(Args::parse());
    let date = args
        .date
        .clone()
        .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d").to_string());

    let tally = Arc::new(Mutex::new(BTreeMap::new()));
    let senders = args.concurrency.max(1);
    let started = Instant::now();

    let mut handles = Vec::with_capacity(senders);
    for i in 0..senders {
        // spread the remainder over the first senders
        let share = args.count / senders + usize::from(i < args.count % senders);
        let task = match args.mode {
            Transport::Http => tokio::spawn(send_http(Arc::clone(&args), date.clone(), share, Arc::clone(&tally))),
            Transport::Udp => tokio::spawn(send_udp(Arc::clone(&args), date.clone(), share, Arc::clone(&tally))),
        };
        handles.push(task);
    }
    for handle in handles {
        handle.await??;
    }

    let elapsed = started.elapsed();
    println!(
        "{} beacon(s) via {:?} to {} in {:.3}s ({:.0}/s)",
        args.count,
        args.mode,
        args.target,
        elapsed.as_secs_f64(),
        args.count as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    for (reply, n) in tally.lock().await.iter() {
        println!("{n:>8}  {}", reply.replace('\t', " "));
    }
    Ok(())
}
