//! Latency exerciser for the shared-memory pipe: run one process with
//! `--server` (creates the segment and produces frames) and one without
//! (consumes them), sharing the same `--id`.

use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use mempipe::{Msg, MsgReader, MsgWriter, Pipe, clear_pipe};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mempipe-ctl", about = "Exercise a shared-memory message pipe")]
struct Args {
    /// Run the producing side, which creates the segment.
    #[arg(long)]
    server: bool,

    /// SysV key of the segment.
    #[arg(long, default_value_t = 0xE4CA)]
    id: i64,

    /// Segment size in bytes. Leave room for the JSON encoding of the
    /// 1 KiB data block.
    #[arg(long, default_value_t = 8192)]
    size: u64,

    /// Frames to exchange.
    #[arg(long, default_value_t = 100)]
    iterations: usize,

    /// Abandon a blocked write after this long.
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    write_deadline: Duration,
}

#[derive(Serialize, Deserialize)]
struct TsFrame {
    ts: i64,
    id: usize,
    data: Vec<u8>,
}

const FRAME_CODE: u64 = 10;

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

fn run_producer(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let pipe = Pipe::create_writer(args.id, args.size).inspect_err(|_| {
        // A stale segment from a crashed run blocks the exclusive
        // create; reclaim it so the next attempt can succeed.
        clear_pipe(args.id);
    })?;
    pipe.set_write_deadline(Some(args.write_deadline));

    let mut data = vec![0u8; 1024];
    rand::rng().fill(data.as_mut_slice());

    info!("waiting for a consumer to attach");
    pipe.wait_conn()?;
    info!("consumer attached");

    let mut timings = Vec::with_capacity(args.iterations);
    for id in 0..args.iterations {
        let frame = TsFrame { ts: now_nanos(), id, data: data.clone() };
        let payload = serde_json::to_vec(&frame)?;
        pipe.write_msg(&Msg::new(FRAME_CODE, payload))?;
        timings.push(now_nanos() - frame.ts);
    }

    let avg = timings.iter().sum::<i64>() / timings.len() as i64;
    println!("avg write: {}", humantime::format_duration(Duration::from_nanos(avg as u64)));
    pipe.close();
    Ok(())
}

fn run_consumer(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let pipe = Pipe::open_reader(args.id, args.size)?;

    let mut timings = Vec::with_capacity(args.iterations);
    for _ in 0..args.iterations {
        let msg = pipe.read_msg()?;
        let received = now_nanos();
        if msg.code != FRAME_CODE {
            return Err(format!("unexpected code {}", msg.code).into());
        }
        let frame: TsFrame = serde_json::from_slice(&msg.payload)?;
        timings.push(received - frame.ts);
    }

    for (i, nanos) in timings.iter().enumerate() {
        println!("i: {i} latency: {nanos}ns");
    }
    let avg = timings.iter().sum::<i64>() / timings.len() as i64;
    println!("avg read: {}", humantime::format_duration(Duration::from_nanos(avg as u64)));
    pipe.close();
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    if args.server { run_producer(&args) } else { run_consumer(&args) }
}
