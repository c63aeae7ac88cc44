use std::error::Error;
use std::io::stdin;
use std::net::{IpAddr, SocketAddr};
use std::process;
use std::thread::spawn;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam_channel::unbounded;

use osc_monitor::osc::{ListenerConfig, ListenerError, OscArg, OscListener, OscMessage};

const RULE: &str =
    "----------------------------------------------------------------------";

#[derive(Parser)]
#[command(name = "osc-monitor", about = "Listen for OSC messages over UDP and log them")]
struct Args {
    /// IP address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// UDP port to bind
    #[arg(long, default_value_t = 7700, value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Socket read timeout in milliseconds (stop-request latency bound)
    #[arg(long, default_value_t = 200)]
    timeout_ms: u64,

    /// Report and skip datagrams larger than this many bytes
    #[arg(long, default_value_t = osc_monitor::osc::MAX_UDP_PAYLOAD)]
    max_datagram_size: usize,
}

// Everything the main thread consumes: the listener callbacks run on the
// worker thread, so they post into a channel instead of printing directly.
enum Event {
    Message(OscMessage),
    Error(ListenerError),
    Quit,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let mut config = ListenerConfig::new(SocketAddr::new(args.host, args.port));
    config.receive_timeout = Duration::from_millis(args.timeout_ms);
    config.max_datagram_size = args.max_datagram_size;

    let (tx, rx) = unbounded();
    let msg_tx = tx.clone();
    let err_tx = tx.clone();

    let mut listener = OscListener::start(
        config,
        move |msg| {
            let _ = msg_tx.send(Event::Message(msg));
        },
        move |err| {
            let _ = err_tx.send(Event::Error(err));
        },
    )?;

    let started = Instant::now();
    println!(
        "Server started on {} (press enter to exit)",
        listener.local_addr()
    );
    println!("{}", RULE);

    // Enter key ends the session; a dedicated thread turns the blocking
    // stdin read into just another event.
    spawn(move || {
        let mut line = String::new();
        let _ = stdin().read_line(&mut line);
        let _ = tx.send(Event::Quit);
    });

    for event in rx.iter() {
        match event {
            Event::Message(msg) => log_message(started, &msg),
            Event::Error(ListenerError::Socket(err)) => {
                println!("[{}] socket error: {}", timestamp(started), err);
                listener.stop();
                return Err(Box::new(err));
            }
            Event::Error(err) => {
                println!("[{}] {}", timestamp(started), err);
                println!("{}", RULE);
            }
            Event::Quit => break,
        }
    }

    listener.stop();
    println!("Server stopped");
    Ok(())
}

fn timestamp(started: Instant) -> String {
    format!("{:9.3}", started.elapsed().as_secs_f64())
}

fn log_message(started: Instant, msg: &OscMessage) {
    println!("[{}] {}", timestamp(started), msg.addr);
    if msg.args.is_empty() {
        println!("  Arguments: (none)");
    } else {
        let rendered: Vec<String> = msg.args.iter().map(describe_arg).collect();
        println!("  Arguments: {}", rendered.join(", "));
    }
    println!("{}", RULE);
}

fn describe_arg(arg: &OscArg) -> String {
    match arg {
        OscArg::Int(v) => format!("int32: {}", v),
        OscArg::Float(v) => format!("float32: {}", v),
        OscArg::Str(v) => format!("string: {}", v),
        OscArg::Blob(v) => format!("blob: {} ({} bytes)", hex_prefix(v), v.len()),
        OscArg::Bool(v) => format!("bool: {}", v),
        OscArg::Time(v) => format!("timetag: {:#018x}", v),
        OscArg::Nil => "nil".to_string(),
    }
}

// First bytes of a blob as hex, enough to recognize the payload in a log.
fn hex_prefix(bytes: &[u8]) -> String {
    const LIMIT: usize = 16;
    let mut out = String::new();
    for byte in bytes.iter().take(LIMIT) {
        out.push_str(&format!("{:02x}", byte));
    }
    if bytes.len() > LIMIT {
        out.push_str("..");
    }
    if out.is_empty() {
        out.push_str("(empty)");
    }
    out
}
