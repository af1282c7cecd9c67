use clap::Parser;
use midibridge::{BridgeConfig, BridgeSession};
use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

// The handler only flips the flag; all teardown runs on the main thread's
// normal control flow.
extern "C" fn request_shutdown(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

/// Connect serial port MIDI devices to JACK.
#[derive(Parser, Debug)]
#[command(name = "midibridge", version, about)]
struct Args {
    /// Serial device to use
    #[arg(short = 's', long, default_value = "/dev/ttyUSB0")]
    device: String,

    /// Serial port baud rate
    #[arg(short, long, default_value_t = 31250)]
    baud: u32,

    /// Name of the JACK client
    #[arg(short, long, default_value = "midibridge")]
    name: String,

    /// JACK port to connect our MIDI input to, when present
    #[arg(short, long)]
    connect: Option<String>,

    /// Increase log verbosity (-v for debug, -vv for per-byte tracing)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn install_signal_handlers() {
    // No SA_RESTART: the serial reader's blocking read must see EINTR.
    let action = SigAction::new(
        SigHandler::Handler(request_shutdown),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        let _ = signal::sigaction(Signal::SIGINT, &action);
        let _ = signal::sigaction(Signal::SIGTERM, &action);
    }
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");

    let config = BridgeConfig {
        device: args.device,
        baud: args.baud,
        client_name: args.name,
        auto_connect: args.connect,
    };

    let session = match BridgeSession::start(config) {
        Ok(session) => session,
        Err(err) => {
            error!("{err}");
            std::process::exit(1);
        }
    };

    install_signal_handlers();
    while !SHUTDOWN.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    session.stop();
}
