mod preferences;

use clap::Parser;
use picam::{
    BeaconConfig, BeaconDiscovery, CameraSession, CaptureHandle, ConnectOutcome, ConnectTask, Frame, FrameChannel,
    RemoteControl, SessionConfig,
};
use preferences::Preferences;
use std::error::Error;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// How often the viewer drains the frame channel.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(
    name = "picam-viewer",
    about = "Headless viewer for a remote Raspberry Pi camera"
)]
struct Args {
    /// Preferences file, created with defaults if missing
    #[arg(long, short, default_value = "settings.json")]
    preferences: PathBuf,

    /// Camera name to discover (saved to preferences)
    #[arg(long, short)]
    name: Option<String>,

    /// Local port for the image stream (saved to preferences)
    #[arg(long)]
    port: Option<u16>,

    /// Seconds to wait for a discovery answer per connect attempt
    #[arg(long, default_value_t = 3)]
    attempt_timeout: u64,

    /// Where to send discovery queries (default: broadcast on port 9999)
    #[arg(long)]
    beacon: Option<SocketAddr>,

    /// Address announced to the camera instead of the auto-detected one
    #[arg(long)]
    advertise: Option<IpAddr>,

    /// Change a camera setting after connecting, e.g. --set servos.pan=120
    #[arg(long = "set", value_name = "PATH=VALUE", value_parser = parse_assignment)]
    set: Vec<(String, String)>,

    /// Print the camera's settings after connecting
    #[arg(long)]
    show_settings: bool,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Save the last received frame here on exit
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

fn parse_assignment(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((path, value)) if !path.is_empty() => Ok((path.trim().to_string(), value.trim().to_string())),
        _ => Err(format!("expected PATH=VALUE, got {arg:?}")),
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("picam-viewer: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut prefs = Preferences::load_or_create(&args.preferences)?;
    let before = prefs.clone();
    if let Some(name) = &args.name {
        prefs.camera.name = name.clone();
    }
    if let Some(port) = args.port {
        prefs.camera.port = port;
    }
    if prefs != before {
        prefs.save(&args.preferences)?;
    }

    let mut beacon = BeaconConfig::default();
    if let Some(addr) = args.beacon {
        beacon.beacon_addr = addr;
    }
    let config = SessionConfig {
        advertise_host: args.advertise,
        ..SessionConfig::new(&prefs.camera.name, prefs.camera.port)
    };
    let session = CameraSession::new(config, Arc::new(BeaconDiscovery::new(beacon)));

    let enter = watch_enter();

    println!("Searching for camera {:?}, press Enter to cancel", prefs.camera.name);
    let task = ConnectTask::spawn(session, Duration::from_secs(args.attempt_timeout));
    while !task.is_finished() {
        if enter.load(Ordering::SeqCst) && !task.is_cancelled() {
            task.cancel();
        }
        thread::sleep(POLL_INTERVAL);
    }
    let session = match task.join()? {
        ConnectOutcome::Connected(session) => session,
        ConnectOutcome::Cancelled(_) => {
            println!("Search cancelled");
            return Ok(());
        }
        ConnectOutcome::Failed(_, e) => return Err(e.into()),
    };
    enter.store(false, Ordering::SeqCst);

    if let Some(remote) = session.remote_addr() {
        println!("Connected to {} at {}, press Enter to stop", prefs.camera.name, remote);
    }

    if args.show_settings {
        print_settings(&session);
    }
    let control = session.control();
    apply_settings(&control, &args.set)?;

    let channel = FrameChannel::default();
    let capture = CaptureHandle::spawn(session, channel.clone())?;
    let mut last: Option<Frame> = None;
    let mut shown = 0u64;

    'view: loop {
        while let Some(frame) = channel.try_pop() {
            println!(
                "frame {}: {}x{}, {} bytes",
                frame.sequence(),
                frame.width(),
                frame.height(),
                frame.encoded_len()
            );
            shown += 1;
            last = Some(frame);
            if args.frames.is_some_and(|limit| shown >= limit) {
                break 'view;
            }
        }

        if enter.load(Ordering::SeqCst) || (capture.is_finished() && channel.is_empty()) {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let ended_by_camera = capture.is_finished();
    capture.stop_and_join()?;
    if ended_by_camera {
        println!("Camera closed the stream");
    }
    println!("{} frame(s) shown, {} dropped by the channel", shown, channel.evicted());

    if let Some(path) = &args.snapshot {
        match &last {
            Some(frame) => {
                frame.save(path)?;
                println!("Saved frame {} to {}", frame.sequence(), path.display());
            }
            None => eprintln!("No frame received, nothing saved to {}", path.display()),
        }
    }

    Ok(())
}

/// Set a flag each time a line (Enter) arrives on stdin.
fn watch_enter() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let setter = flag.clone();
    thread::spawn(move || {
        let mut line = String::new();
        loop {
            line.clear();
            match io::stdin().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => setter.store(true, Ordering::SeqCst),
            }
        }
    });
    flag
}

fn print_settings(session: &CameraSession) {
    session.settings().read(|doc| {
        for (path, parameter) in doc.leaves() {
            let current = parameter.current().unwrap_or_default();
            println!("  {:<20} {:<12} {}", path, parameter.kind(), current);
        }
    });
}

/// Write `--set` values into the local draft and push it to the camera.
fn apply_settings(control: &RemoteControl, assignments: &[(String, String)]) -> picam::Result<()> {
    if assignments.is_empty() {
        return Ok(());
    }

    for (path, value) in assignments {
        control.settings().assign(path, value)?;
    }
    let wanted = control.settings().snapshot();

    if control.update_settings()? {
        println!("Camera accepted {} setting change(s)", assignments.len());
        return Ok(());
    }

    control.settings().read(|actual| {
        for (path, _) in assignments {
            let asked = wanted.get(path).and_then(|p| p.current());
            let got = actual.get(path).and_then(|p| p.current());
            if asked != got {
                eprintln!(
                    "Camera rejected {} = {}, kept {}",
                    path,
                    asked.unwrap_or_default(),
                    got.unwrap_or_default()
                );
            }
        }
    });
    Ok(())
}
