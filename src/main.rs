//! vcam-proxy binary: dumps raw frames read through the camera proxy.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};
use vcam_proxy::config::DEFAULT_DEVICE_PATH;
use vcam_proxy::{
    ProxyConfig, ProxyDevice, Registration, V4L2Backend, VideoDeviceDescriptor,
    VideoFileOperations,
};

/// Pause between reads while the device has no data ready.
const RETRY_DELAY: Duration = Duration::from_millis(5);

/// Give up on a frame after this long without progress.
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "vcam-proxy")]
#[command(about = "Capture raw YUYV frames through the single-device camera proxy")]
#[command(version)]
struct Cli {
    /// Underlying capture device
    #[arg(short, long, default_value = DEFAULT_DEVICE_PATH)]
    device: PathBuf,

    /// Frame width in pixels
    #[arg(long, default_value = "640")]
    width: u32,

    /// Frame height in pixels
    #[arg(long, default_value = "480")]
    height: u32,

    /// Number of frames to capture
    #[arg(short, long, default_value = "1")]
    frames: u32,

    /// Output file for the raw frames
    #[arg(short, long, default_value = "file.raw")]
    output: PathBuf,
}

type BoxResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    // Set RUST_LOG to control log level, e.g. RUST_LOG=vcam_proxy=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> BoxResult<()> {
    let proxy = ProxyDevice::new(V4L2Backend, ProxyConfig::new(&cli.device));
    let registration = Registration::register(VideoDeviceDescriptor::VCAM, proxy);
    let ops = registration.ops();

    ops.open()?;
    if let Some(caps) = ops.capabilities() {
        println!("Device: {}", caps.card);
        println!("Driver: {}", caps.driver);
    }

    let result = capture(ops, cli);
    VideoFileOperations::release(ops)?;
    result
}

fn capture<F: VideoFileOperations>(ops: &F, cli: &Cli) -> BoxResult<()> {
    // YUYV: 2 bytes per pixel
    let frame_size = usize::try_from(u64::from(cli.width) * u64::from(cli.height) * 2)?;
    let mut frame = vec![0u8; frame_size];
    let mut output = BufWriter::new(File::create(&cli.output)?);

    for index in 0..cli.frames {
        read_frame(ops, &mut frame)?;
        output.write_all(&frame)?;
        println!("Frame {index}: {frame_size} bytes");
    }

    output.flush()?;
    info!(
        frames = cli.frames,
        output = %cli.output.display(),
        "Capture finished"
    );
    Ok(())
}

/// Fill `frame` completely, retrying short and not-ready reads.
fn read_frame<F: VideoFileOperations>(ops: &F, frame: &mut [u8]) -> BoxResult<()> {
    let mut filled = 0;
    let mut last_progress = Instant::now();

    while let Some(rest) = frame.get_mut(filled..).filter(|rest| !rest.is_empty()) {
        match ops.read(rest) {
            Ok(0) => {}
            Ok(count) => {
                filled += count;
                last_progress = Instant::now();
                continue;
            }
            Err(err) if err.is_retryable() => {}
            Err(err) => return Err(err.into()),
        }

        if last_progress.elapsed() > FRAME_TIMEOUT {
            warn!(filled, size = frame.len(), "Device stopped producing data");
            return Err(format!("timed out after {filled} of {} bytes", frame.len()).into());
        }
        thread::sleep(RETRY_DELAY);
    }

    Ok(())
}
