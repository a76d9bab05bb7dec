//! Demo host application: streams a synthetic test pattern so the server
//! can be pointed at with any RTSP player.

use std::thread;
use std::time::Duration;

use clap::Parser;
use rtsp_cam::{Server, ServerConfig, TransportType};

#[derive(Parser)]
#[command(
    name = "rtsp-cam",
    about = "RTSP server streaming a synthetic MJPEG test pattern"
)]
struct Args {
    /// RTSP listener port
    #[arg(long, short, default_value_t = 8554)]
    port: u16,

    /// Frames per second for the synthetic producer
    #[arg(long, default_value_t = 25)]
    fps: u32,

    /// Also stream an FPS overlay as T.140 subtitles
    #[arg(long)]
    subtitles: bool,
}

/// A minimal baseline JPEG shell around a noise payload — real players
/// show garbage, packet analyzers show a well-formed stream.
fn synthetic_frame(counter: u32) -> Vec<u8> {
    let mut frame = vec![0xFF, 0xD8, 0xFF, 0xDB];
    frame.extend((0..20_000u32).map(|i| (i.wrapping_mul(counter.wrapping_add(7))) as u8));
    frame.extend([0xFF, 0xD9]);
    frame
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let transport = if args.subtitles {
        TransportType::VideoAndSubtitles
    } else {
        TransportType::VideoOnly
    };

    let mut server = match Server::new(ServerConfig {
        transport,
        rtsp_port: args.port,
        ..ServerConfig::default()
    }) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("bad configuration: {}", e);
            return;
        }
    };

    if let Err(e) = server.start() {
        eprintln!("failed to start server: {}", e);
        return;
    }
    println!("rtsp://0.0.0.0:{}/ — ctrl-c to stop", args.port);

    let frame_interval = Duration::from_millis(1000 / u64::from(args.fps.max(1)));
    let mut counter = 0u32;
    let mut last_subtitle = std::time::Instant::now();

    loop {
        counter = counter.wrapping_add(1);
        if server.ready_for_frame() {
            let frame = synthetic_frame(counter);
            if let Err(e) = server.push_frame(&frame, 60, 640, 480) {
                eprintln!("push_frame: {}", e);
            }
        }
        if args.subtitles && last_subtitle.elapsed() >= Duration::from_secs(1) {
            last_subtitle = std::time::Instant::now();
            server.push_subtitle(&format!("FPS: {}", server.rtp_fps()));
        }
        thread::sleep(frame_interval);
    }
}
